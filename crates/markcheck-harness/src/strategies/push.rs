use markcheck_core::serialize::serialize;
use markcheck_core::{PushParser, TreeBuilder};

use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::{CaseFiles, TestStrategy};

/// Size of the first chunk pushed.
pub const FIRST_CHUNK: usize = 4;
/// Size of every later chunk.
pub const PUSH_CHUNK: usize = 1024;

/// Feed the fixture through the push parser in fixed chunks and check the
/// resulting tree and diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PushStrategy;

impl TestStrategy for PushStrategy {
    fn run(
        &self,
        ctx: &mut TestContext,
        files: &CaseFiles,
        options: TestOptions,
    ) -> Result<(), CaseError> {
        let data = files.read_input()?;
        let syntax = options.syntax();
        let parse_options = options.parse_options();
        let mut parser = PushParser::new(syntax, parse_options, files.label.as_str());
        let mut builder = TreeBuilder::new(syntax);

        let first = data.len().min(FIRST_CHUNK);
        parser.feed(&data[..first], first == data.len(), &mut builder, &mut ctx.diagnostics);
        let mut cur = first;
        while cur < data.len() {
            let end = (cur + PUSH_CHUNK).min(data.len());
            parser.feed(&data[cur..end], end == data.len(), &mut builder, &mut ctx.diagnostics);
            cur = end;
        }

        let doc = markcheck_core::finish(&parser, builder, &files.label, parse_options).map_err(
            |_| CaseError::Parse {
                file: files.label.clone(),
            },
        )?;
        drop(parser);
        let produced = serialize(&doc);
        drop(doc);
        ctx.check_result(files, &produced)?;
        ctx.check_errors(files)
    }
}
