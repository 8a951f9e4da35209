use markcheck_core::serialize::serialize;

use super::{InputMode, parse_document};
use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::{CaseFiles, TestStrategy};

/// Parse once and check both the serialized document and the captured
/// diagnostics. A document that could not be built serializes as nothing.
#[derive(Debug, Clone, Copy)]
pub struct ErrorParseStrategy {
    input: InputMode,
}

impl ErrorParseStrategy {
    #[must_use]
    pub fn new(input: InputMode) -> Self {
        Self { input }
    }
}

impl TestStrategy for ErrorParseStrategy {
    fn run(
        &self,
        ctx: &mut TestContext,
        files: &CaseFiles,
        options: TestOptions,
    ) -> Result<(), CaseError> {
        let produced = parse_document(ctx, files, self.input, options)?
            .map(|doc| serialize(&doc))
            .unwrap_or_default();
        ctx.check_result(files, &produced)?;
        ctx.check_errors(files)
    }
}
