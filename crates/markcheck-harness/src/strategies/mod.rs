//! Test strategies: the ways a fixture is pushed through the library.

mod boundary;
mod error_parse;
mod push;
mod round_trip;
mod threads;
mod tokenizer;
mod trace;
mod walker;

pub use boundary::{BoundaryStrategy, DEFAULT_EXCLUSIONS};
pub use error_parse::ErrorParseStrategy;
pub use push::{PushStrategy, FIRST_CHUNK, PUSH_CHUNK};
pub use round_trip::RoundTripStrategy;
pub use threads::ThreadStressStrategy;
pub use tokenizer::{TokenizerStrategy, TokenizerTest, parse_fixture};
pub use trace::{TraceStrategy, trace_events};
pub use walker::{WalkerStrategy, walk_lines};

use std::fs::File;

use markcheck_core::{Document, ParseError};

use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::CaseFiles;

/// How a fixture reaches the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Path handed to the library, which reads the file itself.
    File,
    /// Open file streamed through `std::io::Read`.
    Reader,
    /// Whole file read by the harness, parsed from memory.
    Memory,
}

/// Parse the case input, routing diagnostics to the context.
///
/// `Ok(None)` means the library could not build a document; the reason is
/// already in the captured diagnostics.
pub(crate) fn parse_document(
    ctx: &mut TestContext,
    files: &CaseFiles,
    mode: InputMode,
    options: TestOptions,
) -> Result<Option<Document>, CaseError> {
    let path = files.require_input()?;
    let syntax = options.syntax();
    let parse_options = options.parse_options();
    let label = files.label.as_str();
    let parsed = match mode {
        InputMode::File => {
            markcheck_core::parse_file(path, label, syntax, parse_options, &mut ctx.diagnostics)
        }
        InputMode::Reader => {
            let file = File::open(path).map_err(|source| CaseError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            markcheck_core::parse_reader(file, label, syntax, parse_options, &mut ctx.diagnostics)
        }
        InputMode::Memory => {
            let data = files.read_input()?;
            markcheck_core::parse_bytes(&data, label, syntax, parse_options, &mut ctx.diagnostics)
        }
    };
    match parsed {
        Ok(doc) => Ok(Some(doc)),
        Err(ParseError::Io { path, source }) => Err(CaseError::Io { path, source }),
        Err(ParseError::NotWellFormed { .. } | ParseError::Empty { .. }) => Ok(None),
    }
}
