//! # markcheck-core
//!
//! Reference markup library exercised by the markcheck regression harness.
//!
//! This crate provides:
//! - An incremental (push) parser for XML and loose HTML with observable
//!   buffering state
//! - A tree builder, reader-style tree walk, and canonical serializers
//! - Structured diagnostics routed through a caller-supplied handler
//! - Per-thread live allocation accounting for leak detection
//! - A shared public/system identifier catalog

#![deny(unsafe_code)]

pub mod catalog;
pub mod diag;
pub mod entities;
pub mod error;
pub mod handler;
pub mod memory;
pub mod options;
pub mod push;
pub mod serialize;
pub mod tree;

use std::io::Read;
use std::path::Path;
use std::sync::Once;

pub use catalog::Catalog;
pub use diag::{Diagnostic, DiagnosticHandler, Domain, Level};
pub use error::ParseError;
pub use handler::{Attribute, ContentHandler, NullHandler};
pub use options::ParseOptions;
pub use push::{LexicalState, PushParser, Syntax};
pub use tree::{Document, NodeId, NodeKind, TreeBuilder};

/// Chunk size used when parsing from a reader.
pub const READ_CHUNK: usize = 4096;

static INIT: Once = Once::new();

/// One-time library setup for test runs.
///
/// Disables catalog loading from the environment and installs an empty
/// process catalog, so resolution never depends on the host. Safe to call
/// any number of times from any thread.
pub fn initialize() {
    INIT.call_once(|| {
        catalog::disable_external_loading();
        let _ = catalog::global();
    });
}

/// Parse an in-memory document. `file` labels diagnostics.
///
/// XML input that is not well-formed fails unless [`ParseOptions::RECOVER`]
/// is set. Loose HTML always produces a document.
pub fn parse_bytes(
    data: &[u8],
    file: &str,
    syntax: Syntax,
    options: ParseOptions,
    diagnostics: &mut dyn DiagnosticHandler,
) -> Result<Document, ParseError> {
    let mut parser = PushParser::new(syntax, options, file);
    let mut builder = TreeBuilder::new(syntax);
    parser.feed(data, true, &mut builder, diagnostics);
    finish(&parser, builder, file, options)
}

/// Parse a file from disk.
pub fn parse_file(
    path: &Path,
    file: &str,
    syntax: Syntax,
    options: ParseOptions,
    diagnostics: &mut dyn DiagnosticHandler,
) -> Result<Document, ParseError> {
    let data = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bytes(&data, file, syntax, options, diagnostics)
}

/// Parse from a reader in [`READ_CHUNK`]-sized pieces.
pub fn parse_reader<R: Read>(
    mut reader: R,
    file: &str,
    syntax: Syntax,
    options: ParseOptions,
    diagnostics: &mut dyn DiagnosticHandler,
) -> Result<Document, ParseError> {
    let mut parser = PushParser::new(syntax, options, file);
    let mut builder = TreeBuilder::new(syntax);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).map_err(|source| ParseError::Io {
            path: file.into(),
            source,
        })?;
        if n == 0 {
            break;
        }
        parser.feed(&chunk[..n], false, &mut builder, diagnostics);
    }
    parser.feed(&[], true, &mut builder, diagnostics);
    finish(&parser, builder, file, options)
}

/// Turn a completed parse into a result.
pub fn finish(
    parser: &PushParser,
    builder: TreeBuilder,
    file: &str,
    options: ParseOptions,
) -> Result<Document, ParseError> {
    let doc = builder.into_document();
    if parser.syntax() == Syntax::Html {
        return Ok(doc);
    }
    if !parser.is_well_formed() && !options.contains(ParseOptions::RECOVER) {
        return Err(ParseError::NotWellFormed { file: file.into() });
    }
    if doc.root().is_none() {
        return Err(ParseError::Empty { file: file.into() });
    }
    Ok(doc)
}
