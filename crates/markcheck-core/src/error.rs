//! Library error type.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A fatal well-formedness error stopped the parse and recovery was off.
    #[error("{file} is not well-formed")]
    NotWellFormed { file: String },
    /// The input contained no document element.
    #[error("{file}: document is empty")]
    Empty { file: String },
}
