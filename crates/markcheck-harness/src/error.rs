//! Harness error types.
//!
//! [`CaseError`] is what a strategy returns for a failed case. Its
//! [`status`](CaseError::status) keeps the integer convention used in
//! reports: negative for infrastructure trouble, positive for content
//! mismatches.

use std::path::PathBuf;

use thiserror::Error;

use crate::boundary::BoundaryViolation;

/// Failure reading or writing a golden file.
#[derive(Debug, Error)]
pub enum GoldenError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single test case failed.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Golden(#[from] GoldenError),
    #[error("Failed to parse {file}")]
    Parse { file: String },
    #[error("Result for {file} failed in {golden}")]
    ResultMismatch { file: String, golden: String },
    #[error("Error for {file} failed")]
    ErrorMismatch { file: String },
    #[error("{violation}: {file}")]
    Boundary {
        file: String,
        violation: BoundaryViolation,
    },
    #[error("{path}:{line}: malformed tokenizer fixture: {message}")]
    Fixture {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("thread stress failed: {0}")]
    Thread(String),
}

impl CaseError {
    /// Integer status in the strategy-call convention.
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::Io { .. } | Self::Golden(_) | Self::Fixture { .. } | Self::Parse { .. } => -1,
            Self::ResultMismatch { .. }
            | Self::ErrorMismatch { .. }
            | Self::Boundary { .. }
            | Self::Thread(_) => 1,
        }
    }

    /// True for failures caused by the harness's environment rather than
    /// by the library's output.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        self.status() < 0
    }
}

/// Errors that stop a whole run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write console output: {0}")]
    Console(#[source] std::io::Error),
    #[error("failed to write structured log: {0}")]
    Log(#[source] std::io::Error),
    #[error("failed to serialize {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_sign_separates_infrastructure_from_mismatch() {
        let missing = CaseError::Io {
            path: "test/nope.xml".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(missing.status(), -1);
        assert!(missing.is_infrastructure());

        let mismatch = CaseError::ResultMismatch {
            file: "test/a.xml".into(),
            golden: "result/a.xml".into(),
        };
        assert_eq!(mismatch.status(), 1);
        assert_eq!(mismatch.to_string(), "Result for test/a.xml failed in result/a.xml");
    }

    #[test]
    fn boundary_message_names_the_file() {
        let err = CaseError::Boundary {
            file: "test/a.xml".into(),
            violation: BoundaryViolation::Buffer {
                avail: 7,
                consumed: 12,
            },
        };
        assert_eq!(
            err.to_string(),
            "Failed push boundary buffer test (7@12): test/a.xml"
        );
        assert_eq!(err.status(), 1);
    }
}
