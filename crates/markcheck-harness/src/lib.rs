//! Golden-master regression harness for markcheck-core.
//!
//! This crate provides:
//! - A registry of test suites binding fixture globs to strategies
//! - Golden comparison and update of produced artifacts
//! - A bounded diagnostic sink and a per-case leak sentinel
//! - A byte-at-a-time push boundary verifier
//! - The execution driver, structured JSONL run log, and JSON run report

#![forbid(unsafe_code)]

pub mod boundary;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod driver;
pub mod enumerate;
pub mod error;
pub mod golden;
pub mod options;
pub mod registry;
pub mod report;
pub mod sentinel;
pub mod strategies;
pub mod structured_log;

pub use boundary::{BoundaryReport, BoundaryViolation, LookaheadPolicy};
pub use config::HarnessConfig;
pub use context::{RunCounters, TestContext};
pub use driver::{Driver, RunSummary, SuiteSummary};
pub use error::{CaseError, GoldenError, HarnessError};
pub use golden::{GoldenMode, GoldenOutcome};
pub use options::TestOptions;
pub use registry::{CaseFiles, TestCase, TestStrategy, default_registry};
pub use report::RunReport;
