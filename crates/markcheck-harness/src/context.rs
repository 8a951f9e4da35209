//! Per-case state handed to strategies, and run counters.

use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::CaseError;
use crate::golden::{self, GoldenMode, GoldenOutcome};
use crate::registry::CaseFiles;

/// A golden that was rewritten, removed, or failed to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub golden: PathBuf,
    pub outcome: GoldenOutcome,
    /// SHA-256 of the produced artifact.
    pub sha256: String,
}

/// State owned by the driver and lent to one strategy call at a time.
#[derive(Debug)]
pub struct TestContext {
    /// Library diagnostics captured during the current case.
    pub diagnostics: DiagnosticSink,
    pub mode: GoldenMode,
    /// Directory for temporary artifacts.
    pub out_dir: PathBuf,
    /// Iterations per worker for thread stress suites.
    pub thread_repeat: usize,
    artifacts: Vec<ArtifactRecord>,
}

impl TestContext {
    #[must_use]
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            diagnostics: DiagnosticSink::new(),
            mode: config.golden_mode(),
            out_dir: config.out_dir.clone(),
            thread_repeat: config.thread_repeat,
            artifacts: Vec::new(),
        }
    }

    /// Prepare for the next case.
    pub fn reset(&mut self) {
        self.diagnostics.reset();
        self.artifacts.clear();
    }

    /// Goldens touched or failed by the current case.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }

    /// Scratch path for an artifact of the current case.
    #[must_use]
    pub fn temp_path(&self, files: &CaseFiles, extension: &str) -> PathBuf {
        let base = files.base_name().unwrap_or("case");
        self.out_dir
            .join(format!("{base}-{}.{extension}", std::process::id()))
    }

    /// Check `produced` against the result golden, if the suite has one.
    pub fn check_result(&mut self, files: &CaseFiles, produced: &[u8]) -> Result<(), CaseError> {
        let Some(golden_path) = files.result.as_deref() else {
            return Ok(());
        };
        let outcome = golden::check_bytes(produced, golden_path, self.mode)?;
        self.record(golden_path, outcome, produced);
        if outcome.is_failure() {
            return Err(result_mismatch(files, golden_path));
        }
        Ok(())
    }

    /// Check an artifact on disk against the result golden.
    pub fn check_result_file(&mut self, files: &CaseFiles, produced: &Path) -> Result<(), CaseError> {
        let Some(golden_path) = files.result.as_deref() else {
            return Ok(());
        };
        let outcome = golden::check_file(produced, golden_path, self.mode)?;
        if outcome != GoldenOutcome::Matched {
            let data = std::fs::read(produced).map_err(|source| CaseError::Io {
                path: produced.to_path_buf(),
                source,
            })?;
            self.record(golden_path, outcome, &data);
        }
        if outcome.is_failure() {
            return Err(result_mismatch(files, golden_path));
        }
        Ok(())
    }

    /// Check captured diagnostics against the error golden, if the suite
    /// has one.
    pub fn check_errors(&mut self, files: &CaseFiles) -> Result<(), CaseError> {
        let Some(golden_path) = files.error.as_deref() else {
            return Ok(());
        };
        let captured = self.diagnostics.as_bytes().to_vec();
        let outcome = golden::check_bytes(&captured, golden_path, self.mode)?;
        self.record(golden_path, outcome, &captured);
        if outcome.is_failure() {
            return Err(CaseError::ErrorMismatch {
                file: files.label.clone(),
            });
        }
        Ok(())
    }

    fn record(&mut self, golden_path: &Path, outcome: GoldenOutcome, produced: &[u8]) {
        if outcome == GoldenOutcome::Matched {
            return;
        }
        self.artifacts.push(ArtifactRecord {
            golden: golden_path.to_path_buf(),
            outcome,
            sha256: golden::sha256_hex(produced),
        });
    }
}

fn result_mismatch(files: &CaseFiles, golden_path: &Path) -> CaseError {
    CaseError::ResultMismatch {
        file: files.label.clone(),
        golden: golden_path.display().to_string(),
    }
}

/// Tests run, failures, and leaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub tests: u32,
    pub errors: u32,
    pub leaks: u32,
}

impl RunCounters {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.leaks == 0
    }
}

impl AddAssign for RunCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.tests += rhs.tests;
        self.errors += rhs.errors;
        self.leaks += rhs.leaks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(dir: &Path, mode: GoldenMode) -> TestContext {
        let config = HarnessConfig {
            out_dir: dir.to_path_buf(),
            update: mode == GoldenMode::Update,
            ..HarnessConfig::default()
        };
        TestContext::new(&config)
    }

    fn files(dir: &Path) -> CaseFiles {
        CaseFiles {
            input: Some(dir.join("test").join("a.xml")),
            label: "test/a.xml".into(),
            result: Some(dir.join("result").join("a.xml")),
            error: Some(dir.join("result").join("a.xml.err")),
        }
    }

    #[test]
    fn update_records_digest_then_compare_matches() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(dir.path());

        let mut ctx = context(dir.path(), GoldenMode::Update);
        ctx.check_result(&files, b"<a/>\n").unwrap();
        assert_eq!(ctx.artifacts().len(), 1);
        assert_eq!(ctx.artifacts()[0].outcome, GoldenOutcome::Written);
        assert_eq!(ctx.artifacts()[0].sha256, golden::sha256_hex(b"<a/>\n"));

        let mut ctx = context(dir.path(), GoldenMode::Compare);
        ctx.check_result(&files, b"<a/>\n").unwrap();
        assert!(ctx.artifacts().is_empty());
        let err = ctx.check_result(&files, b"<b/>\n").unwrap_err();
        assert_eq!(err.status(), 1);
        assert_eq!(ctx.artifacts()[0].outcome, GoldenOutcome::Mismatched);
    }

    #[test]
    fn diagnostics_compare_against_error_golden() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(dir.path());
        let mut ctx = context(dir.path(), GoldenMode::Compare);
        ctx.check_errors(&files).unwrap();

        ctx.diagnostics.emit(format_args!("test/a.xml:1: parser error : x\n"));
        let err = ctx.check_errors(&files).unwrap_err();
        assert_eq!(err.to_string(), "Error for test/a.xml failed");

        ctx.reset();
        assert!(ctx.diagnostics.is_empty());
        assert!(ctx.artifacts().is_empty());
    }

    #[test]
    fn temp_paths_live_in_out_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), GoldenMode::Compare);
        let path = ctx.temp_path(&files(dir.path()), "res");
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(path.to_string_lossy().ends_with(".res"));
    }

    #[test]
    fn counters_accumulate() {
        let mut total = RunCounters::default();
        total += RunCounters {
            tests: 3,
            errors: 1,
            leaks: 0,
        };
        total += RunCounters {
            tests: 2,
            errors: 0,
            leaks: 1,
        };
        assert_eq!(
            total,
            RunCounters {
                tests: 5,
                errors: 1,
                leaks: 1
            }
        );
        assert!(!total.is_clean());
    }
}
