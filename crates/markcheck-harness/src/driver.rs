//! Execution driver: runs the selected suites case by case and keeps the
//! counters.

use std::io::Write;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;
use crate::context::{RunCounters, TestContext};
use crate::enumerate;
use crate::error::{CaseError, HarnessError};
use crate::registry::{CaseFiles, TestCase};
use crate::sentinel::LeakSentinel;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

/// Counters for one suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub description: String,
    pub counters: RunCounters,
}

/// Counters for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub suites: Vec<SuiteSummary>,
    pub total: RunCounters,
}

impl RunSummary {
    /// Process exit code: 0 only when nothing failed and nothing leaked.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.total.is_clean())
    }
}

/// What happened to one case.
enum CaseOutcome {
    Passed,
    Failed(CaseError),
    Leaked(i64),
}

/// Runs suites from a registry under one configuration.
pub struct Driver<'r> {
    registry: &'r [TestCase],
    config: HarnessConfig,
    log: Option<LogEmitter>,
}

impl std::fmt::Debug for Driver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("suites", &self.registry.len())
            .field("config", &self.config)
            .field("log", &self.log)
            .finish()
    }
}

impl<'r> Driver<'r> {
    #[must_use]
    pub fn new(registry: &'r [TestCase], config: HarnessConfig) -> Self {
        Self {
            registry,
            config,
            log: None,
        }
    }

    /// Mirror every case result into a structured log.
    #[must_use]
    pub fn with_log(mut self, emitter: LogEmitter) -> Self {
        self.log = Some(emitter);
        self
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Suites picked by the configured filters. A suite is picked when its
    /// description contains any filter, ignoring case. No filters, or
    /// filters that match nothing, pick every suite.
    #[must_use]
    pub fn selected(&self) -> Vec<&'r TestCase> {
        let registry = self.registry;
        let picked: Vec<&TestCase> = registry
            .iter()
            .filter(|case| self.config.filters.iter().any(|f| case.matches(f)))
            .collect();
        if picked.is_empty() {
            registry.iter().collect()
        } else {
            picked
        }
    }

    /// Run the selected suites, writing progress to `out` and failures to
    /// `err`.
    pub fn run(&mut self, out: &mut dyn Write, err: &mut dyn Write) -> Result<RunSummary, HarnessError> {
        markcheck_core::initialize();
        let details = serde_json::json!({
            "root": self.config.root.display().to_string(),
            "update": self.config.update,
            "filters": self.config.filters,
        });
        self.log_event(LogLevel::Info, "run_start", |entry| entry.with_details(details))?;

        let mut ctx = TestContext::new(&self.config);
        let mut summary = RunSummary::default();
        for case in self.selected() {
            let counters = self.run_suite(case, &mut ctx, out, err)?;
            summary.total += counters;
            summary.suites.push(SuiteSummary {
                description: case.description.to_owned(),
                counters,
            });
        }

        let total = summary.total;
        if total.is_clean() {
            writeln!(out, "Total {} tests, no errors", total.tests)
        } else {
            writeln!(
                out,
                "Total {} tests, {} errors, {} leaks",
                total.tests, total.errors, total.leaks
            )
        }
        .map_err(HarnessError::Console)?;

        let exit_code = summary.exit_code();
        self.log_event(LogLevel::Info, "run_end", |entry| {
            entry.with_details(serde_json::json!({
                "tests": total.tests,
                "errors": total.errors,
                "leaks": total.leaks,
                "exit_code": exit_code,
            }))
        })?;
        if let Some(log) = self.log.as_mut() {
            log.flush().map_err(HarnessError::Log)?;
        }
        Ok(summary)
    }

    fn run_suite(
        &mut self,
        case: &TestCase,
        ctx: &mut TestContext,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<RunCounters, HarnessError> {
        if !self.config.quiet {
            writeln!(out, "## {}", case.description).map_err(HarnessError::Console)?;
        }
        self.log_event(LogLevel::Info, "suite_start", |entry| {
            entry.with_suite(case.description)
        })?;

        let mut counters = RunCounters::default();
        match case.input_glob {
            Some(pattern) => {
                for input in enumerate::expand(&self.config.root, pattern) {
                    let files = case.files_for(&self.config.root, &input);
                    self.run_case(case, &files, ctx, err, &mut counters)?;
                }
            }
            None => {
                let files = case.self_contained_files();
                self.run_case(case, &files, ctx, err, &mut counters)?;
            }
        }

        if self.config.verbose {
            if counters.is_clean() {
                writeln!(out, "Ran {} tests, no errors", counters.tests)
            } else {
                writeln!(
                    out,
                    "Ran {} tests, {} errors, {} leaks",
                    counters.tests, counters.errors, counters.leaks
                )
            }
            .map_err(HarnessError::Console)?;
        }
        self.log_event(LogLevel::Info, "suite_end", |entry| {
            entry.with_suite(case.description).with_details(serde_json::json!({
                "tests": counters.tests,
                "errors": counters.errors,
                "leaks": counters.leaks,
            }))
        })?;
        Ok(counters)
    }

    fn run_case(
        &mut self,
        case: &TestCase,
        files: &CaseFiles,
        ctx: &mut TestContext,
        err: &mut dyn Write,
        counters: &mut RunCounters,
    ) -> Result<(), HarnessError> {
        ctx.reset();
        let started = Instant::now();
        let sentinel = LeakSentinel::arm();
        let result = case.strategy.run(ctx, files, case.options);
        let leaked = sentinel.leaked();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        counters.tests += 1;

        let outcome = match result {
            Err(error) => CaseOutcome::Failed(error),
            Ok(()) if leaked != 0 => CaseOutcome::Leaked(leaked),
            Ok(()) => CaseOutcome::Passed,
        };
        match &outcome {
            CaseOutcome::Failed(error) => {
                counters.errors += 1;
                writeln!(err, "{error}")
                    .and_then(|()| writeln!(err, "File {} generated an error", files.label))
                    .map_err(HarnessError::Console)?;
            }
            CaseOutcome::Leaked(bytes) => {
                counters.leaks += 1;
                writeln!(err, "File {} leaked {bytes} bytes", files.label)
                    .map_err(HarnessError::Console)?;
            }
            CaseOutcome::Passed => {}
        }

        let artifacts: Vec<String> = ctx
            .artifacts()
            .iter()
            .map(|a| format!("{}@sha256:{}", a.golden.display(), a.sha256))
            .collect();
        let truncated = ctx.diagnostics.is_truncated();
        self.log_event(LogLevel::Info, "case_result", |entry| {
            let entry = entry
                .with_suite(case.description)
                .with_input(files.label.as_str())
                .with_duration_ms(duration_ms);
            let entry = if artifacts.is_empty() {
                entry
            } else {
                entry.with_artifacts(artifacts)
            };
            let mut entry = match &outcome {
                CaseOutcome::Passed => entry.with_outcome(Outcome::Pass).with_status(0),
                CaseOutcome::Leaked(bytes) => LogEntry {
                    level: LogLevel::Warn,
                    ..entry
                }
                .with_outcome(Outcome::Leak)
                .with_status(0)
                .with_leaked_bytes(*bytes),
                CaseOutcome::Failed(error) => LogEntry {
                    level: LogLevel::Error,
                    ..entry
                }
                .with_outcome(if error.is_infrastructure() {
                    Outcome::Error
                } else {
                    Outcome::Fail
                })
                .with_status(error.status())
                .with_details(serde_json::json!({ "message": error.to_string() })),
            };
            if truncated {
                let details = entry.details.get_or_insert_with(|| serde_json::json!({}));
                if let Some(map) = details.as_object_mut() {
                    map.insert("diagnostics_truncated".into(), serde_json::Value::Bool(true));
                }
            }
            entry
        })
    }

    /// Build and write one log entry when a log is attached.
    fn log_event(
        &mut self,
        level: LogLevel,
        event: &str,
        fill: impl FnOnce(LogEntry) -> LogEntry,
    ) -> Result<(), HarnessError> {
        let Some(log) = self.log.as_mut() else {
            return Ok(());
        };
        let entry = fill(log.entry(level, event));
        log.emit(&entry).map_err(HarnessError::Log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TestOptions;
    use crate::registry::TestStrategy;

    struct Fixed {
        fail: bool,
    }

    impl TestStrategy for Fixed {
        fn run(
            &self,
            _ctx: &mut TestContext,
            files: &CaseFiles,
            _options: TestOptions,
        ) -> Result<(), CaseError> {
            if self.fail {
                return Err(CaseError::ErrorMismatch {
                    file: files.label.clone(),
                });
            }
            Ok(())
        }
    }

    struct Noisy;

    impl TestStrategy for Noisy {
        fn run(
            &self,
            ctx: &mut TestContext,
            _files: &CaseFiles,
            _options: TestOptions,
        ) -> Result<(), CaseError> {
            let flood = "x".repeat(crate::diagnostics::DIAGNOSTIC_CAPACITY + 1);
            ctx.diagnostics.emit(format_args!("{flood}"));
            Ok(())
        }
    }

    fn registry() -> Vec<TestCase> {
        vec![
            TestCase::new("Passing suite", Fixed { fail: false }),
            TestCase::new("Failing suite", Fixed { fail: true }),
        ]
    }

    fn run(config: HarnessConfig, registry: &[TestCase]) -> (RunSummary, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let summary = Driver::new(registry, config).run(&mut out, &mut err).unwrap();
        (
            summary,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn counts_and_reports_failures() {
        let registry = registry();
        let config = HarnessConfig {
            verbose: true,
            ..HarnessConfig::default()
        };
        let (summary, out, err) = run(config, &registry);
        assert_eq!(summary.total.tests, 2);
        assert_eq!(summary.total.errors, 1);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(
            out,
            "## Passing suite\nRan 1 tests, no errors\n\
             ## Failing suite\nRan 1 tests, 1 errors, 0 leaks\n\
             Total 2 tests, 1 errors, 0 leaks\n"
        );
        assert_eq!(
            err,
            "Error for Failing suite failed\nFile Failing suite generated an error\n"
        );
    }

    #[test]
    fn filter_selects_suites_case_insensitively() {
        let registry = registry();
        let config = HarnessConfig {
            quiet: true,
            filters: vec!["PASSING".into()],
            ..HarnessConfig::default()
        };
        let (summary, out, _) = run(config, &registry);
        assert_eq!(summary.suites.len(), 1);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(out, "Total 1 tests, no errors\n");
    }

    #[test]
    fn unmatched_filter_runs_everything() {
        let registry = registry();
        let config = HarnessConfig {
            quiet: true,
            filters: vec!["nothing like this".into()],
            ..HarnessConfig::default()
        };
        let (summary, _, _) = run(config, &registry);
        assert_eq!(summary.suites.len(), 2);
    }

    #[test]
    fn log_records_each_case() {
        let registry = registry();
        let (emitter, buffer) = LogEmitter::to_buffer("unit");
        let mut out = Vec::new();
        let mut err = Vec::new();
        Driver::new(&registry, HarnessConfig::default())
            .with_log(emitter)
            .run(&mut out, &mut err)
            .unwrap();
        let text = buffer.contents();
        let entries: Vec<LogEntry> = text
            .lines()
            .enumerate()
            .map(|(i, line)| crate::structured_log::validate_log_line(line, i + 1).unwrap())
            .collect();
        let events: Vec<&str> = entries.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            events,
            [
                "run_start",
                "suite_start",
                "case_result",
                "suite_end",
                "suite_start",
                "case_result",
                "suite_end",
                "run_end"
            ]
        );
        assert_eq!(entries[2].outcome, Some(Outcome::Pass));
        assert_eq!(entries[5].outcome, Some(Outcome::Fail));
        assert_eq!(entries[5].status, Some(1));
    }

    #[test]
    fn truncated_diagnostics_are_flagged_in_log() {
        let registry = vec![
            TestCase::new("Noisy suite", Noisy),
            TestCase::new("Passing suite", Fixed { fail: false }),
        ];
        let (emitter, buffer) = LogEmitter::to_buffer("unit");
        let mut out = Vec::new();
        let mut err = Vec::new();
        let summary = Driver::new(&registry, HarnessConfig::default())
            .with_log(emitter)
            .run(&mut out, &mut err)
            .unwrap();
        assert_eq!(summary.exit_code(), 0);
        let text = buffer.contents();
        let cases: Vec<LogEntry> = text
            .lines()
            .enumerate()
            .map(|(i, line)| crate::structured_log::validate_log_line(line, i + 1).unwrap())
            .filter(|e| e.event == "case_result")
            .collect();
        assert_eq!(cases.len(), 2);
        assert_eq!(
            cases[0].details.as_ref().unwrap()["diagnostics_truncated"],
            serde_json::Value::Bool(true)
        );
        assert!(cases[1].details.is_none());
    }
}
