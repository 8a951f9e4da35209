//! JSON summary of a run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::RunCounters;
use crate::driver::{RunSummary, SuiteSummary};
use crate::error::HarnessError;

/// Per-suite and total counters, as written by `--report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub suites: Vec<SuiteSummary>,
    pub total: RunCounters,
    pub exit_code: u8,
}

impl From<&RunSummary> for RunReport {
    fn from(summary: &RunSummary) -> Self {
        Self {
            suites: summary.suites.clone(),
            total: summary.total,
            exit_code: summary.exit_code(),
        }
    }
}

impl RunReport {
    /// Render the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, HarnessError> {
        serde_json::to_string_pretty(self).map_err(|source| HarnessError::Json {
            what: "run report",
            source,
        })
    }

    /// Write the report to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<(), HarnessError> {
        let json = self.to_json()?;
        let io = |source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(path, format!("{json}\n")).map_err(io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips_through_disk() {
        let summary = RunSummary {
            suites: vec![SuiteSummary {
                description: "XML regression tests".into(),
                counters: RunCounters {
                    tests: 3,
                    errors: 0,
                    leaks: 1,
                },
            }],
            total: RunCounters {
                tests: 3,
                errors: 0,
                leaks: 1,
            },
        };
        let report = RunReport::from(&summary);
        assert_eq!(report.exit_code, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        report.write(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total"]["leaks"], 1);
        assert_eq!(value["suites"][0]["description"], "XML regression tests");
        assert_eq!(value["exit_code"], 1);
    }
}
