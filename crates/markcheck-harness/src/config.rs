//! Run configuration.
//!
//! Defaults come from the environment and are then overridden by command
//! line flags in the `harness` binary.

use std::path::PathBuf;

use crate::golden::GoldenMode;

/// Fixture root (directory holding `test/` and `result/`).
pub const ROOT_ENV: &str = "MARKCHECK_ROOT";
/// `1` or `true` turns on update mode.
pub const UPDATE_ENV: &str = "MARKCHECK_UPDATE";
/// Structured JSONL log destination.
pub const LOG_ENV: &str = "MARKCHECK_LOG";

/// Iterations each worker performs in the thread stress suite.
pub const DEFAULT_THREAD_REPEAT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Print a per-suite summary line.
    pub verbose: bool,
    /// Rewrite goldens instead of comparing against them.
    pub update: bool,
    /// Suppress `## <suite>` banners.
    pub quiet: bool,
    /// Directory for temporary artifacts.
    pub out_dir: PathBuf,
    /// Directory fixture globs and result directories are relative to.
    pub root: PathBuf,
    pub log: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub thread_repeat: usize,
    /// Case-insensitive substrings selecting suites.
    pub filters: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            update: false,
            quiet: false,
            out_dir: std::env::temp_dir(),
            root: PathBuf::from("."),
            log: None,
            report: None,
            thread_repeat: DEFAULT_THREAD_REPEAT,
            filters: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Defaults layered with values from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults layered with values returned by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(root) = lookup(ROOT_ENV).filter(|v| !v.is_empty()) {
            config.root = PathBuf::from(root);
        }
        if let Some(update) = lookup(UPDATE_ENV) {
            config.update = env_flag(&update);
        }
        if let Some(log) = lookup(LOG_ENV).filter(|v| !v.is_empty()) {
            config.log = Some(PathBuf::from(log));
        }
        config
    }

    #[must_use]
    pub fn golden_mode(&self) -> GoldenMode {
        if self.update {
            GoldenMode::Update
        } else {
            GoldenMode::Compare
        }
    }
}

fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Rewrite legacy single-dash long flags so clap accepts them.
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| if arg == "-quiet" { "--quiet".to_owned() } else { arg })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        let config = HarnessConfig::from_lookup(|key| match key {
            ROOT_ENV => Some("/fixtures".into()),
            UPDATE_ENV => Some("TRUE".into()),
            _ => None,
        });
        assert_eq!(config.root, PathBuf::from("/fixtures"));
        assert!(config.update);
        assert_eq!(config.golden_mode(), GoldenMode::Update);
        assert_eq!(config.log, None);
    }

    #[test]
    fn unset_environment_gives_defaults() {
        let config = HarnessConfig::from_lookup(|_| None);
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.golden_mode(), GoldenMode::Compare);
    }

    #[test]
    fn legacy_quiet_flag_is_normalized() {
        let args = normalize_args(["harness", "-quiet", "-v", "XML"].map(String::from));
        assert_eq!(args, ["harness", "--quiet", "-v", "XML"]);
    }
}
