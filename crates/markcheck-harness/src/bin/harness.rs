//! CLI entrypoint for the markcheck regression harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use markcheck_harness::config::normalize_args;
use markcheck_harness::structured_log::LogEmitter;
use markcheck_harness::{Driver, HarnessConfig, RunReport, default_registry};

/// Golden-master regression runs for markcheck-core.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Golden-master regression harness for markcheck-core")]
struct Cli {
    /// Print a summary line after each suite.
    #[arg(short, long)]
    verbose: bool,
    /// Rewrite goldens from the current output instead of comparing.
    #[arg(short, long)]
    update: bool,
    /// Do not print suite banners.
    #[arg(long)]
    quiet: bool,
    /// Directory for temporary artifacts.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Fixture root holding `test/` and `result/`.
    #[arg(long)]
    root: Option<PathBuf>,
    /// Structured JSONL log path.
    #[arg(long)]
    log: Option<PathBuf>,
    /// JSON run report path.
    #[arg(long)]
    report: Option<PathBuf>,
    /// Iterations per worker in the thread stress suite.
    #[arg(long)]
    thread_repeat: Option<usize>,
    /// Only run suites whose description contains one of these (any case).
    filters: Vec<String>,
}

impl Cli {
    fn apply(self, mut config: HarnessConfig) -> HarnessConfig {
        config.verbose |= self.verbose;
        config.update |= self.update;
        config.quiet |= self.quiet;
        if let Some(out) = self.out {
            config.out_dir = out;
        }
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(log) = self.log {
            config.log = Some(log);
        }
        config.report = self.report;
        if let Some(repeat) = self.thread_repeat {
            config.thread_repeat = repeat;
        }
        config.filters = self.filters;
        config
    }
}

fn run_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("run-{secs}-{}", std::process::id())
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(normalize_args(std::env::args()));
    let config = cli.apply(HarnessConfig::from_env());
    let registry = default_registry();

    let log_path = config.log.clone();
    let report_path = config.report.clone();
    let mut driver = Driver::new(&registry, config);
    if let Some(path) = log_path {
        driver = driver.with_log(LogEmitter::to_file(&path, &run_id())?);
    }

    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    let summary = driver.run(&mut stdout.lock(), &mut stderr.lock())?;

    if let Some(path) = report_path {
        RunReport::from(&summary).write(&path)?;
    }
    Ok(ExitCode::from(summary.exit_code()))
}
