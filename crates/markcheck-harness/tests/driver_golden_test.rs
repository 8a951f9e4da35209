//! Integration test: driver runs over an on-disk fixture tree.
//!
//! Validates that:
//! 1. An update run writes goldens and a following compare run is clean.
//! 2. Update mode is idempotent: a second update leaves goldens unchanged.
//! 3. A corrupted golden fails exactly the affected case, with the golden named.
//! 4. A missing golden matches only an empty artifact.
//! 5. Filters run only the matching suites.
//! 6. Leaks are counted separately from failures and reported with their size.
//! 7. A case that both fails and leaks counts as an error only.
//! 8. The structured log and JSON report describe the run.
//!
//! Run: cargo test -p markcheck-harness --test driver_golden_test

use std::path::Path;

use markcheck_core::memory::Allocation;
use markcheck_harness::strategies::{ErrorParseStrategy, InputMode, PushStrategy, RoundTripStrategy};
use markcheck_harness::structured_log::{LogEmitter, Outcome, validate_log_line};
use markcheck_harness::{
    CaseError, CaseFiles, Driver, HarnessConfig, RunReport, RunSummary, TestCase, TestContext,
    TestOptions, TestStrategy,
};

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn fixture_tree(root: &Path) {
    write(root, "test/a.xml", "<?xml version=\"1.0\"?>\n<a x=\"1\">one &amp; two</a>\n");
    write(root, "test/b.xml", "<b><c/><!-- note --></b>\n");
    write(root, "test/broken.xml", "<a><b></a>\n");
    write(root, "test/HTML/page.html", "<p>one<p>two");
}

fn registry() -> Vec<TestCase> {
    vec![
        TestCase::new("XML regression tests", RoundTripStrategy::new(InputMode::File))
            .inputs("test/[ab].xml")
            .output("result/")
            .result(""),
        TestCase::new("Error cases regression tests", ErrorParseStrategy::new(InputMode::File))
            .inputs("test/*.xml")
            .output("result/errors/")
            .result("")
            .errors(".err"),
        TestCase::new("Push HTML regression tests", PushStrategy)
            .inputs("test/HTML/*.html")
            .output("result/HTML/")
            .result("")
            .errors(".err")
            .options(TestOptions::HTML),
    ]
}

fn config(root: &Path, update: bool) -> HarnessConfig {
    HarnessConfig {
        root: root.to_path_buf(),
        out_dir: root.join("tmp"),
        update,
        quiet: true,
        ..HarnessConfig::default()
    }
}

fn run(registry: &[TestCase], config: HarnessConfig) -> (RunSummary, String, String) {
    std::fs::create_dir_all(&config.out_dir).unwrap();
    let mut out = Vec::new();
    let mut err = Vec::new();
    let summary = Driver::new(registry, config).run(&mut out, &mut err).unwrap();
    (
        summary,
        String::from_utf8(out).unwrap(),
        String::from_utf8(err).unwrap(),
    )
}

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    for entry in walk(dir) {
        let rel = entry.strip_prefix(dir).unwrap().to_string_lossy().into_owned();
        files.push((rel, std::fs::read(&entry).unwrap()));
    }
    files.sort();
    files
}

fn walk(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[test]
fn update_then_compare_is_clean_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);
    let registry = registry();

    let (summary, _, err) = run(&registry, config(root, true));
    assert_eq!(summary.exit_code(), 0, "update run failed: {err}");
    // 2 round trips, 3 error parses, 1 push
    assert_eq!(summary.total.tests, 6);

    assert_eq!(
        std::fs::read_to_string(root.join("result/HTML/page.html")).unwrap(),
        "<html><body><p>one</p><p>two</p></body></html>\n"
    );
    assert!(!root.join("result/errors/broken.xml").exists());
    assert!(
        std::fs::read_to_string(root.join("result/errors/broken.xml.err"))
            .unwrap()
            .starts_with("test/broken.xml:1: parser error : ")
    );
    assert!(!root.join("result/errors/a.xml.err").exists());

    let first = snapshot(&root.join("result"));
    let (summary, _, _) = run(&registry, config(root, true));
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(snapshot(&root.join("result")), first);

    let (summary, out, err) = run(&registry, config(root, false));
    assert_eq!(summary.exit_code(), 0, "compare run failed: {err}");
    assert!(err.is_empty());
    assert_eq!(out, "Total 6 tests, no errors\n");
}

#[test]
fn corrupted_golden_fails_only_its_case() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);
    let registry = registry();
    run(&registry, config(root, true));

    write(root, "result/b.xml", "<?xml version=\"1.0\"?>\n<b/>\n");
    let (summary, out, err) = run(&registry, config(root, false));
    assert_eq!(summary.total.errors, 1);
    assert_eq!(summary.total.leaks, 0);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.suites[0].counters.errors, 1);
    assert_eq!(summary.suites[1].counters.errors, 0);
    assert!(err.contains("Result for test/b.xml failed in "));
    assert!(err.contains("File test/b.xml generated an error\n"));
    assert!(out.ends_with("Total 6 tests, 1 errors, 0 leaks\n"));
}

#[test]
fn missing_golden_matches_only_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);
    let registry = registry();

    let mut config = config(root, false);
    config.filters = vec!["error cases".into()];
    let (summary, _, err) = run(&registry, config);
    // a.xml and b.xml serialize to something; broken.xml has diagnostics
    assert_eq!(summary.total.tests, 3);
    assert_eq!(summary.total.errors, 3);
    assert!(err.contains("Result for test/a.xml failed in "));
    assert!(err.contains("Error for test/broken.xml failed\n"));
}

#[test]
fn filter_runs_matching_suites_with_banners() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);
    let registry = registry();

    let mut config = config(root, true);
    config.quiet = false;
    config.verbose = true;
    config.filters = vec!["html".into()];
    let (summary, out, _) = run(&registry, config);
    assert_eq!(summary.suites.len(), 1);
    assert_eq!(
        out,
        "## Push HTML regression tests\nRan 1 tests, no errors\nTotal 1 tests, no errors\n"
    );
    assert!(!root.join("result/a.xml").exists());
}

struct Leaky;

impl TestStrategy for Leaky {
    fn run(&self, _ctx: &mut TestContext, _files: &CaseFiles, _options: TestOptions) -> Result<(), CaseError> {
        std::mem::forget(Allocation::new(24));
        Ok(())
    }
}

#[test]
fn leaks_are_counted_apart_from_errors() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);
    let registry = vec![
        TestCase::new("Leaky suite", Leaky)
            .inputs("test/[ab].xml")
            .output("result/"),
    ];

    let (summary, out, err) = run(&registry, config(root, false));
    assert_eq!(summary.total.tests, 2);
    assert_eq!(summary.total.errors, 0);
    assert_eq!(summary.total.leaks, 2);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(
        err,
        "File test/a.xml leaked 24 bytes\nFile test/b.xml leaked 24 bytes\n"
    );
    assert_eq!(out, "Total 2 tests, 0 errors, 2 leaks\n");
}

struct LeakyAndFailing;

impl TestStrategy for LeakyAndFailing {
    fn run(&self, _ctx: &mut TestContext, files: &CaseFiles, _options: TestOptions) -> Result<(), CaseError> {
        std::mem::forget(Allocation::new(16));
        Err(CaseError::ErrorMismatch {
            file: files.label.clone(),
        })
    }
}

#[test]
fn failing_case_that_leaks_counts_as_error_only() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);
    let registry = vec![
        TestCase::new("Leaky failing suite", LeakyAndFailing)
            .inputs("test/a.xml")
            .output("result/"),
    ];

    let (summary, out, err) = run(&registry, config(root, false));
    assert_eq!(summary.total.tests, 1);
    assert_eq!(summary.total.errors, 1);
    assert_eq!(summary.total.leaks, 0);
    assert_eq!(summary.exit_code(), 1);
    assert!(!err.contains("leaked"), "{err}");
    assert_eq!(
        err,
        "Error for test/a.xml failed\nFile test/a.xml generated an error\n"
    );
    assert_eq!(out, "Total 1 tests, 1 errors, 0 leaks\n");
}

#[test]
fn log_and_report_describe_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);
    let registry = registry();
    let config = config(root, true);
    std::fs::create_dir_all(&config.out_dir).unwrap();

    let (emitter, buffer) = LogEmitter::to_buffer("it");
    let mut out = Vec::new();
    let mut err = Vec::new();
    let summary = Driver::new(&registry, config)
        .with_log(emitter)
        .run(&mut out, &mut err)
        .unwrap();

    let text = buffer.contents();
    let entries: Vec<_> = text
        .lines()
        .enumerate()
        .map(|(i, line)| validate_log_line(line, i + 1).unwrap())
        .collect();
    let cases: Vec<_> = entries.iter().filter(|e| e.event == "case_result").collect();
    assert_eq!(cases.len(), 6);
    assert!(cases.iter().all(|e| e.outcome == Some(Outcome::Pass)));
    let written = cases
        .iter()
        .find(|e| e.input.as_deref() == Some("test/HTML/page.html"))
        .unwrap();
    let refs = written.artifact_refs.as_ref().unwrap();
    let result_ref = refs
        .iter()
        .find(|r| r.contains("page.html@sha256:"))
        .unwrap();
    assert_eq!(result_ref.rsplit(':').next().unwrap().len(), 64);

    let report_path = root.join("report.json");
    RunReport::from(&summary).write(&report_path).unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(value["total"]["tests"], 6);
    assert_eq!(value["exit_code"], 0);
    assert_eq!(value["suites"].as_array().unwrap().len(), 3);
}
