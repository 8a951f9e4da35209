//! Suite descriptors and the strategy interface.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use markcheck_core::ParseOptions;

use crate::context::TestContext;
use crate::enumerate::display_path;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::strategies::{
    BoundaryStrategy, ErrorParseStrategy, InputMode, PushStrategy, RoundTripStrategy,
    ThreadStressStrategy, TokenizerStrategy, TraceStrategy, WalkerStrategy,
};

/// One way of exercising the library against a fixture.
pub trait TestStrategy: Send + Sync {
    fn run(
        &self,
        ctx: &mut TestContext,
        files: &CaseFiles,
        options: TestOptions,
    ) -> Result<(), CaseError>;
}

/// Paths a strategy works with for one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFiles {
    /// Fixture path; `None` for self-contained suites.
    pub input: Option<PathBuf>,
    /// Root-relative name used in messages and diagnostics.
    pub label: String,
    /// Golden for the produced output, if the suite checks it.
    pub result: Option<PathBuf>,
    /// Golden for captured diagnostics, if the suite checks them.
    pub error: Option<PathBuf>,
}

impl CaseFiles {
    pub fn require_input(&self) -> Result<&Path, CaseError> {
        self.input.as_deref().ok_or_else(|| CaseError::Io {
            path: PathBuf::from(&self.label),
            source: io::Error::new(io::ErrorKind::NotFound, "suite has no input file"),
        })
    }

    pub fn read_input(&self) -> Result<Vec<u8>, CaseError> {
        let path = self.require_input()?;
        std::fs::read(path).map_err(|source| CaseError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File name of the input.
    #[must_use]
    pub fn base_name(&self) -> Option<&str> {
        self.input.as_deref()?.file_name()?.to_str()
    }
}

/// A suite: a strategy bound to a fixture glob, golden locations and
/// options.
pub struct TestCase {
    pub description: &'static str,
    pub strategy: Box<dyn TestStrategy>,
    pub input_glob: Option<&'static str>,
    pub output_dir: Option<&'static str>,
    pub result_suffix: Option<&'static str>,
    pub error_suffix: Option<&'static str>,
    pub options: TestOptions,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("description", &self.description)
            .field("input_glob", &self.input_glob)
            .field("output_dir", &self.output_dir)
            .field("result_suffix", &self.result_suffix)
            .field("error_suffix", &self.error_suffix)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    /// A self-contained suite; chain the builder methods to bind fixtures.
    pub fn new(description: &'static str, strategy: impl TestStrategy + 'static) -> Self {
        Self {
            description,
            strategy: Box::new(strategy),
            input_glob: None,
            output_dir: None,
            result_suffix: None,
            error_suffix: None,
            options: TestOptions::NONE,
        }
    }

    #[must_use]
    pub fn inputs(mut self, glob: &'static str) -> Self {
        self.input_glob = Some(glob);
        self
    }

    #[must_use]
    pub fn output(mut self, dir: &'static str) -> Self {
        self.output_dir = Some(dir);
        self
    }

    #[must_use]
    pub fn result(mut self, suffix: &'static str) -> Self {
        self.result_suffix = Some(suffix);
        self
    }

    #[must_use]
    pub fn errors(mut self, suffix: &'static str) -> Self {
        self.error_suffix = Some(suffix);
        self
    }

    #[must_use]
    pub fn options(mut self, options: impl Into<TestOptions>) -> Self {
        self.options = options.into();
        self
    }

    #[must_use]
    pub fn is_self_contained(&self) -> bool {
        self.input_glob.is_none()
    }

    /// Case-insensitive substring match on the description.
    #[must_use]
    pub fn matches(&self, filter: &str) -> bool {
        self.description
            .to_lowercase()
            .contains(&filter.to_lowercase())
    }

    /// Golden locations for `input`: `<root>/<output_dir><base><suffix>`.
    #[must_use]
    pub fn files_for(&self, root: &Path, input: &Path) -> CaseFiles {
        let base = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let golden = |suffix: Option<&str>| {
            suffix.map(|suffix| {
                root.join(self.output_dir.unwrap_or(""))
                    .join(format!("{base}{suffix}"))
            })
        };
        CaseFiles {
            input: Some(input.to_path_buf()),
            label: display_path(root, input),
            result: golden(self.result_suffix),
            error: golden(self.error_suffix),
        }
    }

    #[must_use]
    pub fn self_contained_files(&self) -> CaseFiles {
        CaseFiles {
            input: None,
            label: self.description.to_owned(),
            result: None,
            error: None,
        }
    }
}

/// The full suite list, in run order.
#[must_use]
pub fn default_registry() -> Vec<TestCase> {
    let html = TestOptions::HTML;
    vec![
        TestCase::new("XML regression tests", RoundTripStrategy::new(InputMode::File))
            .inputs("test/*")
            .output("result/")
            .result(""),
        TestCase::new(
            "XML regression tests on memory",
            RoundTripStrategy::new(InputMode::Memory),
        )
        .inputs("test/*")
        .output("result/")
        .result(""),
        TestCase::new(
            "XML entity subst regression tests",
            RoundTripStrategy::new(InputMode::File),
        )
        .inputs("test/*")
        .output("result/noent/")
        .result("")
        .options(ParseOptions::NOENT),
        TestCase::new(
            "XML Namespaces regression tests",
            ErrorParseStrategy::new(InputMode::File),
        )
        .inputs("test/namespaces/*")
        .output("result/namespaces/")
        .result("")
        .errors(".err"),
        TestCase::new(
            "Error cases regression tests",
            ErrorParseStrategy::new(InputMode::File),
        )
        .inputs("test/errors/*.xml")
        .output("result/errors/")
        .result("")
        .errors(".err"),
        TestCase::new(
            "Error cases regression tests with entity substitution",
            ErrorParseStrategy::new(InputMode::File),
        )
        .inputs("test/errors/*.xml")
        .output("result/errors/")
        .errors(".ent")
        .options(ParseOptions::NOENT),
        TestCase::new(
            "Error cases regression tests from file descriptor",
            ErrorParseStrategy::new(InputMode::Reader),
        )
        .inputs("test/errors/*.xml")
        .output("result/errors/")
        .result("")
        .errors(".err"),
        TestCase::new(
            "Error cases stream regression tests",
            WalkerStrategy::new(InputMode::Reader),
        )
        .inputs("test/errors/*.xml")
        .output("result/errors/")
        .errors(".str"),
        TestCase::new("Reader regression tests", WalkerStrategy::new(InputMode::Reader))
            .inputs("test/*")
            .output("result/")
            .result(".rdr"),
        TestCase::new("Walker regression tests", WalkerStrategy::new(InputMode::File))
            .inputs("test/*")
            .output("result/")
            .result(".rdr"),
        TestCase::new(
            "Reader entities substitution regression tests",
            WalkerStrategy::new(InputMode::Reader),
        )
        .inputs("test/*")
        .output("result/")
        .result(".rde")
        .options(ParseOptions::NOENT),
        TestCase::new(
            "Reader on memory regression tests",
            WalkerStrategy::new(InputMode::Memory),
        )
        .inputs("test/*")
        .output("result/")
        .result(".rdr"),
        TestCase::new("SAX2 callbacks regression tests", TraceStrategy)
            .inputs("test/*")
            .output("result/")
            .result(".sax2"),
        TestCase::new(
            "SAX2 callbacks regression tests with entity substitution",
            TraceStrategy,
        )
        .inputs("test/*")
        .output("result/noent/")
        .result(".sax2")
        .options(ParseOptions::NOENT),
        TestCase::new("XML push regression tests", PushStrategy)
            .inputs("test/*")
            .output("result/")
            .result(""),
        TestCase::new("XML push boundary tests", BoundaryStrategy::default())
            .inputs("test/*")
            .output("result/")
            .result(""),
        TestCase::new("HTML regression tests", ErrorParseStrategy::new(InputMode::File))
            .inputs("test/HTML/*")
            .output("result/HTML/")
            .result("")
            .errors(".err")
            .options(html),
        TestCase::new(
            "HTML regression tests from file descriptor",
            ErrorParseStrategy::new(InputMode::Reader),
        )
        .inputs("test/HTML/*")
        .output("result/HTML/")
        .result("")
        .errors(".err")
        .options(html),
        TestCase::new("Push HTML regression tests", PushStrategy)
            .inputs("test/HTML/*")
            .output("result/HTML/")
            .result("")
            .errors(".err")
            .options(html),
        TestCase::new("Push HTML boundary tests", BoundaryStrategy::default())
            .inputs("test/HTML/*")
            .output("result/HTML/")
            .result("")
            .options(html),
        TestCase::new("HTML SAX regression tests", TraceStrategy)
            .inputs("test/HTML/*")
            .output("result/HTML/")
            .result(".sax")
            .options(html),
        TestCase::new("HTML tokenization tests", TokenizerStrategy)
            .inputs("test/html-tokenizer/*.test")
            .output("result/html-tokenizer/")
            .result("")
            .options(html),
        TestCase::new("Catalog and threads regression tests", ThreadStressStrategy::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_are_unique() {
        let registry = default_registry();
        let mut names: Vec<&str> = registry.iter().map(|c| c.description).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), registry.len());
    }

    #[test]
    fn only_thread_suite_is_self_contained() {
        let registry = default_registry();
        let self_contained: Vec<&str> = registry
            .iter()
            .filter(|c| c.is_self_contained())
            .map(|c| c.description)
            .collect();
        assert_eq!(self_contained, ["Catalog and threads regression tests"]);
    }

    #[test]
    fn filter_is_case_insensitive() {
        let registry = default_registry();
        let hits: Vec<&str> = registry
            .iter()
            .filter(|c| c.matches("html sax"))
            .map(|c| c.description)
            .collect();
        assert_eq!(hits, ["HTML SAX regression tests"]);
    }

    #[test]
    fn memory_reader_shares_reader_goldens() {
        let registry = default_registry();
        let memory = registry
            .iter()
            .find(|c| c.description == "Reader on memory regression tests")
            .unwrap();
        let files = memory.files_for(Path::new("/fx"), Path::new("/fx/test/a.xml"));
        assert_eq!(files.result, Some(PathBuf::from("/fx/result/a.xml.rdr")));
        assert_eq!(files.error, None);
    }

    #[test]
    fn golden_paths_follow_layout() {
        let registry = default_registry();
        let errors = registry
            .iter()
            .find(|c| c.description == "Error cases regression tests")
            .unwrap();
        let root = Path::new("/fx");
        let files = errors.files_for(root, Path::new("/fx/test/errors/attr1.xml"));
        assert_eq!(files.label, "test/errors/attr1.xml");
        assert_eq!(files.result, Some(PathBuf::from("/fx/result/errors/attr1.xml")));
        assert_eq!(files.error, Some(PathBuf::from("/fx/result/errors/attr1.xml.err")));
        assert_eq!(files.base_name(), Some("attr1.xml"));

        let sax = registry
            .iter()
            .find(|c| c.description == "SAX2 callbacks regression tests")
            .unwrap();
        let files = sax.files_for(root, Path::new("/fx/test/a.xml"));
        assert_eq!(files.result, Some(PathBuf::from("/fx/result/a.xml.sax2")));
        assert_eq!(files.error, None);
    }
}
