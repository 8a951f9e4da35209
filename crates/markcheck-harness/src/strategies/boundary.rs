use markcheck_core::serialize::serialize;
use markcheck_core::{PushParser, TreeBuilder};

use crate::boundary::{self, LookaheadPolicy};
use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::{CaseFiles, TestStrategy};

/// Fixtures whose prolog the HTML push parser is allowed to hold back.
pub const DEFAULT_EXCLUSIONS: &[&str] = &["xml-declaration-1.html"];

/// Push the fixture one byte at a time, checking that no step surfaces
/// more than one construct or keeps more input buffered than the lookahead
/// policy allows. A fixture that survives is then checked like a push case.
#[derive(Debug, Clone)]
pub struct BoundaryStrategy {
    exclusions: Vec<String>,
    policy: LookaheadPolicy,
}

impl Default for BoundaryStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUSIONS.iter().map(|s| (*s).to_owned()), LookaheadPolicy::STANDARD)
    }
}

impl BoundaryStrategy {
    pub fn new(exclusions: impl IntoIterator<Item = String>, policy: LookaheadPolicy) -> Self {
        Self {
            exclusions: exclusions.into_iter().collect(),
            policy,
        }
    }

    fn is_excluded(&self, files: &CaseFiles) -> bool {
        files
            .base_name()
            .is_some_and(|base| self.exclusions.iter().any(|e| e == base))
    }
}

impl TestStrategy for BoundaryStrategy {
    fn run(
        &self,
        ctx: &mut TestContext,
        files: &CaseFiles,
        options: TestOptions,
    ) -> Result<(), CaseError> {
        if self.is_excluded(files) {
            return Ok(());
        }
        let data = files.read_input()?;
        let syntax = options.syntax();
        let parse_options = options.parse_options();
        let mut parser = PushParser::new(syntax, parse_options, files.label.as_str());
        let mut builder = TreeBuilder::new(syntax);

        let report = boundary::verify(
            &mut parser,
            &data,
            &mut builder,
            &mut ctx.diagnostics,
            &self.policy,
        );
        if let Some(violation) = report.violation {
            return Err(CaseError::Boundary {
                file: files.label.clone(),
                violation,
            });
        }

        let doc = markcheck_core::finish(&parser, builder, &files.label, parse_options).map_err(
            |_| CaseError::Parse {
                file: files.label.clone(),
            },
        )?;
        drop(parser);
        let produced = serialize(&doc);
        drop(doc);
        ctx.check_result(files, &produced)?;
        ctx.check_errors(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::GoldenMode;
    use crate::strategies::PushStrategy;
    use crate::strategies::testing::{context, fixture};

    #[test]
    fn byte_feeding_matches_chunked_push() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"<?xml version=\"1.0\"?>\n<doc a=\"1\"><x>text &amp; more</x><!-- c --><?pi d?></doc>\n";
        let files = fixture(dir.path(), "b.xml", body, Some(""), Some(".err"));
        let mut ctx = context(dir.path(), GoldenMode::Update);
        PushStrategy.run(&mut ctx, &files, TestOptions::NONE).unwrap();
        let mut ctx = context(dir.path(), GoldenMode::Compare);
        BoundaryStrategy::default()
            .run(&mut ctx, &files, TestOptions::NONE)
            .unwrap();
    }

    #[test]
    fn html_fixture_passes() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"<html><body><p>one &amp; two<p>three</body></html>";
        let files = fixture(dir.path(), "p.html", body, Some(""), Some(".err"));
        let mut ctx = context(dir.path(), GoldenMode::Update);
        BoundaryStrategy::default()
            .run(&mut ctx, &files, TestOptions::HTML)
            .unwrap();
    }

    #[test]
    fn excluded_fixture_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(dir.path(), "xml-declaration-1.html", b"<p>x", Some(""), None);
        let mut ctx = context(dir.path(), GoldenMode::Compare);
        BoundaryStrategy::default()
            .run(&mut ctx, &files, TestOptions::HTML)
            .unwrap();
        assert!(ctx.artifacts().is_empty());
        assert!(!files.result.as_deref().unwrap().exists());
    }
}
