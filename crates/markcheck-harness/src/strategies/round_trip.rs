use std::path::Path;

use markcheck_core::serialize::serialize;
use markcheck_core::Document;

use super::{InputMode, parse_document};
use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::{CaseFiles, TestStrategy};

/// Parse, serialize to a scratch file, compare; then parse the scratch file
/// again and check the second serialization against the same golden.
#[derive(Debug, Clone, Copy)]
pub struct RoundTripStrategy {
    input: InputMode,
}

impl RoundTripStrategy {
    #[must_use]
    pub fn new(input: InputMode) -> Self {
        Self { input }
    }
}

impl TestStrategy for RoundTripStrategy {
    fn run(
        &self,
        ctx: &mut TestContext,
        files: &CaseFiles,
        options: TestOptions,
    ) -> Result<(), CaseError> {
        let Some(doc) = parse_document(ctx, files, self.input, options)? else {
            return Err(CaseError::Parse {
                file: files.label.clone(),
            });
        };
        if files.result.is_none() {
            return Ok(());
        }
        let temp = ctx.temp_path(files, "res");
        let outcome = round_trip(ctx, files, doc, &temp, options);
        let _ = std::fs::remove_file(&temp);
        outcome
    }
}

fn round_trip(
    ctx: &mut TestContext,
    files: &CaseFiles,
    doc: Document,
    temp: &Path,
    options: TestOptions,
) -> Result<(), CaseError> {
    write_temp(temp, &serialize(&doc))?;
    drop(doc);
    ctx.check_result_file(files, temp)?;

    let reparsed = markcheck_core::parse_file(
        temp,
        &files.label,
        options.syntax(),
        options.parse_options(),
        &mut ctx.diagnostics,
    )
    .map_err(|_| CaseError::Parse {
        file: temp.display().to_string(),
    })?;
    write_temp(temp, &serialize(&reparsed))?;
    drop(reparsed);
    ctx.check_result_file(files, temp)
}

fn write_temp(path: &Path, data: &[u8]) -> Result<(), CaseError> {
    std::fs::write(path, data).map_err(|source| CaseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::GoldenMode;
    use crate::strategies::testing::{context, fixture, golden_text};

    const DOC: &[u8] = b"<?xml version=\"1.0\"?>\n<!DOCTYPE d [\n<!ENTITY e \"v\">\n]>\n<d a='1'>x&e;<e/></d>\n";

    #[test]
    fn update_then_compare_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(dir.path(), "d.xml", DOC, Some(""), None);
        let strategy = RoundTripStrategy::new(InputMode::File);

        let mut ctx = context(dir.path(), GoldenMode::Update);
        strategy.run(&mut ctx, &files, TestOptions::NONE).unwrap();
        let golden = golden_text(files.result.as_deref().unwrap());
        assert_eq!(
            golden,
            "<?xml version=\"1.0\"?>\n<!DOCTYPE d [\n<!ENTITY e \"v\">\n]>\n<d a=\"1\">x&e;<e/></d>\n"
        );

        let mut ctx = context(dir.path(), GoldenMode::Compare);
        strategy.run(&mut ctx, &files, TestOptions::NONE).unwrap();
        RoundTripStrategy::new(InputMode::Memory)
            .run(&mut ctx, &files, TestOptions::NONE)
            .unwrap();
        assert!(!ctx.temp_path(&files, "res").exists());
    }

    #[test]
    fn changed_output_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(dir.path(), "d.xml", DOC, Some(""), None);
        std::fs::create_dir_all(dir.path().join("result")).unwrap();
        std::fs::write(files.result.as_deref().unwrap(), "stale\n").unwrap();

        let mut ctx = context(dir.path(), GoldenMode::Compare);
        let err = RoundTripStrategy::new(InputMode::File)
            .run(&mut ctx, &files, TestOptions::NONE)
            .unwrap_err();
        assert!(matches!(err, CaseError::ResultMismatch { .. }));
        assert!(!ctx.temp_path(&files, "res").exists());
    }

    #[test]
    fn malformed_input_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(dir.path(), "bad.xml", b"<a>", Some(""), None);
        let mut ctx = context(dir.path(), GoldenMode::Compare);
        let err = RoundTripStrategy::new(InputMode::File)
            .run(&mut ctx, &files, TestOptions::NONE)
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse test/bad.xml");
    }
}
