use std::sync::Arc;

use markcheck_core::serialize::serialize;
use markcheck_core::{Catalog, Diagnostic, ParseOptions, PushParser, Syntax, TreeBuilder};

use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::{CaseFiles, TestStrategy};

/// Worker threads started by the default stress suite.
pub const DEFAULT_WORKERS: usize = 4;

const CATALOG: &str = "\
# documents resolved by every worker
PUBLIC \"-//Markcheck//DTD Book//EN\" \"dtd/book.dtd\"
PUBLIC \"-//Markcheck//DTD Memo//EN\" \"dtd/memo.dtd\"
SYSTEM \"http://markcheck.invalid/note.dtd\" \"dtd/note.dtd\"
";

/// Documents parsed by the workers, with the serialization each must yield.
const DOCUMENTS: &[(&str, &str)] = &[
    (
        "<!DOCTYPE book PUBLIC \"-//Markcheck//DTD Book//EN\" \"book.dtd\"><book><title>T</title></book>",
        "<book><title>T</title></book>",
    ),
    (
        "<!DOCTYPE memo PUBLIC \"-//Markcheck//DTD Memo//EN\" \"memo.dtd\"><memo to=\"all\"/>",
        "<memo to=\"all\"/>",
    ),
    (
        "<!DOCTYPE note SYSTEM \"http://markcheck.invalid/note.dtd\"><note>n &amp; m</note>",
        "<note>n &amp; m</note>",
    ),
];

/// Self-contained stress of the shared catalog: several workers parse
/// documents whose external identifiers resolve through one catalog while
/// some of them add entries to it.
#[derive(Debug, Clone, Copy)]
pub struct ThreadStressStrategy {
    workers: usize,
}

impl Default for ThreadStressStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl ThreadStressStrategy {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }
}

impl TestStrategy for ThreadStressStrategy {
    fn run(
        &self,
        ctx: &mut TestContext,
        _files: &CaseFiles,
        _options: TestOptions,
    ) -> Result<(), CaseError> {
        let catalog = Arc::new(Catalog::new());
        let base = catalog
            .load_str(CATALOG)
            .map_err(|err| CaseError::Thread(err.to_string()))?;
        let repeat = ctx.thread_repeat.max(1);

        let failures: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|worker| {
                    let catalog = Arc::clone(&catalog);
                    scope.spawn(move || stress(worker, repeat, &catalog))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .filter_map(|(worker, handle)| match handle.join() {
                    Ok(Ok(())) => None,
                    Ok(Err(message)) => Some(message),
                    Err(_) => Some(format!("worker {worker} panicked")),
                })
                .collect()
        });
        if let Some(first) = failures.into_iter().next() {
            return Err(CaseError::Thread(first));
        }

        let writers = self.workers.div_ceil(2);
        let expected = base + writers * repeat;
        if catalog.len() != expected {
            return Err(CaseError::Thread(format!(
                "catalog holds {} entries, expected {expected}",
                catalog.len()
            )));
        }
        Ok(())
    }
}

/// Body of one worker. Even-numbered workers also register their own
/// identifiers.
fn stress(worker: usize, repeat: usize, catalog: &Arc<Catalog>) -> Result<(), String> {
    for i in 0..repeat {
        let (source, expected) = DOCUMENTS[(worker + i) % DOCUMENTS.len()];
        let mut diags: Vec<Diagnostic> = Vec::new();
        let mut parser = PushParser::new(Syntax::Xml, ParseOptions::DTDLOAD, "stress.xml")
            .with_catalog(Arc::clone(catalog));
        let mut builder = TreeBuilder::new(Syntax::Xml);
        parser.feed(source.as_bytes(), true, &mut builder, &mut diags);
        let doc = markcheck_core::finish(&parser, builder, "stress.xml", ParseOptions::DTDLOAD)
            .map_err(|err| format!("worker {worker} iteration {i}: {err}"))?;
        if let Some(diag) = diags.first() {
            return Err(format!(
                "worker {worker} iteration {i}: {}",
                diag.message
            ));
        }
        let text = String::from_utf8_lossy(&serialize(&doc)).into_owned();
        if !text.contains(expected) {
            return Err(format!(
                "worker {worker} iteration {i}: unexpected output {text:?}"
            ));
        }

        if worker % 2 == 0 {
            let id = format!("-//Markcheck//Stress {worker} {i}//EN");
            let uri = format!("stress/{worker}/{i}.dtd");
            catalog.add_public(id.as_str(), uri.as_str());
            if catalog.resolve_public(&id).as_deref() != Some(uri.as_str()) {
                return Err(format!("worker {worker} iteration {i}: lost entry {id}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::GoldenMode;
    use crate::sentinel::LeakSentinel;
    use crate::strategies::testing::context;

    fn no_files() -> CaseFiles {
        CaseFiles {
            input: None,
            label: "threads".into(),
            result: None,
            error: None,
        }
    }

    #[test]
    fn concurrent_resolution_succeeds_without_leaking() {
        markcheck_core::initialize();
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), GoldenMode::Compare);
        let sentinel = LeakSentinel::arm();
        ThreadStressStrategy::new(3)
            .run(&mut ctx, &no_files(), TestOptions::NONE)
            .unwrap();
        assert_eq!(sentinel.leaked(), 0);
    }

    #[test]
    fn single_worker_is_supported() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), GoldenMode::Compare);
        ThreadStressStrategy::new(0)
            .run(&mut ctx, &no_files(), TestOptions::NONE)
            .unwrap();
    }
}
