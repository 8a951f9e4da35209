use std::fmt::Write as _;

use markcheck_core::tree::WalkStep;
use markcheck_core::{Document, NodeKind};

use super::{InputMode, parse_document};
use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::{CaseFiles, TestStrategy};

const ELEMENT: u8 = 1;
const TEXT: u8 = 3;
const CDATA: u8 = 4;
const ENTITY_REF: u8 = 5;
const PROCESSING_INSTRUCTION: u8 = 7;
const COMMENT: u8 = 8;
const DOCTYPE: u8 = 10;
const END_ELEMENT: u8 = 15;

/// Reader-style node dump of the parsed tree.
#[derive(Debug, Clone, Copy)]
pub struct WalkerStrategy {
    input: InputMode,
}

impl WalkerStrategy {
    #[must_use]
    pub fn new(input: InputMode) -> Self {
        Self { input }
    }
}

impl TestStrategy for WalkerStrategy {
    fn run(
        &self,
        ctx: &mut TestContext,
        files: &CaseFiles,
        options: TestOptions,
    ) -> Result<(), CaseError> {
        let produced = match parse_document(ctx, files, self.input, options)? {
            Some(doc) => walk_lines(&doc),
            None => format!("{} : failed to parse\n", files.label),
        };
        ctx.check_result(files, produced.as_bytes())?;
        ctx.check_errors(files)
    }
}

/// One `depth type name empty hasValue [value]` line per visited node.
#[must_use]
pub fn walk_lines(doc: &Document) -> String {
    let mut out = String::new();
    for step in doc.walk() {
        write_step(doc, step, &mut out);
    }
    out
}

fn write_step(doc: &Document, step: WalkStep, out: &mut String) {
    let node = doc.node(step.node);
    let (kind, name, value): (u8, &str, Option<&str>) = match &node.kind {
        NodeKind::Element { name, .. } if step.closing => (END_ELEMENT, name.as_str(), None),
        NodeKind::Element { name, .. } => (ELEMENT, name.as_str(), None),
        NodeKind::Text(text) => (TEXT, "#text", Some(text.as_str())),
        NodeKind::CData(data) => (CDATA, "#cdata-section", Some(data.as_str())),
        NodeKind::Comment(text) => (COMMENT, "#comment", Some(text.as_str())),
        NodeKind::ProcessingInstruction { target, data } => {
            (PROCESSING_INSTRUCTION, target.as_str(), Some(data.as_str()))
        }
        NodeKind::EntityRef(name) => (ENTITY_REF, name.as_str(), None),
        NodeKind::Doctype(doctype) => (DOCTYPE, doctype.name.as_str(), None),
    };
    let empty = u8::from(kind == ELEMENT && node.children.is_empty());
    let _ = write!(
        out,
        "{} {kind} {name} {empty} {}",
        step.depth,
        u8::from(value.is_some())
    );
    if let Some(value) = value {
        let _ = write!(out, " {value}");
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::GoldenMode;
    use crate::strategies::testing::{context, fixture, golden_text};
    use markcheck_core::{Diagnostic, ParseOptions, Syntax};

    #[test]
    fn dump_layout() {
        let mut diags: Vec<Diagnostic> = Vec::new();
        let doc = markcheck_core::parse_bytes(
            b"<!DOCTYPE d [<!ENTITY e 'v'>]><d><e/>t&e;<!--c--><?p x?><![CDATA[z]]></d>",
            "d.xml",
            Syntax::Xml,
            ParseOptions::NONE,
            &mut diags,
        )
        .unwrap();
        assert_eq!(
            walk_lines(&doc),
            "0 10 d 0 0\n\
             0 1 d 0 0\n\
             1 1 e 1 0\n\
             1 3 #text 0 1 t\n\
             1 5 e 0 0\n\
             1 8 #comment 0 1 c\n\
             1 7 p 0 1 x\n\
             1 4 #cdata-section 0 1 z\n\
             0 15 d 0 0\n"
        );
    }

    #[test]
    fn reader_and_tree_modes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(dir.path(), "w.xml", b"<a><b>x</b></a>", Some(".rdr"), None);
        let mut ctx = context(dir.path(), GoldenMode::Update);
        WalkerStrategy::new(InputMode::Reader)
            .run(&mut ctx, &files, TestOptions::NONE)
            .unwrap();
        assert_eq!(
            golden_text(files.result.as_deref().unwrap()),
            "0 1 a 0 0\n1 1 b 0 0\n2 3 #text 0 1 x\n1 15 b 0 0\n0 15 a 0 0\n"
        );
        let mut ctx = context(dir.path(), GoldenMode::Compare);
        WalkerStrategy::new(InputMode::File)
            .run(&mut ctx, &files, TestOptions::NONE)
            .unwrap();
    }
}
