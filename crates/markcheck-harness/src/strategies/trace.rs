use std::cell::RefCell;
use std::fmt::Write as _;

use markcheck_core::{
    Attribute, ContentHandler, Diagnostic, DiagnosticHandler, Level, PushParser,
};

use crate::context::TestContext;
use crate::error::CaseError;
use crate::options::TestOptions;
use crate::registry::{CaseFiles, TestStrategy};

const CHARACTERS_PREVIEW: usize = 30;
const CDATA_PREVIEW: usize = 20;

/// Dump every parse event, one line each, and compare the dump.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceStrategy;

impl TestStrategy for TraceStrategy {
    fn run(
        &self,
        ctx: &mut TestContext,
        files: &CaseFiles,
        options: TestOptions,
    ) -> Result<(), CaseError> {
        let data = files.read_input()?;
        let dump = trace_events(&data, &files.label, options);
        ctx.check_result(files, dump.as_bytes())?;
        ctx.check_errors(files)
    }
}

/// Parse `data` in one chunk and return the event dump. Diagnostics appear
/// inline at the point they were raised.
#[must_use]
pub fn trace_events(data: &[u8], file: &str, options: TestOptions) -> String {
    let trace = Trace::default();
    let mut parser = PushParser::new(options.syntax(), options.parse_options(), file);
    let mut content = &trace;
    let mut diagnostics = &trace;
    parser.feed(data, true, &mut content, &mut diagnostics);
    drop(parser);
    trace.out.into_inner()
}

#[derive(Debug, Default)]
struct Trace {
    out: RefCell<String>,
}

impl Trace {
    fn line(&self, args: std::fmt::Arguments<'_>) {
        let mut out = self.out.borrow_mut();
        let _ = out.write_fmt(args);
        out.push('\n');
    }
}

fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn or_null(value: Option<&str>) -> &str {
    value.unwrap_or("NULL")
}

impl ContentHandler for &Trace {
    fn start_document(&mut self) {
        self.line(format_args!("SAX.startDocument()"));
    }

    fn end_document(&mut self) {
        self.line(format_args!("SAX.endDocument()"));
    }

    fn internal_subset(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {
        self.line(format_args!(
            "SAX.internalSubset({name}, {}, {})",
            or_null(public_id),
            or_null(system_id)
        ));
    }

    fn entity_decl(&mut self, name: &str, value: &str) {
        self.line(format_args!("SAX.entityDecl({name}, {value})"));
    }

    fn start_element(&mut self, name: &str, attributes: &[Attribute], _implied: bool) {
        let mut line = format!("SAX.startElement({name}");
        for attr in attributes {
            match &attr.value {
                Some(value) => {
                    let _ = write!(line, ", {}='{value}'", attr.name);
                }
                None => {
                    let _ = write!(line, ", {}", attr.name);
                }
            }
        }
        line.push(')');
        self.line(format_args!("{line}"));
    }

    fn end_element(&mut self, name: &str) {
        self.line(format_args!("SAX.endElement({name})"));
    }

    fn characters(&mut self, text: &str) {
        self.line(format_args!(
            "SAX.characters({}, {})",
            preview(text, CHARACTERS_PREVIEW),
            text.len()
        ));
    }

    fn reference(&mut self, name: &str) {
        self.line(format_args!("SAX.reference({name})"));
    }

    fn cdata_block(&mut self, data: &str, _continuation: bool) {
        self.line(format_args!(
            "SAX.pcdata({}, {})",
            preview(data, CDATA_PREVIEW),
            data.len()
        ));
    }

    fn comment(&mut self, text: &str, _in_subset: bool) {
        self.line(format_args!("SAX.comment({text})"));
    }

    fn processing_instruction(&mut self, target: &str, data: &str) {
        self.line(format_args!("SAX.processingInstruction({target}, {data})"));
    }
}

impl DiagnosticHandler for &Trace {
    fn report(&mut self, diagnostic: &Diagnostic) {
        let kind = match diagnostic.level {
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatalError",
        };
        self.line(format_args!(
            "SAX.{kind}: {}:{}: {}",
            diagnostic.file, diagnostic.line, diagnostic.message
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::GoldenMode;
    use crate::strategies::testing::{context, fixture};

    #[test]
    fn xml_event_dump() {
        let dump = trace_events(
            b"<?xml version=\"1.0\"?><r id=\"1\">hi<![CDATA[x]]><!--c--><?p d?></r>",
            "t.xml",
            TestOptions::NONE,
        );
        assert_eq!(
            dump,
            "SAX.startDocument()\n\
             SAX.startElement(r, id='1')\n\
             SAX.characters(hi, 2)\n\
             SAX.pcdata(x, 1)\n\
             SAX.comment(c)\n\
             SAX.processingInstruction(p, d)\n\
             SAX.endElement(r)\n\
             SAX.endDocument()\n"
        );
    }

    #[test]
    fn long_text_is_previewed() {
        let body = format!("<r>{}</r>", "a".repeat(40));
        let dump = trace_events(body.as_bytes(), "t.xml", TestOptions::NONE);
        assert!(dump.contains(&format!("SAX.characters({}, 40)", "a".repeat(30))));
    }

    #[test]
    fn diagnostics_are_inline() {
        let dump = trace_events(b"<r>&bad;</r>", "t.xml", TestOptions::NONE);
        assert!(dump.starts_with("SAX.startDocument()\nSAX.startElement(r)\n"));
        assert!(dump.ends_with(
            "SAX.fatalError: t.xml:1: Entity 'bad' not defined\nSAX.endDocument()\n"
        ));
    }

    #[test]
    fn html_dump_includes_implied_elements() {
        let dump = trace_events(b"<p>x", "t.html", TestOptions::HTML);
        assert_eq!(
            dump,
            "SAX.startDocument()\n\
             SAX.startElement(html)\n\
             SAX.startElement(body)\n\
             SAX.startElement(p)\n\
             SAX.characters(x, 1)\n\
             SAX.endElement(p)\n\
             SAX.endElement(body)\n\
             SAX.endElement(html)\n\
             SAX.endDocument()\n"
        );
    }

    #[test]
    fn strategy_round_trips_through_golden() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(dir.path(), "a.xml", b"<a>t</a>", Some(".sax2"), None);
        let mut ctx = context(dir.path(), GoldenMode::Update);
        TraceStrategy.run(&mut ctx, &files, TestOptions::NONE).unwrap();
        let mut ctx = context(dir.path(), GoldenMode::Compare);
        TraceStrategy.run(&mut ctx, &files, TestOptions::NONE).unwrap();
    }
}
