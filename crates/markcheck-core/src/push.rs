//! Incremental (push) parser for XML and loose HTML.
//!
//! Input arrives through [`PushParser::feed`] in chunks of any size, down to
//! a single byte. Each construct is reported to the [`ContentHandler`] as
//! soon as its extent is known, and the parser never keeps more unconsumed
//! input than the construct in progress needs:
//!
//! - character data is flushed when a `<` or `&` terminates it (or when the
//!   pending run grows past an internal threshold), holding back at most an
//!   incomplete UTF-8 sequence;
//! - CDATA content is flushed eagerly, holding back two bytes that may begin
//!   the `]]>` closer;
//! - raw text (`script`, `style`, ...) is flushed eagerly, holding back the
//!   longest suffix that may begin the closing tag.
//!
//! [`PushParser::consumed`], [`PushParser::buffered`] and
//! [`PushParser::lexical_state`] expose enough state for a caller to verify
//! these guarantees from outside.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{self, Catalog};
use crate::diag::{Diagnostic, DiagnosticHandler, Domain, Level};
use crate::entities::{self, MAX_HTML_ENTITY_LOOKAHEAD};
use crate::handler::{Attribute, ContentHandler};
use crate::memory::Allocation;
use crate::options::ParseOptions;

/// Pending character data longer than this is flushed without a terminator.
const TEXT_FLUSH_THRESHOLD: usize = 300;
/// Consumed bytes are dropped from the front of the buffer past this size.
const COMPACT_THRESHOLD: usize = 4096;

const HTML_VOID: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const HTML_RAW_TEXT: &[&str] = &["script", "style", "textarea", "title", "xmp"];
const HTML_HEAD_CONTENT: &[&str] = &["base", "link", "meta", "script", "style", "title"];
const HTML_CLOSES_P: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "footer", "form", "h1",
    "h2", "h3", "h4", "h5", "h6", "header", "hr", "menu", "nav", "ol", "p", "pre", "section",
    "table", "ul",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Xml,
    Html,
}

/// Where the parser currently is in the input grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexicalState {
    /// Before the XML declaration / byte order mark has been decided.
    Start,
    /// Before the document element.
    Prolog,
    /// Inside the document element.
    Content,
    /// Waiting for the `>` of a raw-text closing tag (HTML only).
    EndTag,
    CData,
    /// Inside the internal subset of a document type declaration.
    Dtd,
    /// Inside a raw-text element (HTML only).
    RawText,
    /// After the document element.
    Epilog,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Advanced,
    NeedMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefix {
    Yes,
    Maybe,
    No,
}

#[derive(Debug)]
struct OpenElement {
    name: String,
    line: u32,
    prefixes: Vec<String>,
}

struct Sink<'c, 'd> {
    content: &'c mut dyn ContentHandler,
    diagnostics: &'d mut dyn DiagnosticHandler,
}

#[derive(Debug, Clone)]
struct ExternalId {
    public: Option<String>,
    system: Option<String>,
}

pub struct PushParser {
    syntax: Syntax,
    options: ParseOptions,
    file: String,
    buf: Vec<u8>,
    pos: usize,
    dropped: u64,
    line: u32,
    state: LexicalState,
    stack: Vec<OpenElement>,
    entities: HashMap<String, String>,
    external_entities: Vec<String>,
    doctype_ids: Option<ExternalId>,
    has_doctype: bool,
    well_formed: bool,
    halted: bool,
    started: bool,
    finished: bool,
    terminated: bool,
    seen_root: bool,
    raw_end: Option<String>,
    cdata_open: bool,
    latin1: bool,
    tokenize: bool,
    head_done: bool,
    body_started: bool,
    catalog: Arc<Catalog>,
    usage: Allocation,
}

impl std::fmt::Debug for PushParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushParser")
            .field("syntax", &self.syntax)
            .field("file", &self.file)
            .field("state", &self.state)
            .field("consumed", &self.consumed())
            .field("buffered", &self.buffered().len())
            .finish_non_exhaustive()
    }
}

impl PushParser {
    pub fn new(syntax: Syntax, options: ParseOptions, file: impl Into<String>) -> Self {
        Self {
            syntax,
            options,
            file: file.into(),
            buf: Vec::new(),
            pos: 0,
            dropped: 0,
            line: 1,
            state: LexicalState::Start,
            stack: Vec::new(),
            entities: HashMap::new(),
            external_entities: Vec::new(),
            doctype_ids: None,
            has_doctype: false,
            well_formed: true,
            halted: false,
            started: false,
            finished: false,
            terminated: false,
            seen_root: false,
            raw_end: None,
            cdata_open: false,
            latin1: false,
            tokenize: false,
            head_done: false,
            body_started: false,
            catalog: catalog::global(),
            usage: Allocation::new(0),
        }
    }

    /// HTML tokenizer without tree-construction rules.
    ///
    /// `data_state` selects the initial tokenizer state: 0 for data, 1 to 3
    /// for raw text closed by `</start_tag`, 4 and above for plain text that
    /// never ends.
    pub fn tokenizer(start_tag: &str, data_state: u32) -> Self {
        let mut parser = Self::new(Syntax::Html, ParseOptions::NONE, "");
        parser.tokenize = true;
        parser.state = LexicalState::Content;
        match data_state {
            0 => {}
            1..=3 => {
                parser.state = LexicalState::RawText;
                parser.raw_end = Some(start_tag.to_ascii_lowercase());
            }
            _ => parser.state = LexicalState::RawText,
        }
        parser
    }

    /// Resolve external identifiers against `catalog` instead of the
    /// process catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    #[must_use]
    pub fn lexical_state(&self) -> LexicalState {
        self.state
    }

    /// Total bytes the parser has fully processed.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.dropped + self.pos as u64
    }

    /// Bytes received but not yet processed.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Name of the element whose closing tag ends the current raw text.
    #[must_use]
    pub fn raw_text_end_tag(&self) -> Option<&str> {
        if self.state == LexicalState::RawText {
            self.raw_end.as_deref()
        } else {
            None
        }
    }

    /// False once any fatal error was reported.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.well_formed
    }

    /// Push a chunk of input. Set `terminate` on the final chunk.
    pub fn feed(
        &mut self,
        chunk: &[u8],
        terminate: bool,
        content: &mut dyn ContentHandler,
        diagnostics: &mut dyn DiagnosticHandler,
    ) {
        let mut sink = Sink {
            content,
            diagnostics,
        };
        if !self.started {
            self.started = true;
            sink.content.start_document();
        }
        if self.finished {
            return;
        }
        if self.latin1 {
            self.buf.extend(latin1_to_utf8(chunk));
        } else {
            self.buf.extend_from_slice(chunk);
        }
        self.terminated = terminate;

        while !self.halted {
            if self.step(&mut sink) == Step::NeedMore {
                break;
            }
        }
        if terminate {
            self.finish(&mut sink);
        }
        self.compact();
    }

    // ------------------------------------------------------------------
    // Buffer primitives
    // ------------------------------------------------------------------

    fn rest(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn avail(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn advance(&mut self, n: usize) {
        let end = (self.pos + n).min(self.buf.len());
        let newlines = self.buf[self.pos..end].iter().filter(|&&b| b == b'\n').count();
        self.line = self.line.saturating_add(u32::try_from(newlines).unwrap_or(u32::MAX));
        self.pos = end;
    }

    fn compact(&mut self) {
        if self.pos > 0 && (self.pos >= COMPACT_THRESHOLD || self.pos == self.buf.len()) {
            self.buf.drain(..self.pos);
            self.dropped += self.pos as u64;
            self.pos = 0;
        }
        self.usage.resize(self.buf.capacity());
    }

    fn prefix(&self, pattern: &[u8]) -> Prefix {
        let rest = self.rest();
        if rest.len() >= pattern.len() {
            if rest[..pattern.len()] == *pattern {
                Prefix::Yes
            } else {
                Prefix::No
            }
        } else if pattern.starts_with(rest) {
            Prefix::Maybe
        } else {
            Prefix::No
        }
    }

    fn prefix_ignore_case(&self, pattern: &[u8]) -> Prefix {
        let rest = self.rest();
        let n = rest.len().min(pattern.len());
        if !rest[..n].eq_ignore_ascii_case(&pattern[..n]) {
            Prefix::No
        } else if n == pattern.len() {
            Prefix::Yes
        } else {
            Prefix::Maybe
        }
    }

    /// Offset (from the cursor) of `needle`, searching from `from`.
    fn find(&self, from: usize, needle: &[u8]) -> Option<usize> {
        let rest = self.rest();
        if from >= rest.len() {
            return None;
        }
        rest[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| i + from)
    }

    /// Offset of the first byte in `stops` outside quoted strings.
    fn find_unquoted(&self, from: usize, stops: &[u8]) -> Option<usize> {
        let rest = self.rest();
        let mut quote = None;
        for (i, &b) in rest.iter().enumerate().skip(from) {
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if stops.contains(&b) => return Some(i),
                None => {}
            }
        }
        None
    }

    fn decode(&mut self, start: usize, end: usize, sink: &mut Sink<'_, '_>) -> String {
        let bytes = &self.buf[self.pos + start..self.pos + end];
        match std::str::from_utf8(bytes) {
            Ok(text) => text.to_owned(),
            Err(_) => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                if self.syntax == Syntax::Xml {
                    self.fatal(sink, "Input is not proper UTF-8, indicate encoding !".into());
                } else {
                    self.error(sink, Domain::Html, "Invalid bytes in character encoding".into());
                }
                text
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    fn report(&mut self, sink: &mut Sink<'_, '_>, level: Level, domain: Domain, line: u32, message: String) {
        if self.halted {
            return;
        }
        if level == Level::Fatal {
            self.well_formed = false;
        }
        let suppressed = match level {
            Level::Warning => self.options.contains(ParseOptions::NOWARNING),
            Level::Error | Level::Fatal => self.options.contains(ParseOptions::NOERROR),
        };
        if !suppressed {
            sink.diagnostics.report(&Diagnostic {
                level,
                domain,
                file: self.file.clone(),
                line,
                message,
            });
        }
        if level == Level::Fatal
            && self.syntax == Syntax::Xml
            && !self.options.contains(ParseOptions::RECOVER)
        {
            self.halt();
        }
    }

    fn fatal(&mut self, sink: &mut Sink<'_, '_>, message: String) {
        let line = self.line;
        self.report(sink, Level::Fatal, Domain::Parser, line, message);
    }

    fn fatal_at(&mut self, sink: &mut Sink<'_, '_>, line: u32, message: String) {
        self.report(sink, Level::Fatal, Domain::Parser, line, message);
    }

    /// Fatal error after which parsing cannot continue even in recovery mode.
    fn fatal_stop(&mut self, sink: &mut Sink<'_, '_>, message: String) {
        self.fatal(sink, message);
        self.halt();
    }

    fn error(&mut self, sink: &mut Sink<'_, '_>, domain: Domain, message: String) {
        let line = self.line;
        self.report(sink, Level::Error, domain, line, message);
    }

    fn halt(&mut self) {
        self.halted = true;
        self.state = LexicalState::Eof;
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn step(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        if self.avail() == 0 {
            return Step::NeedMore;
        }
        match self.state {
            LexicalState::Start => self.step_start(sink),
            LexicalState::Prolog | LexicalState::Epilog => self.step_misc(sink),
            LexicalState::Content => self.step_content(sink),
            LexicalState::EndTag => self.step_raw_end_tag(sink),
            LexicalState::CData => self.step_cdata(sink),
            LexicalState::Dtd => self.step_dtd(sink),
            LexicalState::RawText => self.step_raw_text(sink),
            LexicalState::Eof => Step::NeedMore,
        }
    }

    fn step_start(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        match self.prefix(b"\xEF\xBB\xBF") {
            Prefix::Yes => {
                self.advance(3);
                return Step::Advanced;
            }
            Prefix::Maybe => return Step::NeedMore,
            Prefix::No => {}
        }
        if self.syntax == Syntax::Xml {
            match self.prefix(b"<?xml") {
                Prefix::Maybe => return Step::NeedMore,
                Prefix::Yes if self.avail() < 6 => return Step::NeedMore,
                Prefix::Yes if self.rest()[5].is_ascii_whitespace() => {
                    let Some(end) = self.find(5, b"?>") else {
                        return Step::NeedMore;
                    };
                    let body = self.decode(5, end, sink);
                    self.xml_declaration(&body, sink);
                    self.advance(end + 2);
                    if self.latin1 {
                        let tail = self.buf.split_off(self.pos);
                        self.buf.extend(latin1_to_utf8(&tail));
                    }
                    self.state = LexicalState::Prolog;
                    return Step::Advanced;
                }
                _ => {}
            }
        }
        self.state = LexicalState::Prolog;
        Step::Advanced
    }

    fn xml_declaration(&mut self, body: &str, sink: &mut Sink<'_, '_>) {
        let pseudo = pseudo_attributes(body);
        let lookup = |key: &str| {
            pseudo
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        };
        let Some(version) = lookup("version") else {
            self.fatal(sink, "Malformed declaration expecting version".into());
            return;
        };
        let encoding = lookup("encoding");
        if let Some(enc) = encoding.as_deref() {
            let upper = enc.to_ascii_uppercase();
            match upper.as_str() {
                "UTF-8" | "UTF8" | "US-ASCII" | "ASCII" => {}
                "ISO-8859-1" | "ISO-LATIN-1" | "LATIN1" | "LATIN-1" => self.latin1 = true,
                _ => self.error(sink, Domain::Parser, format!("Unsupported encoding {enc}")),
            }
        }
        let standalone = match lookup("standalone").as_deref() {
            Some("yes") => Some(true),
            Some("no") => Some(false),
            Some(other) => {
                self.fatal(sink, format!("standalone accepts only 'yes' or 'no', got {other}"));
                None
            }
            None => None,
        };
        sink.content
            .xml_declaration(&version, encoding.as_deref(), standalone);
    }

    /// Whitespace, comments, processing instructions and the document type
    /// declaration around the document element.
    fn step_misc(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let rest = self.rest();
        if rest[0].is_ascii_whitespace() {
            let n = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
            self.advance(n);
            return Step::Advanced;
        }

        if self.syntax == Syntax::Html {
            if rest[0] == b'<' {
                if self.avail() < 2 {
                    return Step::NeedMore;
                }
                match (self.prefix_ignore_case(b"<!DOCTYPE"), self.prefix(b"<!--")) {
                    (Prefix::Yes, _) => return self.doctype(sink),
                    (_, Prefix::Yes) => return self.comment(sink),
                    (Prefix::Maybe, _) | (_, Prefix::Maybe) => return Step::NeedMore,
                    _ => {}
                }
            }
            self.state = LexicalState::Content;
            return Step::Advanced;
        }

        let in_prolog = self.state == LexicalState::Prolog;
        if rest[0] != b'<' {
            let message = if in_prolog {
                "Start tag expected, '<' not found"
            } else {
                "Extra content at the end of the document"
            };
            self.fatal_stop(sink, message.into());
            return Step::Advanced;
        }
        if self.avail() < 2 {
            return Step::NeedMore;
        }
        match self.rest()[1] {
            b'?' => self.processing_instruction(sink),
            b'!' => {
                let doctype_allowed = in_prolog && !self.has_doctype;
                let comment = self.prefix(b"<!--");
                let doctype = if doctype_allowed {
                    self.prefix(b"<!DOCTYPE")
                } else {
                    Prefix::No
                };
                match (comment, doctype) {
                    (Prefix::Yes, _) => self.comment(sink),
                    (_, Prefix::Yes) => self.doctype(sink),
                    (Prefix::Maybe, _) | (_, Prefix::Maybe) => Step::NeedMore,
                    _ => {
                        let message = if in_prolog {
                            "StartTag: invalid element name"
                        } else {
                            "Extra content at the end of the document"
                        };
                        self.fatal_stop(sink, message.into());
                        Step::Advanced
                    }
                }
            }
            _ if in_prolog => self.start_tag(sink),
            _ => {
                self.fatal_stop(sink, "Extra content at the end of the document".into());
                Step::Advanced
            }
        }
    }

    fn step_content(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        match (self.rest()[0], self.syntax) {
            (b'<', Syntax::Xml) => self.xml_markup(sink),
            (b'<', Syntax::Html) => self.html_markup(sink),
            (b'&', Syntax::Xml) => self.xml_reference(sink),
            (b'&', Syntax::Html) => self.html_reference(sink),
            _ => self.text_run(sink),
        }
    }

    fn xml_markup(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        if self.avail() < 2 {
            return Step::NeedMore;
        }
        match self.rest()[1] {
            b'/' => self.xml_end_tag(sink),
            b'?' => self.processing_instruction(sink),
            b'!' => match (self.prefix(b"<!--"), self.prefix(b"<![CDATA[")) {
                (Prefix::Yes, _) => self.comment(sink),
                (_, Prefix::Yes) => {
                    self.advance(9);
                    self.state = LexicalState::CData;
                    self.cdata_open = false;
                    Step::Advanced
                }
                (Prefix::Maybe, _) | (_, Prefix::Maybe) => Step::NeedMore,
                _ => {
                    self.fatal(sink, "StartTag: invalid element name".into());
                    self.advance(1);
                    Step::Advanced
                }
            },
            _ => self.start_tag(sink),
        }
    }

    fn html_markup(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let rest = self.rest();
        match html_markup_kind(rest, self.terminated) {
            Markup::Pending => Step::NeedMore,
            Markup::Text => self.text_run(sink),
            Markup::StartTag => self.start_tag(sink),
            Markup::EndTag => self.html_end_tag(sink),
            Markup::Pi => self.processing_instruction(sink),
            Markup::Declaration => {
                match (self.prefix(b"<!--"), self.prefix_ignore_case(b"<!DOCTYPE")) {
                    (Prefix::Yes, _) => self.comment(sink),
                    (_, Prefix::Yes) => self.doctype(sink),
                    (Prefix::Maybe, _) | (_, Prefix::Maybe) => Step::NeedMore,
                    _ => {
                        // Bogus declaration: skipped up to the next '>'.
                        let Some(end) = self.find(2, b">") else {
                            return Step::NeedMore;
                        };
                        self.advance(end + 1);
                        Step::Advanced
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Character data
    // ------------------------------------------------------------------

    fn text_run(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let rest = self.rest();
        let end = match self.syntax {
            Syntax::Xml => rest.iter().position(|&b| b == b'<' || b == b'&'),
            Syntax::Html => html_text_end(rest),
        };
        let n = match end {
            Some(n) => n,
            None if self.terminated => rest.len(),
            None if rest.len() >= TEXT_FLUSH_THRESHOLD => complete_utf8_prefix(rest),
            None => return Step::NeedMore,
        };
        if n == 0 {
            return Step::NeedMore;
        }
        let text = self.decode(0, n, sink);
        self.advance(n);
        self.emit_text(&text, sink);
        Step::Advanced
    }

    fn emit_text(&mut self, text: &str, sink: &mut Sink<'_, '_>) {
        if self.syntax == Syntax::Html && !self.tokenize {
            let blank = text.bytes().all(|b| b.is_ascii_whitespace());
            let top = self.stack.last().map(|e| e.name.as_str());
            if blank && matches!(top, None | Some("html") | Some("head")) {
                return;
            }
            if !blank {
                self.ensure_html(sink);
                self.close_head(sink);
                self.ensure_body(sink);
            }
        }
        sink.content.characters(text);
    }

    fn xml_reference(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let rest = self.rest();
        let len = rest
            .iter()
            .skip(1)
            .take_while(|&&b| b != b';' && is_reference_byte(b))
            .count();
        if 1 + len == rest.len() {
            return Step::NeedMore;
        }
        if rest[1 + len] != b';' || len == 0 {
            self.fatal(sink, "EntityRef: expecting ';'".into());
            if !self.halted {
                // The scanned name goes out as text with its '&'.
                let text = self.decode(0, 1 + len, sink);
                self.advance(1 + len);
                self.emit_text(&text, sink);
            }
            return Step::Advanced;
        }
        let line = self.line;
        let name = self.decode(1, 1 + len, sink);
        self.advance(len + 2);

        if name.starts_with('#') {
            match entities::char_ref(&name) {
                Some(c) => self.emit_text(c.encode_utf8(&mut [0; 4]), sink),
                None => self.fatal_at(sink, line, format!("CharRef: invalid value {name}")),
            }
        } else if let Some(text) = entities::predefined(&name) {
            self.emit_text(text, sink);
        } else if let Some(value) = self.entities.get(&name).cloned() {
            if self.options.contains(ParseOptions::NOENT) {
                self.emit_text(&value, sink);
            } else {
                sink.content.reference(&name);
            }
        } else if self.external_entities.contains(&name) {
            sink.content.reference(&name);
        } else if self.has_doctype {
            self.report(
                sink,
                Level::Error,
                Domain::Parser,
                line,
                format!("Entity '{name}' not defined"),
            );
            sink.content.reference(&name);
        } else {
            self.fatal_at(sink, line, format!("Entity '{name}' not defined"));
        }
        Step::Advanced
    }

    fn html_reference(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let rest = self.rest();
        let numeric = rest.get(1) == Some(&b'#');
        let hex = numeric && matches!(rest.get(2), Some(b'x' | b'X'));
        let mut i = match (numeric, hex) {
            (true, true) => 3,
            (true, false) => 2,
            _ => 1,
        };
        while i < rest.len() && i <= MAX_HTML_ENTITY_LOOKAHEAD {
            let b = rest[i];
            let ok = if hex {
                b.is_ascii_hexdigit()
            } else if numeric {
                b.is_ascii_digit()
            } else {
                b.is_ascii_alphanumeric()
            };
            if !ok {
                break;
            }
            i += 1;
        }
        if i == rest.len() && i <= MAX_HTML_ENTITY_LOOKAHEAD && !self.terminated {
            return Step::NeedMore;
        }
        let terminator = rest.get(i).copied();
        let body = String::from_utf8_lossy(&rest[1..i.min(rest.len())]).into_owned();
        let decoded = if i > MAX_HTML_ENTITY_LOOKAHEAD {
            None
        } else if numeric {
            entities::char_ref(&body.replace('X', "x"))
        } else {
            entities::html_entity(&body)
        };
        match decoded {
            Some(c) => {
                let skip = if terminator == Some(b';') { i + 1 } else { i };
                self.advance(skip);
                self.emit_text(c.encode_utf8(&mut [0; 4]), sink);
            }
            None => {
                // Unknown or malformed: the whole `&name;` stays literal text.
                let end = i.min(rest.len());
                let skip = if end > 1 && terminator == Some(b';') { end + 1 } else { end };
                let text = self.decode(0, skip, sink);
                self.advance(skip);
                self.emit_text(&text, sink);
            }
        }
        Step::Advanced
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    fn start_tag(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let Some(end) = self.find_unquoted(1, b">") else {
            return Step::NeedMore;
        };
        let line = self.line;
        let mut inner = self.decode(1, end, sink);
        self.advance(end + 1);
        if self.halted {
            return Step::Advanced;
        }

        let self_closing = inner.ends_with('/');
        if self_closing {
            inner.pop();
        }
        let name_len = inner
            .find(|c: char| c.is_whitespace() || (self.syntax == Syntax::Html && c == '/'))
            .unwrap_or(inner.len());
        let (name, attr_src) = inner.split_at(name_len);

        match self.syntax {
            Syntax::Xml => {
                if !name.chars().next().is_some_and(entities::is_name_start)
                    || !name.chars().all(entities::is_name_char)
                {
                    self.fatal_at(sink, line, "StartTag: invalid element name".into());
                    return Step::Advanced;
                }
                let attrs = self.xml_attributes(attr_src, line, sink);
                if !self.halted {
                    self.xml_start(name, attrs, self_closing, line, sink);
                }
            }
            Syntax::Html => {
                let name = name.to_ascii_lowercase();
                let attrs = self.html_attributes(attr_src, sink);
                self.html_start(&name, attrs, line, sink);
            }
        }
        Step::Advanced
    }

    fn xml_start(
        &mut self,
        name: &str,
        attrs: Vec<Attribute>,
        self_closing: bool,
        line: u32,
        sink: &mut Sink<'_, '_>,
    ) {
        if self.stack.is_empty() {
            if self.seen_root {
                self.fatal_stop(sink, "Extra content at the end of the document".into());
                return;
            }
            self.seen_root = true;
            self.state = LexicalState::Content;
        }

        let prefixes: Vec<String> = attrs
            .iter()
            .filter_map(|a| a.name.strip_prefix("xmlns:").map(str::to_owned))
            .collect();
        if let Some((prefix, local)) = name.split_once(':')
            && !self.prefix_in_scope(prefix, &prefixes)
        {
            self.report(
                sink,
                Level::Error,
                Domain::Namespace,
                line,
                format!("Namespace prefix {prefix} on {local} is not defined"),
            );
        }
        for attr in &attrs {
            if let Some((prefix, local)) = attr.name.split_once(':')
                && prefix != "xmlns"
                && !self.prefix_in_scope(prefix, &prefixes)
            {
                self.report(
                    sink,
                    Level::Error,
                    Domain::Namespace,
                    line,
                    format!("Namespace prefix {prefix} for {local} on {name} is not defined"),
                );
            }
        }

        sink.content.start_element(name, &attrs, false);
        if self_closing {
            sink.content.end_element(name);
            if self.stack.is_empty() {
                self.state = LexicalState::Epilog;
            }
        } else {
            self.stack.push(OpenElement {
                name: name.to_owned(),
                line,
                prefixes,
            });
        }
    }

    fn prefix_in_scope(&self, prefix: &str, local: &[String]) -> bool {
        prefix == "xml"
            || local.iter().any(|p| p == prefix)
            || self
                .stack
                .iter()
                .any(|open| open.prefixes.iter().any(|p| p == prefix))
    }

    fn xml_end_tag(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let Some(end) = self.find(2, b">") else {
            return Step::NeedMore;
        };
        let line = self.line;
        let raw = self.decode(2, end, sink);
        self.advance(end + 1);
        let name = raw.trim_end();

        match self.stack.last() {
            Some(top) if top.name == name => {
                self.stack.pop();
                sink.content.end_element(name);
            }
            Some(top) => {
                let message = format!(
                    "Opening and ending tag mismatch: {} line {} and {}",
                    top.name, top.line, name
                );
                self.fatal_at(sink, line, message);
                if !self.halted
                    && let Some(idx) = self.stack.iter().rposition(|e| e.name == name)
                {
                    self.pop_to(idx, sink);
                }
            }
            None => self.fatal_stop(sink, "Extra content at the end of the document".into()),
        }
        if self.stack.is_empty() && self.state == LexicalState::Content {
            self.state = LexicalState::Epilog;
        }
        Step::Advanced
    }

    /// Close every element above and including `idx`.
    fn pop_to(&mut self, idx: usize, sink: &mut Sink<'_, '_>) {
        while self.stack.len() > idx {
            if let Some(open) = self.stack.pop() {
                sink.content.end_element(&open.name);
            }
        }
    }

    fn xml_attributes(&mut self, src: &str, line: u32, sink: &mut Sink<'_, '_>) -> Vec<Attribute> {
        let mut attrs: Vec<Attribute> = Vec::new();
        let mut rest = src;
        loop {
            let trimmed = rest.trim_start();
            if trimmed.is_empty() {
                break;
            }
            if trimmed.len() == rest.len() {
                self.fatal_at(sink, line, "attributes construct error".into());
                break;
            }
            rest = trimmed;
            let name_len = rest
                .find(|c: char| c.is_whitespace() || c == '=')
                .unwrap_or(rest.len());
            let name = &rest[..name_len];
            if !name.chars().next().is_some_and(entities::is_name_start) {
                self.fatal_at(sink, line, "attributes construct error".into());
                break;
            }
            rest = rest[name_len..].trim_start();
            let Some(after_eq) = rest.strip_prefix('=') else {
                self.fatal_at(
                    sink,
                    line,
                    format!("Specification mandates value for attribute {name}"),
                );
                break;
            };
            rest = after_eq.trim_start();
            let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
                self.fatal_at(sink, line, "AttValue: \" or ' expected".into());
                break;
            };
            let body = &rest[1..];
            let Some(close) = body.find(quote) else {
                self.fatal_at(sink, line, format!("AttValue: {quote} expected"));
                break;
            };
            let raw = &body[..close];
            rest = &body[close + 1..];
            if raw.contains('<') {
                self.fatal_at(sink, line, "Unescaped '<' not allowed in attributes values".into());
                break;
            }
            let value = self.xml_attribute_value(raw, line, sink);
            if attrs.iter().any(|a| a.name == name) {
                self.fatal_at(sink, line, format!("Attribute {name} redefined"));
                continue;
            }
            attrs.push(Attribute::new(name, value));
        }
        attrs
    }

    fn xml_attribute_value(&mut self, raw: &str, line: u32, sink: &mut Sink<'_, '_>) -> String {
        let normalized: String = raw
            .chars()
            .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
            .collect();
        let mut out = String::with_capacity(normalized.len());
        let mut rest = normalized.as_str();
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            let after = &rest[amp + 1..];
            let Some(semi) = after.find(';') else {
                self.fatal_at(sink, line, "EntityRef: expecting ';'".into());
                out.push_str(&rest[amp..]);
                return out;
            };
            let name = &after[..semi];
            if name.starts_with('#') {
                match entities::char_ref(name) {
                    Some(c) => out.push(c),
                    None => self.fatal_at(sink, line, format!("CharRef: invalid value {name}")),
                }
            } else if let Some(text) = entities::predefined(name) {
                out.push_str(text);
            } else if let Some(value) = self.entities.get(name) {
                out.push_str(value);
            } else {
                let level = if self.has_doctype { Level::Error } else { Level::Fatal };
                self.report(
                    sink,
                    level,
                    Domain::Parser,
                    line,
                    format!("Entity '{name}' not defined"),
                );
            }
            rest = &after[semi + 1..];
        }
        out.push_str(rest);
        out
    }

    fn html_attributes(&mut self, src: &str, sink: &mut Sink<'_, '_>) -> Vec<Attribute> {
        let mut attrs: Vec<Attribute> = Vec::new();
        let mut rest = src;
        loop {
            rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
            if rest.is_empty() {
                break;
            }
            let name_len = rest
                .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
                .unwrap_or(rest.len())
                .max(rest.chars().next().map_or(1, char::len_utf8));
            let name = rest[..name_len].to_ascii_lowercase();
            rest = rest[name_len..].trim_start();

            let value = if let Some(after_eq) = rest.strip_prefix('=') {
                let after_eq = after_eq.trim_start();
                let (raw, remainder) = match after_eq.chars().next() {
                    Some(q @ ('"' | '\'')) => {
                        let body = &after_eq[1..];
                        let close = body.find(q).unwrap_or(body.len());
                        (&body[..close], body.get(close + 1..).unwrap_or(""))
                    }
                    _ => {
                        let end = after_eq
                            .find(char::is_whitespace)
                            .unwrap_or(after_eq.len());
                        (&after_eq[..end], &after_eq[end..])
                    }
                };
                rest = remainder;
                Some(decode_html_entities(raw))
            } else {
                None
            };

            if attrs.iter().any(|a| a.name == name) {
                self.error(sink, Domain::Html, format!("Attribute {name} redefined"));
                continue;
            }
            attrs.push(Attribute { name, value });
        }
        attrs
    }

    /// Loose HTML tree rules. A trailing `/` on non-void elements is ignored.
    fn html_start(&mut self, name: &str, attrs: Vec<Attribute>, line: u32, sink: &mut Sink<'_, '_>) {
        self.seen_root = true;
        if self.tokenize {
            sink.content.start_element(name, &attrs, false);
            return;
        }
        match name {
            "html" => {
                if self.is_open("html") {
                    return;
                }
            }
            "head" => {
                if self.body_started || self.head_done || self.is_open("head") {
                    return;
                }
                self.ensure_html(sink);
            }
            "body" => {
                if self.body_started {
                    return;
                }
                self.ensure_html(sink);
                self.close_head(sink);
                self.body_started = true;
            }
            _ if HTML_HEAD_CONTENT.contains(&name) && !self.body_started => {
                self.ensure_html(sink);
                if !self.is_open("head")
                    && !self.head_done
                    && !self.options.contains(ParseOptions::NOIMPLIED)
                {
                    self.open(sink, "head", &[], true, line);
                }
            }
            _ => {
                self.ensure_html(sink);
                self.close_head(sink);
                self.ensure_body(sink);
                self.auto_close(name, sink);
            }
        }

        if HTML_VOID.contains(&name) {
            sink.content.start_element(name, &attrs, false);
            sink.content.end_element(name);
            return;
        }
        self.open(sink, name, &attrs, false, line);
        if HTML_RAW_TEXT.contains(&name) {
            self.state = LexicalState::RawText;
            self.raw_end = Some(name.to_owned());
        }
    }

    fn open(&mut self, sink: &mut Sink<'_, '_>, name: &str, attrs: &[Attribute], implied: bool, line: u32) {
        sink.content.start_element(name, attrs, implied);
        self.stack.push(OpenElement {
            name: name.to_owned(),
            line,
            prefixes: Vec::new(),
        });
    }

    fn is_open(&self, name: &str) -> bool {
        self.stack.iter().any(|e| e.name == name)
    }

    fn ensure_html(&mut self, sink: &mut Sink<'_, '_>) {
        if self.options.contains(ParseOptions::NOIMPLIED) || self.is_open("html") {
            return;
        }
        let line = self.line;
        self.open(sink, "html", &[], true, line);
    }

    fn close_head(&mut self, sink: &mut Sink<'_, '_>) {
        if let Some(idx) = self.stack.iter().rposition(|e| e.name == "head") {
            self.pop_to(idx, sink);
            self.head_done = true;
        }
    }

    fn ensure_body(&mut self, sink: &mut Sink<'_, '_>) {
        if self.body_started || self.options.contains(ParseOptions::NOIMPLIED) {
            return;
        }
        self.body_started = true;
        let line = self.line;
        self.open(sink, "body", &[], true, line);
    }

    fn auto_close(&mut self, name: &str, sink: &mut Sink<'_, '_>) {
        let top = self.stack.last().map(|e| e.name.as_str());
        let closes = match (name, top) {
            (_, Some("p")) if HTML_CLOSES_P.contains(&name) => true,
            ("li", Some("li")) => true,
            ("dt" | "dd", Some("dt" | "dd")) => true,
            ("option", Some("option")) => true,
            ("td" | "th" | "tr", Some("td" | "th")) => true,
            _ => false,
        };
        if closes {
            let idx = self.stack.len() - 1;
            self.pop_to(idx, sink);
            if name == "tr" && self.stack.last().is_some_and(|e| e.name == "tr") {
                let idx = self.stack.len() - 1;
                self.pop_to(idx, sink);
            }
        }
    }

    fn html_end_tag(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let Some(end) = self.find(2, b">") else {
            return Step::NeedMore;
        };
        let raw = self.decode(2, end, sink);
        self.advance(end + 1);
        let name = raw
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        if self.tokenize {
            sink.content.end_element(&name);
            return Step::Advanced;
        }
        match name.as_str() {
            // Closed when the input ends.
            "html" | "body" => {}
            "head" => self.close_head(sink),
            _ => {
                if let Some(idx) = self.stack.iter().rposition(|e| e.name == name) {
                    self.pop_to(idx, sink);
                } else if !HTML_VOID.contains(&name.as_str()) {
                    self.error(sink, Domain::Html, format!("Unexpected end tag : {name}"));
                }
            }
        }
        Step::Advanced
    }

    // ------------------------------------------------------------------
    // Raw text (HTML)
    // ------------------------------------------------------------------

    fn step_raw_text(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let rest = self.rest();
        let Some(end_name) = self.raw_end.clone() else {
            // Plain text runs to the end of input.
            let n = if self.terminated {
                rest.len()
            } else {
                complete_utf8_prefix(rest)
            };
            return self.emit_raw(n, sink);
        };
        let closer = format!("</{end_name}");
        let closer = closer.as_bytes();

        let mut hold = None;
        let mut close_at = None;
        for (i, _) in rest.iter().enumerate().filter(|(_, b)| **b == b'<') {
            let tail = &rest[i..];
            if tail.len() < closer.len() {
                if closer[..tail.len()].eq_ignore_ascii_case(tail) {
                    hold = Some(i);
                    break;
                }
                continue;
            }
            if !tail[..closer.len()].eq_ignore_ascii_case(closer) {
                continue;
            }
            match tail.get(closer.len()) {
                None => {
                    hold = Some(i);
                    break;
                }
                Some(b) if b.is_ascii_whitespace() || *b == b'/' || *b == b'>' => {
                    close_at = Some(i);
                    break;
                }
                Some(_) => {}
            }
        }

        if let Some(i) = close_at {
            if i > 0 {
                return self.emit_raw(i, sink);
            }
            self.advance(closer.len());
            self.state = LexicalState::EndTag;
            return Step::Advanced;
        }
        let n = match hold {
            _ if self.terminated => rest.len(),
            Some(i) => i,
            None => complete_utf8_prefix(rest),
        };
        self.emit_raw(n, sink)
    }

    fn emit_raw(&mut self, n: usize, sink: &mut Sink<'_, '_>) -> Step {
        if n == 0 {
            return Step::NeedMore;
        }
        let text = self.decode(0, n, sink);
        self.advance(n);
        sink.content.characters(&text);
        Step::Advanced
    }

    fn step_raw_end_tag(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let Some(end) = self.find(0, b">") else {
            return Step::NeedMore;
        };
        self.advance(end + 1);
        self.state = LexicalState::Content;
        if let Some(name) = self.raw_end.take() {
            if self.tokenize {
                sink.content.end_element(&name);
            } else if let Some(idx) = self.stack.iter().rposition(|e| e.name == name) {
                self.pop_to(idx, sink);
            }
        }
        Step::Advanced
    }

    // ------------------------------------------------------------------
    // Comments, PIs, CDATA
    // ------------------------------------------------------------------

    fn comment(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let Some(end) = self.find(4, b"-->") else {
            return Step::NeedMore;
        };
        let text = self.decode(4, end, sink);
        self.advance(end + 3);
        sink.content.comment(&text, false);
        Step::Advanced
    }

    fn processing_instruction(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let (end, closer_len) = match self.syntax {
            Syntax::Xml => match self.find(2, b"?>") {
                Some(end) => (end, 2),
                None => return Step::NeedMore,
            },
            Syntax::Html => match self.find(2, b">") {
                Some(end) => (end, 1),
                None => return Step::NeedMore,
            },
        };
        let line = self.line;
        let inner = self.decode(2, end, sink);
        self.advance(end + closer_len);
        let (target, data) = match inner.find(char::is_whitespace) {
            Some(split) => (&inner[..split], inner[split..].trim_start()),
            None => (inner.as_str(), ""),
        };
        if self.syntax == Syntax::Xml {
            if target.is_empty() {
                self.fatal_at(sink, line, "xmlParsePI : no target name".into());
                return Step::Advanced;
            }
            if target.eq_ignore_ascii_case("xml") {
                self.fatal_at(
                    sink,
                    line,
                    "XML declaration allowed only at the start of the document".into(),
                );
                return Step::Advanced;
            }
        }
        sink.content.processing_instruction(target, data);
        Step::Advanced
    }

    fn step_cdata(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        if let Some(end) = self.find(0, b"]]>") {
            if end > 0 || !self.cdata_open {
                let data = self.decode(0, end, sink);
                self.emit_cdata(&data, sink);
            }
            self.advance(end + 3);
            self.state = LexicalState::Content;
            self.cdata_open = false;
            return Step::Advanced;
        }
        let rest = self.rest();
        let candidate = rest.len().saturating_sub(2);
        let n = complete_utf8_prefix(&rest[..candidate]);
        if n == 0 {
            return Step::NeedMore;
        }
        let data = self.decode(0, n, sink);
        self.advance(n);
        self.emit_cdata(&data, sink);
        Step::Advanced
    }

    fn emit_cdata(&mut self, data: &str, sink: &mut Sink<'_, '_>) {
        if self.options.contains(ParseOptions::NOCDATA) {
            if !data.is_empty() {
                sink.content.characters(data);
            }
        } else {
            sink.content.cdata_block(data, self.cdata_open);
        }
        self.cdata_open = true;
    }

    // ------------------------------------------------------------------
    // Document type declaration
    // ------------------------------------------------------------------

    fn doctype(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let stops: &[u8] = match self.syntax {
            Syntax::Xml => b"[>",
            Syntax::Html => b">",
        };
        let Some(end) = self.find_unquoted(9, stops) else {
            return Step::NeedMore;
        };
        let opens_subset = self.rest()[end] == b'[';
        let line = self.line;
        let header = self.decode(9, end, sink);
        self.advance(end + 1);

        if self.syntax == Syntax::Html && !self.tokenize && self.seen_root {
            return Step::Advanced;
        }
        let Some((name, ids)) = parse_doctype_header(&header) else {
            self.fatal_at(sink, line, "xmlParseDocTypeDecl : no DOCTYPE name !".into());
            return Step::Advanced;
        };
        self.has_doctype = true;
        sink.content
            .internal_subset(&name, ids.public.as_deref(), ids.system.as_deref());
        self.doctype_ids = Some(ids);
        if opens_subset {
            self.state = LexicalState::Dtd;
        } else {
            self.end_of_doctype(sink);
        }
        Step::Advanced
    }

    fn end_of_doctype(&mut self, sink: &mut Sink<'_, '_>) {
        if !self.options.contains(ParseOptions::DTDLOAD) {
            return;
        }
        let Some(ids) = self.doctype_ids.clone() else {
            return;
        };
        if ids.public.is_none() && ids.system.is_none() {
            return;
        }
        let resolved = self
            .catalog
            .resolve(ids.public.as_deref(), ids.system.as_deref());
        if resolved.is_none() {
            let target = ids.system.or(ids.public).unwrap_or_default();
            let line = self.line;
            self.report(
                sink,
                Level::Warning,
                Domain::Parser,
                line,
                format!("failed to load external entity \"{target}\""),
            );
        }
    }

    fn step_dtd(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let rest = self.rest();
        if rest[0].is_ascii_whitespace() {
            let n = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
            self.advance(n);
            return Step::Advanced;
        }
        match rest[0] {
            b']' => {
                let Some(gt) = rest[1..].iter().position(|b| !b.is_ascii_whitespace()) else {
                    return Step::NeedMore;
                };
                if rest[1 + gt] != b'>' {
                    self.fatal_stop(sink, "DOCTYPE improperly terminated".into());
                    return Step::Advanced;
                }
                self.advance(gt + 2);
                self.state = LexicalState::Prolog;
                self.end_of_doctype(sink);
                Step::Advanced
            }
            b'%' => {
                let Some(end) = self.find(1, b";") else {
                    return Step::NeedMore;
                };
                self.advance(end + 1);
                Step::Advanced
            }
            b'<' => {
                if self.avail() < 2 {
                    return Step::NeedMore;
                }
                match (self.prefix(b"<!--"), self.prefix(b"<!ENTITY")) {
                    (Prefix::Yes, _) => {
                        let Some(end) = self.find(4, b"-->") else {
                            return Step::NeedMore;
                        };
                        let text = self.decode(4, end, sink);
                        self.advance(end + 3);
                        sink.content.comment(&text, true);
                        Step::Advanced
                    }
                    (_, Prefix::Yes) => self.entity_declaration(sink),
                    (Prefix::Maybe, _) | (_, Prefix::Maybe) => Step::NeedMore,
                    _ if self.rest()[1] == b'?' => {
                        let Some(end) = self.find(2, b"?>") else {
                            return Step::NeedMore;
                        };
                        self.advance(end + 2);
                        Step::Advanced
                    }
                    _ => {
                        // ELEMENT, ATTLIST and NOTATION declarations are skipped.
                        let Some(end) = self.find_unquoted(2, b">") else {
                            return Step::NeedMore;
                        };
                        self.advance(end + 1);
                        Step::Advanced
                    }
                }
            }
            _ => {
                self.fatal_stop(sink, "DOCTYPE improperly terminated".into());
                Step::Advanced
            }
        }
    }

    fn entity_declaration(&mut self, sink: &mut Sink<'_, '_>) -> Step {
        let Some(end) = self.find_unquoted(8, b">") else {
            return Step::NeedMore;
        };
        let line = self.line;
        let body = self.decode(8, end, sink);
        self.advance(end + 1);

        let body = body.trim();
        if body.starts_with('%') {
            return Step::Advanced;
        }
        let name_len = body.find(char::is_whitespace).unwrap_or(body.len());
        let (name, definition) = body.split_at(name_len);
        let definition = definition.trim_start();
        if name.is_empty() {
            self.fatal_at(sink, line, "xmlParseEntityDecl: no name".into());
            return Step::Advanced;
        }
        match definition.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let literal = definition[1..]
                    .find(q)
                    .map_or(&definition[1..], |close| &definition[1..1 + close]);
                let replacement = expand_entity_literal(literal);
                if !self.entities.contains_key(name) {
                    self.entities.insert(name.to_owned(), replacement);
                    sink.content.entity_decl(name, literal);
                }
            }
            Some(_) if definition.starts_with("SYSTEM") || definition.starts_with("PUBLIC") => {
                if !self.external_entities.iter().any(|e| e == name) {
                    self.external_entities.push(name.to_owned());
                }
            }
            _ => self.fatal_at(sink, line, "EntityValue: \" or ' expected".into()),
        }
        Step::Advanced
    }

    // ------------------------------------------------------------------
    // End of input
    // ------------------------------------------------------------------

    fn finish(&mut self, sink: &mut Sink<'_, '_>) {
        if self.finished {
            return;
        }
        self.finished = true;

        if !self.halted {
            let pending = self.rest().iter().any(|b| !b.is_ascii_whitespace());
            match self.syntax {
                Syntax::Xml => self.finish_xml(pending, sink),
                Syntax::Html => {
                    if pending {
                        let message = self.leftover_message();
                        self.error(sink, Domain::Html, message);
                    }
                }
            }
        }
        if !self.halted {
            self.pop_to(0, sink);
        }
        let remaining = self.avail();
        self.advance(remaining);
        self.state = LexicalState::Eof;
        sink.content.end_document();
    }

    fn finish_xml(&mut self, pending: bool, sink: &mut Sink<'_, '_>) {
        match self.state {
            LexicalState::Start | LexicalState::Prolog if !self.seen_root => {
                let message = if pending {
                    self.leftover_message()
                } else {
                    "Document is empty".to_owned()
                };
                self.fatal(sink, message);
            }
            LexicalState::CData => self.fatal(sink, "CData section not finished".into()),
            LexicalState::Dtd => self.fatal(sink, "DOCTYPE improperly terminated".into()),
            _ if pending => {
                let message = self.leftover_message();
                self.fatal(sink, message);
            }
            _ => {}
        }
        if let Some(top) = self.stack.last() {
            let message = format!("Premature end of data in tag {} line {}", top.name, top.line);
            self.fatal(sink, message);
        }
    }

    fn leftover_message(&self) -> String {
        let rest = self.rest();
        let starts = |p: &[u8]| rest.starts_with(p);
        if starts(b"<!--") {
            "Comment not terminated".to_owned()
        } else if starts(b"<![CDATA[") {
            "CData section not finished".to_owned()
        } else if starts(b"<?") {
            "PI not terminated".to_owned()
        } else if starts(b"</") {
            "expected '>'".to_owned()
        } else if starts(b"<") {
            let name: String = String::from_utf8_lossy(&rest[1..])
                .chars()
                .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
                .collect();
            format!("Couldn't find end of Start Tag {name}")
        } else if starts(b"&") {
            "EntityRef: expecting ';'".to_owned()
        } else if self.state == LexicalState::Epilog {
            "Extra content at the end of the document".to_owned()
        } else {
            "Start tag expected, '<' not found".to_owned()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Markup {
    Pending,
    Text,
    StartTag,
    EndTag,
    Pi,
    Declaration,
}

/// Classify a `<` in loose HTML content by the bytes after it.
fn html_markup_kind(rest: &[u8], terminated: bool) -> Markup {
    let pending = if terminated {
        Markup::Text
    } else {
        Markup::Pending
    };
    match rest.get(1) {
        None => pending,
        Some(b) if b.is_ascii_alphabetic() => Markup::StartTag,
        Some(b'!') => Markup::Declaration,
        Some(b'?') => Markup::Pi,
        Some(b'/') => match rest.get(2) {
            None => pending,
            Some(b) if b.is_ascii_alphabetic() => Markup::EndTag,
            Some(_) => Markup::Text,
        },
        Some(_) => Markup::Text,
    }
}

/// End of a loose HTML text run. The first byte is always text.
fn html_text_end(rest: &[u8]) -> Option<usize> {
    (1..rest.len()).find(|&i| match rest[i] {
        b'&' => true,
        b'<' => html_markup_kind(&rest[i..], false) != Markup::Text,
        _ => false,
    })
}

fn is_reference_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b':' | b'-' | b'.' | b'#') || b >= 0x80
}

/// Length of the longest prefix of `bytes` that does not end inside a UTF-8
/// sequence.
pub(crate) fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let b = bytes[len - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let need = match b {
            0x00..=0x7F => 1,
            _ if b >> 5 == 0b110 => 2,
            _ if b >> 4 == 0b1110 => 3,
            _ if b >> 3 == 0b1_1110 => 4,
            _ => 1,
        };
        return if back < need { len - back } else { len };
    }
    len
}

fn latin1_to_utf8(bytes: &[u8]) -> Vec<u8> {
    let text: String = bytes.iter().map(|&b| char::from(b)).collect();
    text.into_bytes()
}

fn pseudo_attributes(body: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = body.trim();
    while let Some(eq) = rest.find('=') {
        let name = rest[..eq].trim().to_owned();
        let after = rest[eq + 1..].trim_start();
        let Some(quote) = after.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        let Some(close) = after[1..].find(quote) else {
            break;
        };
        out.push((name, after[1..1 + close].to_owned()));
        rest = after[close + 2..].trim_start();
    }
    out
}

fn parse_doctype_header(header: &str) -> Option<(String, ExternalId)> {
    let header = header.trim();
    let name_len = header.find(char::is_whitespace).unwrap_or(header.len());
    let name = &header[..name_len];
    if name.is_empty() {
        return None;
    }
    let mut rest = header[name_len..].trim_start();
    let ids = if let Some(after) = rest.strip_prefix("PUBLIC") {
        rest = after.trim_start();
        let public = take_quoted(&mut rest);
        let system = take_quoted(&mut rest);
        ExternalId { public, system }
    } else if let Some(after) = rest.strip_prefix("SYSTEM") {
        rest = after.trim_start();
        ExternalId {
            public: None,
            system: take_quoted(&mut rest),
        }
    } else {
        ExternalId {
            public: None,
            system: None,
        }
    };
    Some((name.to_owned(), ids))
}

fn take_quoted(rest: &mut &str) -> Option<String> {
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let close = rest[1..].find(quote)?;
    let value = rest[1..1 + close].to_owned();
    *rest = rest[close + 2..].trim_start();
    Some(value)
}

/// Replacement text of an internal entity: character references and the
/// predefined entities are expanded, other references are kept literally.
fn expand_entity_literal(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut rest = literal;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        match after.find(';') {
            Some(semi) => {
                let name = &after[..semi];
                let expanded = if name.starts_with('#') {
                    entities::char_ref(name).map(String::from)
                } else {
                    entities::predefined(name).map(str::to_owned)
                };
                match expanded {
                    Some(text) => out.push_str(&text),
                    None => out.push_str(&rest[amp..amp + semi + 2]),
                }
                rest = &after[semi + 1..];
            }
            None => {
                out.push_str(&rest[amp..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_html_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '#'))
            .unwrap_or(after.len());
        let body = &after[..len];
        let decoded = if body.starts_with('#') {
            entities::char_ref(&body.replace('X', "x"))
        } else {
            entities::html_entity(body)
        };
        match decoded {
            Some(c) => {
                out.push(c);
                let skip = if after[len..].starts_with(';') { len + 1 } else { len };
                rest = &after[skip..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Events(Vec<String>);

    impl ContentHandler for Events {
        fn start_element(&mut self, name: &str, attributes: &[Attribute], implied: bool) {
            let attrs: Vec<String> = attributes
                .iter()
                .map(|a| format!("{}={}", a.name, a.value.as_deref().unwrap_or("")))
                .collect();
            let mark = if implied { "*" } else { "" };
            self.0.push(format!("<{mark}{name}{}>", attrs.iter().map(|a| format!(" {a}")).collect::<String>()));
        }
        fn end_element(&mut self, name: &str) {
            self.0.push(format!("</{name}>"));
        }
        fn characters(&mut self, text: &str) {
            self.0.push(format!("t:{text}"));
        }
        fn reference(&mut self, name: &str) {
            self.0.push(format!("ref:{name}"));
        }
        fn cdata_block(&mut self, data: &str, continuation: bool) {
            self.0.push(format!("cdata{}:{data}", if continuation { "+" } else { "" }));
        }
        fn comment(&mut self, text: &str, in_subset: bool) {
            self.0.push(format!("c{}:{text}", if in_subset { "!" } else { "" }));
        }
        fn internal_subset(&mut self, name: &str, _public_id: Option<&str>, _system_id: Option<&str>) {
            self.0.push(format!("doctype:{name}"));
        }
    }

    fn run(syntax: Syntax, options: ParseOptions, input: &str, chunk: usize) -> (Vec<String>, Vec<Diagnostic>, bool) {
        let mut parser = PushParser::new(syntax, options, "t.xml");
        let mut events = Events::default();
        let mut diags: Vec<Diagnostic> = Vec::new();
        let bytes = input.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(chunk.max(1)).collect();
        if chunks.is_empty() {
            parser.feed(b"", true, &mut events, &mut diags);
        }
        for (i, part) in chunks.iter().enumerate() {
            parser.feed(part, i + 1 == chunks.len(), &mut events, &mut diags);
        }
        (events.0, diags, parser.is_well_formed())
    }

    #[test]
    fn chunking_does_not_change_events() {
        let doc = "<?xml version=\"1.0\"?>\n<doc a=\"1\"><!-- c --><p>x &amp; y</p><![CDATA[raw]]></doc>\n";
        let (whole, _, ok) = run(Syntax::Xml, ParseOptions::NONE, doc, doc.len());
        assert!(ok);
        let (bytewise, _, ok) = run(Syntax::Xml, ParseOptions::NONE, doc, 1);
        assert!(ok);
        let merge = |events: Vec<String>| {
            let mut out: Vec<String> = Vec::new();
            for e in events {
                if let Some(last) = out.last_mut() {
                    if let Some(t) = e.strip_prefix("t:")
                        && last.starts_with("t:")
                    {
                        last.push_str(t);
                        continue;
                    }
                    if let Some(t) = e.strip_prefix("cdata+:")
                        && last.starts_with("cdata")
                    {
                        last.push_str(t);
                        continue;
                    }
                }
                out.push(e);
            }
            out
        };
        assert_eq!(merge(whole), merge(bytewise));
    }

    #[test]
    fn text_is_flushed_by_markup() {
        let (events, _, ok) = run(Syntax::Xml, ParseOptions::NONE, "<a>bc</a>", 1);
        assert!(ok);
        assert_eq!(events, ["<a>", "t:bc", "</a>"]);
    }

    #[test]
    fn mismatch_is_fatal() {
        let (_, diags, ok) = run(Syntax::Xml, ParseOptions::NONE, "<a><b></a>", 3);
        assert!(!ok);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "Opening and ending tag mismatch: b line 1 and a");
        assert_eq!(diags[0].level, Level::Fatal);
    }

    #[test]
    fn premature_end_reported_with_open_tag() {
        let (_, diags, ok) = run(Syntax::Xml, ParseOptions::NONE, "<doc>\n<a>text", 64);
        assert!(!ok);
        assert_eq!(diags.last().unwrap().message, "Premature end of data in tag a line 2");
    }

    #[test]
    fn empty_document() {
        let (_, diags, ok) = run(Syntax::Xml, ParseOptions::NONE, "  \n", 8);
        assert!(!ok);
        assert_eq!(diags[0].message, "Document is empty");
    }

    #[test]
    fn extra_content_stops_even_when_recovering() {
        let (events, diags, ok) = run(Syntax::Xml, ParseOptions::RECOVER, "<a/>x<b/>", 1);
        assert!(!ok);
        assert_eq!(events, ["<a>", "</a>"]);
        assert_eq!(diags[0].message, "Extra content at the end of the document");
    }

    #[test]
    fn entities_follow_noent() {
        let doc = "<!DOCTYPE d [<!ENTITY e \"val\"><!-- in -->]><d>&e;</d>";
        let (events, _, ok) = run(Syntax::Xml, ParseOptions::NONE, doc, 5);
        assert!(ok);
        assert!(events.contains(&"ref:e".to_string()));
        assert!(events.contains(&"c!: in ".to_string()));
        let (events, _, _) = run(Syntax::Xml, ParseOptions::NOENT, doc, 5);
        assert!(events.contains(&"t:val".to_string()));
    }

    #[test]
    fn undefined_entity_without_dtd_is_fatal() {
        let (_, diags, ok) = run(Syntax::Xml, ParseOptions::NONE, "<d>&nope;</d>", 64);
        assert!(!ok);
        assert_eq!(diags[0].message, "Entity 'nope' not defined");
    }

    #[test]
    fn undeclared_namespace_prefix() {
        let (_, diags, ok) = run(Syntax::Xml, ParseOptions::NONE, "<p:a xmlns:q=\"u\"><q:b/></p:a>", 64);
        assert!(ok);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].domain, Domain::Namespace);
        assert_eq!(diags[0].message, "Namespace prefix p on a is not defined");
    }

    #[test]
    fn nowarning_and_noerror_filter_reports() {
        let doc = "<p:a/>";
        let (_, diags, _) = run(Syntax::Xml, ParseOptions::NOERROR, doc, 64);
        assert!(diags.is_empty());
    }

    #[test]
    fn cdata_is_emitted_eagerly() {
        let (events, _, ok) = run(Syntax::Xml, ParseOptions::NONE, "<a><![CDATA[xyz]]></a>", 1);
        assert!(ok);
        assert_eq!(events, ["<a>", "cdata:x", "cdata+:y", "cdata+:z", "</a>"]);
    }

    #[test]
    fn html_implies_structure() {
        let (events, _, _) = run(Syntax::Html, ParseOptions::NONE, "<p>one<p>two", 1);
        assert_eq!(
            events,
            ["<*html>", "<*body>", "<p>", "t:one", "</p>", "<p>", "t:two", "</p>", "</body>", "</html>"]
        );
    }

    #[test]
    fn html_raw_text_holds_only_closer_prefix() {
        let mut parser = PushParser::new(Syntax::Html, ParseOptions::NONE, "s.html");
        let mut events = Events::default();
        let mut diags: Vec<Diagnostic> = Vec::new();
        for &b in b"<script>a</scrip" {
            parser.feed(&[b], false, &mut events, &mut diags);
        }
        assert_eq!(parser.lexical_state(), LexicalState::RawText);
        assert_eq!(parser.raw_text_end_tag(), Some("script"));
        assert_eq!(parser.buffered(), b"</scrip");
        for &b in b"t>" {
            parser.feed(&[b], false, &mut events, &mut diags);
        }
        assert_eq!(parser.lexical_state(), LexicalState::Content);
        assert!(events.0.ends_with(&["t:a".to_string(), "</script>".to_string()]));
    }

    #[test]
    fn html_legacy_entity_without_semicolon() {
        let (events, _, _) = run(Syntax::Html, ParseOptions::NOIMPLIED, "<b>&copy 2024 &bogus;</b>", 1);
        let text: String = events
            .iter()
            .filter_map(|e| e.strip_prefix("t:"))
            .collect();
        assert_eq!(text, "\u{a9} 2024 &bogus;");
    }

    #[test]
    fn unknown_html_entity_is_one_text_run() {
        let (events, _, _) = run(Syntax::Html, ParseOptions::NOIMPLIED, "<p>fish &chips; shop</p>", 1);
        assert!(events.contains(&"t:&chips;".to_string()), "{events:?}");
        let (events, _, _) = run(Syntax::Html, ParseOptions::NOIMPLIED, "<p>a &nope b</p>", 1);
        assert!(events.contains(&"t:&nope".to_string()), "{events:?}");
    }

    #[test]
    fn recovered_xml_reference_keeps_its_name() {
        let (events, diags, ok) = run(Syntax::Xml, ParseOptions::RECOVER, "<a>x&abc y</a>", 1);
        assert!(!ok);
        assert_eq!(diags[0].message, "EntityRef: expecting ';'");
        assert!(events.contains(&"t:&abc".to_string()), "{events:?}");
    }

    #[test]
    fn html_stray_end_tag_is_an_error() {
        let (_, diags, _) = run(Syntax::Html, ParseOptions::NONE, "<div></span></div>", 64);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "Unexpected end tag : span");
        assert_eq!(diags[0].domain, Domain::Html);
    }

    #[test]
    fn tokenizer_reports_raw_tokens() {
        let mut parser = PushParser::tokenizer("", 0);
        let mut events = Events::default();
        parser.feed(b"<p>a</q>", true, &mut events, &mut crate::diag::IgnoreDiagnostics);
        assert_eq!(events.0, ["<p>", "t:a", "</q>"]);
    }

    #[test]
    fn utf8_prefix_backs_off_partial_sequences() {
        assert_eq!(complete_utf8_prefix(b"ab"), 2);
        assert_eq!(complete_utf8_prefix("a\u{e9}".as_bytes()), 3);
        assert_eq!(complete_utf8_prefix(&"a\u{20ac}".as_bytes()[..3]), 1);
        assert_eq!(complete_utf8_prefix(&[0xF0, 0x9F, 0x98]), 0);
    }

    #[test]
    fn latin1_declaration_transcodes_input() {
        let mut input = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>".to_vec();
        input.push(0xE9);
        input.extend_from_slice(b"</a>");
        let mut parser = PushParser::new(Syntax::Xml, ParseOptions::NONE, "l.xml");
        let mut events = Events::default();
        let mut diags: Vec<Diagnostic> = Vec::new();
        for (i, b) in input.iter().enumerate() {
            parser.feed(&[*b], i + 1 == input.len(), &mut events, &mut diags);
        }
        assert!(parser.is_well_formed(), "{diags:?}");
        assert!(events.0.contains(&"t:\u{e9}".to_string()));
    }
}
