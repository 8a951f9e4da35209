//! Single-byte push verification.
//!
//! Feeds a document to an incremental parser one byte at a time and checks
//! two properties after every byte:
//!
//! 1. **Eagerness**: at most one construct (tag, text run, reference, CDATA
//!    block, comment, processing instruction, internal subset) surfaces per
//!    byte.
//! 2. **Bounded lookahead**: whenever the parser makes progress, the input it
//!    still holds unprocessed is no longer than its lexical position
//!    justifies (see [`LookaheadPolicy`]).
//!
//! Chunk size 1 is the strongest stress on the incremental path: any
//! accumulation beyond the minimal lookahead shows up here even when larger
//! chunks would hide it.

use markcheck_core::{
    Attribute, ContentHandler, DiagnosticHandler, LexicalState, PushParser, Syntax,
};
use thiserror::Error;

/// Category of a recognized construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Construct {
    Element,
    Characters,
    Reference,
    CData,
    Comment,
    ProcessingInstruction,
    InternalSubset,
}

/// Receives construct and progress notifications while a parser runs.
pub trait ConstructObserver {
    fn on_construct(&mut self, construct: Construct);
    fn on_consumed(&mut self, consumed: u64);
}

/// What the verifier needs from a streaming parser.
pub trait IncrementalParser {
    fn syntax(&self) -> Syntax;

    fn feed(
        &mut self,
        chunk: &[u8],
        terminate: bool,
        content: &mut dyn ContentHandler,
        diagnostics: &mut dyn DiagnosticHandler,
    );

    fn lexical_state(&self) -> LexicalState;

    /// Bytes fully processed so far.
    fn consumed(&self) -> u64;

    /// Bytes received but not yet processed.
    fn buffered(&self) -> &[u8];

    /// Closing tag name while inside raw text.
    fn raw_text_end_tag(&self) -> Option<&str>;
}

impl IncrementalParser for PushParser {
    fn syntax(&self) -> Syntax {
        PushParser::syntax(self)
    }

    fn feed(
        &mut self,
        chunk: &[u8],
        terminate: bool,
        content: &mut dyn ContentHandler,
        diagnostics: &mut dyn DiagnosticHandler,
    ) {
        PushParser::feed(self, chunk, terminate, content, diagnostics);
    }

    fn lexical_state(&self) -> LexicalState {
        PushParser::lexical_state(self)
    }

    fn consumed(&self) -> u64 {
        PushParser::consumed(self)
    }

    fn buffered(&self) -> &[u8] {
        PushParser::buffered(self)
    }

    fn raw_text_end_tag(&self) -> Option<&str> {
        PushParser::raw_text_end_tag(self)
    }
}

/// Most unprocessed bytes a parser may hold after making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookaheadPolicy {
    /// Text content with a pending `<`.
    pub markup: usize,
    /// Text content with a pending `&` in XML.
    pub xml_reference: usize,
    /// Text content with a pending `&` in HTML, where legacy entity names
    /// may end without `;`.
    pub html_reference: usize,
    /// Other text content: a partial UTF-8 sequence.
    pub text: usize,
    /// Inside a CDATA section: a partial `]]>` plus partial UTF-8.
    pub cdata: usize,
    /// HTML end tag awaiting `>`.
    pub html_end_tag: usize,
    /// Added to the closing tag name length inside raw text (`</` prefix).
    pub raw_text_slack: usize,
}

impl LookaheadPolicy {
    pub const STANDARD: Self = Self {
        markup: 1,
        xml_reference: 1,
        html_reference: markcheck_core::entities::MAX_HTML_ENTITY_LOOKAHEAD,
        text: 3,
        cdata: 5,
        html_end_tag: 3,
        raw_text_slack: 2,
    };

    /// Threshold for the parser's position after a step.
    ///
    /// `in_text` is whether the byte was fed while in text content; `next` is
    /// the first unprocessed byte.
    #[must_use]
    pub fn allowed(
        &self,
        syntax: Syntax,
        state: LexicalState,
        in_text: bool,
        raw_end: Option<&str>,
        next: Option<u8>,
    ) -> usize {
        if syntax == Syntax::Html && state == LexicalState::EndTag {
            return self.html_end_tag;
        }
        if in_text {
            if let Some(tag) = raw_end {
                return tag.len() + self.raw_text_slack;
            }
            return match next {
                Some(b'&') if syntax == Syntax::Html => self.html_reference,
                Some(b'&') => self.xml_reference,
                Some(b'<') => self.markup,
                _ => self.text,
            };
        }
        if state == LexicalState::CData {
            return self.cdata;
        }
        0
    }
}

impl Default for LookaheadPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Constructs seen during one byte step, by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstructCounts {
    pub elements: u32,
    pub characters: u32,
    pub references: u32,
    pub cdata: u32,
    pub comments: u32,
    pub processing_instructions: u32,
    pub subsets: u32,
}

impl ConstructCounts {
    fn record(&mut self, construct: Construct) {
        let slot = match construct {
            Construct::Element => &mut self.elements,
            Construct::Characters => &mut self.characters,
            Construct::Reference => &mut self.references,
            Construct::CData => &mut self.cdata,
            Construct::Comment => &mut self.comments,
            Construct::ProcessingInstruction => &mut self.processing_instructions,
            Construct::InternalSubset => &mut self.subsets,
        };
        *slot += 1;
    }

    /// Number of distinct constructs the step produced.
    ///
    /// A reference counts as exactly one. Several character callbacks count
    /// once more than they would alone in XML, and collapse fully in HTML,
    /// which also merges split CDATA.
    #[must_use]
    pub fn constructs(&self, syntax: Syntax) -> u32 {
        if self.references > 0 {
            return 1;
        }
        let mut n = self.elements
            + self.characters
            + self.cdata
            + self.comments
            + self.processing_instructions
            + self.subsets;
        if self.characters > 1 {
            n -= match syntax {
                Syntax::Html => self.characters - 1,
                Syntax::Xml => 1,
            };
        }
        if syntax == Syntax::Html && self.cdata > 1 {
            n -= self.cdata - 1;
        }
        n
    }
}

/// Progress of one verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryProbeState {
    /// Bytes handed to the parser.
    pub fed: u64,
    /// Parser's consumed count after the latest step.
    pub consumed: u64,
    /// Counters for the latest step.
    pub counts: ConstructCounts,
    /// Lexical state after the latest step.
    pub state: Option<LexicalState>,
    /// Construct count of every step, in feed order.
    pub steps: Vec<u32>,
}

impl BoundaryProbeState {
    fn begin_step(&mut self) {
        self.counts = ConstructCounts::default();
    }

    /// Sum of constructs over all steps.
    #[must_use]
    pub fn total_constructs(&self) -> u64 {
        self.steps.iter().map(|&n| u64::from(n)).sum()
    }
}

impl ConstructObserver for BoundaryProbeState {
    fn on_construct(&mut self, construct: Construct) {
        self.counts.record(construct);
    }

    fn on_consumed(&mut self, consumed: u64) {
        self.consumed = consumed;
    }
}

/// Forwards parse events to `inner` and reports constructs to `observer`.
///
/// End tags and entity declarations are not constructs. In HTML, elements the
/// parser synthesized and the structural `html`, `head`, `body` and `p`
/// elements are skipped because their start is decided by what follows.
pub struct CountingHandler<'a> {
    inner: &'a mut dyn ContentHandler,
    observer: &'a mut dyn ConstructObserver,
    syntax: Syntax,
}

impl<'a> CountingHandler<'a> {
    pub fn new(
        inner: &'a mut dyn ContentHandler,
        observer: &'a mut dyn ConstructObserver,
        syntax: Syntax,
    ) -> Self {
        Self {
            inner,
            observer,
            syntax,
        }
    }
}

impl ContentHandler for CountingHandler<'_> {
    fn start_document(&mut self) {
        self.inner.start_document();
    }

    fn end_document(&mut self) {
        self.inner.end_document();
    }

    fn xml_declaration(&mut self, version: &str, encoding: Option<&str>, standalone: Option<bool>) {
        self.inner.xml_declaration(version, encoding, standalone);
    }

    fn internal_subset(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {
        self.observer.on_construct(Construct::InternalSubset);
        self.inner.internal_subset(name, public_id, system_id);
    }

    fn entity_decl(&mut self, name: &str, value: &str) {
        self.inner.entity_decl(name, value);
    }

    fn start_element(&mut self, name: &str, attributes: &[Attribute], implied: bool) {
        let structural = self.syntax == Syntax::Html
            && (implied || matches!(name, "html" | "head" | "body" | "p"));
        if !structural {
            self.observer.on_construct(Construct::Element);
        }
        self.inner.start_element(name, attributes, implied);
    }

    fn end_element(&mut self, name: &str) {
        self.inner.end_element(name);
    }

    fn characters(&mut self, text: &str) {
        self.observer.on_construct(Construct::Characters);
        self.inner.characters(text);
    }

    fn reference(&mut self, name: &str) {
        self.observer.on_construct(Construct::Reference);
        self.inner.reference(name);
    }

    fn cdata_block(&mut self, data: &str, continuation: bool) {
        self.observer.on_construct(Construct::CData);
        self.inner.cdata_block(data, continuation);
    }

    fn comment(&mut self, text: &str, in_subset: bool) {
        if !in_subset {
            self.observer.on_construct(Construct::Comment);
        }
        self.inner.comment(text, in_subset);
    }

    fn processing_instruction(&mut self, target: &str, data: &str) {
        self.observer.on_construct(Construct::ProcessingInstruction);
        self.inner.processing_instruction(target, data);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoundaryViolation {
    /// More than one construct surfaced while consumption went from `from`
    /// to `to`.
    #[error("Failed push boundary callback test ({constructs}@{from}-{to})")]
    Callbacks { constructs: u32, from: u64, to: u64 },
    /// `avail` bytes stayed buffered after consuming `consumed`.
    #[error("Failed push boundary buffer test ({avail}@{consumed})")]
    Buffer { avail: usize, consumed: u64 },
}

/// Outcome of [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryReport {
    pub probe: BoundaryProbeState,
    pub violation: Option<BoundaryViolation>,
}

impl BoundaryReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violation.is_none()
    }

    pub fn into_result(self) -> Result<BoundaryProbeState, BoundaryViolation> {
        match self.violation {
            None => Ok(self.probe),
            Some(violation) => Err(violation),
        }
    }
}

/// Feed `input` to `parser` one byte at a time, forwarding events to
/// `content`, and stop at the first boundary violation.
///
/// The first byte is fed unchecked. The final byte carries the terminate
/// flag. Steps that leave the parser in its DTD state, that have not yet
/// consumed four bytes, or that made no progress are not buffer-checked.
pub fn verify<P>(
    parser: &mut P,
    input: &[u8],
    content: &mut dyn ContentHandler,
    diagnostics: &mut dyn DiagnosticHandler,
    policy: &LookaheadPolicy,
) -> BoundaryReport
where
    P: IncrementalParser + ?Sized,
{
    let syntax = parser.syntax();
    let mut probe = BoundaryProbeState::default();

    let Some(&first) = input.first() else {
        parser.feed(&[], true, content, diagnostics);
        probe.state = Some(parser.lexical_state());
        return BoundaryReport {
            probe,
            violation: None,
        };
    };

    step(parser, &mut probe, &[first], input.len() == 1, content, diagnostics);

    let mut cur = 1;
    let mut constructs = 0;
    let mut avail = 0;
    let mut old_consumed = parser.consumed();
    while cur < input.len() && constructs <= 1 && avail == 0 {
        old_consumed = parser.consumed();
        let in_text = in_text_before(parser, input[cur]);

        let terminate = cur + 1 >= input.len();
        constructs = step(
            parser,
            &mut probe,
            &input[cur..=cur],
            terminate,
            content,
            diagnostics,
        );
        cur += 1;

        let consumed = parser.consumed();
        let state = parser.lexical_state();
        if state != LexicalState::Dtd && consumed >= 4 && consumed != old_consumed {
            let buffered = parser.buffered();
            let max = policy.allowed(
                syntax,
                state,
                in_text,
                parser.raw_text_end_tag(),
                buffered.first().copied(),
            );
            avail = if buffered.len() <= max {
                0
            } else {
                buffered.len()
            };
        }
    }

    let violation = if constructs > 1 {
        Some(BoundaryViolation::Callbacks {
            constructs,
            from: old_consumed,
            to: parser.consumed(),
        })
    } else if avail > 0 {
        Some(BoundaryViolation::Buffer {
            avail,
            consumed: parser.consumed(),
        })
    } else {
        None
    };
    BoundaryReport { probe, violation }
}

/// Whether the next byte lands in text content.
fn in_text_before<P: IncrementalParser + ?Sized>(parser: &P, next_input: u8) -> bool {
    let state = parser.lexical_state();
    if !matches!(state, LexicalState::Content | LexicalState::RawText) {
        return false;
    }
    let first = parser.buffered().first().copied().unwrap_or(next_input);
    match parser.syntax() {
        Syntax::Html => state == LexicalState::RawText || first != b'<',
        Syntax::Xml => first != b'<' && first != b'&',
    }
}

fn step<P: IncrementalParser + ?Sized>(
    parser: &mut P,
    probe: &mut BoundaryProbeState,
    byte: &[u8],
    terminate: bool,
    content: &mut dyn ContentHandler,
    diagnostics: &mut dyn DiagnosticHandler,
) -> u32 {
    let syntax = parser.syntax();
    probe.begin_step();
    {
        let mut counting = CountingHandler::new(content, probe, syntax);
        parser.feed(byte, terminate, &mut counting, diagnostics);
    }
    probe.fed += byte.len() as u64;
    probe.on_consumed(parser.consumed());
    probe.state = Some(parser.lexical_state());
    let constructs = probe.counts.constructs(syntax);
    probe.steps.push(constructs);
    constructs
}
