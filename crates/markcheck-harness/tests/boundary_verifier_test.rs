//! Integration test: single-byte push boundary verification.
//!
//! Validates that:
//! 1. A well-behaved parser passes and surfaces one construct per step.
//! 2. A parser that holds text beyond the allowed lookahead fails the buffer check.
//! 3. A parser that surfaces two constructs from one byte fails the callback check.
//! 4. Split character runs and references are tolerated as single constructs.
//! 5. The verifier stops feeding at the first violation.
//! 6. Unknown HTML entities in loose markup do not trip the buffer check.
//!
//! Run: cargo test -p markcheck-harness --test boundary_verifier_test

use markcheck_core::diag::IgnoreDiagnostics;
use markcheck_core::{
    Attribute, ContentHandler, DiagnosticHandler, LexicalState, NullHandler, ParseOptions,
    PushParser, Syntax,
};
use markcheck_harness::boundary::{IncrementalParser, verify};
use markcheck_harness::{BoundaryViolation, LookaheadPolicy};

/// Scripted parser: `lag` trailing bytes stay buffered, and `events` says
/// what to emit when a given byte arrives.
struct Scripted {
    received: Vec<u8>,
    lag: usize,
    events: fn(u8, &mut dyn ContentHandler),
}

impl Scripted {
    fn new(lag: usize, events: fn(u8, &mut dyn ContentHandler)) -> Self {
        Self {
            received: Vec::new(),
            lag,
            events,
        }
    }
}

impl IncrementalParser for Scripted {
    fn syntax(&self) -> Syntax {
        Syntax::Xml
    }

    fn feed(
        &mut self,
        chunk: &[u8],
        _terminate: bool,
        content: &mut dyn ContentHandler,
        _diagnostics: &mut dyn DiagnosticHandler,
    ) {
        for &byte in chunk {
            self.received.push(byte);
            (self.events)(byte, content);
        }
    }

    fn lexical_state(&self) -> LexicalState {
        LexicalState::Content
    }

    fn consumed(&self) -> u64 {
        self.received.len().saturating_sub(self.lag) as u64
    }

    fn buffered(&self) -> &[u8] {
        let held = self.lag.min(self.received.len());
        &self.received[self.received.len() - held..]
    }

    fn raw_text_end_tag(&self) -> Option<&str> {
        None
    }
}

fn quiet(_byte: u8, _content: &mut dyn ContentHandler) {}

fn check(parser: &mut Scripted, input: &[u8]) -> markcheck_harness::BoundaryReport {
    verify(
        parser,
        input,
        &mut NullHandler,
        &mut IgnoreDiagnostics,
        &LookaheadPolicy::STANDARD,
    )
}

#[test]
fn real_parser_reports_one_construct_per_step() {
    let mut parser = PushParser::new(Syntax::Xml, ParseOptions::NONE, "a.xml");
    let report = verify(
        &mut parser,
        b"<a>bc</a>",
        &mut NullHandler,
        &mut IgnoreDiagnostics,
        &LookaheadPolicy::default(),
    );
    assert!(report.passed(), "{:?}", report.violation);
    assert_eq!(report.probe.steps, [0, 0, 1, 0, 0, 1, 0, 0, 0]);
    assert_eq!(report.probe.fed, 9);
    assert_eq!(report.probe.total_constructs(), 2);
}

#[test]
fn unknown_html_entities_pass() {
    for input in [
        &b"<p>fish &chips; shop</p>"[..],
        b"<a>x&unknown;y</a>",
        b"<p>a &nosuchname b &hellip; c</p>",
    ] {
        let mut parser = PushParser::new(Syntax::Html, ParseOptions::NONE, "e.html");
        let report = verify(
            &mut parser,
            input,
            &mut NullHandler,
            &mut IgnoreDiagnostics,
            &LookaheadPolicy::STANDARD,
        );
        assert!(
            report.passed(),
            "{}: {:?}",
            String::from_utf8_lossy(input),
            report.violation
        );
        assert_eq!(report.probe.fed, input.len() as u64);
    }
}

#[test]
fn lagging_parser_fails_buffer_check() {
    let mut parser = Scripted::new(5, quiet);
    let report = check(&mut parser, b"abcdefghijklmnop");
    let violation = report.violation.unwrap();
    assert_eq!(
        violation,
        BoundaryViolation::Buffer {
            avail: 5,
            consumed: 4
        }
    );
    assert_eq!(violation.to_string(), "Failed push boundary buffer test (5@4)");
    assert_eq!(report.probe.fed, 9);
}

#[test]
fn lookahead_within_text_allowance_passes() {
    let mut parser = Scripted::new(3, quiet);
    let report = check(&mut parser, b"abcdefghijklmnop");
    assert!(report.passed(), "{:?}", report.violation);
    assert_eq!(report.probe.fed, 16);
}

fn two_elements_on_bang(byte: u8, content: &mut dyn ContentHandler) {
    if byte == b'!' {
        content.start_element("x", &[] as &[Attribute], false);
        content.start_element("y", &[], false);
    }
}

#[test]
fn eager_parser_fails_callback_check() {
    let mut parser = Scripted::new(0, two_elements_on_bang);
    let report = check(&mut parser, b"ab!cdef");
    let violation = report.violation.unwrap();
    assert_eq!(
        violation,
        BoundaryViolation::Callbacks {
            constructs: 2,
            from: 2,
            to: 3
        }
    );
    assert_eq!(
        violation.to_string(),
        "Failed push boundary callback test (2@2-3)"
    );
    assert_eq!(report.probe.fed, 3);
    assert_eq!(report.probe.steps, [0, 0, 2]);
}

fn split_text_on_bang(byte: u8, content: &mut dyn ContentHandler) {
    match byte {
        b'!' => {
            content.characters("\u{e9}");
            content.characters("t");
        }
        b'?' => {
            content.characters("t");
            content.reference("e");
            content.characters("u");
        }
        _ => {}
    }
}

#[test]
fn split_text_and_references_count_once() {
    let mut parser = Scripted::new(0, split_text_on_bang);
    let report = check(&mut parser, b"ab!cd?ef");
    assert!(report.passed(), "{:?}", report.violation);
    assert_eq!(report.probe.steps, [0, 0, 1, 0, 0, 1, 0, 0]);
}
