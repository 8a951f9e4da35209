//! Bounded capture of library diagnostics for one test case.

use std::fmt;

use markcheck_core::{Diagnostic, DiagnosticHandler};

/// Capacity of the capture buffer in bytes.
pub const DIAGNOSTIC_CAPACITY: usize = 32 * 1024;

/// Collects formatted diagnostic text up to a fixed capacity.
///
/// Text past the capacity is dropped; what was captured stays intact.
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    buf: Vec<u8>,
    capacity: usize,
    truncated: bool,
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DIAGNOSTIC_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            truncated: false,
        }
    }

    /// Append formatted text.
    pub fn emit(&mut self, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(text) => self.push(text.as_bytes()),
            None => self.push(args.to_string().as_bytes()),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let room = self.capacity - self.buf.len();
        if bytes.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    /// Forget everything captured so far.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.truncated = false;
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl DiagnosticHandler for DiagnosticSink {
    fn report(&mut self, diagnostic: &Diagnostic) {
        self.emit(format_args!("{diagnostic}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use markcheck_core::{Domain, Level};

    #[test]
    fn captures_library_diagnostics_verbatim() {
        let mut sink = DiagnosticSink::new();
        sink.report(&Diagnostic {
            level: Level::Fatal,
            domain: Domain::Parser,
            file: "test/errors/a.xml".into(),
            line: 2,
            message: "Document is empty".into(),
        });
        assert_eq!(
            sink.as_bytes(),
            b"test/errors/a.xml:2: parser error : Document is empty\n"
        );
    }

    #[test]
    fn overflow_truncates_and_reset_clears() {
        let mut sink = DiagnosticSink::with_capacity(8);
        sink.emit(format_args!("{}", "12345"));
        sink.emit(format_args!("{}", "67890"));
        assert_eq!(sink.as_bytes(), b"12345678");
        assert!(sink.is_truncated());
        sink.emit(format_args!("more"));
        assert_eq!(sink.len(), 8);

        sink.reset();
        assert!(sink.is_empty());
        assert!(!sink.is_truncated());
        sink.emit(format_args!("ok"));
        assert_eq!(sink.as_bytes(), b"ok");
    }
}
