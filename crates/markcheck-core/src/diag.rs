//! Structured diagnostics raised while parsing.

use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Warning,
    Error,
    Fatal,
}

impl Level {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "error",
        }
    }
}

/// Subsystem that raised a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Parser,
    Namespace,
    Html,
    Catalog,
}

impl Domain {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parser => "parser",
            Self::Namespace => "namespace",
            Self::Html => "HTML parser",
            Self::Catalog => "catalog",
        }
    }
}

/// One warning or error with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub domain: Domain,
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    /// `<file>:<line>: <domain> <level> : <message>` followed by a newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}:{}: {} {} : {}",
            self.file,
            self.line,
            self.domain.as_str(),
            self.level.as_str(),
            self.message
        )
    }
}

/// Receiver for diagnostics. Every parse entry point routes through one.
pub trait DiagnosticHandler {
    fn report(&mut self, diagnostic: &Diagnostic);
}

impl DiagnosticHandler for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: &Diagnostic) {
        self.push(diagnostic.clone());
    }
}

impl<T: DiagnosticHandler + ?Sized> DiagnosticHandler for &mut T {
    fn report(&mut self, diagnostic: &Diagnostic) {
        (**self).report(diagnostic);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreDiagnostics;

impl DiagnosticHandler for IgnoreDiagnostics {
    fn report(&mut self, _diagnostic: &Diagnostic) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_error_golden_layout() {
        let diag = Diagnostic {
            level: Level::Fatal,
            domain: Domain::Parser,
            file: "test/errors/attr1.xml".into(),
            line: 3,
            message: "Premature end of data in tag foo line 1".into(),
        };
        assert_eq!(
            diag.to_string(),
            "test/errors/attr1.xml:3: parser error : Premature end of data in tag foo line 1\n"
        );
    }

    #[test]
    fn html_warning_layout() {
        let diag = Diagnostic {
            level: Level::Warning,
            domain: Domain::Html,
            file: "a.html".into(),
            line: 1,
            message: "x".into(),
        };
        assert_eq!(diag.to_string(), "a.html:1: HTML parser warning : x\n");
    }
}
