//! Per-suite option bits.
//!
//! A superset of [`ParseOptions`]: the library's flags occupy the low bits
//! and one harness-private bit selects HTML mode.

use std::ops::BitOr;

use markcheck_core::{ParseOptions, Syntax};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TestOptions(u32);

impl TestOptions {
    pub const NONE: Self = Self(0);
    /// Parse fixtures with the loose HTML parser.
    pub const HTML: Self = Self(1 << 30);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_html(self) -> bool {
        self.contains(Self::HTML)
    }

    #[must_use]
    pub const fn syntax(self) -> Syntax {
        if self.is_html() { Syntax::Html } else { Syntax::Xml }
    }

    /// The library flags, with harness-private bits masked off.
    #[must_use]
    pub const fn parse_options(self) -> ParseOptions {
        ParseOptions::from_bits_truncate(self.0 & !Self::HTML.0)
    }
}

impl From<ParseOptions> for TestOptions {
    fn from(options: ParseOptions) -> Self {
        Self(options.bits())
    }
}

impl BitOr for TestOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<ParseOptions> for TestOptions {
    type Output = Self;

    fn bitor(self, rhs: ParseOptions) -> Self {
        Self(self.0 | rhs.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_bit_is_not_a_parse_option() {
        let opts = TestOptions::HTML | ParseOptions::NOENT;
        assert!(opts.is_html());
        assert_eq!(opts.syntax(), Syntax::Html);
        assert_eq!(opts.parse_options(), ParseOptions::NOENT);
    }

    #[test]
    fn xml_by_default() {
        let opts = TestOptions::from(ParseOptions::COMPACT);
        assert!(!opts.is_html());
        assert!(opts.parse_options().contains(ParseOptions::COMPACT));
    }
}
