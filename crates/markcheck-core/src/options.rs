//! Parse option bitset.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Parser behavior flags.
///
/// The numeric layout is stable: callers (notably the regression harness)
/// layer private bits above the ones defined here, so new flags must not be
/// allocated at or above bit 24.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ParseOptions(u32);

impl ParseOptions {
    pub const NONE: Self = Self(0);
    /// Keep going after fatal well-formedness errors.
    pub const RECOVER: Self = Self(1 << 0);
    /// Substitute entity references with their replacement text.
    pub const NOENT: Self = Self(1 << 1);
    /// Attempt to load the external DTD subset.
    pub const DTDLOAD: Self = Self(1 << 2);
    /// Suppress error-level diagnostics.
    pub const NOERROR: Self = Self(1 << 5);
    /// Suppress warning-level diagnostics.
    pub const NOWARNING: Self = Self(1 << 6);
    /// Do not synthesize implied `html`/`head`/`body` elements.
    pub const NOIMPLIED: Self = Self(1 << 13);
    /// Report CDATA sections as plain character data.
    pub const NOCDATA: Self = Self(1 << 14);
    /// Accepted for compatibility; text nodes are always stored compactly.
    pub const COMPACT: Self = Self(1 << 16);

    const ALL: u32 = Self::RECOVER.0
        | Self::NOENT.0
        | Self::DTDLOAD.0
        | Self::NOERROR.0
        | Self::NOWARNING.0
        | Self::NOIMPLIED.0
        | Self::NOCDATA.0
        | Self::COMPACT.0;

    /// Keep only the bits this library understands.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
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
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ParseOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ParseOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ParseOptions, &str); 8] = [
            (ParseOptions::RECOVER, "RECOVER"),
            (ParseOptions::NOENT, "NOENT"),
            (ParseOptions::DTDLOAD, "DTDLOAD"),
            (ParseOptions::NOERROR, "NOERROR"),
            (ParseOptions::NOWARNING, "NOWARNING"),
            (ParseOptions::NOIMPLIED, "NOIMPLIED"),
            (ParseOptions::NOCDATA, "NOCDATA"),
            (ParseOptions::COMPACT, "COMPACT"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("ParseOptions(NONE)")
        } else {
            write!(f, "ParseOptions({})", set.join(" | "))
        }
    }
}
