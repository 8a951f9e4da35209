//! Allocation leak detection around a single test case.

use markcheck_core::memory;

/// Snapshot of the library's live byte count on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakSentinel {
    baseline: i64,
}

impl LeakSentinel {
    /// Take the baseline snapshot.
    #[must_use]
    pub fn arm() -> Self {
        Self {
            baseline: memory::live_bytes(),
        }
    }

    #[must_use]
    pub fn baseline(&self) -> i64 {
        self.baseline
    }

    /// Bytes still live relative to the baseline. Zero means no leak.
    #[must_use]
    pub fn leaked(&self) -> i64 {
        memory::live_bytes() - self.baseline
    }
}
