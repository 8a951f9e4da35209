//! Live allocation accounting.
//!
//! Every buffer, tree, or parser context owned by the library holds an
//! [`Allocation`] handle. The handle charges its byte count to the ledger of
//! the thread that created it and releases the charge when dropped, on
//! whichever thread that happens. A thread's [`live_bytes`] therefore returns
//! to its starting value once everything it allocated has been released.
//!
//! Ledgers are per thread so that concurrent callers (worker pools, parallel
//! test binaries) never perturb each other's snapshots.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
struct Ledger {
    bytes: AtomicI64,
    blocks: AtomicI64,
}

thread_local! {
    static LEDGER: Arc<Ledger> = Arc::new(Ledger::default());
}

fn signed(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// RAII charge against the creating thread's allocation ledger.
#[derive(Debug)]
pub struct Allocation {
    ledger: Arc<Ledger>,
    bytes: usize,
}

impl Allocation {
    /// Charge `bytes` to the current thread's ledger.
    #[must_use]
    pub fn new(bytes: usize) -> Self {
        let ledger = LEDGER.with(Arc::clone);
        ledger.bytes.fetch_add(signed(bytes), Ordering::Relaxed);
        ledger.blocks.fetch_add(1, Ordering::Relaxed);
        Self { ledger, bytes }
    }

    /// Bytes currently charged by this handle.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Replace the charged size, adjusting the ledger by the difference.
    pub fn resize(&mut self, bytes: usize) {
        let delta = signed(bytes) - signed(self.bytes);
        if delta != 0 {
            self.ledger.bytes.fetch_add(delta, Ordering::Relaxed);
        }
        self.bytes = bytes;
    }

    /// Grow the charge by `additional` bytes.
    pub fn grow(&mut self, additional: usize) {
        self.resize(self.bytes.saturating_add(additional));
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.ledger
            .bytes
            .fetch_sub(signed(self.bytes), Ordering::Relaxed);
        self.ledger.blocks.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bytes the library currently holds on behalf of this thread.
#[must_use]
pub fn live_bytes() -> i64 {
    LEDGER.with(|ledger| ledger.bytes.load(Ordering::Relaxed))
}

/// Number of live [`Allocation`] handles created by this thread.
#[must_use]
pub fn live_blocks() -> i64 {
    LEDGER.with(|ledger| ledger.blocks.load(Ordering::Relaxed))
}
