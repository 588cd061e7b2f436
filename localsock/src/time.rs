//! Wall-clock shim for timestamp control messages
//!
//! The subsystem has no clock of its own; the embedder feeds one in through
//! [`set_clock`] (tests drive it the same way). Readings are a single atomic
//! nanosecond counter, so `now` is safe from any thread.

use core::sync::atomic::{AtomicU64, Ordering};

const NANOS_PER_SEC: u64 = 1_000_000_000;

static CLOCK_NANOS: AtomicU64 = AtomicU64::new(0);

/// A wall-clock instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: u64,
    pub nanos: u32,
}

/// Read the current time
pub fn now() -> Timestamp {
    let n = CLOCK_NANOS.load(Ordering::Relaxed);
    Timestamp {
        secs: n / NANOS_PER_SEC,
        nanos: (n % NANOS_PER_SEC) as u32,
    }
}

/// Set the clock to an absolute value
pub fn set_clock(secs: u64, nanos: u32) {
    CLOCK_NANOS.store(secs * NANOS_PER_SEC + nanos as u64, Ordering::Relaxed);
}

/// Advance the clock by a number of nanoseconds
pub fn advance_clock(nanos: u64) {
    CLOCK_NANOS.fetch_add(nanos, Ordering::Relaxed);
}
