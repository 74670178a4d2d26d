//! Thread-safe correlation-id counter.
//!
//! # What is a correlation id? (for beginners)
//!
//! Several requests can be in flight on one connection, and the server may
//! answer them in any order.  Every request frame therefore carries a number
//! chosen by the client, and the server copies that number into its reply.
//! The client looks the number up in its table of pending requests to find
//! out which caller the reply belongs to.
//!
//! Id 0 is reserved for event frames, so the counter never hands it out: it
//! starts at 1 and wraps from `u32::MAX` back to 1.  Whether a wrapped id is
//! still in use is checked by the owner of the pending table, not here.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::protocol::frame::EVENT_CORRELATION_ID;

/// A thread-safe, monotonically increasing counter for correlation ids.
///
/// # Examples
///
/// ```rust
/// use fbrpc_core::protocol::CorrelationCounter;
///
/// let counter = CorrelationCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct CorrelationCounter {
    inner: AtomicU32,
}

impl CorrelationCounter {
    /// Creates a new counter whose first id is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a counter whose first id is `first` (0 is bumped to 1).
    pub fn starting_at(first: u32) -> Self {
        Self {
            inner: AtomicU32::new(first.max(1)),
        }
    }

    /// Returns the next id and atomically advances the counter, skipping 0.
    ///
    /// `Ordering::Relaxed` is enough: ids only need to be unique, they do
    /// not publish any other memory.
    pub fn next(&self) -> u32 {
        let mut current = self.inner.load(Ordering::Relaxed);
        loop {
            let following = match current.wrapping_add(1) {
                EVENT_CORRELATION_ID => 1,
                n => n,
            };
            match self.inner.compare_exchange_weak(
                current,
                following,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the id the next call to [`next`](Self::next) will hand out.
    pub fn peek(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for CorrelationCounter {
    fn default() -> Self {
        Self::new()
    }
}
