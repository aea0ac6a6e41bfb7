//! Shared helpers for integration tests.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

const FULFILLMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// One-shot completion latch for awaiting lane-side effects from the test
/// thread.
#[derive(Clone, Default)]
pub struct Expectation {
    inner: Arc<ExpectationInner>,
}

#[derive(Default)]
struct ExpectationInner {
    fulfilled: Mutex<bool>,
    condvar: Condvar,
}

impl Expectation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the expectation as met, waking any waiter.
    pub fn fulfill(&self) {
        *self.inner.fulfilled.lock() = true;
        self.inner.condvar.notify_all();
    }

    /// Blocks until [`fulfill`](Self::fulfill) has been called.
    ///
    /// Panics if that does not happen within a generous timeout, so a broken
    /// queue fails the test instead of hanging it.
    pub fn await_fulfillment(&self) {
        let mut fulfilled = self.inner.fulfilled.lock();
        while !*fulfilled {
            let timed_out = self
                .inner
                .condvar
                .wait_for(&mut fulfilled, FULFILLMENT_TIMEOUT)
                .timed_out();
            assert!(!timed_out, "expectation not fulfilled within {FULFILLMENT_TIMEOUT:?}");
        }
    }
}
