//! # Cancellation Token

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Granularity with which [`CancelToken::sleep`] checks for cancellation.
const SLEEP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A flag shared between threads which requests that they stop.
///
/// Cancellation is cooperative, each loop checks the token at its suspension points, so the time
/// taken for a thread to stop is bounded by the longest time it can spend suspended.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

/// Cancels the wrapped token when dropped, including when a thread unwinds from a panic.
pub struct CancelOnDrop(pub CancelToken);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. This cannot be undone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for the given duration, waking early if cancelled.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let end = Instant::now() + duration;

        loop {
            if self.is_cancelled() {
                return true;
            }

            let now = Instant::now();
            if now >= end {
                return false;
            }

            thread::sleep((end - now).min(SLEEP_CHECK_INTERVAL));
        }
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
