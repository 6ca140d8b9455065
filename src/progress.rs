//! Aggregate Progress Reporting
//!
//! Concurrent chunk workers report the bytes they move to a shared tracker, which
//! keeps a running total and forwards it to the caller's callback.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Callback invoked with the cumulative number of bytes transferred
pub type ProgressFn = Arc<dyn Fn(i64) + Send + Sync>;

/// Thread-safe running total shared by all workers of one transfer
///
/// The callback is invoked while the total is locked, so the values it observes
/// are monotonically non-decreasing even when workers report concurrently.
pub struct ProgressTracker {
    total: Mutex<i64>,
    callback: Option<ProgressFn>,
}

impl ProgressTracker {
    /// Creates a tracker starting at zero
    pub fn new(callback: Option<ProgressFn>) -> Self {
        Self {
            total: Mutex::new(0),
            callback,
        }
    }

    /// Adds `bytes` to the total, notifies the callback and returns the new total
    pub fn add(&self, bytes: i64) -> i64 {
        let mut total = self.total.lock().unwrap_or_else(PoisonError::into_inner);
        *total += bytes;
        if let Some(cb) = &self.callback {
            cb(*total);
        }
        *total
    }

    /// Returns the current total
    pub fn total(&self) -> i64 {
        *self.total.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if a callback is registered
    pub fn is_reporting(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("total", &self.total())
            .field("reporting", &self.is_reporting())
            .finish()
    }
}
