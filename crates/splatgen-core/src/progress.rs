//! Progress reporting and cancellation shared with the caller.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Caller-supplied progress callback. May be invoked from worker threads.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Forwards progress to a callback, keeping it within `[0, 1]` and never
/// decreasing.
///
/// A panicking callback is logged and otherwise ignored.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: Arc<Mutex<f64>>,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last: Arc::new(Mutex::new(0.0)),
        }
    }

    /// Report `value`. Values below the last reported one are dropped.
    pub fn report(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(0.0, 1.0);

        {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            if value < *last {
                return;
            }
            *last = value;
        }

        // Lock released: the callback may report again.
        if let Some(callback) = &self.callback {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!("Progress callback panicked at {:.3}", value);
            }
        }
    }

    /// Last value passed to the callback.
    pub fn last(&self) -> f64 {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report `start + fraction * (end - start)`.
    pub fn report_within(&self, start: f64, end: f64, fraction: f64) {
        self.report(start + fraction.clamp(0.0, 1.0) * (end - start));
    }
}

/// Cooperative cancellation token, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
