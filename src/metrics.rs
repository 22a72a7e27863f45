//! Metrics for the encryption library
//!
//! Metrics are emitted through the [`metrics`] facade, so whatever recorder the
//! application installs receives them. Emission is off by default and gated by a global
//! flag so a library consumer that never calls [`enable_metrics`] pays only an atomic load.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

static METRICS_ENABLED: AtomicBool = AtomicBool::new(false);

/// Turns metric emission on
pub fn enable_metrics() {
    METRICS_ENABLED.store(true, Ordering::SeqCst);
}

/// Turns metric emission off
pub fn disable_metrics() {
    METRICS_ENABLED.store(false, Ordering::SeqCst);
}

/// Check if metrics are enabled
pub fn metrics_enabled() -> bool {
    METRICS_ENABLED.load(Ordering::Relaxed)
}

/// Increments a counter by one
pub fn increment_counter(name: &'static str) {
    if metrics_enabled() {
        metrics::counter!(name, 1);
    }
}

/// Timer for measuring and recording operation duration
///
/// The elapsed time is recorded as a histogram sample when the timer drops.
#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    /// Starts a timer
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Record the elapsed time
    pub fn observe_duration(&self) {
        metrics::histogram!(self.name, self.start.elapsed());
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.observe_duration();
    }
}

/// Starts a [`Timer`] when metrics are enabled. Bind the result to keep it alive for the
/// scope being measured.
#[macro_export]
macro_rules! timer {
    ($name:expr) => {{
        if $crate::metrics::metrics_enabled() {
            Some($crate::metrics::Timer::new($name))
        } else {
            None
        }
    }};
}
