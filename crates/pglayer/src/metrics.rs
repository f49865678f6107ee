//! Pluggable metrics sink.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::breaker::Phase;

/// Receives envelope-level measurements.
///
/// Implement this to bridge into your metrics system; all methods are called
/// synchronously on the query path and must be cheap.
pub trait MetricsSink: Send + Sync {
    /// A query or exec completed (successfully or not) in `duration`.
    fn observe_query(&self, operation: &str, duration: Duration) {
        let _ = (operation, duration);
    }

    /// An operation failed with the given taxonomy code.
    fn incr_error(&self, code: &str) {
        let _ = code;
    }

    /// The circuit breaker transitioned to `phase`.
    fn breaker_state(&self, phase: Phase) {
        let _ = phase;
    }
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// An in-process counting sink, useful in tests and smoke checks.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    queries: AtomicU64,
    errors: AtomicU64,
    last_breaker_state: Mutex<Option<Phase>>,
}

impl CountingMetrics {
    /// Create a zeroed sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total observed operations.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Total observed errors.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Most recent breaker phase, if any transition was observed.
    pub fn breaker_phase(&self) -> Option<Phase> {
        *self.last_breaker_state.lock().unwrap()
    }
}

impl MetricsSink for CountingMetrics {
    fn observe_query(&self, _operation: &str, _duration: Duration) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_error(&self, _code: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn breaker_state(&self, phase: Phase) {
        *self.last_breaker_state.lock().unwrap() = Some(phase);
    }
}
