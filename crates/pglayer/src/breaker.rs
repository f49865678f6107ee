//! Circuit breaker.
//!
//! One shared breaker guards all executor calls made through the envelope.
//! State transitions are serialized by a mutex; half-open trial admission is
//! bounded by a semaphore so at most `half_open_max_in_flight` probes hit a
//! recovering server concurrently.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use crate::error::{DbError, DbResult};

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting trial calls.
    pub open_timeout: Duration,
    /// Maximum concurrent half-open trial calls.
    pub half_open_max_in_flight: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            half_open_max_in_flight: 1,
        }
    }
}

/// Breaker phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Operations pass; failures are counted.
    Closed,
    /// Every attempt is rejected until the open timeout elapses.
    Open,
    /// Bounded trial calls probe the backend.
    HalfOpen,
}

impl Phase {
    /// Stable name for metrics gauges.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Closed => "closed",
            Phase::Open => "open",
            Phase::HalfOpen => "half_open",
        }
    }
}

struct BreakerState {
    phase: Phase,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Admission token returned by [`CircuitBreaker::before`].
///
/// Holds the half-open permit (when in a trial) for the duration of the
/// guarded call.
#[derive(Debug)]
pub struct Admission {
    _permit: Option<OwnedSemaphorePermit>,
}

type TransitionHook = Arc<dyn Fn(Phase) + Send + Sync>;

/// A shared circuit breaker guarding executor calls.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    half_open: Arc<Semaphore>,
    transition_hook: Option<TransitionHook>,
}

impl CircuitBreaker {
    /// Create a breaker with the given tuning.
    pub fn new(config: BreakerConfig) -> Self {
        let permits = config.half_open_max_in_flight.max(1);
        Self {
            config,
            state: Mutex::new(BreakerState {
                phase: Phase::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            half_open: Arc::new(Semaphore::new(permits)),
            transition_hook: None,
        }
    }

    /// Install a callback invoked on every phase transition.
    pub fn with_transition_hook(mut self, hook: impl Fn(Phase) + Send + Sync + 'static) -> Self {
        self.transition_hook = Some(Arc::new(hook));
        self
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.lock().expect("breaker lock").phase
    }

    fn transition(&self, state: &mut BreakerState, to: Phase) {
        if state.phase == to {
            return;
        }
        state.phase = to;
        if let Some(hook) = &self.transition_hook {
            hook(to);
        }
    }

    fn open_sentinel(&self, remaining: Duration) -> DbError {
        DbError::connection(format!(
            "circuit open: retrying in {}ms",
            remaining.as_millis()
        ))
    }

    /// Gate a call. Returns an admission token, or the open sentinel when
    /// the breaker rejects the attempt.
    pub fn before(&self) -> DbResult<Admission> {
        let mut state = self.state.lock().expect("breaker lock");
        match state.phase {
            Phase::Closed => Ok(Admission { _permit: None }),
            Phase::Open => {
                let opened_at = state.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened_at.elapsed();
                if elapsed < self.config.open_timeout {
                    return Err(self.open_sentinel(self.config.open_timeout - elapsed));
                }
                self.transition(&mut state, Phase::HalfOpen);
                self.admit_trial()
            }
            Phase::HalfOpen => self.admit_trial(),
        }
    }

    fn admit_trial(&self) -> DbResult<Admission> {
        match self.half_open.clone().try_acquire_owned() {
            Ok(permit) => Ok(Admission {
                _permit: Some(permit),
            }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                Err(self.open_sentinel(self.config.open_timeout))
            }
        }
    }

    /// Record a successful call.
    pub fn on_success(&self) {
        let mut state = self.state.lock().expect("breaker lock");
        state.consecutive_failures = 0;
        state.opened_at = None;
        self.transition(&mut state, Phase::Closed);
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        let mut state = self.state.lock().expect("breaker lock");
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        match state.phase {
            Phase::HalfOpen => {
                state.opened_at = Some(Instant::now());
                self.transition(&mut state, Phase::Open);
            }
            Phase::Closed if state.consecutive_failures >= self.config.failure_threshold => {
                state.opened_at = Some(Instant::now());
                self.transition(&mut state, Phase::Open);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            open_timeout,
            half_open_max_in_flight: 1,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let b = breaker(2, Duration::from_millis(50));
        assert!(b.before().is_ok());
        b.on_failure();
        assert_eq!(b.phase(), Phase::Closed);
        b.on_failure();
        assert_eq!(b.phase(), Phase::Open);

        let err = b.before().unwrap_err();
        assert!(err.is_connection());
        assert!(err.message().starts_with("circuit open"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let b = breaker(2, Duration::from_millis(50));
        b.on_failure();
        b.on_success();
        b.on_failure();
        assert_eq!(b.phase(), Phase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_trial_after_open_timeout() {
        let b = breaker(1, Duration::from_millis(50));
        b.on_failure();
        assert!(b.before().is_err());

        tokio::time::advance(Duration::from_millis(60)).await;
        let admission = b.before().expect("trial admitted");
        assert_eq!(b.phase(), Phase::HalfOpen);

        // Concurrent probes beyond the in-flight cap are rejected.
        assert!(b.before().is_err());
        drop(admission);

        b.on_success();
        assert_eq!(b.phase(), Phase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_failure_reopens() {
        let b = breaker(1, Duration::from_millis(50));
        b.on_failure();
        tokio::time::advance(Duration::from_millis(60)).await;
        let admission = b.before().expect("trial admitted");
        drop(admission);
        b.on_failure();
        assert_eq!(b.phase(), Phase::Open);

        // Timer restarted: still rejecting before a fresh timeout elapses.
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(b.before().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn transition_hook_observes_states() {
        use std::sync::Mutex as StdMutex;
        let seen: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_hook = seen.clone();
        let b = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(10),
            half_open_max_in_flight: 1,
        })
        .with_transition_hook(move |phase| seen_hook.lock().unwrap().push(phase.as_str()));

        b.on_failure();
        tokio::time::advance(Duration::from_millis(20)).await;
        let _ = b.before().unwrap();
        b.on_success();

        assert_eq!(*seen.lock().unwrap(), vec!["open", "half_open", "closed"]);
    }
}
