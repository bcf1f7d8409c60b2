//! Circuit breaker guarding admission to a flaky operation.
//!
//! Trips open after enough failures within a window, cools down to
//! half-open, and closes again after a run of successes. Modeled on the
//! same closed/open/half-open vocabulary used elsewhere in this codebase for
//! fault tolerance, generalized here into a small reusable primitive.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Invoked with `(previous, next, reason)` on every state transition.
/// Panics are caught and logged rather than propagated -- a misbehaving
/// callback must never take the breaker itself down.
pub type StateChangeCallback = Arc<dyn Fn(CircuitState, CircuitState, &str) + Send + Sync>;

/// Observable state of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: ChronoDuration,
    pub reset_timeout: ChronoDuration,
    pub success_threshold_for_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: ChronoDuration::minutes(5),
            reset_timeout: ChronoDuration::minutes(5),
            success_threshold_for_close: 3,
        }
    }
}

struct Inner {
    state: CircuitState,
    failures: Vec<DateTime<Utc>>,
    success_count_half_open: u32,
    trip_count: u32,
    trip_reason: Option<String>,
    opened_at: Option<DateTime<Utc>>,
}

/// A closed/open/half-open gate over an operation.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<RwLock<Inner>>,
    on_state_change: StdMutex<Option<StateChangeCallback>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                state: CircuitState::Closed,
                failures: Vec::new(),
                success_count_half_open: 0,
                trip_count: 0,
                trip_reason: None,
                opened_at: None,
            })),
            on_state_change: StdMutex::new(None),
        }
    }

    /// Register a callback invoked with `(previous, next, reason)` on every
    /// state transition. Replaces any previously registered callback.
    pub fn set_on_state_change(&self, callback: StateChangeCallback) {
        *self.on_state_change.lock().unwrap() = Some(callback);
    }

    /// Whether an operation is currently permitted: true when closed or
    /// half-open, false when open and the reset timeout has not yet elapsed.
    /// Performs the open → half-open transition on demand when the timeout
    /// has elapsed.
    pub async fn allows_operation(&self) -> bool {
        self.maybe_auto_half_open().await;
        let guard = self.inner.read().await;
        guard.state != CircuitState::Open
    }

    pub async fn state(&self) -> CircuitState {
        self.maybe_auto_half_open().await;
        self.inner.read().await.state
    }

    async fn maybe_auto_half_open(&self) {
        let mut guard = self.inner.write().await;
        if guard.state == CircuitState::Open {
            if let Some(opened_at) = guard.opened_at {
                if Utc::now() - opened_at >= self.config.reset_timeout {
                    self.transition(&mut guard, CircuitState::HalfOpen, "reset timeout elapsed");
                }
            }
        }
    }

    /// Record a failure at the current time.
    pub async fn record_failure(&self) {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        guard.failures.push(now);
        let window_start = now - self.config.failure_window;
        guard.failures.retain(|t| *t >= window_start);

        match guard.state {
            CircuitState::Closed => {
                if guard.failures.len() as u32 >= self.config.failure_threshold {
                    self.transition(&mut guard, CircuitState::Open, "failure threshold reached");
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut guard, CircuitState::Open, "failure during half-open probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Record a success at the current time.
    pub async fn record_success(&self) {
        let mut guard = self.inner.write().await;
        match guard.state {
            CircuitState::Closed => {
                guard.failures.clear();
            }
            CircuitState::HalfOpen => {
                guard.success_count_half_open += 1;
                if guard.success_count_half_open >= self.config.success_threshold_for_close {
                    self.transition(&mut guard, CircuitState::Closed, "success threshold reached in half-open");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker open regardless of recorded failures. Idempotent
    /// while already open.
    pub async fn trip(&self, reason: impl Into<String>) {
        let mut guard = self.inner.write().await;
        if guard.state != CircuitState::Open {
            let reason = reason.into();
            guard.trip_reason = Some(reason.clone());
            self.transition(&mut guard, CircuitState::Open, &reason);
        }
    }

    /// Force the breaker closed, clearing failure history and counters.
    /// With `force = true`, emits a transition log even if already closed.
    pub async fn reset(&self, force: bool) {
        let mut guard = self.inner.write().await;
        let already_closed = guard.state == CircuitState::Closed;
        guard.failures.clear();
        guard.success_count_half_open = 0;
        guard.opened_at = None;
        guard.trip_reason = None;
        if !already_closed || force {
            self.transition(&mut guard, CircuitState::Closed, "manual reset");
        }
    }

    pub async fn trip_count(&self) -> u32 {
        self.inner.read().await.trip_count
    }

    fn transition(&self, guard: &mut Inner, next: CircuitState, reason: &str) {
        let previous = guard.state;
        if previous == next && next != CircuitState::Closed {
            return;
        }
        guard.state = next;
        match next {
            CircuitState::Open => {
                guard.opened_at = Some(Utc::now());
                guard.trip_count += 1;
                warn!(?previous, ?next, reason, trip_count = guard.trip_count, "circuit breaker tripped");
            }
            CircuitState::HalfOpen => {
                guard.success_count_half_open = 0;
                info!(?previous, ?next, reason, "circuit breaker probing");
            }
            CircuitState::Closed => {
                guard.opened_at = None;
                info!(?previous, ?next, reason, "circuit breaker closed");
            }
        }

        let callback = self.on_state_change.lock().unwrap().clone();
        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(previous, next, reason))).is_err() {
                warn!(?previous, ?next, "circuit breaker state-change callback panicked");
            }
        }
    }
}
