//! Three-state failure guard (closed → open → half-open) gating coordinator
//! calls.
//!
//! Narrowed from "one breaker per scope in a map" to "one breaker per
//! coordinator" per this spec's single-guard contract, keeping the lazy
//! open→half-open transition on inspection.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Observable state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Configuration fixed for the lifetime of a breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (in `Closed`) needed to trip to `Open`.
    pub threshold: u32,
    /// Elapsed time in `Open` before the next inspection is allowed to
    /// transition to `HalfOpen`.
    pub reset_timeout: Duration,
    /// Consecutive successes in `HalfOpen` needed to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { threshold: 5, reset_timeout: Duration::from_secs(30), success_threshold: 2 }
    }
}

type Listener = Arc<dyn Fn(CircuitState) + Send + Sync>;

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    listeners: Vec<Listener>,
}

/// Gates coordinator calls with a closed/open/half-open state machine.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                listeners: Vec::new(),
            }),
        }
    }

    fn transition(inner: &mut Inner, new_state: CircuitState) {
        if inner.state != new_state {
            inner.state = new_state;
            for listener in &inner.listeners {
                listener(new_state);
            }
        }
    }

    /// True iff a call is currently allowed: `Closed` or `HalfOpen`. Lazily
    /// transitions `Open` → `HalfOpen` if `reset_timeout` has elapsed since
    /// the last failure.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure_at {
                if last_failure.elapsed() >= self.config.reset_timeout {
                    Self::transition(&mut inner, CircuitState::HalfOpen);
                    inner.consecutive_successes = 0;
                }
            }
        }
        matches!(inner.state, CircuitState::Closed | CircuitState::HalfOpen)
    }

    /// Record a successful call. In `Closed`, resets the failure counter.
    /// In `HalfOpen`, counts toward `success_threshold`; closes (and zeros
    /// all counters) once reached.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    Self::transition(&mut inner, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. In `Closed`, trips to `Open` once
    /// `threshold` consecutive failures accrue. In `HalfOpen`, any failure
    /// immediately reopens the circuit.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.threshold {
                    Self::transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes = 0;
                Self::transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker lock poisoned").state
    }

    /// Register a fire-and-forget listener invoked on every state
    /// transition (not on every call).
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.inner.lock().expect("circuit breaker lock poisoned").listeners.push(Arc::new(listener));
    }

    /// Reset to `Closed` with all counters zeroed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.last_failure_at = None;
    }
}
