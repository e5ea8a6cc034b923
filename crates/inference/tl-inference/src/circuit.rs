//! Circuit breaker guarding the inference backend.
//!
//! Counts consecutive chunks that exhausted their retries. Once the count
//! reaches the threshold the breaker opens and callers degrade immediately
//! instead of waiting on a dead backend. After the reset timeout a single
//! trial call is let through; its outcome closes or re-opens the breaker.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of asking the breaker for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal call
    Allowed,
    /// The single half-open probe
    Trial,
    /// Breaker is open; do not call
    Rejected,
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Thread-safe circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Asks whether a call may be made now.
    pub fn acquire(&self) -> Admission {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed { .. } => Admission::Allowed,
            Inner::Open { until } => {
                if Instant::now() >= *until {
                    *inner = Inner::HalfOpen {
                        trial_in_flight: true,
                    };
                    info!("Circuit half-open, admitting trial call");
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            Inner::HalfOpen { trial_in_flight } => {
                if *trial_in_flight {
                    Admission::Rejected
                } else {
                    *trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Records a call that reached the backend and got an answer.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if matches!(*inner, Inner::HalfOpen { .. }) {
            info!("Circuit closed after successful trial call");
        }
        *inner = Inner::Closed {
            consecutive_failures: 0,
        };
    }

    /// Records a chunk that failed after exhausting its retries.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let open = match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                *consecutive_failures >= self.failure_threshold
            }
            Inner::HalfOpen { .. } => true,
            // a call admitted before the breaker opened; already open
            Inner::Open { .. } => false,
        };

        if open {
            warn!(
                reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                "Circuit opened, inference calls suspended"
            );
            *inner = Inner::Open {
                until: Instant::now() + self.reset_timeout,
            };
        }
    }

    /// Returns a guard that releases the half-open trial slot if the trial
    /// call is dropped before its outcome is recorded.
    ///
    /// Only armed for [`Admission::Trial`].
    pub fn trial_guard(&self, admission: Admission) -> TrialGuard<'_> {
        TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if let Inner::HalfOpen { trial_in_flight } = &mut *inner {
            *trial_in_flight = false;
            debug!("Trial call abandoned, slot released");
        }
    }

    /// Current state, without side effects.
    pub fn state(&self) -> CircuitState {
        match *self.inner.lock() {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Releases an unfinished half-open trial on drop.
#[derive(Debug)]
pub struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl TrialGuard<'_> {
    /// Marks the trial as finished; its outcome is recorded by the caller.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}
