//! Circuit breaker for the transmit path.
//!
//! Consecutive send failures trip the breaker; while open, sends fail fast
//! instead of queueing up behind a dead radio. After the recovery timeout one
//! trial send is let through (half-open); others keep failing fast until it
//! reports back. A success closes the breaker again. A trial that never
//! reports frees its slot after another recovery timeout.

use parking_lot::Mutex;
use std::time::Duration;
use strum::Display;
use tokio::time::Instant;

use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
                trial_started: None,
            }),
        }
    }

    /// Current state, moving Open to HalfOpen once the timeout has passed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.recovery_timeout)
        {
            inner.state = BreakerState::HalfOpen;
            debug!("Circuit breaker half-open, allowing a probe send.");
        }
        inner.state
    }

    /// Whether a send may go out now. In half-open this claims the single
    /// trial slot.
    pub fn allow_request(&self) -> bool {
        let state = self.state();
        let mut inner = self.inner.lock();
        match state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                let free = inner
                    .trial_started
                    .map_or(true, |at| at.elapsed() >= self.recovery_timeout);
                if free {
                    inner.trial_started = Some(Instant::now());
                }
                free
            }
        }
    }

    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!("Circuit breaker closed.");
        }
        inner.failures = 0;
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        inner.trial_started = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        let trip = inner.state == BreakerState::HalfOpen || inner.failures >= self.failure_threshold;
        if trip && inner.state != BreakerState::Open {
            warn!(failures = inner.failures, "Circuit breaker open.");
        }
        if trip {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_started = None;
        }
    }

    /// Back to Closed with no failures, e.g. on a fresh connection.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failures = 0;
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        inner.trial_started = None;
    }
}
