//! Exponential backoff with jitter for reconnect attempts.
//!
//! [`BackoffPolicy`] is a pure function from attempt index to delay.
//! [`Backoff`] counts attempts within a cycle; once a cycle is used up the
//! counter starts again from zero, so retries continue indefinitely at a
//! bounded rate.

use rand::Rng;
use std::time::Duration;

use crate::tracing::prelude::*;

/// Reconnect delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Delays are scaled by a uniform factor in `1 ± jitter_fraction`
    pub jitter_fraction: f64,
    pub max_attempts_per_cycle: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_fraction: 0.15,
            max_attempts_per_cycle: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the reconnect following failed attempt `attempt`
    /// (0-indexed), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        // Clamp the exponent so huge attempt counts cannot overflow to inf.
        let exp = attempt.min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(max))
    }

    /// Delay for `attempt` with jitter drawn from the thread RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        let j = self.jitter_fraction;
        let factor = if j > 0.0 {
            rand::thread_rng().gen_range(1.0 - j..=1.0 + j)
        } else {
            1.0
        };
        self.delay_with_factor(attempt, factor)
    }

    /// Delay for `attempt` scaled by an explicit jitter factor.
    pub fn delay_with_factor(&self, attempt: u32, factor: f64) -> Duration {
        self.base_delay(attempt).mul_f64(factor.max(0.0))
    }
}

/// Attempt counter for one connection's reconnect cycles.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
    cycles: u64,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            cycles: 0,
        }
    }

    /// Attempts used in the current cycle.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Completed cycles since creation.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Delay to wait before the next attempt, consuming one attempt.
    ///
    /// When the cycle is exhausted the counter resets and the schedule starts
    /// again from `initial_delay`.
    pub fn next_delay(&mut self) -> Duration {
        if self.attempts >= self.policy.max_attempts_per_cycle {
            self.cycles += 1;
            info!(
                cycle = self.cycles,
                attempts = self.attempts,
                "Reconnect cycle exhausted, starting a new cycle."
            );
            self.attempts = 0;
        }
        let delay = self.policy.delay(self.attempts);
        self.attempts += 1;
        delay
    }

    /// Forget all attempts, e.g. after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
