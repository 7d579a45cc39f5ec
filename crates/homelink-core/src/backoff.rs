//! Reconnect delay schedule.
//!
//! `delay(n) = min(max, base * 2^n * (1 + jitter * r))` with `r` drawn from
//! `[-1, 1]`. Each delay is also floored at the previous one, so the
//! schedule never shrinks between resets even when the jitter draw is low.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Exponent cap; `2^30` seconds is already far past any sane maximum.
const MAX_EXPONENT: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry after a reset. Default: 1s.
    pub base: Duration,
    /// Upper bound on any single delay. Default: 60s.
    pub max: Duration,
    /// Fractional spread applied to each delay. Default: 0.2 (±20%).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

/// Source of jitter samples in `[-1.0, 1.0]`.
pub trait Jitter: Send + Sync {
    fn sample(&mut self) -> f64;
}

/// Default jitter source backed by an OS-seeded RNG.
#[derive(Debug)]
pub struct RandomJitter(StdRng);

impl Default for RandomJitter {
    fn default() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl Jitter for RandomJitter {
    fn sample(&mut self) -> f64 {
        self.0.gen_range(-1.0..=1.0)
    }
}

/// Stateful backoff counter. Owned by one connection manager.
#[derive(Debug)]
pub struct Backoff<J = RandomJitter> {
    policy: BackoffPolicy,
    attempt: u32,
    last: Duration,
    jitter: J,
}

impl Backoff<RandomJitter> {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_jitter(policy, RandomJitter::default())
    }
}

impl<J: Jitter> Backoff<J> {
    pub fn with_jitter(policy: BackoffPolicy, jitter: J) -> Self {
        Self {
            policy,
            attempt: 0,
            last: Duration::ZERO,
            jitter,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Advance the schedule and return the delay to wait before the next try.
    pub fn next_delay(&mut self) -> Duration {
        let delay = compute_delay(&self.policy, self.attempt, self.jitter.sample()).max(self.last);
        self.attempt = self.attempt.saturating_add(1);
        self.last = delay;
        delay
    }

    /// Back to the base delay. Called after a session authenticates.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }
}

/// Pure delay computation for `attempt` with a jitter sample in `[-1, 1]`.
pub fn compute_delay(policy: &BackoffPolicy, attempt: u32, sample: f64) -> Duration {
    let max = policy.max.as_secs_f64();
    let exponent = i32::try_from(attempt.min(MAX_EXPONENT)).unwrap_or(0);
    let raw = (policy.base.as_secs_f64() * 2f64.powi(exponent)).min(max);
    let spread = 1.0 + policy.jitter.clamp(0.0, 1.0) * sample.clamp(-1.0, 1.0);
    Duration::from_secs_f64((raw * spread).clamp(0.0, max))
}
