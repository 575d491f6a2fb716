use std::time::Duration;

use rand::Rng;

use crate::BackoffPolicy;

/// Delay sequence of one reconnection cycle
///
/// The first attempt runs without delay. Each failed attempt grows the next
/// delay by `multiplier` up to `max_backoff`; jitter spreads every delay by
/// up to `jitter * delay` in both directions.
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial_backoff(),
            policy,
            attempts: 0,
        }
    }

    /// Marks the start of an attempt and returns its 1-based number
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, `None` once the policy is exhausted
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.is_unbounded() && self.attempts >= self.policy.max_attempts {
            return None;
        }

        let max = self.policy.max_backoff();
        let delay = apply_jitter(self.current, self.policy.jitter, max);
        let grown = self.current.as_secs_f64() * self.policy.multiplier;
        self.current = Duration::try_from_secs_f64(grown).unwrap_or(max).min(max);
        Some(delay.min(max))
    }
}

fn apply_jitter(
    delay: Duration,
    jitter: f64,
    max: Duration,
) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let spread = rand::thread_rng().gen_range(-jitter..=jitter);
    let secs = delay.as_secs_f64() * (1.0 + spread);
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(max)
}
