//! Delays between root-chain submission attempts.

use std::time::Duration;

use rand::{thread_rng, Rng};

/// The ceiling doubles per attempt and stops growing at this many times the initial delay.
const MAX_GROWTH: u32 = 32;

/// Exponential backoff with equal jitter: each delay is drawn from the upper half of
/// the current ceiling.
pub(crate) struct SubmissionBackoff {
    initial: Duration,
    attempt: u32,
}

impl SubmissionBackoff {
    pub(crate) fn new(initial: Duration) -> Self {
        Self { initial, attempt: 0 }
    }

    fn ceiling(&self) -> Duration {
        let growth = 1u32
            .checked_shl(self.attempt)
            .map_or(MAX_GROWTH, |g| g.min(MAX_GROWTH));
        self.initial.saturating_mul(growth)
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);
        if ceiling.is_zero() {
            return ceiling;
        }
        thread_rng().gen_range(ceiling / 2..=ceiling)
    }
}
