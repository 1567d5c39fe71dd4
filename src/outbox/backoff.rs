use super::OutboxOp;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Decides whether a queued operation is due for another delivery attempt.
///
/// Strategies only ever postpone an operation; none of them drop it.
pub trait BackoffStrategy: Send + Sync + std::fmt::Debug {
    fn is_due(&self, op: &OutboxOp, now: DateTime<Utc>) -> bool;
}

/// Retry schedule for failed outbox deliveries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffPolicy {
    /// Every remaining operation is retried on every drain.
    #[default]
    EveryTick,
    /// Doubling delay after each failed attempt, capped at `max_backoff_ms`.
    Exponential {
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
    },
}

impl BackoffPolicy {
    pub fn exponential(initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self::Exponential {
            initial_backoff_ms,
            max_backoff_ms: max_backoff_ms.max(initial_backoff_ms),
        }
    }

    /// Delay that must elapse after the last attempt before the next one.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        match self {
            Self::EveryTick => Duration::zero(),
            Self::Exponential {
                initial_backoff_ms,
                max_backoff_ms,
            } => {
                if attempts == 0 {
                    return Duration::zero();
                }
                let shift = (attempts - 1).min(32);
                let delay = initial_backoff_ms
                    .saturating_mul(1u64 << shift)
                    .min(*max_backoff_ms);
                Duration::milliseconds(delay.min(i64::MAX as u64) as i64)
            }
        }
    }
}

impl BackoffStrategy for BackoffPolicy {
    fn is_due(&self, op: &OutboxOp, now: DateTime<Utc>) -> bool {
        match op.last_attempt_at {
            None => true,
            Some(last) => now >= last + self.delay_after(op.attempts),
        }
    }
}
