//! Redelivery policy shared by the subscriber and the broker.
//!
//! The broker caps deliveries at `max_attempts` (the consumer's
//! `max_deliver`), and the acknowledgment controller uses the policy to pick
//! the delay carried by every nack. A [`RetryPolicy`] can only be obtained through validation, so
//! holding one means the bounds below already hold:
//!
//! - `max_attempts >= 1`
//! - `initial_delay > 0`
//! - `max_delay >= initial_delay`
//! - `delay_multiplier > 1.0`

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::ConfigurationError;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Raw retry settings as they appear in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub delay_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            delay_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn validate(&self) -> Result<RetryPolicy, ConfigurationError> {
        RetryPolicy::new(
            self.max_attempts,
            self.initial_delay,
            self.max_delay,
            self.delay_multiplier,
        )
    }
}

/// Validated, immutable redelivery policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    initial_delay: Duration,
    max_delay: Duration,
    delay_multiplier: f64,
}

/// What the broker should do with a message whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackDisposition {
    /// Redeliver after `delay`.
    Retry { delay: Duration },
    /// No attempts left; the broker's max-delivery handling takes over.
    Exhausted,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        delay_multiplier: f64,
    ) -> Result<Self, ConfigurationError> {
        let max_attempts = NonZeroU32::new(max_attempts).ok_or(ConfigurationError::ZeroMaxAttempts)?;

        if initial_delay.is_zero() {
            return Err(ConfigurationError::ZeroInitialDelay);
        }

        if max_delay < initial_delay {
            return Err(ConfigurationError::MaxDelayBelowInitial {
                initial_delay,
                max_delay,
            });
        }

        // Written as a negation so NaN is rejected too
        if !(delay_multiplier > 1.0) {
            return Err(ConfigurationError::MultiplierNotAboveOne(delay_multiplier));
        }

        if delay_multiplier.is_infinite() {
            return Err(ConfigurationError::InfiniteMultiplier);
        }

        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            delay_multiplier,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn delay_multiplier(&self) -> f64 {
        self.delay_multiplier
    }

    /// Delay before retry number `retry_index` (0-based):
    /// `initial_delay * delay_multiplier^retry_index`, clamped at `max_delay`.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.delay_multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }

        // Below max_delay, so whole seconds fit in u64
        let nanos = nanos.round() as u128;
        let delay = Duration::new(
            (nanos / NANOS_PER_SEC) as u64,
            (nanos % NANOS_PER_SEC) as u32,
        );
        delay.min(self.max_delay)
    }

    /// One delay per allowed attempt, in order. Logged at startup.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.get())
            .map(|k| self.delay_for(k))
            .collect()
    }

    /// Disposition for a failed delivery. `attempt` is 1-based, as reported by
    /// the broker's delivery counter.
    pub fn disposition(&self, attempt: u32) -> NackDisposition {
        if attempt < self.max_attempts.get() {
            NackDisposition::Retry {
                delay: self.delay_for(attempt.saturating_sub(1)),
            }
        } else {
            NackDisposition::Exhausted
        }
    }
}

/// Lifecycle of one message as the broker sees it under a [`RetryPolicy`].
///
/// `Pending -> Delivered -> {Acked, NackedRetryable -> Pending, NackedExhausted}`
///
/// Transitions that the lifecycle does not allow return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending { next_attempt: u32 },
    Delivered { attempt: u32 },
    Acked { attempt: u32 },
    NackedRetryable { attempt: u32, redeliver_after: Duration },
    NackedExhausted { attempt: u32 },
}

impl Default for DeliveryState {
    fn default() -> Self {
        DeliveryState::Pending { next_attempt: 1 }
    }
}

impl DeliveryState {
    pub fn delivered(self) -> Option<Self> {
        match self {
            DeliveryState::Pending { next_attempt } => Some(DeliveryState::Delivered {
                attempt: next_attempt,
            }),
            _ => None,
        }
    }

    pub fn acked(self) -> Option<Self> {
        match self {
            DeliveryState::Delivered { attempt } => Some(DeliveryState::Acked { attempt }),
            _ => None,
        }
    }

    pub fn nacked(self, policy: &RetryPolicy) -> Option<Self> {
        match self {
            DeliveryState::Delivered { attempt } => Some(match policy.disposition(attempt) {
                NackDisposition::Retry { delay } => DeliveryState::NackedRetryable {
                    attempt,
                    redeliver_after: delay,
                },
                NackDisposition::Exhausted => DeliveryState::NackedExhausted { attempt },
            }),
            _ => None,
        }
    }

    pub fn redelivered(self) -> Option<Self> {
        match self {
            DeliveryState::NackedRetryable { attempt, .. } => Some(DeliveryState::Pending {
                next_attempt: attempt + 1,
            }),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Acked { .. } | DeliveryState::NackedExhausted { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeliveryState::Pending { .. } => "pending",
            DeliveryState::Delivered { .. } => "delivered",
            DeliveryState::Acked { .. } => "acked",
            DeliveryState::NackedRetryable { .. } => "nacked_retryable",
            DeliveryState::NackedExhausted { .. } => "nacked_exhausted",
        }
    }
}
