//! Maps the result of one delivery cycle onto the envelope's terminal call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::envelope::Envelope;
use crate::error::{AckTransportError, DecodeFailure, ProcessingFailure};
use crate::retry_policy::{DeliveryState, RetryPolicy};

/// Result of decode + process for one envelope. Consumed right away by the
/// controller, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Success,
    DecodeFailure(DecodeFailure),
    ProcessingFailure(ProcessingFailure),
}

impl ProcessingOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ProcessingOutcome::Success => OutcomeKind::Success,
            ProcessingOutcome::DecodeFailure(_) => OutcomeKind::DecodeFailure,
            ProcessingOutcome::ProcessingFailure(_) => OutcomeKind::ProcessingFailure,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            ProcessingOutcome::Success => None,
            ProcessingOutcome::DecodeFailure(failure) => Some(failure.to_string()),
            ProcessingOutcome::ProcessingFailure(failure) => Some(failure.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    DecodeFailure,
    ProcessingFailure,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "Success"),
            OutcomeKind::DecodeFailure => write!(f, "DecodeFailure"),
            OutcomeKind::ProcessingFailure => write!(f, "ProcessingFailure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack {
        redeliver_after: Option<Duration>,
        /// The failed attempt was the last one the policy allows.
        exhausted: bool,
    },
}

impl AckDecision {
    pub fn action(&self) -> &'static str {
        match self {
            AckDecision::Ack => "ack",
            AckDecision::Nack { .. } => "nack",
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, AckDecision::Nack { exhausted: true, .. })
    }
}

/// Decides ack vs nack and performs the chosen call.
#[derive(Debug, Clone)]
pub struct AckController {
    policy: Arc<RetryPolicy>,
}

impl AckController {
    pub fn new(policy: Arc<RetryPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Pure decision. Success acks; both failure kinds nack.
    ///
    /// Also returns the broker-side state the message ends up in, when the
    /// delivery attempt is known.
    pub fn decide(
        &self,
        outcome: &ProcessingOutcome,
        attempt: Option<u32>,
    ) -> (AckDecision, Option<DeliveryState>) {
        let delivered = attempt.map(|attempt| DeliveryState::Delivered { attempt });

        match outcome {
            ProcessingOutcome::Success => (AckDecision::Ack, delivered.and_then(|s| s.acked())),
            ProcessingOutcome::DecodeFailure(_) | ProcessingOutcome::ProcessingFailure(_) => {
                let state = delivered.and_then(|s| s.nacked(&self.policy));
                let decision = match state {
                    Some(DeliveryState::NackedRetryable {
                        redeliver_after, ..
                    }) => AckDecision::Nack {
                        redeliver_after: Some(redeliver_after),
                        exhausted: false,
                    },
                    // Still delayed: a reused consumer may allow more
                    // deliveries than the policy does
                    Some(DeliveryState::NackedExhausted { .. }) => AckDecision::Nack {
                        redeliver_after: Some(self.policy.max_delay()),
                        exhausted: true,
                    },
                    // Attempt unknown: leave the delay to the broker
                    _ => AckDecision::Nack {
                        redeliver_after: None,
                        exhausted: false,
                    },
                };
                (decision, state)
            }
        }
    }

    /// Performs exactly one terminal call on the envelope.
    pub async fn settle<E: Envelope>(
        &self,
        envelope: E,
        decision: &AckDecision,
    ) -> Result<(), AckTransportError> {
        match decision {
            AckDecision::Ack => envelope.ack().await,
            AckDecision::Nack {
                redeliver_after, ..
            } => envelope.nack(*redeliver_after).await,
        }
    }
}
