//! Observability handle passed into the subscriber loop.
//!
//! The loop reports every settled delivery here instead of logging on its own,
//! so tests can capture the records and production gets structured tracing
//! events plus metrics.

use std::time::Duration;
use tracing::{error, info, warn};

use crate::ack_controller::{AckDecision, OutcomeKind, ProcessingOutcome};
use crate::error::{AckTransportError, ReceiveError};
use crate::retry_policy::DeliveryState;

/// Everything known about one delivery once its envelope has been settled.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub subscription: String,
    /// Present when decoding got far enough to read the id.
    pub message_id: Option<String>,
    pub attempt: Option<u32>,
    pub outcome: ProcessingOutcome,
    pub decision: AckDecision,
    pub state: Option<DeliveryState>,
    pub settle_result: Result<(), AckTransportError>,
    pub elapsed: Duration,
}

impl DeliveryReport {
    pub fn kind(&self) -> OutcomeKind {
        self.outcome.kind()
    }
}

pub trait DeliveryObserver: Send + Sync {
    /// Called exactly once per envelope, after its ack or nack.
    fn delivery_settled(&self, report: &DeliveryReport);

    /// Called when the transport fails to hand over an envelope.
    fn receive_failed(&self, _subscription: &str, _error: &ReceiveError) {}
}

/// Emits one tracing event and a set of metrics per delivery.
pub struct TracingObserver;

impl DeliveryObserver for TracingObserver {
    fn delivery_settled(&self, report: &DeliveryReport) {
        let message_id = report.message_id.as_deref().unwrap_or("-");
        let outcome = report.kind();
        let reason = report.outcome.reason().unwrap_or_default();
        let attempt = report.attempt.unwrap_or(0);
        let state = report.state.map(|s| s.name()).unwrap_or("unknown");

        metrics::histogram!("subscriber.delivery.duration_ms")
            .record(report.elapsed.as_secs_f64() * 1000.0);

        match outcome {
            OutcomeKind::Success => metrics::counter!("subscriber.delivery.success").increment(1),
            OutcomeKind::DecodeFailure => {
                metrics::counter!("subscriber.delivery.decode_failure").increment(1)
            }
            OutcomeKind::ProcessingFailure => {
                metrics::counter!("subscriber.delivery.processing_failure").increment(1)
            }
        }

        if let Err(e) = &report.settle_result {
            metrics::counter!("subscriber.delivery.ack_error").increment(1);
            error!(
                subscription = %report.subscription,
                message_id,
                %outcome,
                reason = %reason,
                attempt,
                action = report.decision.action(),
                error = %e,
                "Failed to settle message - will be redelivered after lease expiry"
            );
            return;
        }

        match report.decision {
            AckDecision::Ack => {
                metrics::counter!("subscriber.delivery.acked").increment(1);
                info!(
                    subscription = %report.subscription,
                    message_id,
                    %outcome,
                    attempt,
                    state,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Message acked"
                );
            }
            AckDecision::Nack {
                exhausted: true, ..
            } => {
                metrics::counter!("subscriber.delivery.nacked").increment(1);
                metrics::counter!("subscriber.delivery.exhausted").increment(1);
                error!(
                    subscription = %report.subscription,
                    message_id,
                    %outcome,
                    reason = %reason,
                    attempt,
                    state,
                    "Message nacked on its final attempt - retries exhausted"
                );
            }
            AckDecision::Nack {
                redeliver_after, ..
            } => {
                metrics::counter!("subscriber.delivery.nacked").increment(1);
                warn!(
                    subscription = %report.subscription,
                    message_id,
                    %outcome,
                    reason = %reason,
                    attempt,
                    state,
                    redeliver_after = ?redeliver_after,
                    "Message nacked for redelivery"
                );
            }
        }
    }

    fn receive_failed(&self, subscription: &str, error: &ReceiveError) {
        metrics::counter!("subscriber.receive_error").increment(1);
        error!(subscription, error = %error, "Error receiving message");
    }
}
