use futures_util::{FutureExt, Stream, StreamExt};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ack_controller::{AckController, AckDecision, ProcessingOutcome};
use crate::decoder::MessageDecoder;
use crate::envelope::Envelope;
use crate::error::{AckTransportError, ConfigurationError, ProcessingFailure, ReceiveError};
use crate::observer::{DeliveryObserver, DeliveryReport, TracingObserver};
use crate::processor::MessageProcessor;
use crate::retry_policy::RetryPolicy;

/// Default number of envelopes processed concurrently
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Pause after a receive error, to avoid a tight loop on persistent failures
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_millis(100);

const PROGRESS_LOG_INTERVAL: u64 = 1000;

/// Non-blank subscription name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionName(String);

impl SubscriptionName {
    pub fn parse(name: &str) -> Result<Self, ConfigurationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigurationError::MissingSubscription);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cumulative delivery counters, kept across reconnects.
#[derive(Debug)]
struct SubscriberStats {
    started: Instant,
    received: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    decode_failures: AtomicU64,
    processing_failures: AtomicU64,
    exhausted: AtomicU64,
    settle_errors: AtomicU64,
    receive_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberSummary {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
    pub decode_failures: u64,
    pub processing_failures: u64,
    pub exhausted: u64,
    pub settle_errors: u64,
    pub receive_errors: u64,
}

impl Default for SubscriberStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            received: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            nacked: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            processing_failures: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            settle_errors: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
        }
    }
}

impl SubscriberStats {
    /// Average messages per second since the subscriber was built.
    fn rate(&self, received: u64) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            received as f64 / elapsed
        } else {
            0.0
        }
    }

    fn record(
        &self,
        outcome: &ProcessingOutcome,
        decision: &AckDecision,
        settle_result: &Result<(), AckTransportError>,
    ) {
        match outcome {
            ProcessingOutcome::Success => {}
            ProcessingOutcome::DecodeFailure(_) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
            }
            ProcessingOutcome::ProcessingFailure(_) => {
                self.processing_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        if settle_result.is_err() {
            self.settle_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match decision {
            AckDecision::Ack => {
                self.acked.fetch_add(1, Ordering::Relaxed);
            }
            AckDecision::Nack { exhausted, .. } => {
                self.nacked.fetch_add(1, Ordering::Relaxed);
                if *exhausted {
                    self.exhausted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn snapshot(&self) -> SubscriberSummary {
        SubscriberSummary {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            processing_failures: self.processing_failures.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            settle_errors: self.settle_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Everything one worker needs to take an envelope from payload to ack/nack.
struct Pipeline {
    subscription: SubscriptionName,
    decoder: MessageDecoder,
    processor: Arc<dyn MessageProcessor>,
    controller: AckController,
    observer: Arc<dyn DeliveryObserver>,
    stats: Arc<SubscriberStats>,
}

impl Pipeline {
    /// Runs decode -> process -> ack/nack for one envelope. The envelope is
    /// always settled exactly once, whatever the processor does.
    async fn handle<E: Envelope>(&self, envelope: E) {
        let started = Instant::now();
        let attempt = envelope.delivery_attempt();
        let received = self.stats.received.fetch_add(1, Ordering::Relaxed) + 1;

        debug!(
            subscription = %self.subscription,
            attempt = ?attempt,
            payload = %String::from_utf8_lossy(envelope.payload()),
            "Message received"
        );

        let mut message_id = None;
        let outcome = match AssertUnwindSafe(self.evaluate(envelope.payload(), &mut message_id))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                ProcessingOutcome::ProcessingFailure(ProcessingFailure::from_panic(panic))
            }
        };

        let (decision, state) = self.controller.decide(&outcome, attempt);
        let settle_result = self.controller.settle(envelope, &decision).await;

        self.stats.record(&outcome, &decision, &settle_result);
        self.observer.delivery_settled(&DeliveryReport {
            subscription: self.subscription.to_string(),
            message_id,
            attempt,
            outcome,
            decision,
            state,
            settle_result,
            elapsed: started.elapsed(),
        });

        if received % PROGRESS_LOG_INTERVAL == 0 {
            info!(
                "Processed {} messages on '{}' ({:.1} msg/s since start)",
                received,
                self.subscription,
                self.stats.rate(received)
            );
        }
    }

    async fn evaluate(&self, payload: &[u8], message_id: &mut Option<String>) -> ProcessingOutcome {
        let message = match self.decoder.decode(payload) {
            Ok(message) => message,
            Err(failure) => return ProcessingOutcome::DecodeFailure(failure),
        };

        *message_id = Some(message.id.clone());

        match self.processor.process(&message).await {
            Ok(()) => ProcessingOutcome::Success,
            Err(failure) => ProcessingOutcome::ProcessingFailure(failure),
        }
    }
}

/// Pulls envelopes for one subscription and runs each through the pipeline
/// on a bounded pool of tasks.
pub struct SubscriberLoop {
    subscription: SubscriptionName,
    decoder: MessageDecoder,
    processor: Arc<dyn MessageProcessor>,
    controller: AckController,
    observer: Arc<dyn DeliveryObserver>,
    max_in_flight: usize,
    stats: Arc<SubscriberStats>,
}

impl SubscriberLoop {
    /// Fails fast when the subscription name is blank.
    pub fn new(
        subscription: &str,
        processor: Arc<dyn MessageProcessor>,
        policy: Arc<RetryPolicy>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            subscription: SubscriptionName::parse(subscription)?,
            decoder: MessageDecoder::default(),
            processor,
            controller: AckController::new(policy),
            observer: Arc::new(TracingObserver),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            stats: Arc::new(SubscriberStats::default()),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_decoder(mut self, decoder: MessageDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Result<Self, ConfigurationError> {
        if max_in_flight == 0 {
            return Err(ConfigurationError::ZeroMaxInFlight);
        }
        self.max_in_flight = max_in_flight;
        Ok(self)
    }

    pub fn subscription(&self) -> &SubscriptionName {
        &self.subscription
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.controller.policy()
    }

    pub fn summary(&self) -> SubscriberSummary {
        self.stats.snapshot()
    }

    /// Consumes `deliveries` until the stream ends or `shutdown` fires.
    ///
    /// On shutdown no further envelope is pulled; envelopes already handed to
    /// a worker are settled before this returns. Returns the cumulative
    /// counters for this loop.
    pub async fn run<S, E>(&self, mut deliveries: S, shutdown: CancellationToken) -> SubscriberSummary
    where
        S: Stream<Item = Result<E, ReceiveError>> + Unpin,
        E: Envelope,
    {
        let pipeline = Arc::new(Pipeline {
            subscription: self.subscription.clone(),
            decoder: self.decoder,
            processor: self.processor.clone(),
            controller: self.controller.clone(),
            observer: self.observer.clone(),
            stats: self.stats.clone(),
        });

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!(
            subscription = %self.subscription,
            max_in_flight = self.max_in_flight,
            "Subscriber loop started"
        );

        loop {
            // Take a worker slot before pulling, so nothing is received that
            // cannot be processed right away
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(envelope)) => {
                    let pipeline = pipeline.clone();
                    in_flight.spawn(async move {
                        pipeline.handle(envelope).await;
                        drop(permit);
                    });
                }
                Some(Err(e)) => {
                    drop(permit);
                    self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    self.observer.receive_failed(self.subscription.as_str(), &e);

                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = sleep(RECEIVE_ERROR_PAUSE) => {}
                    }
                }
                None => {
                    warn!(subscription = %self.subscription, "Delivery stream ended");
                    break;
                }
            }

            while let Some(result) = in_flight.try_join_next() {
                log_worker_result(&self.subscription, result);
            }
        }

        if shutdown.is_cancelled() {
            info!(
                subscription = %self.subscription,
                in_flight = in_flight.len(),
                "Shutdown requested, draining in-flight messages"
            );
        }

        while let Some(result) = in_flight.join_next().await {
            log_worker_result(&self.subscription, result);
        }

        let summary = self.stats.snapshot();
        info!(
            subscription = %self.subscription,
            received = summary.received,
            acked = summary.acked,
            nacked = summary.nacked,
            settle_errors = summary.settle_errors,
            "Subscriber loop stopped"
        );
        summary
    }
}

fn log_worker_result(subscription: &SubscriptionName, result: Result<(), JoinError>) {
    if let Err(e) = result {
        // Only reachable if the envelope's own ack/nack panicked
        error!(subscription = %subscription, error = %e, "Delivery worker failed");
        metrics::counter!("subscriber.worker_failed").increment(1);
    }
}
