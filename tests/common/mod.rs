//! Test doubles for subscriber integration tests.
//!
//! `RecordingEnvelope` counts every terminal call into a shared `CallLog`, so
//! a test can assert that each envelope was acked or nacked exactly once. An
//! envelope dropped without a terminal call is counted too.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pubsub_subscriber::{
    AckTransportError, DeliveryObserver, DeliveryReport, DomainMessage, Envelope,
    MessageProcessor, OutcomeKind, ProcessingFailure, ReceiveError, RetryPolicy,
};

#[derive(Debug, Default)]
pub struct CallLog {
    acks: AtomicUsize,
    nacks: AtomicUsize,
    unsettled_drops: AtomicUsize,
    nack_delays: Mutex<Vec<Option<Duration>>>,
}

impl CallLog {
    pub fn acks(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }

    pub fn nacks(&self) -> usize {
        self.nacks.load(Ordering::SeqCst)
    }

    pub fn terminal_calls(&self) -> usize {
        self.acks() + self.nacks()
    }

    pub fn unsettled_drops(&self) -> usize {
        self.unsettled_drops.load(Ordering::SeqCst)
    }

    pub fn nack_delays(&self) -> Vec<Option<Duration>> {
        self.nack_delays.lock().unwrap().clone()
    }
}

pub struct RecordingEnvelope {
    payload: Vec<u8>,
    attempt: Option<u32>,
    log: Arc<CallLog>,
    fail_transport: bool,
    settled: bool,
}

impl RecordingEnvelope {
    pub fn new(payload: impl Into<Vec<u8>>) -> (Self, Arc<CallLog>) {
        let log = Arc::new(CallLog::default());
        (
            Self {
                payload: payload.into(),
                attempt: Some(1),
                log: log.clone(),
                fail_transport: false,
                settled: false,
            },
            log,
        )
    }

    pub fn with_attempt(mut self, attempt: Option<u32>) -> Self {
        self.attempt = attempt;
        self
    }

    /// The terminal call is recorded but reports a transport error.
    pub fn with_failing_transport(mut self) -> Self {
        self.fail_transport = true;
        self
    }
}

impl Drop for RecordingEnvelope {
    fn drop(&mut self) {
        if !self.settled {
            self.log.unsettled_drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Envelope for RecordingEnvelope {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_attempt(&self) -> Option<u32> {
        self.attempt
    }

    async fn ack(self) -> Result<(), AckTransportError> {
        let mut envelope = self;
        envelope.settled = true;
        envelope.log.acks.fetch_add(1, Ordering::SeqCst);
        if envelope.fail_transport {
            return Err(AckTransportError::ack("connection reset"));
        }
        Ok(())
    }

    async fn nack(self, redeliver_after: Option<Duration>) -> Result<(), AckTransportError> {
        let mut envelope = self;
        envelope.settled = true;
        envelope.log.nacks.fetch_add(1, Ordering::SeqCst);
        envelope.log.nack_delays.lock().unwrap().push(redeliver_after);
        if envelope.fail_transport {
            return Err(AckTransportError::nack("connection reset"));
        }
        Ok(())
    }
}

/// A finite delivery stream over the given envelopes.
pub fn deliveries(
    envelopes: Vec<RecordingEnvelope>,
) -> BoxStream<'static, Result<RecordingEnvelope, ReceiveError>> {
    stream::iter(envelopes.into_iter().map(Ok)).boxed()
}

/// Delivers the envelopes and then stays open, like a live subscription.
pub fn open_deliveries(
    envelopes: Vec<RecordingEnvelope>,
) -> BoxStream<'static, Result<RecordingEnvelope, ReceiveError>> {
    stream::iter(envelopes.into_iter().map(Ok))
        .chain(stream::pending())
        .boxed()
}

pub struct SucceedingProcessor {
    pub seen: Mutex<Vec<DomainMessage>>,
}

impl SucceedingProcessor {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen_ids(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.id.clone())
            .collect()
    }
}

#[async_trait]
impl MessageProcessor for SucceedingProcessor {
    async fn process(&self, message: &DomainMessage) -> Result<(), ProcessingFailure> {
        self.seen.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct FailingProcessor;

#[async_trait]
impl MessageProcessor for FailingProcessor {
    async fn process(&self, _message: &DomainMessage) -> Result<(), ProcessingFailure> {
        Err(ProcessingFailure::new("downstream unavailable"))
    }
}

pub struct PanickingProcessor;

#[async_trait]
impl MessageProcessor for PanickingProcessor {
    async fn process(&self, message: &DomainMessage) -> Result<(), ProcessingFailure> {
        panic!("cannot handle message {}", message.id);
    }
}

/// Sleeps before succeeding and tracks the peak number of concurrent calls.
pub struct SlowProcessor {
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowProcessor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageProcessor for SlowProcessor {
    async fn process(&self, _message: &DomainMessage) -> Result<(), ProcessingFailure> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Keeps every delivery report for inspection.
#[derive(Default)]
pub struct CapturingObserver {
    reports: Mutex<Vec<DeliveryReport>>,
    receive_errors: AtomicUsize,
}

impl CapturingObserver {
    pub fn reports(&self) -> Vec<DeliveryReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<OutcomeKind> {
        self.reports().iter().map(|r| r.kind()).collect()
    }

    pub fn receive_errors(&self) -> usize {
        self.receive_errors.load(Ordering::SeqCst)
    }
}

impl DeliveryObserver for CapturingObserver {
    fn delivery_settled(&self, report: &DeliveryReport) {
        self.reports.lock().unwrap().push(report.clone());
    }

    fn receive_failed(&self, _subscription: &str, _error: &ReceiveError) {
        self.receive_errors.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn default_policy() -> Arc<RetryPolicy> {
    Arc::new(
        RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10), 2.0)
            .expect("valid policy"),
    )
}
