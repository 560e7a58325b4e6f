//! Pub/sub message subscriber with acknowledgment-driven delivery.
//!
//! Messages arrive as [`envelope::Envelope`]s, are decoded into
//! [`message::DomainMessage`]s, handed to a [`processor::MessageProcessor`],
//! and then acked or nacked. Failed deliveries are redelivered by the broker
//! according to the [`retry_policy::RetryPolicy`].

pub mod ack_controller;
pub mod config;
pub mod decoder;
pub mod envelope;
pub mod error;
pub mod jetstream;
pub mod message;
pub mod metrics;
pub mod observer;
pub mod processor;
pub mod retry_policy;
pub mod subscriber;
pub mod telemetry;

pub use ack_controller::{AckController, AckDecision, OutcomeKind, ProcessingOutcome};
pub use decoder::MessageDecoder;
pub use envelope::Envelope;
pub use error::{AckTransportError, ConfigurationError, DecodeFailure, ProcessingFailure, ReceiveError};
pub use message::DomainMessage;
pub use observer::{DeliveryObserver, DeliveryReport, TracingObserver};
pub use processor::{LoggingProcessor, MessageProcessor};
pub use retry_policy::{DeliveryState, NackDisposition, RetryPolicy, RetrySettings};
pub use subscriber::{SubscriberLoop, SubscriberSummary, SubscriptionName};
