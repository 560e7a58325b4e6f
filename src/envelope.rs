//! Transport-neutral handle on one delivered message.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::AckTransportError;

/// One delivery of one message, with its two terminal operations.
///
/// `ack` and `nack` take the envelope by value, so after either call there is
/// nothing left to ack or nack again. Dropping an envelope without calling
/// either leaves the message to the broker's lease expiry.
#[async_trait]
pub trait Envelope: Send + Sync + Sized + 'static {
    /// Raw payload bytes as delivered.
    fn payload(&self) -> &[u8];

    /// 1-based delivery attempt, if the transport reports it.
    fn delivery_attempt(&self) -> Option<u32>;

    /// Removes the message from the subscription backlog.
    async fn ack(self) -> Result<(), AckTransportError>;

    /// Asks for redelivery. `None` lets the broker pick the delay from its
    /// own redelivery settings.
    async fn nack(self, redeliver_after: Option<Duration>) -> Result<(), AckTransportError>;
}
