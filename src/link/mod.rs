//! Sink link transport boundary. Per the bridge's scope, AMQP wire details
//! (frames, sessions, link attach negotiation) are external collaborators —
//! the endpoint (C4) only ever sees the contract in this module. This keeps
//! `endpoint.rs` testable against [`test::TestLink`] without a broker, the
//! same way the teacher keeps `App` testable against an injected
//! `EventBus` rather than a live crossterm backend.

pub mod fe2o3;
#[cfg(test)]
pub mod test;

use async_trait::async_trait;

use crate::converter::AmqpMessage;
use crate::error::TransportError;
use crate::notification::DeliveryTag;

/// Events the transport can raise asynchronously, observed by the
/// reactor's `tokio::select!` alongside the notification channel.
#[derive(Debug)]
pub enum LinkEvent {
    /// The peer granted enough credit to resume sending.
    CreditReplenished,
    /// The peer detached the link without closing the session.
    RemoteDetach,
    /// The peer closed the link or its session.
    RemoteClose,
    /// A previously sent unsettled delivery reached a terminal outcome.
    Settled { tag: DeliveryTag, accepted: bool },
}

/// The contract the endpoint (C4) drives a sender-facing AMQP link through.
///
/// Implementations own all protocol-level state (credit window, delivery
/// tag encoding, settlement correlation) and translate it into the handful
/// of operations and events the endpoint's state machine needs.
#[async_trait]
pub trait SinkLink: Send {
    /// Waits for the next transport-level event.
    async fn next_event(&mut self) -> LinkEvent;

    /// Whether the link currently has credit to accept another send.
    fn has_credit(&self) -> bool;

    /// Sends `message` pre-settled; no settlement is ever observed for it.
    async fn send_presettled(&mut self, message: AmqpMessage) -> Result<(), TransportError>;

    /// Sends `message` unsettled under `tag`; a later [`LinkEvent::Settled`]
    /// with the same tag reports its outcome.
    async fn send_unsettled(
        &mut self,
        tag: DeliveryTag,
        message: AmqpMessage,
    ) -> Result<(), TransportError>;

    /// Rejects link attachment with the given AMQP error condition symbol
    /// and description, then tears the link down.
    async fn reject(&mut self, condition: &str, description: &str) -> Result<(), TransportError>;

    /// Detaches (AT_MOST_ONCE) or closes (AT_LEAST_ONCE per spec §4.5) the
    /// link cleanly.
    async fn close(&mut self) -> Result<(), TransportError>;
}
