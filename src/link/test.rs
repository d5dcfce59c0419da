//! Deterministic [`SinkLink`] fake used by `endpoint.rs`'s tests to drive
//! every end-to-end scenario in spec §8 without a broker.

use async_trait::async_trait;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::converter::AmqpMessage;
use crate::error::TransportError;
use crate::notification::DeliveryTag;

use super::{LinkEvent, SinkLink};

/// A record of one call the endpoint made against the fake link, inspected
/// by tests to assert on dispatch order and content.
#[derive(Debug)]
pub enum Sent {
    Presettled(AmqpMessage),
    Unsettled(DeliveryTag, AmqpMessage),
    Rejected { condition: String, description: String },
    Closed,
}

/// Test double for [`SinkLink`]. Credit and injected transport events are
/// driven explicitly by the test via the paired [`TestLinkHandle`].
pub struct TestLink {
    credit: i64,
    events: UnboundedReceiver<LinkEvent>,
    sent_tx: UnboundedSender<Sent>,
}

/// The test-side handle used to script a [`TestLink`] and observe its
/// outgoing calls.
pub struct TestLinkHandle {
    pub events_tx: UnboundedSender<LinkEvent>,
    pub sent_rx: UnboundedReceiver<Sent>,
}

pub fn new_test_link(initial_credit: i64) -> (TestLink, TestLinkHandle) {
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = tokio::sync::mpsc::unbounded_channel();

    (
        TestLink {
            credit: initial_credit,
            events: events_rx,
            sent_tx,
        },
        TestLinkHandle { events_tx, sent_rx },
    )
}

impl TestLink {
    /// Directly manipulates the fake's credit, for tests exercising the
    /// exhaustion/replenishment path without routing it through a flow
    /// event.
    pub fn set_credit(&mut self, credit: i64) {
        self.credit = credit;
    }
}

#[async_trait]
impl SinkLink for TestLink {
    async fn next_event(&mut self) -> LinkEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    fn has_credit(&self) -> bool {
        self.credit > 0
    }

    async fn send_presettled(&mut self, message: AmqpMessage) -> Result<(), TransportError> {
        if self.credit <= 0 {
            return Err(TransportError::NotOpen);
        }
        self.credit -= 1;
        let _ = self.sent_tx.send(Sent::Presettled(message));
        Ok(())
    }

    async fn send_unsettled(
        &mut self,
        tag: DeliveryTag,
        message: AmqpMessage,
    ) -> Result<(), TransportError> {
        if self.credit <= 0 {
            return Err(TransportError::NotOpen);
        }
        self.credit -= 1;
        let _ = self.sent_tx.send(Sent::Unsettled(tag, message));
        Ok(())
    }

    async fn reject(&mut self, condition: &str, description: &str) -> Result<(), TransportError> {
        let _ = self.sent_tx.send(Sent::Rejected {
            condition: condition.to_string(),
            description: description.to_string(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.sent_tx.send(Sent::Closed);
        Ok(())
    }
}
