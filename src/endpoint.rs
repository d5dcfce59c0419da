//! Sink Endpoint (C4) — the reactor driving one attached AMQP link through
//! attach, dispatch, credit exhaustion/recovery and tear-down.
//!
//! Generalizes the teacher's `App::run` main loop (`match event { ... }`
//! over a single `UnboundedReceiver<Event>`) to a `tokio::select!` over two
//! sources: transport events from the [`SinkLink`] and worker notifications
//! on the bridge's own channel, since here the "event bus" and the
//! "consumer" are peers rather than one driving the other through a shared
//! `Arc`.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::context::EndpointContext;
use crate::converter::MessageConverter;
use crate::error::ErrorCondition;
use crate::link::{LinkEvent, SinkLink};
use crate::notification::{DeliveryTag, Notification};
use crate::qos::Qos;
use crate::record::KafkaRecord;

/// Lifecycle state of an attached link (spec §4.4).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EndpointState {
    /// Waiting for the worker's first partition assignment before sending.
    AwaitingAssignment,
    /// Assigned and forwarding records as they arrive.
    Open,
    /// Tearing down: draining pending sends is no longer attempted, only
    /// settlement bookkeeping and a final close/detach.
    Closing,
    /// Terminal; no further operations are valid.
    Closed,
}

/// One attached sink link: owns the reactor state machine, a reference to
/// the shared staging map the worker writes into, and the message
/// converter used to shape outgoing AMQP messages.
pub struct SinkEndpoint<L: SinkLink> {
    address: String,
    context: Arc<EndpointContext>,
    link: L,
    notify_rx: UnboundedReceiver<Notification>,
    staging: Arc<DashMap<u64, KafkaRecord>>,
    converter: Box<dyn MessageConverter>,
    state: EndpointState,
    /// Delivery tags staged but not yet sent, held back while the link has
    /// no credit (spec §4.3's downstream backpressure path).
    pending: VecDeque<DeliveryTag>,
}

impl<L: SinkLink> SinkEndpoint<L> {
    /// Constructs an endpoint for an already-validated, already-assigned
    /// link. Rejection on malformed addresses/filters happens one layer up
    /// (spec §4.1), before a `SinkEndpoint` is ever built: by the time this
    /// constructor runs, attach always succeeds.
    pub fn new(
        address: String,
        context: Arc<EndpointContext>,
        link: L,
        notify_rx: UnboundedReceiver<Notification>,
        staging: Arc<DashMap<u64, KafkaRecord>>,
        converter: Box<dyn MessageConverter>,
    ) -> Self {
        Self {
            address,
            context,
            link,
            notify_rx,
            staging,
            converter,
            state: EndpointState::AwaitingAssignment,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Drives the endpoint until the link is closed or the worker's
    /// notification channel is dropped.
    pub async fn run(&mut self) {
        loop {
            if self.state == EndpointState::Closed {
                return;
            }

            tokio::select! {
                event = self.link.next_event() => {
                    self.on_link_event(event).await;
                }
                notification = self.notify_rx.recv() => {
                    match notification {
                        Some(n) => self.on_notification(n).await,
                        None => {
                            self.close().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn on_notification(&mut self, notification: Notification) {
        match notification {
            Notification::Assigned => self.on_assigned(),
            Notification::Send(tag) => self.on_send(tag).await,
            Notification::Error { condition, description } => {
                self.on_error(condition, description).await;
            }
        }
    }

    fn on_assigned(&mut self) {
        if self.state == EndpointState::AwaitingAssignment {
            self.state = EndpointState::Open;
        }
    }

    async fn on_send(&mut self, tag: DeliveryTag) {
        if self.state != EndpointState::Open {
            self.pending.push_back(tag);
            return;
        }

        if !self.link.has_credit() {
            self.pending.push_back(tag);
            return;
        }

        self.dispatch(tag).await;
    }

    /// Sends the record staged under `tag`, or silently drops the
    /// notification if it has already been dispatched/cleared (spec §7:
    /// unknown tags are tolerated, never fatal).
    async fn dispatch(&mut self, tag: DeliveryTag) {
        let Some((_, record)) = self.staging.remove(&tag.0) else {
            return;
        };

        let message = match self.converter.convert(&self.address, &record) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("dropping unconvertible record: {}", e);
                if let Some(offsets) = &self.context.offsets {
                    offsets.delivered(tag);
                }
                return;
            }
        };

        let result = match self.context.qos {
            Qos::AtMostOnce => self.link.send_presettled(message).await,
            Qos::AtLeastOnce => self.link.send_unsettled(tag, message).await,
        };

        if let Err(e) = result {
            tracing::warn!("send failed, holding tag {:?} for retry: {:?}", tag, e);
            self.staging.insert(tag.0, record);
            self.pending.push_front(tag);
        }

        if !self.link.has_credit() {
            self.context.set_send_queue_full(true);
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::CreditReplenished => self.drain_pending().await,
            LinkEvent::Settled { tag, accepted } => {
                if let Some(offsets) = &self.context.offsets {
                    if accepted {
                        offsets.delivered(tag);
                    }
                }
            }
            LinkEvent::RemoteDetach | LinkEvent::RemoteClose => {
                self.close().await;
            }
        }
    }

    /// Resumes dispatch once credit is available again, clearing the
    /// backpressure flag the worker observes.
    async fn drain_pending(&mut self) {
        self.context.set_send_queue_full(false);

        while self.link.has_credit() {
            let Some(tag) = self.pending.pop_front() else {
                break;
            };
            self.dispatch(tag).await;
        }
    }

    async fn on_error(&mut self, condition: ErrorCondition, description: String) {
        tracing::error!("worker reported a fatal error: {} ({})", description, condition);
        self.close().await;
    }

    /// Tears the link down: AT_MOST_ONCE detaches, AT_LEAST_ONCE closes
    /// cleanly (spec §4.5), and the offset tracker is cleared so any
    /// settlement callback racing the shutdown is a safe no-op.
    pub async fn close(&mut self) {
        if self.state == EndpointState::Closed {
            return;
        }
        self.state = EndpointState::Closing;

        if let Err(e) = self.link.close().await {
            tracing::warn!("error closing link: {:?}", e);
        }

        if let Some(offsets) = &self.context.offsets {
            offsets.clear();
        }

        self.state = EndpointState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc::unbounded_channel;

    use crate::address::Filters;
    use crate::converter::DefaultConverter;
    use crate::link::test::{new_test_link, Sent};

    use super::*;

    fn staged_record(partition: i32, offset: i64) -> KafkaRecord {
        KafkaRecord {
            topic: String::from("orders"),
            partition,
            offset,
            key: None,
            value: Bytes::from_static(b"v"),
        }
    }

    fn make_endpoint(
        qos: Qos,
        credit: i64,
    ) -> (
        SinkEndpoint<crate::link::test::TestLink>,
        crate::link::test::TestLinkHandle,
        tokio::sync::mpsc::UnboundedSender<Notification>,
        Arc<DashMap<u64, KafkaRecord>>,
        Arc<EndpointContext>,
    ) {
        let context = Arc::new(EndpointContext::new(
            String::from("orders"),
            String::from("g1"),
            qos,
            Filters::default(),
        ));
        let (link, handle) = new_test_link(credit);
        let (notify_tx, notify_rx) = unbounded_channel();
        let staging = Arc::new(DashMap::new());

        let endpoint = SinkEndpoint::new(
            String::from("orders/group.id/g1"),
            Arc::clone(&context),
            link,
            notify_rx,
            Arc::clone(&staging),
            Box::new(DefaultConverter),
        );

        (endpoint, handle, notify_tx, staging, context)
    }

    #[tokio::test]
    async fn happy_path_at_most_once_dispatches_immediately_after_assignment() {
        let (mut endpoint, mut handle, _notify_tx, staging, _ctx) =
            make_endpoint(Qos::AtMostOnce, 10);

        endpoint.on_assigned();

        staging.insert(1, staged_record(0, 5));
        endpoint.on_notification(Notification::Send(DeliveryTag(1))).await;

        match handle.sent_rx.recv().await.unwrap() {
            Sent::Presettled(_) => {}
            other => panic!("expected a presettled send, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn at_least_once_out_of_order_settlement_commits_correctly() {
        let (mut endpoint, _handle, _notify_tx, staging, ctx) =
            make_endpoint(Qos::AtLeastOnce, 10);

        endpoint.on_assigned();

        let offsets = ctx.offsets.as_ref().unwrap();
        for (tag, offset) in [(5u64, 5i64), (6, 6), (7, 7)] {
            let record = staged_record(0, offset);
            offsets.track(DeliveryTag(tag), &record);
            staging.insert(tag, record);
            endpoint.on_notification(Notification::Send(DeliveryTag(tag))).await;
        }

        offsets.delivered(DeliveryTag(6));
        assert!(offsets.commits().is_empty());

        offsets.delivered(DeliveryTag(5));
        assert_eq!(offsets.commits().get(&0), Some(&7));

        offsets.delivered(DeliveryTag(7));
        assert_eq!(offsets.commits().get(&0), Some(&8));
    }

    #[tokio::test]
    async fn credit_exhaustion_queues_and_drain_resumes_in_order() {
        let (mut endpoint, mut handle, _notify_tx, staging, ctx) =
            make_endpoint(Qos::AtMostOnce, 1);
        endpoint.on_assigned();

        staging.insert(1, staged_record(0, 1));
        staging.insert(2, staged_record(0, 2));
        endpoint.on_notification(Notification::Send(DeliveryTag(1))).await;
        endpoint.on_notification(Notification::Send(DeliveryTag(2))).await;

        // first send consumed the single credit; second tag queued pending.
        assert!(ctx.is_send_queue_full());
        handle.sent_rx.recv().await.unwrap();
        assert!(handle.sent_rx.try_recv().is_err());

        endpoint.link.set_credit(2);
        endpoint.drain_pending().await;

        match handle.sent_rx.recv().await.unwrap() {
            Sent::Presettled(_) => {}
            other => panic!("expected the queued send to drain, got {other:?}"),
        }
        assert!(!ctx.is_send_queue_full());
    }

    #[tokio::test]
    async fn remote_detach_closes_and_clears_offsets() {
        let (mut endpoint, _handle, _notify_tx, _staging, ctx) =
            make_endpoint(Qos::AtLeastOnce, 10);
        endpoint.on_assigned();

        ctx.offsets.as_ref().unwrap().track(DeliveryTag(1), &staged_record(0, 1));
        endpoint.on_link_event(LinkEvent::RemoteDetach).await;

        assert_eq!(endpoint.state(), EndpointState::Closed);
        assert!(ctx.offsets.as_ref().unwrap().commits().is_empty());
    }

    #[tokio::test]
    async fn late_settlement_after_close_is_a_no_op() {
        let (mut endpoint, _handle, _notify_tx, _staging, ctx) =
            make_endpoint(Qos::AtLeastOnce, 10);
        endpoint.on_assigned();
        ctx.offsets.as_ref().unwrap().track(DeliveryTag(1), &staged_record(0, 1));

        endpoint.close().await;
        endpoint
            .on_link_event(LinkEvent::Settled { tag: DeliveryTag(1), accepted: true })
            .await;

        assert!(ctx.offsets.as_ref().unwrap().commits().is_empty());
    }

    #[tokio::test]
    async fn worker_error_closes_the_link() {
        let (mut endpoint, _handle, _notify_tx, _staging, _ctx) =
            make_endpoint(Qos::AtMostOnce, 10);
        endpoint.on_assigned();

        endpoint
            .on_error(ErrorCondition::Kafka(String::from("broker down")), String::from("broker down"))
            .await;

        assert_eq!(endpoint.state(), EndpointState::Closed);
    }
}
