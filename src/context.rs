//! Endpoint Context (C5) — the state shared between the reactor (C4) and the
//! Kafka consumer worker (C3) for a single attached link: addressing, QoS,
//! filters, the offset tracker, the delivery-tag sequence, and the
//! backpressure flag the worker reads before staging more records.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::address::Filters;
use crate::notification::DeliveryTag;
use crate::offset_tracker::OffsetTracker;
use crate::qos::Qos;

/// Mints strictly increasing, never-zero delivery tags for a single link.
///
/// Kept as its own small type (rather than a bare `AtomicU64` field) because
/// tag `0` is reserved: [`DeliveryTag(0)`] exists only so tests can build an
/// obviously-invalid tag, and this is the one place that invariant must hold.
#[derive(Debug, Default)]
pub struct TagSequence(AtomicU64);

impl TagSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Returns the next tag, starting at 1.
    pub fn next(&self) -> DeliveryTag {
        DeliveryTag(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Shared state for one attached sink link, handed to both the worker
/// thread and the reactor task as an `Arc<EndpointContext>`.
#[derive(Debug)]
pub struct EndpointContext {
    /// Normalized Kafka topic name.
    pub topic: String,
    /// Consumer group id.
    pub group_id: String,
    /// Negotiated delivery quality.
    pub qos: Qos,
    /// Validated partition/offset filters from link attachment.
    pub filters: Filters,
    /// Per-partition commit-point ledger. `None` under AT_MOST_ONCE, where
    /// nothing is ever tracked or committed against settlement.
    pub offsets: Option<Arc<OffsetTracker>>,
    /// Delivery tag minter for this link.
    pub tags: TagSequence,
    /// Set by the reactor when the link runs out of send credit; read by the
    /// worker before staging further records (spec §4.3's upstream
    /// backpressure coupling).
    pub send_queue_full: AtomicBool,
}

impl EndpointContext {
    pub fn new(topic: String, group_id: String, qos: Qos, filters: Filters) -> Self {
        let offsets = match qos {
            Qos::AtLeastOnce => Some(Arc::new(OffsetTracker::new())),
            Qos::AtMostOnce => None,
        };

        Self {
            topic,
            group_id,
            qos,
            filters,
            offsets,
            tags: TagSequence::new(),
            send_queue_full: AtomicBool::new(false),
        }
    }

    pub fn is_send_queue_full(&self) -> bool {
        self.send_queue_full.load(Ordering::Acquire)
    }

    pub fn set_send_queue_full(&self, full: bool) {
        self.send_queue_full.store(full, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_sequence_starts_at_one_and_never_repeats() {
        let tags = TagSequence::new();
        assert_eq!(tags.next(), DeliveryTag(1));
        assert_eq!(tags.next(), DeliveryTag(2));
        assert_eq!(tags.next(), DeliveryTag(3));
    }

    #[test]
    fn at_most_once_context_has_no_offset_tracker() {
        let ctx = EndpointContext::new(
            String::from("orders"),
            String::from("g1"),
            Qos::AtMostOnce,
            Filters::default(),
        );
        assert!(ctx.offsets.is_none());
    }

    #[test]
    fn at_least_once_context_has_an_offset_tracker() {
        let ctx = EndpointContext::new(
            String::from("orders"),
            String::from("g1"),
            Qos::AtLeastOnce,
            Filters::default(),
        );
        assert!(ctx.offsets.is_some());
    }

    #[test]
    fn send_queue_full_flag_round_trips() {
        let ctx = EndpointContext::new(
            String::from("orders"),
            String::from("g1"),
            Qos::AtMostOnce,
            Filters::default(),
        );
        assert!(!ctx.is_send_queue_full());
        ctx.set_send_queue_full(true);
        assert!(ctx.is_send_queue_full());
    }
}
