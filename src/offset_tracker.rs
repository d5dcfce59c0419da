//! Offset Tracker (C1) — per-partition ledger of in-flight and delivered
//! offsets, yielding safe Kafka commit points for AT_LEAST_ONCE links.
//!
//! Grounded on the pack's `rust-kafka-deduplicator` offset tracker: a
//! `DashMap` keyed by partition, thread-safe mutation from any thread, a
//! thiserror error type for the one failure mode that matters to callers.
//! Unlike that reference (which only ever advances monotonically because
//! batches complete in order), this tracker must additionally absorb
//! out-of-order AMQP settlement, so each partition keeps a small gap set of
//! settled offsets that are ahead of the contiguous commit point.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::notification::DeliveryTag;
use crate::record::KafkaRecord;

/// Per-partition ledger state.
#[derive(Debug, Default)]
struct PartitionState {
    /// Next offset this partition is safe to commit (Kafka convention: the
    /// next offset to fetch on restart, i.e. one past the last contiguous
    /// delivered offset). `None` until the first record is tracked.
    next_to_commit: Option<i64>,
    /// Offsets settled out of order, strictly greater than `next_to_commit`.
    settled_above: BTreeSet<i64>,
}

impl PartitionState {
    /// Folds a freshly settled offset into the ledger, advancing
    /// `next_to_commit` through any contiguous run in `settled_above`.
    fn settle(&mut self, offset: i64) {
        let expected = self.next_to_commit.unwrap_or(offset);

        if offset == expected {
            let mut next = offset + 1;
            while self.settled_above.remove(&next) {
                next += 1;
            }
            self.next_to_commit = Some(next);
        } else if offset > expected {
            self.settled_above.insert(offset);
        }
        // offset < expected: already covered by a prior commit point, ignore.
    }
}

/// Thread-safe per-partition commit-point tracker.
///
/// `track`/`delivered`/`clear` may be called from the reactor thread;
/// `commits` is called from the Kafka consumer worker thread. Each
/// partition's state lives behind its own lock (via `DashMap`'s sharded
/// internal locking), so `commits()` observes a consistent per-partition
/// snapshot without a global lock.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: DashMap<i32, PartitionState>,
    /// Maps an in-flight delivery tag to the partition/offset it covers, so
    /// that `delivered(tag)` — which only knows the tag — can find the right
    /// partition ledger. Removed once the tag has been folded in.
    in_flight: Mutex<HashMap<DeliveryTag, (i32, i64)>>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `record.offset` on `record.partition` has been
    /// dispatched under `tag` and is awaiting peer settlement.
    ///
    /// The first record tracked for a partition seeds `next_to_commit` with
    /// its own offset (spec §4.1: "initially the first tracked offset");
    /// later calls for the same partition never touch an already-seeded
    /// `next_to_commit`, only `delivered` advances it.
    pub fn track(&self, tag: DeliveryTag, record: &KafkaRecord) {
        self.partitions
            .entry(record.partition)
            .or_insert_with(|| PartitionState {
                next_to_commit: Some(record.offset),
                settled_above: BTreeSet::new(),
            });

        self.in_flight
            .lock()
            .expect("in_flight lock poisoned")
            .insert(tag, (record.partition, record.offset));
    }

    /// Marks the offset associated with `tag` as peer-settled. Unknown tags
    /// (already cleared, or never tracked — e.g. a duplicate settlement
    /// callback firing after `clear()`) are silently ignored, which is what
    /// makes late settlement callbacks after `close()` safe no-ops.
    pub fn delivered(&self, tag: DeliveryTag) {
        let entry = self
            .in_flight
            .lock()
            .expect("in_flight lock poisoned")
            .remove(&tag);

        let Some((partition, offset)) = entry else {
            return;
        };

        if let Some(mut state) = self.partitions.get_mut(&partition) {
            state.settle(offset);
        }
    }

    /// Returns the offsets safe to commit to Kafka right now, one entry per
    /// partition that has advanced since the last call. May be empty.
    pub fn commits(&self) -> HashMap<i32, i64> {
        self.partitions
            .iter()
            .filter_map(|entry| entry.value().next_to_commit.map(|offset| (*entry.key(), offset)))
            .collect()
    }

    /// Drops all tracked state. Called on link tear-down; any settlement
    /// callback that fires afterward finds its tag absent from `in_flight`
    /// and is a no-op.
    pub fn clear(&self) {
        self.partitions.clear();
        self.in_flight.lock().expect("in_flight lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(partition: i32, offset: i64) -> KafkaRecord {
        KafkaRecord {
            topic: String::from("orders"),
            partition,
            offset,
            key: None,
            value: bytes::Bytes::new(),
        }
    }

    #[test]
    fn commits_are_empty_until_something_is_delivered() {
        let tracker = OffsetTracker::new();
        tracker.track(DeliveryTag(1), &record(0, 10));
        assert!(tracker.commits().is_empty());
    }

    #[test]
    fn in_order_settlement_advances_commit_point() {
        let tracker = OffsetTracker::new();
        tracker.track(DeliveryTag(1), &record(0, 10));
        tracker.delivered(DeliveryTag(1));
        assert_eq!(tracker.commits().get(&0), Some(&11));
    }

    #[test]
    fn out_of_order_settlement_scenario_from_spec() {
        // spec §8 scenario 2: dispatch offsets {5, 6, 7} on partition 0;
        // peer settles in order {6, 5, 7}.
        let tracker = OffsetTracker::new();
        tracker.track(DeliveryTag(5), &record(0, 5));
        tracker.track(DeliveryTag(6), &record(0, 6));
        tracker.track(DeliveryTag(7), &record(0, 7));

        tracker.delivered(DeliveryTag(6));
        assert!(tracker.commits().is_empty());

        tracker.delivered(DeliveryTag(5));
        assert_eq!(tracker.commits().get(&0), Some(&7));

        tracker.delivered(DeliveryTag(7));
        assert_eq!(tracker.commits().get(&0), Some(&8));
    }

    #[test]
    fn unknown_tag_is_a_no_op() {
        let tracker = OffsetTracker::new();
        tracker.delivered(DeliveryTag(999));
        assert!(tracker.commits().is_empty());
    }

    #[test]
    fn clear_drops_all_state_and_late_settlement_is_a_no_op() {
        let tracker = OffsetTracker::new();
        tracker.track(DeliveryTag(1), &record(0, 10));
        tracker.clear();
        tracker.delivered(DeliveryTag(1));
        assert!(tracker.commits().is_empty());
    }

    #[test]
    fn independent_partitions_track_independently() {
        let tracker = OffsetTracker::new();
        tracker.track(DeliveryTag(1), &record(0, 10));
        tracker.track(DeliveryTag(2), &record(1, 20));
        tracker.delivered(DeliveryTag(1));

        let commits = tracker.commits();
        assert_eq!(commits.get(&0), Some(&11));
        assert_eq!(commits.get(&1), None);
    }

    #[test]
    fn commit_point_never_exceeds_one_plus_max_delivered() {
        let tracker = OffsetTracker::new();
        for offset in 0..5 {
            tracker.track(DeliveryTag(offset as u64 + 1), &record(0, offset));
        }
        // settle out of order, skipping 2
        for &tag in &[1u64, 2, 4, 5] {
            tracker.delivered(DeliveryTag(tag));
        }
        // only 0,1 are contiguous; 3,4 (tags 4,5) dangle in the gap set.
        assert_eq!(tracker.commits().get(&0), Some(&2));

        tracker.delivered(DeliveryTag(3));
        assert_eq!(tracker.commits().get(&0), Some(&5));
    }
}
