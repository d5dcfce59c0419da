//! Kafka Consumer Worker (C3) — a dedicated OS thread driving a blocking
//! `BaseConsumer::poll` loop, staging consumed records and posting
//! notifications to the reactor (C4).
//!
//! Grounded on the teacher's `Consumer`/`ConsumerContext` in `kafka.rs`:
//! the same `ClientContext`/`ConsumerContext` rebalance-hook split, the same
//! "force `enable.auto.commit=false`, let the application commit" policy,
//! the same manual `TopicPartitionList` assignment with optional seek. The
//! teacher drives a `StreamConsumer` from async tasks per split partition
//! queue; this worker instead owns one blocking `BaseConsumer` on its own
//! thread; its records just need staging and a notification, not a TUI
//! render, so there's no reactor-side benefit to the stream-splitting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer as RDConsumer, ConsumerContext as RDConsumerContext,
    Rebalance,
};
use rdkafka::message::Message as _;
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use tokio::sync::mpsc::UnboundedSender;

use crate::context::EndpointContext;
use crate::error::ErrorCondition;
use crate::notification::Notification;
use crate::record::KafkaRecord;

/// Poll timeout for the blocking consumer loop; bounds how quickly the loop
/// notices a shutdown request or a staging-map drain.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// rdkafka client context for the worker's consumer: logs through
/// `tracing`, and notifies the reactor exactly once per transition into a
/// non-empty assignment.
struct WorkerContext {
    notify_tx: UnboundedSender<Notification>,
    assigned_notified: AtomicBool,
    context: Arc<EndpointContext>,
}

impl WorkerContext {
    fn new(notify_tx: UnboundedSender<Notification>, context: Arc<EndpointContext>) -> Self {
        Self {
            notify_tx,
            assigned_notified: AtomicBool::new(false),
            context,
        }
    }
}

impl ClientContext for WorkerContext {
    fn log(&self, level: rdkafka::config::RDKafkaLogLevel, fac: &str, log_message: &str) {
        use rdkafka::config::RDKafkaLogLevel;
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => tracing::error!("{} {}", fac, log_message),
            RDKafkaLogLevel::Warning => tracing::warn!("{} {}", fac, log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                tracing::info!("{} {}", fac, log_message)
            }
            RDKafkaLogLevel::Debug => tracing::debug!("{} {}", fac, log_message),
        }
    }
}

impl RDConsumerContext for WorkerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        tracing::debug!("rebalance initiated: {:?}", rebalance);
    }

    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                if !tpl.elements().is_empty()
                    && self
                        .assigned_notified
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    let _ = self.notify_tx.send(Notification::Assigned);
                }
            }
            Rebalance::Revoke(tpl) => {
                tpl.elements().iter().for_each(|e| {
                    tracing::info!("revoked partition {} on {}", e.partition(), e.topic())
                });

                // Spec §4.3: a revoke must synchronously commit whatever is
                // currently safe, since the async periodic commit may not
                // have caught up before these partitions are reassigned.
                if let Some(offsets) = &self.context.offsets {
                    let due = offsets.commits();
                    if !due.is_empty() {
                        let commit_tpl = offsets_to_tpl(&self.context.topic, &due);
                        if let Err(e) = base_consumer.commit(&commit_tpl, CommitMode::Sync) {
                            tracing::error!("error committing consumer offsets on revoke: {}", e);
                        }
                    }
                }
            }
            Rebalance::Error(err) => tracing::error!("error during rebalance: {}", err),
        }
    }

    fn commit_callback(
        &self,
        result: rdkafka::error::KafkaResult<()>,
        offsets: &TopicPartitionList,
    ) {
        match result {
            Ok(()) => {
                if tracing::event_enabled!(tracing::Level::DEBUG) {
                    offsets.elements().iter().for_each(|e| {
                        tracing::debug!(
                            "committed offset {:?} on partition {} in topic {}",
                            e.offset(),
                            e.partition(),
                            e.topic()
                        )
                    });
                }
            }
            Err(e) => tracing::error!("error committing consumer offsets: {}", e),
        }
    }
}

/// Owns the worker thread for one attached link. Dropping or calling
/// [`Worker::shutdown`] stops the poll loop and joins the thread.
pub struct Worker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns the consumer thread for `context`, assigning `context.topic`
    /// per `context.filters` (spec §4.2/§4.3) and staging consumed records
    /// into `staging` under freshly minted delivery tags, notifying
    /// `notify_tx` for each.
    pub fn spawn(
        bootstrap_servers: String,
        context: Arc<EndpointContext>,
        staging: Arc<DashMap<u64, KafkaRecord>>,
        notify_tx: UnboundedSender<Notification>,
        staging_high_water_mark: usize,
        auto_offset_reset: String,
        enable_auto_commit: bool,
    ) -> anyhow::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        // AT_LEAST_ONCE correctness requires the bridge's own offset tracker
        // to gate every commit; the configured default only applies when no
        // such tracker is in play (spec §6).
        let auto_commit = context.offsets.is_none() && enable_auto_commit;

        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &bootstrap_servers);
        client_config.set("group.id", &context.group_id);
        client_config.set("auto.offset.reset", &auto_offset_reset);
        client_config.set("enable.auto.commit", if auto_commit { "true" } else { "false" });

        let worker_context = WorkerContext::new(notify_tx.clone(), Arc::clone(&context));
        let consumer: BaseConsumer<WorkerContext> = client_config
            .create_with_context(worker_context)
            .map_err(|e| anyhow::anyhow!("create Kafka consumer: {e}"))?;

        assign_partitions(&consumer, &context, &notify_tx)?;

        let handle = std::thread::Builder::new()
            .name(format!("kafka-worker-{}", context.topic))
            .spawn(move || {
                worker_loop(
                    consumer,
                    context,
                    staging,
                    notify_tx,
                    thread_shutdown,
                    staging_high_water_mark,
                );
            })
            .map_err(|e| anyhow::anyhow!("spawn Kafka worker thread: {e}"))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signals the worker loop to exit and joins its thread.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn assign_partitions(
    consumer: &BaseConsumer<WorkerContext>,
    context: &EndpointContext,
    notify_tx: &UnboundedSender<Notification>,
) -> anyhow::Result<()> {
    match context.filters.partition {
        None => {
            consumer
                .subscribe(&[context.topic.as_str()])
                .map_err(|e| anyhow::anyhow!("subscribe to topic: {e}"))?;
        }
        Some(partition) => {
            let mut tpl = TopicPartitionList::with_capacity(1);
            match context.filters.offset {
                Some(offset) => {
                    tpl.add_partition_offset(&context.topic, partition, Offset::Offset(offset))
                        .map_err(|e| anyhow::anyhow!("add partition offset: {e}"))?;
                }
                None => {
                    tpl.add_partition(&context.topic, partition);
                }
            }
            consumer
                .assign(&tpl)
                .map_err(|e| anyhow::anyhow!("assign partition: {e}"))?;

            // Manual assignment bypasses the consumer-group rebalance callback that
            // would otherwise fire `Notification::Assigned`; post it directly.
            let _ = notify_tx.send(Notification::Assigned);
        }
    }
    Ok(())
}

/// Converts the offsets due for commit into a [`TopicPartitionList`] for a
/// single topic, matching the older rdkafka `offset_map_to_tpl` helper
/// pattern (commit one next-offset-to-fetch value per partition).
fn offsets_to_tpl(topic: &str, offsets: &HashMap<i32, i64>) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::with_capacity(offsets.len());
    for (&partition, &offset) in offsets {
        let _ = tpl.add_partition_offset(topic, partition, Offset::Offset(offset));
    }
    tpl
}

fn worker_loop(
    consumer: BaseConsumer<WorkerContext>,
    context: Arc<EndpointContext>,
    staging: Arc<DashMap<u64, KafkaRecord>>,
    notify_tx: UnboundedSender<Notification>,
    shutdown: Arc<AtomicBool>,
    staging_high_water_mark: usize,
) {
    let mut paused = false;

    while !shutdown.load(Ordering::Acquire) {
        if context.is_send_queue_full() || staging.len() >= staging_high_water_mark {
            if !paused {
                if let Ok(assignment) = consumer.assignment() {
                    let _ = consumer.pause(&assignment);
                }
                paused = true;
            }
        } else if paused {
            if let Ok(assignment) = consumer.assignment() {
                let _ = consumer.resume(&assignment);
            }
            paused = false;
        }

        match consumer.poll(POLL_TIMEOUT) {
            None => {}
            Some(Ok(message)) => {
                let record = KafkaRecord {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message.key().map(|k| bytes::Bytes::copy_from_slice(k)),
                    value: bytes::Bytes::copy_from_slice(message.payload().unwrap_or(&[])),
                };

                let tag = context.tags.next();
                if let Some(offsets) = &context.offsets {
                    offsets.track(tag, &record);
                }
                staging.insert(tag.0, record);

                if notify_tx.send(Notification::Send(tag)).is_err() {
                    // Reactor side has dropped; nothing left to serve.
                    break;
                }
            }
            Some(Err(e)) => {
                let fatal = consumer
                    .client()
                    .fatal_error()
                    .map(|(_, reason)| reason)
                    .unwrap_or_else(|| e.to_string());

                tracing::error!("Kafka consumer error: {}", e);

                if consumer.client().fatal_error().is_some() {
                    let _ = notify_tx.send(Notification::Error {
                        condition: ErrorCondition::Kafka(fatal),
                        description: e.to_string(),
                    });
                    break;
                }
            }
        }

        if let Some(offsets) = &context.offsets {
            let due = offsets.commits();
            if !due.is_empty() {
                let tpl = offsets_to_tpl(&context.topic, &due);
                if let Err(e) = consumer.commit(&tpl, rdkafka::consumer::CommitMode::Async) {
                    tracing::error!("error committing consumer offsets: {}", e);
                }
            }
        }
    }
}
