mod address;
mod config;
mod context;
mod converter;
mod endpoint;
mod error;
mod link;
mod notification;
mod offset_tracker;
mod qos;
mod record;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use ::config::{ConfigError, Map, Source, Value};
use dashmap::DashMap;
use fe2o3_amqp::acceptor::{ConnectionAcceptor, LinkEndpoint, ListenerConnectionHandle, SessionAcceptor};
use fe2o3_amqp::Sender;
use fe2o3_amqp_types::definitions::SenderSettleMode;
use fe2o3_amqp_types::messaging::Source as AmqpSource;
use fe2o3_amqp_types::primitives::{Symbol, Value as AmqpValue};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use crate::address::{parse_address, validate_filters, FilterValue, RawFilters};
use crate::config::BridgeConfig;
use crate::context::EndpointContext;
use crate::converter::converter_by_name;
use crate::endpoint::SinkEndpoint;
use crate::error::ErrorCondition;
use crate::link::fe2o3::Fe2o3SinkLink;
use crate::link::SinkLink;
use crate::notification::Notification;
use crate::qos::Qos;
use crate::worker::Worker;

/// Link-address filter-set symbols (spec §6).
const PARTITION_FILTER_SYMBOL: &str = "x-opt-bridge.partition-filter";
const OFFSET_FILTER_SYMBOL: &str = "x-opt-bridge.offset-filter";

/// A headless AMQP 1.0 sender-facing bridge backed by a Kafka topic.
#[derive(Clone, Debug, Default, Parser)]
#[command()]
struct Cli {
    /// Kafka bootstrap servers the worker connects to.
    #[arg(short, long)]
    bootstrap_servers: Option<String>,
    /// Address the AMQP acceptor listens on, e.g. `0.0.0.0:5672`.
    #[arg(short, long)]
    listen_addr: Option<String>,
    /// AMQP container id the acceptor advertises on every connection.
    #[arg(long)]
    container_id: Option<String>,
    /// Name of the message converter applied to every attached link.
    #[arg(long)]
    converter: Option<String>,
    /// Fully-qualified key deserializer class name (data holder; parsing is
    /// an external collaborator's responsibility).
    #[arg(long)]
    key_deserializer_class: Option<String>,
    /// Fully-qualified value deserializer class name (data holder; parsing
    /// is an external collaborator's responsibility).
    #[arg(long)]
    value_deserializer_class: Option<String>,
    /// Kafka `auto.offset.reset` policy for links without an offset filter.
    #[arg(long)]
    auto_offset_reset: Option<String>,
    /// Default auto-commit policy; forced `false` regardless for any link
    /// negotiating AT_LEAST_ONCE (spec §6).
    #[arg(long)]
    enable_auto_commit: Option<bool>,
    /// Staging-map size above which a worker pauses its assigned partitions.
    #[arg(long)]
    staging_high_water_mark: Option<usize>,
}

impl Source for Cli {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let mut cfg = Map::new();

        if let Some(servers) = self.bootstrap_servers.as_ref() {
            cfg.insert(String::from("bootstrap_servers"), Value::from(servers.clone()));
        }
        if let Some(addr) = self.listen_addr.as_ref() {
            cfg.insert(String::from("listen_addr"), Value::from(addr.clone()));
        }
        if let Some(container_id) = self.container_id.as_ref() {
            cfg.insert(String::from("container_id"), Value::from(container_id.clone()));
        }
        if let Some(converter) = self.converter.as_ref() {
            cfg.insert(
                String::from("message_converter_class"),
                Value::from(converter.clone()),
            );
        }
        if let Some(class) = self.key_deserializer_class.as_ref() {
            cfg.insert(String::from("key_deserializer_class"), Value::from(class.clone()));
        }
        if let Some(class) = self.value_deserializer_class.as_ref() {
            cfg.insert(String::from("value_deserializer_class"), Value::from(class.clone()));
        }
        if let Some(policy) = self.auto_offset_reset.as_ref() {
            cfg.insert(String::from("auto_offset_reset"), Value::from(policy.clone()));
        }
        if let Some(enabled) = self.enable_auto_commit {
            cfg.insert(String::from("enable_auto_commit"), Value::from(enabled));
        }
        if let Some(mark) = self.staging_high_water_mark {
            cfg.insert(
                String::from("staging_high_water_mark"),
                Value::from(mark as i64),
            );
        }

        Ok(cfg)
    }
}

fn init_tracing() {
    let dot_env_result = dotenvy::dotenv();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    Registry::default()
        .with(tracing_subscriber::fmt::Layer::default())
        .with(filter)
        .init();

    match dot_env_result {
        Ok(path) => tracing::info!(".env file loaded from {}", path.display()),
        Err(dotenvy::Error::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("no .env file found")
        }
        Err(e) => tracing::warn!("failed to load .env file: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = BridgeConfig::new(Cli::parse())?;
    run_acceptor(Arc::new(config)).await
}

/// Accepts inbound AMQP connections and, for each sender-requesting link the
/// peer attaches, validates the address/filters and spins up a worker +
/// reactor pair for it (spec §4.1-§4.4).
async fn run_acceptor(config: Arc<BridgeConfig>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("listening for AMQP connections on {}", config.listen_addr);

    let connection_acceptor = ConnectionAcceptor::new(config.container_id.clone());

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        tracing::debug!("accepted connection from {}", peer_addr);

        let config = Arc::clone(&config);
        let mut connection = match connection_acceptor.accept(stream).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!("failed to accept AMQP connection: {:?}", e);
                continue;
            }
        };

        tokio::spawn(async move {
            if let Err(e) = handle_connection(&mut connection, config).await {
                tracing::warn!("connection handler exited: {:?}", e);
            }
        });
    }
}

async fn handle_connection(
    connection: &mut ListenerConnectionHandle,
    config: Arc<BridgeConfig>,
) -> anyhow::Result<()> {
    let session_acceptor = SessionAcceptor::new();

    while let Ok(mut session) = session_acceptor.accept(connection).await {
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            while let Ok(endpoint) = session.next_link().await {
                if let LinkEndpoint::Sender(sender_acceptor) = endpoint {
                    let config = Arc::clone(&config);
                    tokio::spawn(async move {
                        if let Err(e) = attach_link(sender_acceptor, config).await {
                            tracing::warn!("link handler exited: {:?}", e);
                        }
                    });
                }
            }
        });
    }

    Ok(())
}

/// Validates an incoming sender-link attach and, on success, wires up the
/// worker/reactor pair for it; on failure, rejects with the appropriate
/// AMQP error condition (spec §4.1).
async fn attach_link(
    sender_acceptor: fe2o3_amqp::acceptor::link::SenderAcceptor,
    config: Arc<BridgeConfig>,
) -> anyhow::Result<()> {
    let (address, sender) = sender_acceptor.accept_with_address().await?;

    let parsed = match parse_address(&address) {
        Ok(parsed) => parsed,
        Err(condition) => return reject(sender, condition).await,
    };

    let raw_filters = raw_filters_from_source(sender.source());
    let filters = match validate_filters(&raw_filters) {
        Ok(filters) => filters,
        Err(condition) => return reject(sender, condition).await,
    };

    let qos = qos_from_settle_mode(sender.snd_settle_mode());

    let context = Arc::new(EndpointContext::new(
        parsed.kafka_topic,
        parsed.group_id,
        qos,
        filters,
    ));

    let staging = Arc::new(DashMap::new());
    let (notify_tx, notify_rx) = tokio::sync::mpsc::unbounded_channel::<Notification>();

    let mut worker = Worker::spawn(
        config.bootstrap_servers.clone(),
        Arc::clone(&context),
        Arc::clone(&staging),
        notify_tx,
        config.staging_high_water_mark,
        config.auto_offset_reset.clone(),
        config.enable_auto_commit,
    )?;

    let converter = converter_by_name(&config.message_converter_class);
    let link = Fe2o3SinkLink::new(sender, 0);
    let mut sink = SinkEndpoint::new(address, context, link, notify_rx, staging, converter);

    sink.run().await;
    worker.shutdown();
    Ok(())
}

/// Maps the AMQP source filter-set entries `x-opt-bridge.partition-filter`
/// and `x-opt-bridge.offset-filter` (spec §6) into the transport-agnostic
/// shape [`crate::address::validate_filters`] checks.
fn raw_filters_from_source(source: Option<&AmqpSource>) -> RawFilters {
    let mut map = HashMap::new();

    if let Some(filter_set) = source.and_then(|s| s.filter.as_ref()) {
        if let Some(value) = filter_set.get(&Symbol::from(PARTITION_FILTER_SYMBOL)) {
            map.insert("partition", filter_value_from_amqp(value));
        }
        if let Some(value) = filter_set.get(&Symbol::from(OFFSET_FILTER_SYMBOL)) {
            map.insert("offset", filter_value_from_amqp(value));
        }
    }

    RawFilters(map)
}

fn filter_value_from_amqp(value: &AmqpValue) -> FilterValue {
    match value {
        AmqpValue::Int(n) => FilterValue::Int(*n as i64),
        AmqpValue::Long(n) => FilterValue::Int(*n),
        AmqpValue::Uint(n) => FilterValue::Int(*n as i64),
        AmqpValue::Ulong(n) => FilterValue::Int(*n as i64),
        AmqpValue::String(s) => FilterValue::Str(s.clone()),
        other => FilterValue::Str(format!("{other:?}")),
    }
}

/// AT_MOST_ONCE iff the peer negotiated a fully pre-settled sender
/// (spec §3/§6); `Mixed` and `Unsettled` both require awaiting settlement.
fn qos_from_settle_mode(mode: SenderSettleMode) -> Qos {
    match mode {
        SenderSettleMode::Settled => Qos::AtMostOnce,
        SenderSettleMode::Unsettled | SenderSettleMode::Mixed => Qos::AtLeastOnce,
    }
}

async fn reject(sender: Sender, condition: ErrorCondition) -> anyhow::Result<()> {
    let description = condition.to_string();
    let mut link = Fe2o3SinkLink::new(sender, 0);
    if let Err(e) = link.reject(condition.symbol(), &description).await {
        tracing::warn!("error rejecting link attach: {:?}", e);
    }
    Ok(())
}
