//! Bridge configuration (spec §4.6, ambient). Grounded on the teacher's
//! `app::config::Config::new`: a `config`-crate builder layering a
//! `Defaults` [`Source`] under environment variables under CLI arguments.
//! The teacher's persisted-profile-file and theme layers have no bridge
//! counterpart and are dropped (see `DESIGN.md`).

use config::{Config as ConfigRs, ConfigError, Environment, Map, Source, Value};
use serde::{Deserialize, Serialize};

/// Environment variable prefix for bridge configuration overrides, e.g.
/// `BRIDGE_BOOTSTRAP_SERVERS`.
const ENV_PREFIX: &str = "BRIDGE";

/// Default AMQP listen address.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5672";

/// Default AMQP container id advertised on every accepted connection.
const DEFAULT_CONTAINER_ID: &str = "amqp-kafka-bridge";

/// Default Kafka `auto.offset.reset` policy for links without an offset
/// filter (spec §3).
const DEFAULT_AUTO_OFFSET_RESET: &str = "latest";

/// Staging-map high-water mark above which a link's worker pauses its
/// assigned partitions (spec §4.3).
const DEFAULT_STAGING_HIGH_WATER_MARK: usize = 1024;

/// Configuration values driving the bridge process (spec §6's
/// `BridgeConfig` collaborator, plus the transport-level fields needed to
/// stand up the acceptor).
#[derive(Debug, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Kafka bootstrap servers the consumer worker connects to.
    pub bootstrap_servers: String,
    /// Address the AMQP acceptor listens on.
    pub listen_addr: String,
    /// AMQP container id advertised on every accepted connection.
    pub container_id: String,
    /// Additional properties merged into every consumer's client config.
    pub consumer_properties: Option<std::collections::HashMap<String, String>>,
    /// Fully-qualified key deserializer class name. A data holder only:
    /// parsing/loading a deserializer by name is an external collaborator's
    /// responsibility, out of scope for this bridge.
    pub key_deserializer_class: Option<String>,
    /// Fully-qualified value deserializer class name; see
    /// `key_deserializer_class`.
    pub value_deserializer_class: Option<String>,
    /// Kafka `auto.offset.reset` policy applied to links without an offset
    /// filter.
    pub auto_offset_reset: String,
    /// Default auto-commit policy. Forced `false` by the worker for any
    /// link negotiating AT_LEAST_ONCE regardless of this value (spec §6).
    pub enable_auto_commit: bool,
    /// Name of the [`crate::converter::MessageConverter`] to use for every
    /// attached link.
    pub message_converter_class: String,
    /// Staging-map size above which a worker pauses its partitions.
    pub staging_high_water_mark: usize,
}

impl BridgeConfig {
    /// Resolves configuration with precedence, highest first:
    ///
    /// 1. CLI arguments
    /// 2. `BRIDGE_*` environment variables
    /// 3. Built-in defaults
    pub fn new<S>(cli_args: S) -> anyhow::Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let config = ConfigRs::builder()
            .add_source(Defaults)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("_"))
            .add_source(cli_args)
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Built-in default values, lowest-precedence source in [`BridgeConfig::new`].
#[derive(Debug)]
struct Defaults;

impl Source for Defaults {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(Defaults)
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let mut cfg = Map::new();
        cfg.insert(
            String::from("listen_addr"),
            Value::from(DEFAULT_LISTEN_ADDR),
        );
        cfg.insert(String::from("container_id"), Value::from(DEFAULT_CONTAINER_ID));
        cfg.insert(
            String::from("auto_offset_reset"),
            Value::from(DEFAULT_AUTO_OFFSET_RESET),
        );
        cfg.insert(String::from("enable_auto_commit"), Value::from(false));
        cfg.insert(String::from("message_converter_class"), Value::from("default"));
        cfg.insert(
            String::from("staging_high_water_mark"),
            Value::from(DEFAULT_STAGING_HIGH_WATER_MARK as i64),
        );
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use config::Map as CfgMap;

    use super::*;

    #[derive(Debug)]
    struct CliArgs(CfgMap<String, Value>);

    impl Source for CliArgs {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new(CliArgs(self.0.clone()))
        }

        fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn defaults_fill_in_when_nothing_else_is_set() {
        let mut cli = CfgMap::new();
        cli.insert(
            String::from("bootstrap_servers"),
            Value::from("localhost:9092"),
        );

        let config = BridgeConfig::new(CliArgs(cli)).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.container_id, DEFAULT_CONTAINER_ID);
        assert_eq!(config.auto_offset_reset, DEFAULT_AUTO_OFFSET_RESET);
        assert!(!config.enable_auto_commit);
        assert_eq!(config.message_converter_class, "default");
        assert_eq!(config.staging_high_water_mark, DEFAULT_STAGING_HIGH_WATER_MARK);
    }

    #[test]
    fn cli_args_override_defaults() {
        let mut cli = CfgMap::new();
        cli.insert(
            String::from("bootstrap_servers"),
            Value::from("localhost:9092"),
        );
        cli.insert(String::from("listen_addr"), Value::from("127.0.0.1:9999"));

        let config = BridgeConfig::new(CliArgs(cli)).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9999");
    }
}
