//! Error types shared across the bridge. Kept small and split by seam rather
//! than one grab-bag enum: the address/filter seam, the converter seam, and
//! the transport seam each fail in their own way and are handled
//! differently by the endpoint (see `endpoint.rs`).

use thiserror::Error;

/// The five AMQP error conditions the bridge can signal on link rejection,
/// plus a catch-all for a fatal Kafka error surfaced mid-flight. The exact
/// symbol strings are part of the wire contract with clients (spec §6) and
/// must not change independently of that contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorCondition {
    /// Link address did not contain the `/group.id/` separator.
    NoGroupId,
    /// `partition` filter entry was present but not an integer.
    WrongPartitionFilter,
    /// `offset` filter entry was present but not an integer.
    WrongOffsetFilter,
    /// `offset` filter entry was present without a `partition` entry.
    NoPartitionFilter,
    /// Filter combination or value was invalid in some other way (e.g. a
    /// negative partition or offset).
    WrongFilter,
    /// A fatal Kafka client error was posted by the consumer worker.
    Kafka(String),
}

impl ErrorCondition {
    /// The AMQP error condition symbol string for this condition.
    pub fn symbol(&self) -> &str {
        match self {
            Self::NoGroupId => "no-group-id",
            Self::WrongPartitionFilter => "wrong-partition-filter",
            Self::WrongOffsetFilter => "wrong-offset-filter",
            Self::NoPartitionFilter => "no-partition-filter",
            Self::WrongFilter => "wrong-filter",
            Self::Kafka(_) => "kafka-error",
        }
    }
}

impl std::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kafka(description) => write!(f, "{}: {}", self.symbol(), description),
            other => f.write_str(other.symbol()),
        }
    }
}

/// Returned by a [`crate::converter::MessageConverter`] when a record cannot
/// be converted. Per spec §7 this is a drop-and-log condition, never a fatal
/// one; the offset is simply left untracked.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("record value is not valid for this converter: {0}")]
    InvalidPayload(String),
}

/// Returned by [`crate::link::SinkLink`] operations. A transport error never
/// panics the reactor; the endpoint logs it and proceeds toward `CLOSING`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link is not open")]
    NotOpen,
    #[error("delivery was not accepted by the peer: {0}")]
    NotAccepted(String),
    #[error("transport error: {0}")]
    Other(String),
}
