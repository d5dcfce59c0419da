//! The control channel carried from the Kafka consumer worker (C3) to the
//! sink endpoint reactor (C4). Generalizes the teacher's `Event`/`AppEvent`
//! split (see `DESIGN.md`) into the tagged variant called for in spec §9's
//! design notes: `Send{tag} | Assigned | Error{symbol, description}`.

use crate::error::ErrorCondition;

/// Unique identifier minted per record to correlate a staging-map entry, a
/// `Notification::Send`, and the eventual AMQP settlement callback.
///
/// `0` is reserved and never minted by [`crate::context::TagSequence`]; it
/// exists only so tests can construct an obviously-invalid tag.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeliveryTag(pub u64);

/// Control messages posted by the worker thread onto the reactor's
/// notification channel. Order is preserved per channel (spec §5).
#[derive(Clone, Debug)]
pub enum Notification {
    /// A record has been staged under `tag` and is ready for dispatch.
    Send(DeliveryTag),
    /// The worker's partition assignment became non-empty.
    Assigned,
    /// An unrecoverable Kafka error occurred; the worker loop has exited.
    Error {
        condition: ErrorCondition,
        description: String,
    },
}
