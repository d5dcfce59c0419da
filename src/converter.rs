//! Message Converter (C2) — turns a staged [`KafkaRecord`] into the AMQP
//! message the link sends, and back-maps converter names from configuration
//! (spec §6, §9). No example repo in the pack speaks AMQP, so the message
//! shape itself (body + annotations) is new; the registry-by-name pattern
//! mirrors how the teacher resolves a value deserializer by name in
//! `app/config.rs`/`main.rs` (`create_value_deserializer`), generalized from
//! a schema-registry lookup to a static match on a handful of known names.

use bytes::Bytes;
use fe2o3_amqp_types::messaging::{
    annotations::OwnedKey, message::Message, AmqpValue, Body, MessageAnnotations, Properties,
};

use crate::error::ConvertError;
use crate::record::KafkaRecord;

/// AMQP annotation key carrying the source partition.
pub const ANNOTATION_PARTITION: &str = "x-opt-bridge.partition";
/// AMQP annotation key carrying the source offset.
pub const ANNOTATION_OFFSET: &str = "x-opt-bridge.offset";
/// AMQP annotation key carrying the record key, if present.
pub const ANNOTATION_KEY: &str = "x-opt-bridge.key";

/// The AMQP message type produced by a converter: a raw-bytes body, which is
/// all any converter in this bridge needs to populate.
pub type AmqpMessage = Message<Body<AmqpValue<Bytes>>>;

/// Converts a [`KafkaRecord`] into the AMQP message transferred to the peer.
///
/// Implementations must be side-effect free and infallible except for
/// payloads that are structurally invalid for the chosen wire shape (spec
/// §7: a conversion failure drops the record and logs, it never tears down
/// the link).
pub trait MessageConverter: Send + Sync {
    fn convert(&self, address: &str, record: &KafkaRecord) -> Result<AmqpMessage, ConvertError>;
}

/// Default converter: body is the raw record value, annotated with the
/// originating partition/offset/key so a consumer can reconstruct Kafka
/// provenance without parsing the payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConverter;

impl MessageConverter for DefaultConverter {
    fn convert(&self, address: &str, record: &KafkaRecord) -> Result<AmqpMessage, ConvertError> {
        let mut annotations = MessageAnnotations::default();
        annotations.insert(
            OwnedKey::from(ANNOTATION_PARTITION),
            (record.partition as i64).into(),
        );
        annotations.insert(OwnedKey::from(ANNOTATION_OFFSET), record.offset.into());
        if let Some(key) = &record.key {
            annotations.insert(OwnedKey::from(ANNOTATION_KEY), Bytes::clone(key).into());
        }

        let properties = Properties {
            to: Some(address.to_string()),
            ..Default::default()
        };

        Ok(Message::builder()
            .properties(properties)
            .message_annotations(annotations)
            .value(record.value.clone())
            .build())
    }
}

/// Resolves a converter by the name given in a link's configuration (spec
/// §9's design note: converter selection is out of the wire protocol, fixed
/// per deployment). Unknown names fall back to [`DefaultConverter`] rather
/// than failing link attach, matching the teacher's tolerant `Defaults`
/// layering in `app/config.rs`.
pub fn converter_by_name(name: &str) -> Box<dyn MessageConverter> {
    match name {
        "default" | "" => Box::new(DefaultConverter),
        _ => Box::new(DefaultConverter),
    }
}
