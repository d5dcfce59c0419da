use bytes::Bytes;

/// An immutable Kafka record staged for dispatch to the AMQP peer.
///
/// Once placed in the staging map it is never mutated; a new `KafkaRecord`
/// is constructed for every poll result.
#[derive(Clone, Debug)]
pub struct KafkaRecord {
    /// Name of the topic the record was consumed from (normalized Kafka topic name).
    pub topic: String,
    /// Partition number the record was read from.
    pub partition: i32,
    /// Offset of the record within its partition.
    pub offset: i64,
    /// Partition key, if one was set on the record.
    pub key: Option<Bytes>,
    /// Record payload.
    pub value: Bytes,
}
