//! Link address and filter parsing (spec §3, §6, §8).

use std::collections::HashMap;

use crate::error::ErrorCondition;

/// Literal separator between the Kafka topic portion of a link address and
/// the consumer group id.
const GROUP_ID_SEPARATOR: &str = "/group.id/";

/// Parsed link address: a normalized Kafka topic name and a consumer group id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkAddress {
    pub kafka_topic: String,
    pub group_id: String,
}

/// Parses a raw link address of the form `TOPIC/group.id/GROUP`.
///
/// `TOPIC` is normalized for Kafka by replacing `/` with `.`, since a domain
/// address may use `/` as a hierarchy separator where Kafka topic names
/// cannot contain one.
///
/// If the separator occurs more than once in the address, the first
/// occurrence is treated as authoritative; everything before it becomes the
/// topic and everything after becomes the group id (which may itself
/// contain the separator's constituent characters, just not the literal
/// sequence before the first match).
pub fn parse_address(address: &str) -> Result<LinkAddress, ErrorCondition> {
    let idx = address
        .find(GROUP_ID_SEPARATOR)
        .ok_or(ErrorCondition::NoGroupId)?;

    let (topic_part, rest) = address.split_at(idx);
    let group_id = &rest[GROUP_ID_SEPARATOR.len()..];

    if topic_part.is_empty() || group_id.is_empty() {
        return Err(ErrorCondition::NoGroupId);
    }

    Ok(LinkAddress {
        kafka_topic: topic_part.replace('/', "."),
        group_id: group_id.to_string(),
    })
}

/// A single filter-map value as seen by the (transport-agnostic) validation
/// logic. The `fe2o3` adapter is responsible for mapping the wire filter-set
/// entries (`x-opt-bridge.partition-filter`, `x-opt-bridge.offset-filter`)
/// into this shape before calling [`validate_filters`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FilterValue {
    Int(i64),
    Str(String),
}

/// Raw filter entries keyed by filter name (`"partition"` / `"offset"`).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawFilters(pub HashMap<&'static str, FilterValue>);

impl RawFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn partition(partition: i64) -> Self {
        let mut map = HashMap::new();
        map.insert("partition", FilterValue::Int(partition));
        Self(map)
    }

    pub fn partition_offset(partition: i64, offset: i64) -> Self {
        let mut map = HashMap::new();
        map.insert("partition", FilterValue::Int(partition));
        map.insert("offset", FilterValue::Int(offset));
        Self(map)
    }
}

/// Validated filter combination (spec §3): none, partition-only, or
/// partition+offset.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Filters {
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// Validates a raw filter map per the combination rules in spec §3 and §8.
///
/// - No entries: valid, no assignment hint.
/// - `partition` only: valid, manual-assign hint with no seek.
/// - `partition` + `offset`: valid, manual-assign hint with a seek target.
/// - `offset` without `partition`: `no-partition-filter`.
/// - `partition` present with the wrong type: `wrong-partition-filter`.
/// - `offset` present with the wrong type: `wrong-offset-filter`.
/// - `partition` or `offset` present as a negative integer: `wrong-filter`.
pub fn validate_filters(raw: &RawFilters) -> Result<Filters, ErrorCondition> {
    let partition_entry = raw.0.get("partition");
    let offset_entry = raw.0.get("offset");

    match (partition_entry, offset_entry) {
        (None, None) => Ok(Filters::default()),
        (None, Some(_)) => Err(ErrorCondition::NoPartitionFilter),
        (Some(partition_value), maybe_offset) => {
            let partition = match partition_value {
                FilterValue::Int(n) if *n >= 0 => *n as i32,
                FilterValue::Int(_) => return Err(ErrorCondition::WrongFilter),
                FilterValue::Str(_) => return Err(ErrorCondition::WrongPartitionFilter),
            };

            let offset = match maybe_offset {
                None => None,
                Some(FilterValue::Int(n)) if *n >= 0 => Some(*n),
                Some(FilterValue::Int(_)) => return Err(ErrorCondition::WrongFilter),
                Some(FilterValue::Str(_)) => return Err(ErrorCondition::WrongOffsetFilter),
            };

            Ok(Filters {
                partition: Some(partition),
                offset,
            })
        }
    }
}
