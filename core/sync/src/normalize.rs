//! Coercion of stored payloads into the canonical envelope.
//!
//! Documents written by older clients come in several shapes: a bare array
//! of blocks, an object with an ISO-8601 `updatedAt`, or nothing at all. The
//! shape is sniffed once here; everything downstream works on [`Envelope`].

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::envelope::{Block, Envelope, ModeOrders};

/// Stored payload, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Missing, null, or a scalar.
    Absent,
    /// Legacy bare sequence of blocks.
    Legacy(Vec<Value>),
    /// Object-shaped document, possibly with missing fields.
    Document(Map<String, Value>),
}

impl RawPayload {
    /// Classify a raw stored value.
    pub fn classify(raw: Option<Value>) -> Self {
        match raw {
            Some(Value::Array(items)) => RawPayload::Legacy(items),
            Some(Value::Object(fields)) => RawPayload::Document(fields),
            _ => RawPayload::Absent,
        }
    }
}

/// Normalize any stored value into an envelope. Never fails.
pub fn normalize(raw: Option<Value>, fallback_timestamp: i64) -> Envelope {
    normalize_payload(RawPayload::classify(raw), fallback_timestamp)
}

/// Normalize an already classified payload.
pub fn normalize_payload(payload: RawPayload, fallback_timestamp: i64) -> Envelope {
    match payload {
        RawPayload::Absent => Envelope::empty(fallback_timestamp),
        RawPayload::Legacy(items) => Envelope {
            blocks: blocks_from(items),
            ..Envelope::empty(fallback_timestamp)
        },
        RawPayload::Document(mut fields) => {
            let blocks = match fields.remove("blocks") {
                Some(Value::Array(items)) => blocks_from(items),
                _ => Vec::new(),
            };
            let mode_orders = match fields.remove("modeOrders") {
                Some(Value::Object(orders)) => mode_orders_from(orders),
                _ => ModeOrders::new(),
            };
            let updated_at = fields
                .get("updatedAt")
                .and_then(timestamp_from_value)
                .unwrap_or(fallback_timestamp);

            Envelope {
                version: fields
                    .get("version")
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok()),
                blocks,
                mode_orders,
                updated_at,
                size_bytes: fields.get("sizeBytes").and_then(Value::as_u64),
            }
        }
    }
}

/// Read an epoch-millis timestamp from a stored value.
///
/// Accepts integers, finite floats, and RFC 3339 strings (older remote saves
/// stored ISO dates).
pub fn timestamp_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.round() as i64)
        }),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

fn blocks_from(items: Vec<Value>) -> Vec<Block> {
    items.into_iter().filter_map(Block::from_value).collect()
}

fn mode_orders_from(orders: Map<String, Value>) -> ModeOrders {
    orders
        .into_iter()
        .filter_map(|(mode, ids)| match ids {
            Value::Array(ids) => {
                let ids = ids
                    .into_iter()
                    .filter_map(|id| match id {
                        Value::String(id) => Some(id),
                        Value::Number(id) => Some(id.to_string()),
                        _ => None,
                    })
                    .collect();
                Some((mode, ids))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_array_is_wrapped() {
        let envelope = normalize(Some(json!([{"id": "a"}, 3, {"id": "b"}])), 42);

        assert_eq!(envelope.blocks.len(), 2);
        assert!(envelope.mode_orders.is_empty());
        assert_eq!(envelope.updated_at, 42);
    }

    #[test]
    fn test_absent_and_scalars_yield_empty() {
        for raw in [None, Some(Value::Null), Some(json!("text")), Some(json!(7))] {
            let envelope = normalize(raw, 9);
            assert!(envelope.blocks.is_empty());
            assert!(envelope.mode_orders.is_empty());
            assert_eq!(envelope.updated_at, 9);
        }
    }

    #[test]
    fn test_document_passes_through() {
        let envelope = normalize(
            Some(json!({
                "version": 1,
                "blocks": [{"id": "a"}],
                "modeOrders": {"default": ["a", 2, null], "bad": "x"},
                "updatedAt": 1500,
                "sizeBytes": 12
            })),
            0,
        );

        assert_eq!(envelope.version, Some(1));
        assert_eq!(envelope.blocks[0].id(), Some("a".to_string()));
        assert_eq!(envelope.mode_orders["default"], vec!["a", "2"]);
        assert!(!envelope.mode_orders.contains_key("bad"));
        assert_eq!(envelope.updated_at, 1500);
        assert_eq!(envelope.size_bytes, Some(12));
    }

    #[test]
    fn test_missing_or_malformed_fields_default() {
        let envelope = normalize(Some(json!({"blocks": "nope", "updatedAt": "yesterday"})), 77);
        assert!(envelope.blocks.is_empty());
        assert!(envelope.mode_orders.is_empty());
        assert_eq!(envelope.updated_at, 77);
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(timestamp_from_value(&json!(1000)), Some(1000));
        assert_eq!(timestamp_from_value(&json!(1000.6)), Some(1001));
        assert_eq!(
            timestamp_from_value(&json!("1970-01-01T00:00:01.500Z")),
            Some(1500)
        );
        assert_eq!(timestamp_from_value(&json!(true)), None);
        assert_eq!(timestamp_from_value(&json!(1e300)), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(RawPayload::classify(None), RawPayload::Absent);
        assert!(matches!(RawPayload::classify(Some(json!([]))), RawPayload::Legacy(_)));
        assert!(matches!(RawPayload::classify(Some(json!({}))), RawPayload::Document(_)));
    }
}
