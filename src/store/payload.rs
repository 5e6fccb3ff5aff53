//! Conversions between JSON payloads and Qdrant types

use super::{FieldMatch, FilterValue, PointFilter, PointKey};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{Condition, Filter, ListValue, PointId, Struct, Value as QdrantValue};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Convert a JSON object into a Qdrant payload map
pub fn json_to_qdrant_payload(map: Map<String, Value>) -> HashMap<String, QdrantValue> {
    map.into_iter()
        .map(|(k, v)| (k, json_to_qdrant_value(v)))
        .collect()
}

/// Convert a serde_json Value to a Qdrant value
pub fn json_to_qdrant_value(v: Value) -> QdrantValue {
    let kind = match v {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => Kind::StringValue(s),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant_value).collect(),
        }),
        Value::Object(fields) => Kind::StructValue(Struct {
            fields: json_to_qdrant_payload(fields),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

/// Convert a Qdrant value to serde_json Value
pub fn json_from_qdrant_value(v: QdrantValue) -> Value {
    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

/// Convert a Qdrant payload map back into a JSON object
pub fn json_from_qdrant_payload(payload: HashMap<String, QdrantValue>) -> Map<String, Value> {
    payload
        .into_iter()
        .map(|(k, v)| (k, json_from_qdrant_value(v)))
        .collect()
}

impl From<&PointKey> for PointId {
    fn from(key: &PointKey) -> Self {
        match key {
            PointKey::Num(n) => PointId::from(*n),
            PointKey::Uuid(u) => PointId::from(u.to_string()),
        }
    }
}

/// Convert PointId to PointKey
pub fn point_id_to_key(id: &PointId) -> Option<PointKey> {
    match &id.point_id_options {
        Some(PointIdOptions::Num(num)) => Some(PointKey::Num(*num)),
        Some(PointIdOptions::Uuid(uuid_str)) => Uuid::try_parse(uuid_str).ok().map(PointKey::Uuid),
        None => None,
    }
}

fn to_condition(cond: &FieldMatch) -> Condition {
    match &cond.value {
        FilterValue::Keyword(s) => Condition::matches(cond.field.as_str(), s.clone()),
        FilterValue::Integer(i) => Condition::matches(cond.field.as_str(), *i),
    }
}

impl PointFilter {
    /// Translate to a Qdrant filter
    pub fn to_qdrant_filter(&self) -> Filter {
        Filter {
            must: self.must.iter().map(to_condition).collect(),
            should: self.should.iter().map(to_condition).collect(),
            must_not: vec![],
            min_should: None,
        }
    }
}
