//! Tagged encoding for checkpoint payloads.
//!
//! Plain JSON has no notion of timestamps, sets, tuples or typed objects.
//! [`CheckpointValue`] models them explicitly and encodes the non-JSON kinds
//! as `{"_type": ..., "_value": ...}`. Maps that happen to contain a `_type`
//! key are escaped as `{"_type": "map", "_value": {...}}`, so decoding is
//! unambiguous and encode -> decode -> encode is stable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

pub const TYPE_KEY: &str = "_type";
pub const VALUE_KEY: &str = "_value";
pub const CLASS_KEY: &str = "_class";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown tag '{0}'")]
    UnknownTag(String),

    #[error("malformed '{tag}' value: {message}")]
    Malformed { tag: String, message: String },
}

/// A checkpointable value.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<CheckpointValue>),
    Tuple(Vec<CheckpointValue>),
    /// Unique members in insertion order.
    Set(Vec<CheckpointValue>),
    DateTime(DateTime<Utc>),
    Map(BTreeMap<String, CheckpointValue>),
    /// A typed object graph: class name plus named fields.
    Object {
        class: String,
        fields: BTreeMap<String, CheckpointValue>,
    },
}

impl CheckpointValue {
    /// Build a set, dropping duplicate members.
    pub fn set(items: impl IntoIterator<Item = CheckpointValue>) -> Self {
        let mut members: Vec<CheckpointValue> = Vec::new();
        for item in items {
            if !members.contains(&item) {
                members.push(item);
            }
        }
        CheckpointValue::Set(members)
    }

    /// Lift plain JSON. No tag detection happens here.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => CheckpointValue::Null,
            Value::Bool(b) => CheckpointValue::Bool(*b),
            Value::Number(n) => CheckpointValue::Number(n.clone()),
            Value::String(s) => CheckpointValue::String(s.clone()),
            Value::Array(items) => CheckpointValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => CheckpointValue::Map(
                map.iter().map(|(k, v)| (k.clone(), Self::from_json(v))).collect(),
            ),
        }
    }

    /// Lower to plain JSON: timestamps become RFC 3339 strings, sets and
    /// tuples become arrays, objects become their field maps.
    pub fn to_json(&self) -> Value {
        match self {
            CheckpointValue::Null => Value::Null,
            CheckpointValue::Bool(b) => Value::Bool(*b),
            CheckpointValue::Number(n) => Value::Number(n.clone()),
            CheckpointValue::String(s) => Value::String(s.clone()),
            CheckpointValue::List(items) | CheckpointValue::Tuple(items) | CheckpointValue::Set(items) => {
                Value::Array(items.iter().map(Self::to_json).collect())
            }
            CheckpointValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            CheckpointValue::Map(fields) | CheckpointValue::Object { fields, .. } => Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Encode into the tagged wire form.
pub fn encode(value: &CheckpointValue) -> Value {
    match value {
        CheckpointValue::Null => Value::Null,
        CheckpointValue::Bool(b) => Value::Bool(*b),
        CheckpointValue::Number(n) => Value::Number(n.clone()),
        CheckpointValue::String(s) => Value::String(s.clone()),
        CheckpointValue::List(items) => Value::Array(items.iter().map(encode).collect()),
        CheckpointValue::Tuple(items) => tagged("tuple", Value::Array(items.iter().map(encode).collect())),
        CheckpointValue::Set(items) => tagged("set", Value::Array(items.iter().map(encode).collect())),
        CheckpointValue::DateTime(dt) => tagged("datetime", Value::String(dt.to_rfc3339())),
        CheckpointValue::Map(fields) => {
            let encoded = encode_fields(fields);
            if fields.contains_key(TYPE_KEY) {
                tagged("map", Value::Object(encoded))
            } else {
                Value::Object(encoded)
            }
        }
        CheckpointValue::Object { class, fields } => {
            let mut obj = Map::new();
            obj.insert(TYPE_KEY.to_string(), Value::String("object".to_string()));
            obj.insert(CLASS_KEY.to_string(), Value::String(class.clone()));
            obj.insert(VALUE_KEY.to_string(), Value::Object(encode_fields(fields)));
            Value::Object(obj)
        }
    }
}

/// Decode the tagged wire form.
pub fn decode(value: &Value) -> Result<CheckpointValue, CodecError> {
    match value {
        Value::Null => Ok(CheckpointValue::Null),
        Value::Bool(b) => Ok(CheckpointValue::Bool(*b)),
        Value::Number(n) => Ok(CheckpointValue::Number(n.clone())),
        Value::String(s) => Ok(CheckpointValue::String(s.clone())),
        Value::Array(items) => Ok(CheckpointValue::List(
            items.iter().map(decode).collect::<Result<_, _>>()?,
        )),
        Value::Object(obj) => match obj.get(TYPE_KEY) {
            None => Ok(CheckpointValue::Map(decode_fields(obj)?)),
            Some(Value::String(tag)) => decode_tagged(tag, obj),
            Some(other) => Err(CodecError::Malformed {
                tag: other.to_string(),
                message: "tag must be a string".to_string(),
            }),
        },
    }
}

fn decode_tagged(tag: &str, obj: &Map<String, Value>) -> Result<CheckpointValue, CodecError> {
    let malformed = |message: &str| CodecError::Malformed {
        tag: tag.to_string(),
        message: message.to_string(),
    };
    let inner = obj.get(VALUE_KEY).ok_or_else(|| malformed("missing _value"))?;

    match tag {
        "datetime" => {
            let raw = inner.as_str().ok_or_else(|| malformed("expected a string"))?;
            let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| malformed(&e.to_string()))?;
            Ok(CheckpointValue::DateTime(parsed.with_timezone(&Utc)))
        }
        "tuple" | "set" => {
            let items = inner
                .as_array()
                .ok_or_else(|| malformed("expected an array"))?
                .iter()
                .map(decode)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if tag == "set" {
                CheckpointValue::set(items)
            } else {
                CheckpointValue::Tuple(items)
            })
        }
        "map" => {
            let fields = inner.as_object().ok_or_else(|| malformed("expected an object"))?;
            Ok(CheckpointValue::Map(decode_fields(fields)?))
        }
        "object" => {
            let class = obj
                .get(CLASS_KEY)
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing _class"))?;
            let fields = inner.as_object().ok_or_else(|| malformed("expected an object"))?;
            Ok(CheckpointValue::Object {
                class: class.to_string(),
                fields: decode_fields(fields)?,
            })
        }
        other => Err(CodecError::UnknownTag(other.to_string())),
    }
}

fn tagged(tag: &str, value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert(TYPE_KEY.to_string(), Value::String(tag.to_string()));
    obj.insert(VALUE_KEY.to_string(), value);
    Value::Object(obj)
}

fn encode_fields(fields: &BTreeMap<String, CheckpointValue>) -> Map<String, Value> {
    fields.iter().map(|(k, v)| (k.clone(), encode(v))).collect()
}

fn decode_fields(fields: &Map<String, Value>) -> Result<BTreeMap<String, CheckpointValue>, CodecError> {
    fields
        .iter()
        .map(|(k, v)| decode(v).map(|decoded| (k.clone(), decoded)))
        .collect()
}
