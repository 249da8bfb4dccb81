#![forbid(unsafe_code)]

//! JSON encoding of raw mappings (feature `serde`).
//!
//! The store never persists anything itself; this module only gives
//! persistence and logging layers a lossless way to snapshot
//! [`ReactiveNode::raw`] and to rebuild a mapping from a snapshot.
//!
//! | JSON | Store |
//! |------|-------|
//! | object | [`Mapping`] |
//! | bool / string | `Bool` / `Str` |
//! | integer in `i64` range | `Int` |
//! | other number | `Float` |
//! | `null` field | key absent |
//! | array | rejected ([`JsonError::Array`]) |

use std::fmt;

use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::node::ReactiveNode;
use crate::value::{Mapping, Value};

/// Errors converting JSON into a [`Mapping`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonError {
    /// The document root is not an object.
    NotAnObject,
    /// Arrays have no mapping representation.
    Array { path: String },
    /// A number representable neither as `i64` nor as `f64`.
    Number { path: String },
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "JSON root must be an object"),
            Self::Array { path } => write!(f, "unsupported array at {path}"),
            Self::Number { path } => write!(f, "unrepresentable number at {path}"),
        }
    }
}

impl std::error::Error for JsonError {}

impl Mapping {
    /// Snapshot as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Json {
        Json::Object(self.with(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect()
        }))
    }

    /// Build a fresh mapping tree from a JSON object.
    ///
    /// # Errors
    ///
    /// See [`JsonError`].
    pub fn from_json(json: &Json) -> Result<Self, JsonError> {
        match json {
            Json::Object(object) => object_to_mapping(object, "$"),
            _ => Err(JsonError::NotAnObject),
        }
    }
}

fn object_to_mapping(object: &JsonMap<String, Json>, path: &str) -> Result<Mapping, JsonError> {
    let mapping = Mapping::new();
    for (key, json) in object {
        let child_path = format!("{path}.{key}");
        let value = match json {
            Json::Null => continue,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => number_to_value(n, child_path)?,
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(_) => return Err(JsonError::Array { path: child_path }),
            Json::Object(inner) => Value::Map(object_to_mapping(inner, &child_path)?),
        };
        mapping.insert(key.clone(), value);
    }
    Ok(mapping)
}

fn number_to_value(n: &Number, path: String) -> Result<Value, JsonError> {
    if let Some(i) = n.as_i64() {
        Ok(Value::Int(i))
    } else if let Some(x) = n.as_f64() {
        Ok(Value::Float(x))
    } else {
        Err(JsonError::Number { path })
    }
}

impl Value {
    /// Snapshot as JSON. Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(x) => Number::from_f64(*x).map_or(Json::Null, Json::Number),
            Self::Str(s) => Json::String(s.clone()),
            Self::Map(m) => m.to_json(),
            Self::Node(n) => n.raw().to_json(),
        }
    }
}

impl ReactiveNode {
    /// Snapshot of [`raw`](Self::raw) as JSON.
    #[must_use]
    pub fn to_json(&self) -> Json {
        self.raw().to_json()
    }
}

impl Serialize for Mapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with(|entries| {
            let mut map = serializer.serialize_map(Some(entries.len()))?;
            for (k, v) in entries {
                map.serialize_entry(k, v)?;
            }
            map.end()
        })
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Map(m) => m.serialize(serializer),
            Self::Node(n) => n.raw().serialize(serializer),
        }
    }
}

impl Serialize for ReactiveNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Mapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Mapping::from_json(&json).map_err(de::Error::custom)
    }
}
