use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use indexmap::IndexMap;
use serde::Serialize;
use snafu::{ResultExt, Snafu};

/// Insertion-ordered map underlying every event. Serialization order is the
/// order keys were merged in, which the document id depends on.
pub type ObjectMap = IndexMap<String, Value>;

/// Canonical tree type for event fields and container tags. One tagged sum
/// instead of ad-hoc casts, so label-driven deep merges stay type-directed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bytes(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Map(ObjectMap),
    Null,
}

impl From<String> for Value {
    fn from(string: String) -> Self {
        Value::Bytes(string)
    }
}

impl From<&str> for Value {
    fn from(string: &str) -> Self {
        Value::Bytes(string.to_owned())
    }
}

impl From<i64> for Value {
    fn from(integer: i64) -> Self {
        Value::Integer(integer)
    }
}

impl From<f64> for Value {
    fn from(float: f64) -> Self {
        Value::Float(float)
    }
}

impl From<bool> for Value {
    fn from(boolean: bool) -> Self {
        Value::Boolean(boolean)
    }
}

impl From<ObjectMap> for Value {
    fn from(map: ObjectMap) -> Self {
        Value::Map(map)
    }
}

impl Value {
    pub fn as_map(&self) -> Option<&ObjectMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(string) => Some(string),
            _ => None,
        }
    }
}

/// Builds an [`ObjectMap`] from literal key/value pairs.
#[macro_export]
macro_rules! object {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::event::ObjectMap::new();
        $(map.insert($key.to_string(), $crate::event::Value::from($value));)*
        map
    }};
}

/// Recursively merges `incoming` into `base`. Map values merge key-wise;
/// anything else is replaced, so the right side wins at leaves. Keys already
/// present keep their position, new keys append.
pub fn deep_merge(base: &mut ObjectMap, incoming: ObjectMap) {
    for (key, value) in incoming {
        match (base.get_mut(&key), value) {
            (Some(Value::Map(existing)), Value::Map(incoming)) => deep_merge(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[derive(Debug, Snafu)]
pub enum EventError {
    #[snafu(display("Failed to serialize event: {}", source))]
    Serialize { source: serde_json::Error },
    #[snafu(display("Failed to hash event: {}", source))]
    Hash { source: std::io::Error },
}

/// Derives the downstream document id: the unpadded standard-alphabet base64
/// of the 128-bit x64 MurmurHash3 of the event's JSON serialization. The
/// hash is 16 bytes, so the padded encoding would always end in `==`; the
/// unpadded form is the same string with those two characters dropped.
pub fn document_id(event: &ObjectMap) -> Result<String, EventError> {
    let json = serde_json::to_vec(event).context(SerializeSnafu)?;
    let hash = murmur3::murmur3_x64_128(&mut Cursor::new(&json), 0).context(HashSnafu)?;
    Ok(STANDARD_NO_PAD.encode(hash.to_le_bytes()))
}

/// Attaches the `@metadata` subtree. Must run after every other merge; the
/// document id covers the serialization of everything before it.
pub fn finalize(mut event: ObjectMap) -> Result<ObjectMap, EventError> {
    let document_id = document_id(&event)?;
    event.insert(
        "@metadata".into(),
        Value::Map(object! {
            "document_id" => document_id,
            "event_type" => "moby",
        }),
    );
    Ok(event)
}
