use archive::{Archivable, ArchiveCoder};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use shared::{Error, Result};

/// Anything a cache can hold: a native scalar, raw bytes, or an archived value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(ByteBuf),
    Archive(ArchiveCoder),
}

impl Value {
    pub fn archived<T: Archivable>(value: &T) -> Self {
        Value::Archive(ArchiveCoder::from_value(value))
    }

    pub fn archived_many<T: Archivable>(values: &[T]) -> Self {
        Value::Archive(ArchiveCoder::from_values(values))
    }

    /// Recover an archived `T`, decoding straight against `T`'s codec.
    pub fn unarchive<T: Archivable>(&self) -> Option<T> {
        self.as_archive()?.value::<T>()
    }

    pub fn unarchive_many<T: Archivable>(&self) -> Option<Vec<T>> {
        self.as_archive()?.values::<T>()
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Text(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_archive(&self) -> Option<&ArchiveCoder> {
        match self {
            Value::Archive(coder) => Some(coder),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Codec(format!("Failed to encode cache value: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::Codec(format!("Failed to decode cache value: {}", e)))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(ByteBuf::from(bytes))
    }
}

impl From<ArchiveCoder> for Value {
    fn from(coder: ArchiveCoder) -> Self {
        Value::Archive(coder)
    }
}
