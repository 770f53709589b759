//! Typed column values tracked by rough filters.
//!
//! Values of the same kind are totally ordered. Values of different kinds are
//! incomparable, and every pruning decision that would need such a comparison
//! resolves to "may match".

use crate::codec::{encode_len, read_bytes, read_u32, read_u64, read_u8};
use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Identifier of a column inside a block.
pub type ColumnId = u64;

/// The kind (type tag) of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    /// Boolean
    Bool = 1,
    /// 64-bit signed integer
    Int = 2,
    /// 64-bit float
    Float = 3,
    /// UTF-8 string
    Str = 4,
    /// Opaque byte string
    Bytes = 5,
}

impl ValueKind {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ValueKind::Bool),
            2 => Some(ValueKind::Int),
            3 => Some(ValueKind::Float),
            4 => Some(ValueKind::Str),
            5 => Some(ValueKind::Bytes),
            _ => None,
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Float value, persisted as its IEEE-754 bit pattern so NaN and
    /// infinities survive JSON
    Float(#[serde(with = "float_bits")] f64),
    /// String value
    Str(String),
    /// Byte string value
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// Compares two values of the same kind. Returns `None` across kinds.
    ///
    /// Floats compare by `total_cmp` after canonicalisation, so `-0.0 == 0.0`
    /// and all NaNs are equal and sort above `+inf`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => {
                Some(canonical_f64(*a).total_cmp(&canonical_f64(*b)))
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Canonical bytes fed to membership hashing.
    ///
    /// Two values that compare equal produce identical key bytes.
    pub fn key_bytes(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.push(self.kind() as u8);
        match self {
            Value::Bool(b) => key.push(*b as u8),
            Value::Int(i) => key.extend_from_slice(&i.to_le_bytes()),
            Value::Float(f) => key.extend_from_slice(&canonical_f64(*f).to_bits().to_le_bytes()),
            Value::Str(s) => key.extend_from_slice(s.as_bytes()),
            Value::Bytes(b) => key.extend_from_slice(b),
        }
        key
    }

    /// Number of bytes written by [`Value::encode_into`].
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 8,
            Value::Str(s) => 4 + s.len(),
            Value::Bytes(b) => 4 + b.len(),
        }
    }

    /// Encode the value.
    ///
    /// Format: [kind: u8][payload], payload being `u8` for bools, 8 bytes for
    /// numbers and `[len: u32][bytes]` for strings and byte strings.
    /// Payloads over `u32::MAX` bytes fail with [`Error::InvalidArgument`]
    /// before anything is written.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        let kind = self.kind() as u8;
        match self {
            Value::Bool(b) => {
                buf.put_u8(kind);
                buf.put_u8(*b as u8);
            }
            Value::Int(i) => {
                buf.put_u8(kind);
                buf.put_i64_le(*i);
            }
            Value::Float(f) => {
                buf.put_u8(kind);
                buf.put_u64_le(f.to_bits());
            }
            Value::Str(s) => put_prefixed(buf, kind, s.as_bytes(), "string value")?,
            Value::Bytes(b) => put_prefixed(buf, kind, b, "bytes value")?,
        }
        Ok(())
    }

    /// Decode a value, advancing `buf` past it.
    pub fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let tag = read_u8(buf, "value kind")?;
        let kind = ValueKind::from_u8(tag)
            .ok_or_else(|| Error::corruption(format!("Invalid value kind: {}", tag)))?;

        let value = match kind {
            ValueKind::Bool => match read_u8(buf, "bool value")? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(Error::corruption(format!("Invalid bool byte: {}", other))),
            },
            ValueKind::Int => Value::Int(read_u64(buf, "int value")? as i64),
            ValueKind::Float => Value::Float(f64::from_bits(read_u64(buf, "float value")?)),
            ValueKind::Str => {
                let len = read_u32(buf, "string length")? as usize;
                let raw = read_bytes(buf, len, "string value")?;
                let s = String::from_utf8(raw)
                    .map_err(|e| Error::corruption(format!("Invalid UTF-8 string value: {}", e)))?;
                Value::Str(s)
            }
            ValueKind::Bytes => {
                let len = read_u32(buf, "bytes length")? as usize;
                Value::Bytes(read_bytes(buf, len, "bytes value")?)
            }
        };

        Ok(value)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

fn put_prefixed(buf: &mut BytesMut, kind: u8, payload: &[u8], what: &str) -> Result<()> {
    let len = encode_len(payload.len(), what)?;
    buf.put_u8(kind);
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(())
}

/// Collapse `-0.0` into `0.0` and every NaN into the default quiet NaN.
fn canonical_f64(f: f64) -> f64 {
    if f == 0.0 {
        0.0
    } else if f.is_nan() {
        f64::NAN
    } else {
        f
    }
}

mod float_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}
