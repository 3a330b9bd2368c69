//! Dynamically-typed field values.
//!
//! Every field of a message instance holds one [`Value`]; the variant is
//! fixed by the field descriptor at message-creation time and checked on
//! every mutation.

use crate::field::Field;
use crate::message::DynamicMessage;
use serde::{Deserialize, Serialize};

/// A `(seconds, nanoseconds)` wallclock instant.
///
/// The serde form is the JSON codec's `{"Sec": u32, "NSec": u32}` shape.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize,
)]
pub struct TimeValue {
    #[serde(rename = "Sec", default)]
    pub sec: u32,
    #[serde(rename = "NSec", default)]
    pub nsec: u32,
}

impl TimeValue {
    pub fn new(sec: u32, nsec: u32) -> TimeValue {
        TimeValue { sec, nsec }
    }

    /// True for the zero instant, which several protocol rules treat as
    /// "unset".
    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.nsec == 0
    }
}

/// A `(seconds, nanoseconds)` span.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize,
)]
pub struct DurationValue {
    #[serde(rename = "Sec", default)]
    pub sec: u32,
    #[serde(rename = "NSec", default)]
    pub nsec: u32,
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// The tagged union stored per field.
///
/// `uint8` arrays are kept as contiguous bytes ([`Value::Bytes`]); every
/// other array is an element list ([`Value::Array`]) whose elements all
/// carry the scalar variant of the field's type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Time(TimeValue),
    Duration(DurationValue),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Message(DynamicMessage),
}

impl Value {
    /// Variant name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I8(_) => "int8",
            Value::I16(_) => "int16",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::U8(_) => "uint8",
            Value::U16(_) => "uint16",
            Value::U32(_) => "uint32",
            Value::U64(_) => "uint64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::String(_) => "string",
            Value::Time(_) => "time",
            Value::Duration(_) => "duration",
            Value::Bytes(_) => "uint8[]",
            Value::Array(_) => "array",
            Value::Message(_) => "message",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Value::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<TimeValue> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tag checking
// ---------------------------------------------------------------------------

/// True when `value`'s variant matches what `field` declares.
///
/// Array fields require [`Value::Array`] with every element matching the
/// scalar shape (byte arrays require [`Value::Bytes`]); nested fields
/// additionally require the instance's type name to equal the declared
/// nested type.
pub fn value_fits(field: &Field, value: &Value) -> bool {
    if field.is_byte_array() {
        return matches!(value, Value::Bytes(_));
    }
    if field.array {
        return match value {
            Value::Array(items) => items.iter().all(|item| scalar_fits(field, item)),
            _ => false,
        };
    }
    scalar_fits(field, value)
}

fn scalar_fits(field: &Field, value: &Value) -> bool {
    if !field.builtin {
        return match value {
            Value::Message(m) => m.type_name() == field.full_type(),
            _ => false,
        };
    }
    match (field.ty.as_str(), value) {
        ("bool", Value::Bool(_))
        | ("int8", Value::I8(_))
        | ("int16", Value::I16(_))
        | ("int32", Value::I32(_))
        | ("int64", Value::I64(_))
        | ("uint8", Value::U8(_))
        | ("uint16", Value::U16(_))
        | ("uint32", Value::U32(_))
        | ("uint64", Value::U64(_))
        | ("float32", Value::F32(_))
        | ("float64", Value::F64(_))
        | ("string", Value::String(_))
        | ("time", Value::Time(_))
        | ("duration", Value::Duration(_)) => true,
        _ => false,
    }
}
