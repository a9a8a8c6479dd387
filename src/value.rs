//! Typed values on both sides of a probe comparison.
//!
//! The inventory bus hands us *live* values ([`TypedValue`]): strings, bools,
//! every fixed-width integer, doubles and byte-sequences. Templates carry
//! *patterns* ([`PatternValue`]): plain JSON. Both are closed sum types so the
//! matcher in `engine/matcher.rs` can be an exhaustive match over the pair.

use serde::Serialize;
use serde_json::{Number, Value};
use std::fmt;

/// A live property value read from the inventory bus.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    /// Uninitialized / absent value. Never matches anything.
    #[default]
    Empty,
    Str(String),
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Bytes(Vec<u8>),
}

/// Widened numeric view used for exact cross-width comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Numeric {
    Int(i128),
    Float(f64),
}

impl Numeric {
    /// Exact equality: a float equals an integer only when it represents it exactly.
    pub(crate) fn exactly_equals(self, other: Numeric) -> bool {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => a == b,
            (Numeric::Float(a), Numeric::Float(b)) => a == b,
            (Numeric::Int(i), Numeric::Float(f)) | (Numeric::Float(f), Numeric::Int(i)) => {
                f.is_finite() && f.fract() == 0.0 && f == i as f64 && f as i128 == i
            }
        }
    }
}

impl TypedValue {
    /// Numeric view for matching. Bools are deliberately excluded.
    pub(crate) fn numeric(&self) -> Option<Numeric> {
        let n = match self {
            TypedValue::I8(v) => Numeric::Int(*v as i128),
            TypedValue::U8(v) => Numeric::Int(*v as i128),
            TypedValue::I16(v) => Numeric::Int(*v as i128),
            TypedValue::U16(v) => Numeric::Int(*v as i128),
            TypedValue::I32(v) => Numeric::Int(*v as i128),
            TypedValue::U32(v) => Numeric::Int(*v as i128),
            TypedValue::I64(v) => Numeric::Int(*v as i128),
            TypedValue::U64(v) => Numeric::Int(*v as i128),
            TypedValue::F64(v) => Numeric::Float(*v),
            TypedValue::Empty | TypedValue::Str(_) | TypedValue::Bool(_) | TypedValue::Bytes(_) => return None,
        };
        Some(n)
    }

    /// Integer seed for template arithmetic.
    ///
    /// Doubles truncate toward zero and bools map to 0/1; strings, bytes and
    /// empty values have no integer form.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::Bool(b) => Some(i64::from(*b)),
            TypedValue::I8(v) => Some(i64::from(*v)),
            TypedValue::U8(v) => Some(i64::from(*v)),
            TypedValue::I16(v) => Some(i64::from(*v)),
            TypedValue::U16(v) => Some(i64::from(*v)),
            TypedValue::I32(v) => Some(i64::from(*v)),
            TypedValue::U32(v) => Some(i64::from(*v)),
            TypedValue::I64(v) => Some(*v),
            TypedValue::U64(v) => i64::try_from(*v).ok(),
            TypedValue::F64(v) if v.is_finite() => Some(v.trunc() as i64),
            _ => None,
        }
    }

    /// Text used when a `$NAME` placeholder is substituted inside a larger string.
    pub fn as_template_text(&self) -> Option<String> {
        match self {
            TypedValue::Empty | TypedValue::Bytes(_) => None,
            TypedValue::Str(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// JSON form, used when a placeholder occupies a whole field and for
    /// record-id hashing.
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::Empty => Value::Null,
            TypedValue::Str(s) => Value::String(s.clone()),
            TypedValue::Bool(b) => Value::Bool(*b),
            TypedValue::I8(v) => Value::from(*v),
            TypedValue::U8(v) => Value::from(*v),
            TypedValue::I16(v) => Value::from(*v),
            TypedValue::U16(v) => Value::from(*v),
            TypedValue::I32(v) => Value::from(*v),
            TypedValue::U32(v) => Value::from(*v),
            TypedValue::I64(v) => Value::from(*v),
            TypedValue::U64(v) => Value::from(*v),
            TypedValue::F64(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
            TypedValue::Bytes(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        }
    }

    /// Best-effort conversion from a JSON fixture value.
    ///
    /// Integers become `I64` (or `U64` above `i64::MAX`), arrays of bytes
    /// become `Bytes`. Objects, nulls and mixed arrays have no live form.
    pub fn from_json(value: &Value) -> Option<TypedValue> {
        match value {
            Value::String(s) => Some(TypedValue::Str(s.clone())),
            Value::Bool(b) => Some(TypedValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(TypedValue::I64(i))
                } else if let Some(u) = n.as_u64() {
                    Some(TypedValue::U64(u))
                } else {
                    n.as_f64().map(TypedValue::F64)
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_u64().and_then(|v| u8::try_from(v).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(TypedValue::Bytes),
            Value::Object(_) | Value::Null => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Empty => write!(f, "<empty>"),
            TypedValue::Str(s) => write!(f, "{s}"),
            TypedValue::Bool(b) => write!(f, "{b}"),
            TypedValue::I8(v) => write!(f, "{v}"),
            TypedValue::U8(v) => write!(f, "{v}"),
            TypedValue::I16(v) => write!(f, "{v}"),
            TypedValue::U16(v) => write!(f, "{v}"),
            TypedValue::I32(v) => write!(f, "{v}"),
            TypedValue::U32(v) => write!(f, "{v}"),
            TypedValue::I64(v) => write!(f, "{v}"),
            TypedValue::U64(v) => write!(f, "{v}"),
            TypedValue::F64(v) => write!(f, "{v}"),
            TypedValue::Bytes(bytes) => write!(f, "{bytes:?}"),
        }
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::Str(value.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        TypedValue::Str(value)
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        TypedValue::Bool(value)
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(value: Vec<u8>) -> Self {
        TypedValue::Bytes(value)
    }
}

macro_rules! typed_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for TypedValue {
                fn from(value: $ty) -> Self {
                    TypedValue::$variant(value)
                }
            }
        )*
    };
}

typed_from_scalar!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
);

/// A declarative comparison target taken from a probe's pattern map.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternValue {
    Str(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Array(Vec<PatternValue>),
    Object,
    Null,
}

impl PatternValue {
    pub(crate) fn numeric(&self) -> Option<Numeric> {
        match self {
            PatternValue::Int(v) => Some(Numeric::Int(*v as i128)),
            PatternValue::UInt(v) => Some(Numeric::Int(*v as i128)),
            PatternValue::Float(v) => Some(Numeric::Float(*v)),
            _ => None,
        }
    }
}

impl From<&Value> for PatternValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => PatternValue::Str(s.clone()),
            Value::Bool(b) => PatternValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PatternValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    PatternValue::UInt(u)
                } else {
                    PatternValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::Array(items) => PatternValue::Array(items.iter().map(PatternValue::from).collect()),
            Value::Object(_) => PatternValue::Object,
            Value::Null => PatternValue::Null,
        }
    }
}

impl From<Value> for PatternValue {
    fn from(value: Value) -> Self {
        PatternValue::from(&value)
    }
}
