//! Bind values, raw SQL expressions and column mappings.
//!
//! A [`Columns`] mapping pairs column names with a [`ColumnValue`], which is
//! either an ordinary bind [`Value`] or a caller-trusted [`Expression`]. The
//! query builder matches on that variant, so raw SQL is never bound and bind
//! values are never inlined.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Condition sentinel rendered as `IS NULL` (compared case-insensitively).
pub const IS_NULL: &str = "IS NULL";

/// Condition sentinel rendered as `IS NOT NULL` (compared case-insensitively).
pub const IS_NOT_NULL: &str = "IS NOT NULL";

/// A value transmitted to the driver as a statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// The string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! value_from {
    ($($ty:ty => |$v:ident| $body:expr),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )+
    };
}

value_from! {
    bool => |v| Value::Bool(v),
    i64 => |v| Value::Int(v),
    i32 => |v| Value::Int(i64::from(v)),
    u32 => |v| Value::Int(i64::from(v)),
    f64 => |v| Value::Float(v),
    String => |v| Value::String(v),
    &str => |v| Value::String(v.to_string()),
    Vec<u8> => |v| Value::Bytes(v),
    &[u8] => |v| Value::Bytes(v.to_vec()),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Raw SQL text emitted verbatim instead of being bound.
///
/// This is an escape hatch: the text is trusted, never parameterized and
/// never logged. Do not build one from untrusted input.
#[derive(Clone, PartialEq, Eq)]
pub struct Expression(String);

impl Expression {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_sql(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Expression(..)")
    }
}

/// The value side of a [`Columns`] entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Value(Value),
    Expression(Expression),
}

impl ColumnValue {
    /// True for a plain NULL value (not the `"IS NULL"` sentinel).
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Expression(_) => None,
        }
    }
}

impl From<Value> for ColumnValue {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<Expression> for ColumnValue {
    fn from(e: Expression) -> Self {
        Self::Expression(e)
    }
}

macro_rules! column_value_from {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for ColumnValue {
                fn from(v: $ty) -> Self {
                    Self::Value(Value::from(v))
                }
            }
        )+
    };
}

column_value_from!(bool, i64, i32, u32, f64, String, &str, Vec<u8>, &[u8]);

impl<T: Into<Value>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        Self::Value(Value::from(v))
    }
}

/// Ordered mapping of column name to value. Iteration order fixes bind order.
pub type Columns = IndexMap<String, ColumnValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());
        assert_eq!(Value::Int(42).type_name(), "int");
        assert_eq!(Value::from("hello").type_name(), "string");
        assert_eq!(Value::from(vec![1u8, 2]).type_name(), "bytes");
    }

    #[test]
    fn test_option_maps_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(7)), Value::Int(7));
        assert!(ColumnValue::from(None::<String>).is_null());
    }

    #[test]
    fn test_sentinel_string_is_not_null_value() {
        let v = ColumnValue::from(IS_NULL);
        assert!(!v.is_null());
        assert_eq!(v.as_value().and_then(Value::as_str), Some("IS NULL"));
    }

    #[test]
    fn test_expression_debug_hides_sql() {
        let e = Expression::new("NOW()");
        assert_eq!(e.as_sql(), "NOW()");
        assert_eq!(format!("{:?}", e), "Expression(..)");
        assert!(ColumnValue::from(e).as_value().is_none());
    }

    #[test]
    fn test_value_json_roundtrip_bytes() {
        let json = serde_json::to_string(&Value::Bytes(b"hi".to_vec())).unwrap();
        assert_eq!(json, "\"aGk=\"");
        let parsed: Value = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, Value::Int(42));
    }
}
