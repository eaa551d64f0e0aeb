// src/runtime/value.rs
//! Dynamic value type carried by execution contexts

use crate::parser::ast::Literal;
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Dynamic value type
///
/// Serialized untagged so JSON payloads from the retrieval pipeline map onto
/// it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    /// Numeric view of the value; only `Int` and `Float` qualify
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Equality with numeric widening (`Int(1) == Float(1.0)`)
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Ordering between two numbers or two strings; `None` otherwise
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Convert a literal that is not a reference.
    ///
    /// Whole numbers become `Int` so they compare and serialize naturally.
    /// Returns `None` when the literal (or an array element) is a reference.
    pub fn from_literal(literal: &Literal) -> Option<Value> {
        Some(match literal {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => number(*n),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_literal)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Literal::Reference(_) => return None,
        })
    }
}

/// Represent `n` as `Int` when it has no fractional part
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}

/// Renders the way values appear in the DSL, with object keys sorted so log
/// lines are stable across runs
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(flag) => write!(f, "{}", flag),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(text) => write!(f, "{:?}", text),
            Value::Array(items) => {
                f.write_str("[")?;
                let mut sep = "";
                for item in items {
                    write!(f, "{}{}", sep, item)?;
                    sep = ", ";
                }
                f.write_str("]")
            }
            Value::Object(fields) => {
                let mut keys: Vec<&String> = fields.keys().collect();
                keys.sort();
                f.write_str("{")?;
                let mut sep = "";
                for key in keys {
                    write!(f, "{}{:?}: {}", sep, key, fields[key])?;
                    sep = ", ";
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(v: $source) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => String,
    &str => String,
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}
