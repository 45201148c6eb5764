//! Literal values known at planning time.

use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

use crate::errors::{Entity, PlanError};
use crate::ir::types::DataType;

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Copy)]
#[serde(transparent)]
pub struct Double {
    pub value: f64,
}

impl Eq for Double {}

impl Hash for Double {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // -0.0 and 0.0 compare equal, so they must hash equally too.
        let normalized = if self.value == 0.0 { 0.0 } else { self.value };
        normalized.to_bits().hash(state);
    }
}

impl PartialOrd for Double {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

impl From<f64> for Double {
    fn from(value: f64) -> Self {
        Double { value }
    }
}

impl Display for Double {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.value.fract() == 0.0 && self.value.is_finite() {
            write!(f, "{:.1}", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(Double),
    String(SmolStr),
    Array(Vec<Value>),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(SmolStr::from(s))
    }
}

/// Renders the value as an SQL literal.
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Array(items) => {
                write!(f, "ARRAY[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn get_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Unknown,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Array(items) => {
                let element = items
                    .iter()
                    .map(Value::get_type)
                    .find(|ty| *ty != DataType::Unknown)
                    .unwrap_or(DataType::Unknown);
                DataType::Array(Box::new(element))
            }
        }
    }

    /// SQL comparison of two values.
    ///
    /// Returns `Ok(None)` when either side is `NULL` (the result is unknown).
    ///
    /// # Errors
    /// - values of incomparable types
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>, PlanError> {
        let ord = match (self, other) {
            (Value::Null, _) | (_, Value::Null) => return Ok(None),
            (Value::Boolean(l), Value::Boolean(r)) => l.cmp(r),
            (Value::Integer(l), Value::Integer(r)) => l.cmp(r),
            (Value::Integer(l), Value::Double(r)) => {
                return Ok(Double::from(*l as f64).partial_cmp(r))
            }
            (Value::Double(l), Value::Integer(r)) => {
                return Ok(l.partial_cmp(&Double::from(*r as f64)))
            }
            (Value::Double(l), Value::Double(r)) => return Ok(l.partial_cmp(r)),
            (Value::String(l), Value::String(r)) => l.cmp(r),
            (Value::Array(l), Value::Array(r)) => {
                for (li, ri) in l.iter().zip(r.iter()) {
                    match li.compare(ri)? {
                        Some(Ordering::Equal) => continue,
                        other => return Ok(other),
                    }
                }
                l.len().cmp(&r.len())
            }
            _ => {
                return Err(PlanError::NotSupported(
                    Entity::Value,
                    Some(format_smolstr!(
                        "comparison of {} and {}",
                        self.get_type(),
                        other.get_type()
                    )),
                ))
            }
        };
        Ok(Some(ord))
    }

    /// Numeric view of the value, used by aggregate folding.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(d.value),
            _ => None,
        }
    }
}
