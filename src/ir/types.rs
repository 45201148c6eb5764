use core::fmt;
use serde::{Deserialize, Serialize};
use smol_str::format_smolstr;
use std::fmt::Formatter;

use crate::errors::{Entity, PlanError};

/// Result type of a scalar node.
#[derive(Serialize, Deserialize, PartialEq, Hash, Debug, Eq, Clone)]
pub enum DataType {
    Boolean,
    Integer,
    Double,
    Decimal,
    String,
    Binary,
    DateTime,
    /// Homogeneous array of the element type.
    Array(Box<DataType>),
    /// Type of a bare `NULL` or of an unbound parameter.
    Unknown,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "bool"),
            DataType::Integer => write!(f, "int"),
            DataType::Double => write!(f, "double"),
            DataType::Decimal => write!(f, "decimal"),
            DataType::String => write!(f, "string"),
            DataType::Binary => write!(f, "binary"),
            DataType::DateTime => write!(f, "datetime"),
            DataType::Array(element) => write!(f, "{element} array"),
            DataType::Unknown => write!(f, "unknown"),
        }
    }
}

impl DataType {
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Double | DataType::Decimal | DataType::Unknown
        )
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, DataType::Array(_))
    }

    #[must_use]
    pub fn is_string(&self) -> bool {
        matches!(self, DataType::String | DataType::Unknown)
    }

    /// Element type of an array, or `None` for scalars.
    #[must_use]
    pub fn element(&self) -> Option<&DataType> {
        match self {
            DataType::Array(element) => Some(element),
            _ => None,
        }
    }

    fn numeric_rank(&self) -> u8 {
        match self {
            DataType::Integer => 1,
            DataType::Decimal => 2,
            DataType::Double => 3,
            _ => 0,
        }
    }

    /// Common type of the two arithmetic operands.
    ///
    /// # Errors
    /// - one of the operands is not numeric
    pub fn arithmetic(left: &DataType, right: &DataType) -> Result<DataType, PlanError> {
        if !left.is_numeric() || !right.is_numeric() {
            return Err(PlanError::NotSupported(
                Entity::Type,
                Some(format_smolstr!("arithmetic between {left} and {right}")),
            ));
        }
        Ok(match (left, right) {
            (DataType::Unknown, other) | (other, DataType::Unknown) => other.clone(),
            _ if left.numeric_rank() >= right.numeric_rank() => left.clone(),
            _ => right.clone(),
        })
    }

    /// Type both sides of a comparison are coerced to.
    ///
    /// # Errors
    /// - the types can't be compared with each other
    pub fn comparable(left: &DataType, right: &DataType) -> Result<DataType, PlanError> {
        match (left, right) {
            (DataType::Unknown, other) | (other, DataType::Unknown) => Ok(other.clone()),
            (l, r) if l == r => Ok(l.clone()),
            (l, r) if l.is_numeric() && r.is_numeric() => DataType::arithmetic(l, r),
            (DataType::String, DataType::DateTime) | (DataType::DateTime, DataType::String) => {
                Ok(DataType::DateTime)
            }
            _ => Err(PlanError::NotSupported(
                Entity::Type,
                Some(format_smolstr!("comparison between {left} and {right}")),
            )),
        }
    }

    /// Parse the type name used in `CAST (x AS <name>)`.
    ///
    /// # Errors
    /// - unknown type name
    pub fn from_name(name: &str) -> Result<DataType, PlanError> {
        let normalized = name.trim().to_lowercase();
        let ty = match normalized.as_str() {
            "bool" | "boolean" => DataType::Boolean,
            "int" | "integer" | "bigint" | "smallint" => DataType::Integer,
            "double" | "float" | "real" | "double precision" => DataType::Double,
            "decimal" | "numeric" => DataType::Decimal,
            "string" | "text" | "varchar" | "char" | "nvarchar" | "nchar" | "ntext" => {
                DataType::String
            }
            "binary" | "varbinary" | "blob" | "image" => DataType::Binary,
            "datetime" | "timestamp" | "date" => DataType::DateTime,
            _ => {
                return Err(PlanError::NotSupported(
                    Entity::Type,
                    Some(format_smolstr!("type {name}")),
                ))
            }
        };
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn arithmetic_widens() {
        assert_eq!(
            DataType::arithmetic(&DataType::Integer, &DataType::Double).unwrap(),
            DataType::Double
        );
        assert_eq!(
            DataType::arithmetic(&DataType::Decimal, &DataType::Integer).unwrap(),
            DataType::Decimal
        );
        assert_eq!(
            DataType::arithmetic(&DataType::Unknown, &DataType::Integer).unwrap(),
            DataType::Integer
        );
        assert!(DataType::arithmetic(&DataType::String, &DataType::Integer).is_err());
    }

    #[test]
    fn comparable_types() {
        assert_eq!(
            DataType::comparable(&DataType::String, &DataType::DateTime).unwrap(),
            DataType::DateTime
        );
        assert!(DataType::comparable(&DataType::Boolean, &DataType::Integer).is_err());
    }

    #[test]
    fn names() {
        assert_eq!(DataType::from_name("NVARCHAR").unwrap(), DataType::String);
        assert_eq!(
            DataType::from_name("geometry").unwrap_err().category(),
            "NotSupported"
        );
        assert_eq!(
            DataType::Array(Box::new(DataType::Integer)).to_string(),
            "int array"
        );
    }
}
