//! Operator tags shared by the parse tree and the plan nodes.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::errors::{Entity, PlanError};
use smol_str::format_smolstr;

/// Dyadic comparison returning a predicate.
#[derive(Serialize, Deserialize, PartialEq, Debug, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<=`
    LtEq,
    /// `<`
    Lt,
    /// `>=`
    GtEq,
    /// `>`
    Gt,
}

impl CompareOp {
    pub const ALL: [CompareOp; 6] = [
        CompareOp::Eq,
        CompareOp::NotEq,
        CompareOp::LtEq,
        CompareOp::Lt,
        CompareOp::GtEq,
        CompareOp::Gt,
    ];

    /// Creates `CompareOp` from the operator string.
    ///
    /// # Errors
    /// - the operator is not a comparison
    pub fn from(s: &str) -> Result<Self, PlanError> {
        match s {
            "=" => Ok(CompareOp::Eq),
            "<>" | "!=" => Ok(CompareOp::NotEq),
            "<=" => Ok(CompareOp::LtEq),
            "<" => Ok(CompareOp::Lt),
            ">=" => Ok(CompareOp::GtEq),
            ">" => Ok(CompareOp::Gt),
            _ => Err(PlanError::NotSupported(
                Entity::Operator,
                Some(format_smolstr!("comparison {s}")),
            )),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::LtEq => "<=",
            CompareOp::Lt => "<",
            CompareOp::GtEq => ">=",
            CompareOp::Gt => ">",
        }
    }

    /// Operator that gives the same result with swapped operands.
    #[must_use]
    pub fn commute(self) -> Self {
        match self {
            CompareOp::Eq | CompareOp::NotEq => self,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::GtEq => CompareOp::LtEq,
            CompareOp::Gt => CompareOp::Lt,
        }
    }

    /// Strict variant of the ordering operator (`<=` becomes `<`).
    #[must_use]
    pub fn strict(self) -> Self {
        match self {
            CompareOp::LtEq => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::Gt,
            _ => self,
        }
    }

    #[must_use]
    pub fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            CompareOp::Eq => ord == Equal,
            CompareOp::NotEq => ord != Equal,
            CompareOp::LtEq => ord != Greater,
            CompareOp::Lt => ord == Less,
            CompareOp::GtEq => ord != Less,
            CompareOp::Gt => ord == Greater,
        }
    }
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Arithmetic {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
}

impl Arithmetic {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Arithmetic::Add => "+",
            Arithmetic::Subtract => "-",
            Arithmetic::Multiply => "*",
            Arithmetic::Divide => "/",
            Arithmetic::Modulo => "%",
        }
    }
}

impl Display for Arithmetic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connective of a combinator predicate.
#[derive(Serialize, Deserialize, PartialEq, Debug, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Logical {
    And,
    Or,
}

impl Logical {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Logical::And => "AND",
            Logical::Or => "OR",
        }
    }
}

impl Display for Logical {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Eq, Hash, Clone, Copy)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    /// Semi-join produced from `EXISTS`.
    Exists,
    /// Anti-join produced from `NOT EXISTS`.
    NotExists,
}

impl JoinKind {
    #[must_use]
    pub fn is_outer(&self) -> bool {
        matches!(
            self,
            JoinKind::LeftOuter | JoinKind::RightOuter | JoinKind::FullOuter
        )
    }

    #[must_use]
    pub fn is_exists(&self) -> bool {
        matches!(self, JoinKind::Exists | JoinKind::NotExists)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner => "inner",
            JoinKind::LeftOuter => "left outer",
            JoinKind::RightOuter => "right outer",
            JoinKind::FullOuter => "full outer",
            JoinKind::Exists => "exists",
            JoinKind::NotExists => "not exists",
        }
    }
}

impl Display for JoinKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
