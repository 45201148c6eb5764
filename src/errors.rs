//! Planner errors.
//!
//! Every error is raised where it is detected and travels unmodified up to
//! the statement compilation boundary.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Kind of the planner object an error refers to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Entity {
    Aggregate,
    Analyzer,
    Candidate,
    Column,
    Configuration,
    Distinct,
    Expression,
    Function,
    Join,
    JoinAlgorithm,
    Node,
    Operator,
    Predicate,
    Program,
    Query,
    Relation,
    Scope,
    Sort,
    Statement,
    Status,
    Table,
    Type,
    Value,
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Entity::Aggregate => "aggregate",
            Entity::Analyzer => "analyzer",
            Entity::Candidate => "candidate",
            Entity::Column => "column",
            Entity::Configuration => "configuration",
            Entity::Distinct => "distinct",
            Entity::Expression => "expression",
            Entity::Function => "function",
            Entity::Join => "join",
            Entity::JoinAlgorithm => "join algorithm",
            Entity::Node => "node",
            Entity::Operator => "operator",
            Entity::Predicate => "predicate",
            Entity::Program => "program",
            Entity::Query => "query",
            Entity::Relation => "relation",
            Entity::Scope => "name scope",
            Entity::Sort => "sort",
            Entity::Statement => "statement",
            Entity::Status => "status",
            Entity::Table => "table",
            Entity::Type => "type",
            Entity::Value => "value",
        };
        write!(f, "{name}")
    }
}

fn details(detail: &Option<SmolStr>) -> String {
    match detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

#[derive(Clone, Debug, Deserialize, Error, PartialEq, Eq, Serialize)]
pub enum PlanError {
    /// The logical construct has no physical realization.
    #[error("{0} is not supported{}", details(.1))]
    NotSupported(Entity, Option<SmolStr>),
    #[error("invalid row value: {0}")]
    InvalidRowValue(SmolStr),
    #[error("invalid cardinality: {0}")]
    InvalidCardinality(SmolStr),
    #[error("column {0} is not found")]
    ColumnNotFound(SmolStr),
    #[error("column {0} is neither a grouping column nor inside a set function")]
    NonGroupingColumn(SmolStr),
    #[error("duplicate qualified name: {0}")]
    DuplicateQualifiedName(SmolStr),
    #[error("{0} {1} is not found")]
    NotFound(Entity, SmolStr),
    #[error("sql parsing error: {0}")]
    ParsingError(SmolStr),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(SmolStr),
    /// Internal bookkeeping went wrong. A defect, not a user error.
    #[error("unexpected {0}{}", details(.1))]
    Unexpected(Entity, Option<SmolStr>),
}

impl PlanError {
    /// Stable category name reported to the client.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            PlanError::NotSupported(..) => "NotSupported",
            PlanError::InvalidRowValue(_) => "InvalidRowValue",
            PlanError::InvalidCardinality(_) => "InvalidCardinality",
            PlanError::ColumnNotFound(_) => "ColumnNotFound",
            PlanError::NonGroupingColumn(_) => "NonGroupingColumn",
            PlanError::DuplicateQualifiedName(_) => "DuplicateQualifiedName",
            PlanError::NotFound(..) => "NotFound",
            PlanError::ParsingError(_) => "SQLSyntaxError",
            PlanError::InvalidConfiguration(_) => "InvalidConfiguration",
            PlanError::Unexpected(..) => "Unexpected",
        }
    }

    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        matches!(self, PlanError::NotSupported(..))
    }
}
