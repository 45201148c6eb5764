use serde::{Deserialize, Serialize};
use smol_str::format_smolstr;
use std::fmt::{Display, Formatter};

use crate::errors::{Entity, PlanError};
use crate::ir::types::DataType;

/// The kind of aggregate (set) function.
///
/// Examples: avg, sum, count.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Display for AggregateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
        };
        write!(f, "{name}")
    }
}

impl AggregateKind {
    /// Returns None in case passed function name is not aggregate.
    #[must_use]
    pub fn from_name(func_name: &str) -> Option<AggregateKind> {
        let kind = match func_name.to_lowercase().as_str() {
            "count" => AggregateKind::Count,
            "sum" => AggregateKind::Sum,
            "avg" => AggregateKind::Avg,
            "min" => AggregateKind::Min,
            "max" => AggregateKind::Max,
            _ => return None,
        };
        Some(kind)
    }

    /// Result type of the aggregate over an operand of the given type.
    ///
    /// # Errors
    /// - `SUM`/`AVG` over a non-numeric operand
    pub fn data_type(self, operand: Option<&DataType>) -> Result<DataType, PlanError> {
        let operand = operand.cloned().unwrap_or(DataType::Unknown);
        match self {
            AggregateKind::Count => Ok(DataType::Integer),
            AggregateKind::Min | AggregateKind::Max => Ok(operand),
            AggregateKind::Sum | AggregateKind::Avg => {
                if !operand.is_numeric() {
                    return Err(PlanError::NotSupported(
                        Entity::Aggregate,
                        Some(format_smolstr!("{self} over {operand}")),
                    ));
                }
                if self == AggregateKind::Avg {
                    Ok(DataType::Double)
                } else {
                    Ok(operand)
                }
            }
        }
    }

    /// Aggregates that every back-end computes so that `self` can be
    /// restored centrally.
    #[must_use]
    pub fn get_local_aggregates_kinds(&self) -> Vec<AggregateKind> {
        match self {
            AggregateKind::Count => vec![AggregateKind::Count],
            AggregateKind::Sum => vec![AggregateKind::Sum],
            AggregateKind::Avg => vec![AggregateKind::Sum, AggregateKind::Count],
            AggregateKind::Min => vec![AggregateKind::Min],
            AggregateKind::Max => vec![AggregateKind::Max],
        }
    }

    /// Central aggregate that combines the partial results of `local`.
    ///
    /// # Errors
    /// - `local` is not one of the local kinds of `self`
    pub fn get_final_aggregate_kind(
        &self,
        local: &AggregateKind,
    ) -> Result<AggregateKind, PlanError> {
        let res = match (self, local) {
            (AggregateKind::Count | AggregateKind::Avg, AggregateKind::Count)
            | (AggregateKind::Sum | AggregateKind::Avg, AggregateKind::Sum) => AggregateKind::Sum,
            (AggregateKind::Min, AggregateKind::Min) => AggregateKind::Min,
            (AggregateKind::Max, AggregateKind::Max) => AggregateKind::Max,
            (_, _) => {
                return Err(PlanError::Unexpected(
                    Entity::Aggregate,
                    Some(format_smolstr!(
                        "invalid local aggregate {local} for original aggregate: {self}"
                    )),
                ))
            }
        };
        Ok(res)
    }
}
