//! Human readable rendering of a chosen plan.

use ahash::AHashSet;
use itertools::Itertools;
use std::fmt::Write as _;

use crate::backend::sql::quote;
use crate::errors::{Entity, PlanError};
use crate::ir::candidate::{CandidateKind, DmlOp};
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::relation::{Relation, SortKey};
use crate::ir::tree::traversal::{LevelNode, PreOrder, CANDIDATE_CAPACITY};

impl Environment {
    /// Scalar as SQL text annotated with its type.
    ///
    /// # Errors
    /// - the scalar can't be rendered
    pub fn explain_scalar(&self, id: NodeId) -> Result<String, PlanError> {
        Ok(format!("{}::{}", self.scalar_sql(id)?, self.scalar_type(id)?))
    }

    fn explain_scalars(&self, ids: &[NodeId]) -> Result<String, PlanError> {
        Ok(ids
            .iter()
            .map(|id| self.explain_scalar(*id))
            .collect::<Result<Vec<_>, _>>()?
            .join(", "))
    }

    fn explain_keys(&self, keys: &[SortKey]) -> Result<String, PlanError> {
        let mut res = Vec::with_capacity(keys.len());
        for key in keys {
            let order = if key.descending { " desc" } else { "" };
            res.push(format!("{}{order}", self.explain_scalar(key.scalar)?));
        }
        Ok(res.join(", "))
    }

    fn explain_candidate(&self, id: NodeId) -> Result<String, PlanError> {
        let candidate = self.get_candidate(id)?;
        let name = candidate.name();
        let line = match &candidate.kind {
            CandidateKind::Scan {
                table, predicate, ..
            } => match predicate {
                Some(predicate) => format!(
                    "{name} {} where {}",
                    quote(table),
                    self.predicate_sql(*predicate)?
                ),
                None => format!("{name} {}", quote(table)),
            },
            CandidateKind::Filter { predicate, .. } => {
                format!("{name} {}", self.predicate_sql(*predicate)?)
            }
            CandidateKind::Projection { columns, .. } => {
                let names = self.row_names(candidate.relation)?;
                let mut items = Vec::with_capacity(columns.len());
                for (column, name) in columns.iter().zip(names) {
                    items.push(format!("{} -> {}", self.explain_scalar(*column)?, quote(&name)));
                }
                format!("{name} ({})", items.join(", "))
            }
            CandidateKind::Rename { .. } => match self.get_relation(candidate.relation)? {
                Relation::Derived(derived) => format!("{name} {}", quote(&derived.alias)),
                _ => name.to_string(),
            },
            CandidateKind::Join { predicate, .. } => match predicate {
                Some(predicate) => format!("{name} on {}", self.predicate_sql(*predicate)?),
                None => name.to_string(),
            },
            CandidateKind::Sort { keys, .. } => format!("{name} ({})", self.explain_keys(keys)?),
            CandidateKind::Limit { limit, offset, .. } => {
                let mut line = format!("{name} {}", self.scalar_sql(*limit)?);
                if let Some(offset) = offset {
                    line.push_str(&format!(" offset {}", self.scalar_sql(*offset)?));
                }
                line
            }
            CandidateKind::Grouping {
                keys, aggregates, ..
            } => format!(
                "{name} (keys: [{}], aggregates: [{}])",
                self.explain_scalars(keys)?,
                self.explain_scalars(aggregates)?
            ),
            CandidateKind::Values { rows } => {
                let mut items = Vec::with_capacity(rows.len());
                for row in rows {
                    items.push(format!("({})", self.explain_scalars(row)?));
                }
                format!("{name} {}", items.join(", "))
            }
            CandidateKind::BulkInput { path } | CandidateKind::BulkOutput { path, .. } => {
                format!("{name} '{path}'")
            }
            CandidateKind::Dml { table, op, .. } => match op {
                DmlOp::Insert { .. } => format!("{name} into {}", quote(table)),
                DmlOp::Update { .. } => format!("{name} {}", quote(table)),
                DmlOp::Delete => format!("{name} from {}", quote(table)),
            },
            CandidateKind::Distribute { remote, .. } | CandidateKind::Replicate { remote, .. } => {
                format!(
                    "{name} on [{}]: {}",
                    remote.servers.iter().join(", "),
                    remote.sql
                )
            }
            CandidateKind::Distinct { .. } | CandidateKind::Union { .. } => name.to_string(),
        };
        Ok(line)
    }

    /// Indented candidate tree, one operator per line. Subquery plans follow
    /// the operands of the operator that evaluates them.
    ///
    /// # Errors
    /// - the tree refers to an erased node
    pub fn explain(&self, top: NodeId) -> Result<String, PlanError> {
        let nodes = PreOrder::with_capacity(|id| self.candidate_children(id), CANDIDATE_CAPACITY)
            .populate_nodes(top);
        let mut subqueries = AHashSet::new();
        let mut res = String::new();
        for LevelNode(level, id) in nodes {
            let candidate = self.get_candidate(id)?;
            subqueries.extend(candidate.subplans.iter().map(|plan| plan.candidate));
            let prefix = if subqueries.contains(&id) { "subquery: " } else { "" };
            writeln!(
                res,
                "{:indent$}{prefix}{}",
                "",
                self.explain_candidate(id)?,
                indent = level * 4
            )
            .map_err(|e| PlanError::Unexpected(Entity::Candidate, Some(e.to_string().into())))?;
        }
        Ok(res)
    }
}
