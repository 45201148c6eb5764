//! Physical operator choices for relations.
//!
//! A candidate tree is built bottom-up by [`Environment::create_access_plan`]
//! and lowered into an execution program afterwards. Rejected alternatives
//! are erased from the arena.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};

use crate::errors::{Entity, PlanError};
use crate::ir::cost::Cost;
use crate::ir::environment::Environment;
use crate::ir::node::{Node, NodeId, NodeType};
use crate::ir::operator::JoinKind;
use crate::ir::relation::{Assignment, SortKey};
use crate::ir::tree::traversal::{LevelNode, PostOrder, CANDIDATE_CAPACITY};
use crate::tlog;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum JoinAlgorithm {
    NestedLoop,
    Merge,
    Hash,
    /// Semi-join of `EXISTS`/`NOT EXISTS`.
    Exists,
}

impl JoinAlgorithm {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinAlgorithm::NestedLoop => "nested loop",
            JoinAlgorithm::Merge => "merge",
            JoinAlgorithm::Hash => "hash",
            JoinAlgorithm::Exists => "exists",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SortKind {
    Normal,
    /// Keeps the first `limit` rows only.
    Partial { limit: u64 },
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DistributeOp {
    Retrieve,
    /// `relocate`: rows have to be routed to the partition of their key.
    Insert { relocate: bool },
    /// `relocate`: an assignment changes the partition key.
    Update { relocate: bool },
    Delete,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ReplicateOp {
    Retrieve,
    Insert,
}

/// Statement shipped to back-end servers.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Remote {
    pub sql: SmolStr,
    pub servers: Vec<SmolStr>,
    /// Scalars bound to the result columns, in order.
    pub columns: Vec<NodeId>,
}

/// Central computation of a grouping output column.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Replacement {
    /// Column of the grouping relation.
    pub original: NodeId,
    /// Expression over the combined partial results.
    pub value: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum DmlOp {
    Insert { columns: Vec<usize> },
    Update { assignments: Vec<Assignment> },
    Delete,
}

impl DmlOp {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DmlOp::Insert { .. } => "insert",
            DmlOp::Update { .. } => "update",
            DmlOp::Delete => "delete",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum CandidateKind {
    Scan {
        table: SmolStr,
        predicate: Option<NodeId>,
        /// Primary key lookup instead of a full scan.
        lookup: bool,
    },
    Filter {
        operand: NodeId,
        predicate: NodeId,
    },
    Projection {
        operand: NodeId,
        columns: Vec<NodeId>,
    },
    /// Derived table: the operand row under new fields.
    Rename {
        operand: NodeId,
    },
    Join {
        algorithm: JoinAlgorithm,
        kind: JoinKind,
        outer: NodeId,
        inner: NodeId,
        predicate: Option<NodeId>,
    },
    Sort {
        operand: NodeId,
        keys: Vec<SortKey>,
        kind: SortKind,
    },
    Limit {
        operand: NodeId,
        limit: NodeId,
        offset: Option<NodeId>,
    },
    Distinct {
        operand: NodeId,
    },
    Grouping {
        operand: NodeId,
        keys: Vec<NodeId>,
        aggregates: Vec<NodeId>,
        /// Empty unless the partial results come from back-end servers.
        replacements: Vec<Replacement>,
    },
    Union {
        operands: Vec<NodeId>,
        all: bool,
    },
    Values {
        rows: Vec<Vec<NodeId>>,
    },
    BulkInput {
        path: SmolStr,
    },
    BulkOutput {
        operand: NodeId,
        path: SmolStr,
    },
    Dml {
        table: SmolStr,
        op: DmlOp,
        operand: NodeId,
    },
    Distribute {
        op: DistributeOp,
        remote: Remote,
        /// Local rows sent to the servers.
        operand: Option<NodeId>,
    },
    Replicate {
        op: ReplicateOp,
        remote: Remote,
        operand: Option<NodeId>,
    },
}

/// Access plan of the relation a subquery expression evaluates.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SubPlan {
    pub relation: NodeId,
    pub candidate: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Candidate {
    pub relation: NodeId,
    pub cost: Cost,
    pub kind: CandidateKind,
    /// Plans of the subqueries referenced by the expressions of this node.
    pub subplans: Vec<SubPlan>,
}

impl Candidate {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            CandidateKind::Scan { .. } => NodeType::Scan,
            CandidateKind::Join { algorithm, .. } => match algorithm {
                JoinAlgorithm::NestedLoop => NodeType::NestedLoopJoin,
                JoinAlgorithm::Merge => NodeType::MergeJoin,
                JoinAlgorithm::Hash => NodeType::HashJoin,
                JoinAlgorithm::Exists => NodeType::ExistsJoin,
            },
            CandidateKind::Sort { kind, .. } => match kind {
                SortKind::Normal => NodeType::FullSort,
                SortKind::Partial { .. } => NodeType::PartialSort,
            },
            CandidateKind::Distribute { op, .. } => match op {
                DistributeOp::Retrieve => NodeType::DistributeRetrieve,
                DistributeOp::Insert { .. } => NodeType::DistributeInsert,
                DistributeOp::Update { .. } => NodeType::DistributeUpdate,
                DistributeOp::Delete => NodeType::DistributeDelete,
            },
            CandidateKind::Replicate { op, .. } => match op {
                ReplicateOp::Retrieve => NodeType::ReplicateRetrieve,
                ReplicateOp::Insert => NodeType::ReplicateInsert,
            },
            _ => NodeType::Candidate,
        }
    }

    /// Operand candidates, outer first.
    #[must_use]
    pub fn children(&self) -> Vec<NodeId> {
        match &self.kind {
            CandidateKind::Filter { operand, .. }
            | CandidateKind::Projection { operand, .. }
            | CandidateKind::Rename { operand }
            | CandidateKind::Sort { operand, .. }
            | CandidateKind::Limit { operand, .. }
            | CandidateKind::Distinct { operand }
            | CandidateKind::Grouping { operand, .. }
            | CandidateKind::BulkOutput { operand, .. }
            | CandidateKind::Dml { operand, .. } => vec![*operand],
            CandidateKind::Join { outer, inner, .. } => vec![*outer, *inner],
            CandidateKind::Union { operands, .. } => operands.clone(),
            CandidateKind::Distribute { operand, .. } | CandidateKind::Replicate { operand, .. } => {
                operand.iter().copied().collect()
            }
            CandidateKind::Scan { .. }
            | CandidateKind::Values { .. }
            | CandidateKind::BulkInput { .. } => vec![],
        }
    }

    /// Operator name used in plan explanations.
    #[must_use]
    pub fn name(&self) -> SmolStr {
        match &self.kind {
            CandidateKind::Scan { lookup: true, .. } => "index lookup".into(),
            CandidateKind::Scan { .. } => "scan".into(),
            CandidateKind::Filter { .. } => "filter".into(),
            CandidateKind::Projection { .. } => "projection".into(),
            CandidateKind::Rename { .. } => "rename".into(),
            CandidateKind::Join {
                algorithm, kind, ..
            } => format_smolstr!("{} join ({})", algorithm.as_str(), kind.as_str()),
            CandidateKind::Sort {
                kind: SortKind::Normal,
                ..
            } => "sort".into(),
            CandidateKind::Sort {
                kind: SortKind::Partial { limit },
                ..
            } => format_smolstr!("partial sort (top {limit})"),
            CandidateKind::Limit { .. } => "limit".into(),
            CandidateKind::Distinct { .. } => "distinct".into(),
            CandidateKind::Grouping { replacements, .. } if !replacements.is_empty() => {
                "grouping (final)".into()
            }
            CandidateKind::Grouping { .. } => "grouping".into(),
            CandidateKind::Union { all: true, .. } => "union all".into(),
            CandidateKind::Union { .. } => "union".into(),
            CandidateKind::Values { .. } => "values".into(),
            CandidateKind::BulkInput { .. } => "bulk input".into(),
            CandidateKind::BulkOutput { .. } => "bulk output".into(),
            CandidateKind::Dml { op, .. } => op.as_str().into(),
            CandidateKind::Distribute { op, .. } => match op {
                DistributeOp::Retrieve => "distribute retrieve".into(),
                DistributeOp::Insert { relocate } => {
                    format_smolstr!("distribute insert (relocate: {relocate})")
                }
                DistributeOp::Update { relocate } => {
                    format_smolstr!("distribute update (relocate: {relocate})")
                }
                DistributeOp::Delete => "distribute delete".into(),
            },
            CandidateKind::Replicate { op, .. } => match op {
                ReplicateOp::Retrieve => "replicate retrieve".into(),
                ReplicateOp::Insert => "replicate insert".into(),
            },
        }
    }
}

impl Environment {
    /// # Errors
    /// - node is not found or is not a candidate
    pub fn get_candidate(&self, id: NodeId) -> Result<&Candidate, PlanError> {
        match self.get_node(id)? {
            Node::Candidate(candidate) => Ok(candidate),
            _ => Err(PlanError::Unexpected(
                Entity::Candidate,
                Some(format_smolstr!("node {id} is not a candidate")),
            )),
        }
    }

    /// # Errors
    /// - node is not found or is not a candidate
    pub fn candidate_cost(&self, id: NodeId) -> Result<Cost, PlanError> {
        Ok(self.get_candidate(id)?.cost)
    }

    pub fn add_candidate(&mut self, relation: NodeId, cost: Cost, kind: CandidateKind) -> NodeId {
        self.register(Candidate {
            relation,
            cost,
            kind,
            subplans: Vec::new(),
        })
    }

    /// # Errors
    /// - node is not a candidate
    pub fn set_subplans(&mut self, candidate: NodeId, subplans: Vec<SubPlan>) -> Result<(), PlanError> {
        match self.get_node_mut(candidate)? {
            Node::Candidate(c) => {
                c.subplans = subplans;
                Ok(())
            }
            _ => Err(PlanError::Unexpected(
                Entity::Candidate,
                Some(format_smolstr!("node {candidate} is not a candidate")),
            )),
        }
    }

    /// Erases a rejected candidate together with its operands and subplans.
    ///
    /// # Errors
    /// - a node of the tree is already erased
    pub fn erase_candidate(&mut self, id: NodeId) -> Result<(), PlanError> {
        self.get_candidate(id)?;
        let nodes = PostOrder::with_capacity(|node| self.candidate_children(node), CANDIDATE_CAPACITY)
            .populate_nodes(id);
        let mut erased = AHashSet::with_capacity(nodes.len());
        for LevelNode(_, node) in nodes {
            if erased.insert(node) {
                self.erase(node)?;
            }
        }
        Ok(())
    }

    /// Join candidate over planned operands.
    ///
    /// # Errors
    /// - merge and hash joins have no implementation
    /// - the algorithm doesn't fit the join kind
    pub fn create_join_candidate(
        &mut self,
        relation: NodeId,
        algorithm: JoinAlgorithm,
        kind: JoinKind,
        outer: NodeId,
        inner: NodeId,
        predicate: Option<NodeId>,
    ) -> Result<NodeId, PlanError> {
        match algorithm {
            JoinAlgorithm::Merge | JoinAlgorithm::Hash => {
                return Err(PlanError::NotSupported(
                    Entity::JoinAlgorithm,
                    Some(format_smolstr!("{} join", algorithm.as_str())),
                ))
            }
            JoinAlgorithm::Exists if !kind.is_exists() => {
                return Err(PlanError::Unexpected(
                    Entity::JoinAlgorithm,
                    Some(format_smolstr!("semi-join for {kind} join")),
                ))
            }
            JoinAlgorithm::NestedLoop if kind.is_exists() => {
                return Err(PlanError::Unexpected(
                    Entity::JoinAlgorithm,
                    Some(format_smolstr!("nested loop for {kind} join")),
                ))
            }
            _ => {}
        }
        let outer_cost = self.candidate_cost(outer)?;
        let inner_cost = self.candidate_cost(inner)?;
        let mut cost = match algorithm {
            JoinAlgorithm::Exists => {
                Cost::exists_loop(&outer_cost, &inner_cost, kind == JoinKind::NotExists)
            }
            _ => Cost::nested_loop(&outer_cost, &inner_cost),
        };
        if let Some(predicate) = predicate {
            cost = cost.filtered(self.selectivity(predicate)?);
        }
        if kind.is_outer() {
            cost.tuple_count = cost.tuple_count.max(outer_cost.tuple_count);
        }
        Ok(self.add_candidate(
            relation,
            cost,
            CandidateKind::Join {
                algorithm,
                kind,
                outer,
                inner,
                predicate,
            },
        ))
    }

    /// Sort candidate. A partial sort keeps `limit` rows.
    ///
    /// # Errors
    /// - operand is not a candidate
    pub fn create_sort_candidate(
        &mut self,
        relation: NodeId,
        operand: NodeId,
        keys: Vec<SortKey>,
        kind: SortKind,
    ) -> Result<NodeId, PlanError> {
        let input = self.candidate_cost(operand)?;
        let cost = match kind {
            SortKind::Normal => Cost::sort(&input),
            SortKind::Partial { limit } => Cost::partial_sort(&input, limit as f64),
        };
        tlog!(Debug, "sort candidate for {relation}: {kind:?}");
        Ok(self.add_candidate(
            relation,
            cost,
            CandidateKind::Sort {
                operand,
                keys,
                kind,
            },
        ))
    }
}

#[cfg(test)]
mod tests;
