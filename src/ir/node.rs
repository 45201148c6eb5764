//! Node identity and the per-statement node arena.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::ir::candidate::Candidate;
use crate::ir::predicate::Predicate;
use crate::ir::relation::Relation;
use crate::ir::scalar::Scalar;

/// Position of a registered node in the environment arena.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct NodeId(pub u32);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<NodeId> for usize {
    fn from(id: NodeId) -> Self {
        id.0 as usize
    }
}

/// Concrete kind of a node.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum NodeType {
    // scalars
    Field,
    Constant,
    Parameter,
    Arithmetic,
    Negative,
    Concat,
    Aggregation,
    Function,
    Cast,
    AnyElement,
    SubQuery,
    RemoteColumn,
    // predicates
    Comparison,
    NullCheck,
    Combinator,
    Not,
    In,
    Between,
    Like,
    Exists,
    Fixed,
    // relations
    Table,
    Join,
    Filter,
    Projection,
    Derived,
    Grouping,
    Sort,
    Limit,
    Distinct,
    Union,
    ValueList,
    BulkInput,
    BulkOutput,
    Insert,
    Update,
    Delete,
    // candidates
    Scan,
    NestedLoopJoin,
    MergeJoin,
    HashJoin,
    ExistsJoin,
    FullSort,
    PartialSort,
    DistributeRetrieve,
    DistributeInsert,
    DistributeUpdate,
    DistributeDelete,
    ReplicateRetrieve,
    ReplicateInsert,
    Candidate,
    Invalid,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Node {
    Scalar(Scalar),
    Predicate(Predicate),
    Relation(Relation),
    Candidate(Candidate),
    /// Placeholder left by a node erased before the environment teardown.
    Invalid,
}

impl Node {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Scalar(scalar) => scalar.node_type(),
            Node::Predicate(predicate) => predicate.node_type(),
            Node::Relation(relation) => relation.node_type(),
            Node::Candidate(candidate) => candidate.node_type(),
            Node::Invalid => NodeType::Invalid,
        }
    }
}

impl From<Scalar> for Node {
    fn from(scalar: Scalar) -> Self {
        Node::Scalar(scalar)
    }
}

impl From<Predicate> for Node {
    fn from(predicate: Predicate) -> Self {
        Node::Predicate(predicate)
    }
}

impl From<Relation> for Node {
    fn from(relation: Relation) -> Self {
        Node::Relation(relation)
    }
}

impl From<Candidate> for Node {
    fn from(candidate: Candidate) -> Self {
        Node::Candidate(candidate)
    }
}

/// Arena owning every node of one planning pass.
///
/// Positions act as identifiers, so nodes are only appended. Erasing a node
/// leaves an `Invalid` stub in its slot and the identifier is never reused.
/// A node value that was cloned out of the arena carries no identifier until
/// it is pushed back.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Nodes {
    arena: Vec<Node>,
}

impl Nodes {
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    #[must_use]
    pub fn next_id(&self) -> NodeId {
        NodeId(self.arena.len() as u32)
    }

    /// Registers the node and returns its fresh identifier.
    pub fn push(&mut self, node: Node) -> NodeId {
        let id = self.next_id();
        self.arena.push(node);
        id
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        match self.arena.get(usize::from(id)) {
            Some(Node::Invalid) | None => None,
            Some(node) => Some(node),
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        match self.arena.get_mut(usize::from(id)) {
            Some(Node::Invalid) | None => None,
            Some(node) => Some(node),
        }
    }

    /// Drops the identifier binding and hands the node back to the caller.
    pub fn erase(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.arena.get_mut(usize::from(id))?;
        match std::mem::replace(slot, Node::Invalid) {
            Node::Invalid => None,
            node => Some(node),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.arena
            .iter()
            .enumerate()
            .filter(|(_, node)| !matches!(node, Node::Invalid))
            .map(|(pos, node)| (NodeId(pos as u32), node))
    }
}
