//! Navigation over the trees stored in an environment.

use crate::ir::environment::Environment;
use crate::ir::node::NodeId;

pub mod traversal;

impl Environment {
    /// Operands of a candidate followed by its subplans. A missing node has
    /// no children, the walk reports it when the node itself is visited.
    #[must_use]
    pub fn candidate_children(&self, id: NodeId) -> std::vec::IntoIter<NodeId> {
        let children = match self.get_candidate(id) {
            Ok(candidate) => {
                let mut children = candidate.children();
                children.extend(candidate.subplans.iter().map(|plan| plan.candidate));
                children
            }
            Err(_) => Vec::new(),
        };
        children.into_iter()
    }
}
