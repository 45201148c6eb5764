//! Structural questions about a relation tree.
//!
//! The optimizer asks whether a relation produces distinct rows over a key,
//! and whether it refers to, or depends through a subquery on, another
//! relation. Join ordering and distinct elimination are driven by the
//! answers.

use ahash::AHashSet;
use bitflags::bitflags;

use crate::errors::PlanError;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::relation::{Derived, Relation};
use crate::ir::scalar::Scalar;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Target: u32 {
        /// Rows are distinct over the key.
        const DISTINCT = 1 << 0;
        /// A subquery of the relation refers to the other relation.
        const DEPENDING = 1 << 1;
        /// An expression of the relation refers to the other relation.
        const REFERING = 1 << 2;
    }
}

#[derive(Clone, Debug, Default)]
pub struct Inquiry {
    pub target: Target,
    /// Columns for [`Target::DISTINCT`].
    pub key: Vec<NodeId>,
    /// Relation for [`Target::DEPENDING`] and [`Target::REFERING`].
    pub relation: Option<NodeId>,
}

impl Inquiry {
    #[must_use]
    pub fn distinct(key: Vec<NodeId>) -> Self {
        Inquiry {
            target: Target::DISTINCT,
            key,
            relation: None,
        }
    }

    #[must_use]
    pub fn references(relation: NodeId) -> Self {
        Inquiry {
            target: Target::DEPENDING | Target::REFERING,
            key: Vec::new(),
            relation: Some(relation),
        }
    }
}

/// Fields and subqueries met in a set of expressions.
#[derive(Default)]
struct References {
    relations: AHashSet<NodeId>,
    subqueries: Vec<NodeId>,
}

impl Environment {
    /// Answers the inquiry. The result holds the asked targets that are
    /// true for `relation`.
    ///
    /// # Errors
    /// - a node of the tree is not found
    pub fn inquiry(&self, relation: NodeId, inquiry: &Inquiry) -> Result<Target, PlanError> {
        let mut res = Target::empty();
        if inquiry.target.contains(Target::DISTINCT) && self.is_distinct(relation, &inquiry.key)? {
            res |= Target::DISTINCT;
        }
        let Some(other) = inquiry.relation else {
            return Ok(res);
        };
        let targets = self.subtree(other)?;
        if inquiry.target.contains(Target::REFERING) && self.is_refering(relation, &targets)? {
            res |= Target::REFERING;
        }
        if inquiry.target.contains(Target::DEPENDING) && self.is_depending(relation, &targets)? {
            res |= Target::DEPENDING;
        }
        Ok(res)
    }

    /// Relations of the tree rooted at `relation`, subqueries excluded.
    fn subtree(&self, relation: NodeId) -> Result<AHashSet<NodeId>, PlanError> {
        let mut res = AHashSet::new();
        let mut stack = vec![relation];
        while let Some(id) = stack.pop() {
            if res.insert(id) {
                stack.extend(self.get_relation(id)?.operands());
            }
        }
        Ok(res)
    }

    fn references(&self, relation: NodeId) -> Result<References, PlanError> {
        let node = self.get_relation(relation)?;
        let mut refs = References::default();
        let mut scalars = node.scalars();
        let mut predicates = node.predicates();
        while !scalars.is_empty() || !predicates.is_empty() {
            while let Some(id) = predicates.pop() {
                let predicate = self.get_predicate(id)?;
                scalars.extend(predicate.scalars());
                predicates.extend(predicate.predicates());
                refs.subqueries.extend(predicate.subqueries());
            }
            while let Some(id) = scalars.pop() {
                match self.get_scalar(id)? {
                    Scalar::Field(field) => {
                        refs.relations.insert(field.relation);
                    }
                    Scalar::SubQuery(subquery) => refs.subqueries.push(subquery.relation),
                    scalar => scalars.extend(scalar.children()),
                }
            }
        }
        Ok(refs)
    }

    /// Whether anything in the tree of `relation`, subqueries included,
    /// reads a column of `targets`.
    fn tree_refers(&self, relation: NodeId, targets: &AHashSet<NodeId>) -> Result<bool, PlanError> {
        for id in self.subtree(relation)? {
            let refs = self.references(id)?;
            if !refs.relations.is_disjoint(targets) {
                return Ok(true);
            }
            for subquery in refs.subqueries {
                if self.tree_refers(subquery, targets)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn is_refering(&self, relation: NodeId, targets: &AHashSet<NodeId>) -> Result<bool, PlanError> {
        self.tree_refers(relation, targets)
    }

    fn is_depending(&self, relation: NodeId, targets: &AHashSet<NodeId>) -> Result<bool, PlanError> {
        for id in self.subtree(relation)? {
            for subquery in self.references(id)?.subqueries {
                if self.tree_refers(subquery, targets)? {
                    return Ok(true);
                }
            }
            // A limit over a correlated operand has to be re-evaluated per
            // outer row, like a subquery.
            if let Relation::Limit(limit) = self.get_relation(id)? {
                if self.is_refering(limit.operand, targets)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn is_distinct(&self, relation: NodeId, key: &[NodeId]) -> Result<bool, PlanError> {
        let covers = |columns: &[NodeId]| columns.iter().all(|c| key.contains(c));
        let res = match self.get_relation(relation)? {
            Relation::Table(table) => {
                let pk = &table.schema.primary_key;
                !pk.is_empty() && pk.iter().all(|pos| key.contains(&table.columns[*pos]))
            }
            Relation::Distinct(distinct) => covers(&self.row_info(distinct.operand)?),
            Relation::Grouping(grouping) => covers(&grouping.keys),
            Relation::Union(union) => !union.all && covers(&union.columns),
            Relation::Filter(filter) => self.is_distinct(filter.operand, key)?,
            Relation::Sort(sort) => self.is_distinct(sort.operand, key)?,
            Relation::Limit(limit) => self.is_distinct(limit.operand, key)?,
            Relation::Projection(projection) => self.is_distinct(projection.operand, key)?,
            Relation::Derived(Derived {
                operand, columns, ..
            }) => {
                let inner = self.row_info(*operand)?;
                let mapped = columns
                    .iter()
                    .zip(inner)
                    .filter(|(field, _)| key.contains(field))
                    .map(|(_, scalar)| scalar)
                    .collect::<Vec<_>>();
                self.is_distinct(*operand, &mapped)?
            }
            Relation::Join(join) if join.kind.is_exists() => {
                self.is_distinct(join.operands[0], key)?
            }
            _ => false,
        };
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operator::{CompareOp, JoinKind};
    use crate::ir::value::Value;
    use crate::test_utils::{env, field};

    #[test]
    fn table_distinct_over_primary_key() {
        let mut env = env(false);
        let t1 = env.add_table("t1", None).unwrap();
        let a = field(&env, t1, 0);
        let b = field(&env, t1, 1);
        assert_eq!(
            env.inquiry(t1, &Inquiry::distinct(vec![a, b])).unwrap(),
            Target::DISTINCT
        );
        assert!(env.inquiry(t1, &Inquiry::distinct(vec![b])).unwrap().is_empty());

        let grouping = env.add_grouping(t1, vec![b], vec![]);
        assert!(env
            .inquiry(grouping, &Inquiry::distinct(vec![b]))
            .unwrap()
            .contains(Target::DISTINCT));
    }

    #[test]
    fn correlated_operand() {
        let mut env = env(false);
        let t1 = env.add_table("t1", None).unwrap();
        let t2 = env.add_table("t2", None).unwrap();
        let outer_a = field(&env, t1, 0);
        let inner_a = field(&env, t2, 0);
        let cmp = env
            .add_comparison(CompareOp::Eq, inner_a, outer_a)
            .unwrap();
        let filter = env.add_filter(t2, cmp);
        assert_eq!(
            env.inquiry(filter, &Inquiry::references(t1)).unwrap(),
            Target::REFERING
        );
        assert!(env.inquiry(t1, &Inquiry::references(filter)).unwrap().is_empty());

        // The same condition hidden behind a scalar subquery makes a dependency.
        let one = env.add_constant(Value::Integer(1));
        let proj = env.add_projection(filter, vec![one], vec!["x".into()]).unwrap();
        let subquery = env.add_subquery(proj).unwrap();
        let outer_cmp = env.add_comparison(CompareOp::Lt, outer_a, subquery).unwrap();
        let t3 = env.add_table("t2", None).unwrap();
        let outer = env.add_filter(t3, outer_cmp);
        let res = env.inquiry(outer, &Inquiry::references(t1)).unwrap();
        assert!(res.contains(Target::DEPENDING | Target::REFERING));

        let join = env
            .add_join(JoinKind::Exists, vec![t1, filter], None)
            .unwrap();
        assert_eq!(
            env.inquiry(join, &Inquiry::distinct(vec![outer_a])).unwrap(),
            Target::DISTINCT
        );
    }
}
