//! Correlation and column name bindings of one query block.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};

use crate::errors::PlanError;
use crate::frontend::statement::ValueExpression;
use crate::ir::node::NodeId;

/// Column of a relation visible by name.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct RowElement {
    pub relation: NodeId,
    pub position: usize,
    /// Scalar node standing for the column.
    pub scalar: NodeId,
}

/// Expression cache key: the relation the expression is analyzed over and
/// the parse tree of the expression itself.
///
/// Structurally equal parse trees hash and compare equal, so two identical
/// sub-expressions in one relation scope map to one node.
pub type ExpressionKey = (NodeId, ValueExpression);

#[derive(Clone, Debug, Default)]
pub struct NameMap {
    correlations: AHashMap<SmolStr, NodeId>,
    /// Relations in the order they were bound.
    relations: Vec<NodeId>,
    columns: AHashMap<NodeId, AHashMap<SmolStr, RowElement>>,
    /// Names bound twice inside one relation.
    ambiguous: AHashSet<(NodeId, SmolStr)>,
    scalars: AHashMap<ExpressionKey, NodeId>,
    predicates: AHashMap<ExpressionKey, NodeId>,
}

impl NameMap {
    /// Binds a relation and its named columns.
    ///
    /// # Errors
    /// - the correlation name is already bound to another relation
    pub fn add_relation(
        &mut self,
        correlation: Option<SmolStr>,
        relation: NodeId,
        columns: Vec<(SmolStr, RowElement)>,
    ) -> Result<(), PlanError> {
        if let Some(name) = correlation {
            match self.correlations.get(&name) {
                Some(bound) if *bound != relation => {
                    return Err(PlanError::DuplicateQualifiedName(name));
                }
                Some(_) => {}
                None => {
                    self.correlations.insert(name, relation);
                }
            }
        }
        if !self.relations.contains(&relation) {
            self.relations.push(relation);
        }
        let elements = self.columns.entry(relation).or_default();
        for (name, element) in columns {
            if let Some(existing) = elements.get(&name) {
                if existing.scalar != element.scalar {
                    self.ambiguous.insert((relation, name));
                }
                continue;
            }
            elements.insert(name, element);
        }
        Ok(())
    }

    #[must_use]
    pub fn relation(&self, correlation: &str) -> Option<NodeId> {
        self.correlations.get(correlation).copied()
    }

    #[must_use]
    pub fn relations(&self) -> &[NodeId] {
        &self.relations
    }

    /// Column of the given relation.
    ///
    /// # Errors
    /// - the name is bound twice in the relation
    pub fn get(&self, relation: NodeId, name: &str) -> Result<Option<RowElement>, PlanError> {
        if self.ambiguous.contains(&(relation, SmolStr::from(name))) {
            return Err(PlanError::DuplicateQualifiedName(SmolStr::from(name)));
        }
        Ok(self
            .columns
            .get(&relation)
            .and_then(|elements| elements.get(name))
            .copied())
    }

    /// Unqualified lookup among every relation of the map.
    ///
    /// # Errors
    /// - more than one relation has a column with this name
    pub fn search(&self, name: &str) -> Result<Option<RowElement>, PlanError> {
        let mut found: Option<RowElement> = None;
        for relation in &self.relations {
            if let Some(element) = self.get(*relation, name)? {
                if found.is_some() {
                    return Err(PlanError::DuplicateQualifiedName(format_smolstr!("{name}")));
                }
                found = Some(element);
            }
        }
        Ok(found)
    }

    /// Qualified lookup.
    ///
    /// Returns `Ok(None)` when the qualifier is not bound here, so the
    /// caller may continue with an outer map.
    ///
    /// # Errors
    /// - the qualifier is bound here but has no such column
    pub fn search_qualified(
        &self,
        qualifier: &str,
        name: &str,
    ) -> Result<Option<RowElement>, PlanError> {
        let Some(relation) = self.relation(qualifier) else {
            return Ok(None);
        };
        match self.get(relation, name)? {
            Some(element) => Ok(Some(element)),
            None => Err(PlanError::ColumnNotFound(format_smolstr!(
                "{qualifier}.{name}"
            ))),
        }
    }

    #[must_use]
    pub fn get_scalar(&self, key: &ExpressionKey) -> Option<NodeId> {
        self.scalars.get(key).copied()
    }

    pub fn add_scalar(&mut self, key: ExpressionKey, scalar: NodeId) {
        self.scalars.entry(key).or_insert(scalar);
    }

    #[must_use]
    pub fn get_predicate(&self, key: &ExpressionKey) -> Option<NodeId> {
        self.predicates.get(key).copied()
    }

    pub fn add_predicate(&mut self, key: ExpressionKey, predicate: NodeId) {
        self.predicates.entry(key).or_insert(predicate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn element(relation: u32, position: usize, scalar: u32) -> RowElement {
        RowElement {
            relation: NodeId(relation),
            position,
            scalar: NodeId(scalar),
        }
    }

    #[test]
    fn correlation_rebinding() {
        let mut map = NameMap::default();
        map.add_relation(Some("t".into()), NodeId(1), vec![]).unwrap();
        // Binding the same relation again is harmless.
        map.add_relation(Some("t".into()), NodeId(1), vec![]).unwrap();
        let err = map
            .add_relation(Some("t".into()), NodeId(2), vec![])
            .unwrap_err();
        assert_eq!(err, PlanError::DuplicateQualifiedName("t".into()));
        assert_eq!(map.relation("t"), Some(NodeId(1)));
    }

    #[test]
    fn unqualified_lookup_must_be_unique() {
        let mut map = NameMap::default();
        map.add_relation(
            Some("t1".into()),
            NodeId(1),
            vec![("a".into(), element(1, 0, 10)), ("b".into(), element(1, 1, 11))],
        )
        .unwrap();
        map.add_relation(
            Some("t2".into()),
            NodeId(2),
            vec![("a".into(), element(2, 0, 20))],
        )
        .unwrap();

        assert_eq!(map.search("b").unwrap(), Some(element(1, 1, 11)));
        assert_eq!(map.search("z").unwrap(), None);
        assert_eq!(
            map.search("a").unwrap_err(),
            PlanError::DuplicateQualifiedName("a".into())
        );
        assert_eq!(
            map.search_qualified("t2", "a").unwrap(),
            Some(element(2, 0, 20))
        );
        assert_eq!(map.search_qualified("t3", "a").unwrap(), None);
        assert_eq!(
            map.search_qualified("t2", "b").unwrap_err().category(),
            "ColumnNotFound"
        );
    }

    #[test]
    fn one_element_per_name() {
        let mut map = NameMap::default();
        map.add_relation(
            None,
            NodeId(3),
            vec![("x".into(), element(3, 0, 30)), ("x".into(), element(3, 1, 31))],
        )
        .unwrap();
        assert_eq!(map.search("x").unwrap_err().category(), "DuplicateQualifiedName");
    }
}
