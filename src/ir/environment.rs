//! Per-statement planning context.
//!
//! The environment owns every node registered during one planning pass,
//! the stack of name scopes, the expression caches and the status stack.
//! It is confined to the thread planning the statement.

use ahash::AHashSet;
use scopeguard::ScopeGuard;
use smol_str::{format_smolstr, SmolStr};
use std::rc::Rc;

use crate::config::PlannerConfig;
use crate::errors::{Entity, PlanError};
use crate::frontend::statement::ValueExpression;
use crate::ir::boolean::BooleanAlgebra;
use crate::ir::name_map::{NameMap, RowElement};
use crate::ir::node::{Node, NodeId, Nodes};
use crate::ir::status::Status;
use crate::schema::Metadata;

/// Guard returned by the status and scope pushes. Dereferences to the
/// environment and restores the previous state when dropped, on every
/// exit path including `?`.
pub type EnvGuard<'e> = ScopeGuard<&'e mut Environment, fn(&'e mut Environment)>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeKind {
    /// Query specification with its own name map.
    Query,
    /// Joined table. Shares the name map of the enclosing scope.
    JoinedTable,
}

#[derive(Clone, Debug, Default)]
struct GroupingState {
    columns: Vec<NodeId>,
    aggregates: Vec<NodeId>,
}

#[derive(Clone, Debug)]
struct NameScope {
    map: usize,
    outer_references: Vec<NodeId>,
    grouping: Option<GroupingState>,
    nulls: KnownNulls,
}

/// Scalars the top predicates of a scope have proven NULL or not NULL in
/// every row they let through.
#[derive(Clone, Debug, Default)]
pub struct KnownNulls {
    null: AHashSet<NodeId>,
    not_null: AHashSet<NodeId>,
}

impl KnownNulls {
    /// `Some(true)` when the scalar is known to be NULL, `Some(false)` when
    /// it is known not to be.
    #[must_use]
    pub fn is_null(&self, scalar: NodeId) -> Option<bool> {
        if self.null.contains(&scalar) {
            Some(true)
        } else if self.not_null.contains(&scalar) {
            Some(false)
        } else {
            None
        }
    }
}

pub struct Environment {
    nodes: Nodes,
    config: PlannerConfig,
    algebra: BooleanAlgebra,
    metadata: Rc<dyn Metadata>,
    maps: Vec<NameMap>,
    scopes: Vec<NameScope>,
    status: Vec<Status>,
    join_candidates: usize,
    parameters: usize,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("nodes", &self.nodes.len())
            .field("scopes", &self.scopes.len())
            .field("status", &self.current_status())
            .field("cascade", &self.has_cascade())
            .finish()
    }
}

impl Environment {
    #[must_use]
    pub fn new(metadata: Rc<dyn Metadata>, config: PlannerConfig) -> Self {
        let algebra = BooleanAlgebra::new(config.no_unknown);
        Self {
            nodes: Nodes::default(),
            config,
            algebra,
            metadata,
            maps: Vec::new(),
            scopes: Vec::new(),
            status: Vec::new(),
            join_candidates: 0,
            parameters: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    #[must_use]
    pub fn algebra(&self) -> &BooleanAlgebra {
        &self.algebra
    }

    /// Whether the statement runs over cascaded back-end servers.
    #[inline(always)]
    #[must_use]
    pub fn has_cascade(&self) -> bool {
        self.config.has_cascade()
    }

    #[must_use]
    pub fn metadata(&self) -> Rc<dyn Metadata> {
        Rc::clone(&self.metadata)
    }

    #[must_use]
    pub fn nodes(&self) -> &Nodes {
        &self.nodes
    }

    /// Registers a freshly built node and returns its identifier.
    pub fn register(&mut self, node: impl Into<Node>) -> NodeId {
        self.nodes.push(node.into())
    }

    /// Removes a node that is no longer needed, e.g. a rejected candidate.
    ///
    /// # Errors
    /// - the node is not registered
    pub fn erase(&mut self, id: NodeId) -> Result<Node, PlanError> {
        self.nodes
            .erase(id)
            .ok_or_else(|| PlanError::NotFound(Entity::Node, format_smolstr!("{id}")))
    }

    /// # Errors
    /// - the node is not registered
    pub fn get_node(&self, id: NodeId) -> Result<&Node, PlanError> {
        self.nodes
            .get(id)
            .ok_or_else(|| PlanError::NotFound(Entity::Node, format_smolstr!("{id}")))
    }

    /// # Errors
    /// - the node is not registered
    pub fn get_node_mut(&mut self, id: NodeId) -> Result<&mut Node, PlanError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| PlanError::NotFound(Entity::Node, format_smolstr!("{id}")))
    }

    pub(crate) fn note_parameter(&mut self, index: usize) {
        self.parameters = self.parameters.max(index + 1);
    }

    /// Number of parameters the statement expects.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.parameters
    }

    /// Counts one more join order evaluation and reports whether the
    /// configured budget is exhausted.
    pub fn check_join_max_candidates(&mut self) -> bool {
        self.join_candidates += 1;
        self.join_candidates > self.config.join_max_candidates
    }

    ////////////////////////////////////////////////////////////////////////////
    // Status stack
    ////////////////////////////////////////////////////////////////////////////

    #[must_use]
    pub fn current_status(&self) -> Status {
        self.status.last().copied().unwrap_or_default()
    }

    /// Whether every flag of `status` is set.
    #[must_use]
    pub fn check_status(&self, status: Status) -> bool {
        self.current_status().contains(status)
    }

    /// Adds `status` to the current set, or replaces the set when `status`
    /// contains [`Status::RESET`].
    pub fn push_status(&mut self, status: Status) -> EnvGuard<'_> {
        let next = if self.status.is_empty() || status.contains(Status::RESET) {
            status.difference(Status::RESET)
        } else {
            self.current_status() | status
        };
        self.status.push(next);
        scopeguard::guard(self, Environment::pop_status as fn(&mut Environment))
    }

    /// Clears `status` from the current set.
    pub fn erase_status(&mut self, status: Status) -> EnvGuard<'_> {
        let next = self.current_status().difference(status);
        self.status.push(next);
        scopeguard::guard(self, Environment::pop_status as fn(&mut Environment))
    }

    fn pop_status(&mut self) {
        self.status.pop();
    }

    ////////////////////////////////////////////////////////////////////////////
    // Name scopes
    ////////////////////////////////////////////////////////////////////////////

    /// Opens a name scope. Joined tables share the map of the enclosing scope.
    pub fn push_name_scope(&mut self, kind: ScopeKind) -> EnvGuard<'_> {
        let map = match (kind, self.scopes.last()) {
            (ScopeKind::JoinedTable, Some(outer)) => outer.map,
            _ => {
                self.maps.push(NameMap::default());
                self.maps.len() - 1
            }
        };
        self.scopes.push(NameScope {
            map,
            outer_references: Vec::new(),
            grouping: None,
            nulls: KnownNulls::default(),
        });
        scopeguard::guard(self, Environment::pop_name_scope as fn(&mut Environment))
    }

    fn pop_name_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            let shared = self.scopes.iter().any(|outer| outer.map == scope.map);
            if !shared && scope.map + 1 == self.maps.len() {
                self.maps.pop();
            }
        }
    }

    #[must_use]
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    fn current_scope(&self) -> Result<&NameScope, PlanError> {
        self.scopes
            .last()
            .ok_or_else(|| PlanError::Unexpected(Entity::Scope, Some("no open name scope".into())))
    }

    fn current_scope_mut(&mut self) -> Result<&mut NameScope, PlanError> {
        self.scopes
            .last_mut()
            .ok_or_else(|| PlanError::Unexpected(Entity::Scope, Some("no open name scope".into())))
    }

    fn current_map(&self) -> Result<&NameMap, PlanError> {
        let index = self.current_scope()?.map;
        Ok(&self.maps[index])
    }

    fn current_map_mut(&mut self) -> Result<&mut NameMap, PlanError> {
        let index = self.current_scope()?.map;
        Ok(&mut self.maps[index])
    }

    /// Makes the relation and its columns visible in the current scope.
    ///
    /// # Errors
    /// - no open scope
    /// - the correlation name is bound to another relation in this scope
    pub fn add_relation_names(
        &mut self,
        correlation: Option<SmolStr>,
        relation: NodeId,
        columns: Vec<(SmolStr, RowElement)>,
    ) -> Result<(), PlanError> {
        self.current_map_mut()?
            .add_relation(correlation, relation, columns)
    }

    /// Relations bound in the current scope, in binding order. A
    /// correlation name narrows the result to the relation it denotes.
    ///
    /// # Errors
    /// - no open scope
    /// - the correlation name is not bound in the current scope
    pub fn scope_relations(&self, correlation: Option<&str>) -> Result<Vec<NodeId>, PlanError> {
        let map = self.current_map()?;
        match correlation {
            Some(name) => map
                .relation(name)
                .map(|relation| vec![relation])
                .ok_or_else(|| PlanError::NotFound(Entity::Relation, format_smolstr!("{name}"))),
            None => Ok(map.relations().to_vec()),
        }
    }

    /// Resolves a column name, innermost scope first.
    ///
    /// A column found in an outer scope is recorded as an outer reference
    /// of every scope in between. While [`Status::GROUP_BY`] is set the
    /// column is recorded as a grouping column of the current scope.
    ///
    /// # Errors
    /// - the name is not bound in any scope
    /// - the name is ambiguous in the scope it is found in
    pub fn search_scalar(
        &mut self,
        qualifier: Option<&str>,
        name: &str,
    ) -> Result<RowElement, PlanError> {
        for level in (0..self.scopes.len()).rev() {
            let map_index = self.scopes[level].map;
            let map = &self.maps[map_index];
            let found = match qualifier {
                Some(q) => map.search_qualified(q, name)?,
                None => map.search(name)?,
            };
            let Some(element) = found else {
                continue;
            };
            for scope in &mut self.scopes[level + 1..] {
                if scope.map != map_index && !scope.outer_references.contains(&element.scalar) {
                    scope.outer_references.push(element.scalar);
                }
            }
            if self.check_status(Status::GROUP_BY) {
                self.add_grouping_column(element.scalar)?;
            }
            return Ok(element);
        }
        Err(PlanError::ColumnNotFound(match qualifier {
            Some(q) => format_smolstr!("{q}.{name}"),
            None => format_smolstr!("{name}"),
        }))
    }

    /// Columns of enclosing scopes referenced from the current scope.
    ///
    /// # Errors
    /// - no open scope
    pub fn outer_references(&self) -> Result<&[NodeId], PlanError> {
        Ok(&self.current_scope()?.outer_references)
    }

    /// # Errors
    /// - no open scope
    pub fn is_outer_reference(&self, scalar: NodeId) -> Result<bool, PlanError> {
        Ok(self.outer_references()?.contains(&scalar))
    }

    /// # Errors
    /// - no open scope
    pub fn search_cached_scalar(
        &self,
        relation: NodeId,
        expr: &ValueExpression,
    ) -> Result<Option<NodeId>, PlanError> {
        Ok(self
            .current_map()?
            .get_scalar(&(relation, expr.clone())))
    }

    /// # Errors
    /// - no open scope
    pub fn add_cached_scalar(
        &mut self,
        relation: NodeId,
        expr: &ValueExpression,
        scalar: NodeId,
    ) -> Result<(), PlanError> {
        self.current_map_mut()?
            .add_scalar((relation, expr.clone()), scalar);
        Ok(())
    }

    /// Predicate cache lookup. Only the innermost scope is searched.
    ///
    /// # Errors
    /// - no open scope
    pub fn search_predicate(
        &self,
        relation: NodeId,
        expr: &ValueExpression,
    ) -> Result<Option<NodeId>, PlanError> {
        Ok(self
            .current_map()?
            .get_predicate(&(relation, expr.clone())))
    }

    /// Caches a predicate unless it depends on parameters.
    ///
    /// # Errors
    /// - no open scope
    pub fn add_predicate(
        &mut self,
        relation: NodeId,
        expr: &ValueExpression,
        predicate: NodeId,
    ) -> Result<(), PlanError> {
        if expr.has_parameters() {
            return Ok(());
        }
        self.current_map_mut()?
            .add_predicate((relation, expr.clone()), predicate);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Grouping
    ////////////////////////////////////////////////////////////////////////////

    /// Marks the current scope as grouped.
    ///
    /// # Errors
    /// - no open scope
    pub fn begin_grouping(&mut self) -> Result<(), PlanError> {
        let scope = self.current_scope_mut()?;
        if scope.grouping.is_none() {
            scope.grouping = Some(GroupingState::default());
        }
        Ok(())
    }

    #[must_use]
    pub fn is_grouping(&self) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.grouping.is_some())
    }

    /// # Errors
    /// - no open scope
    pub fn add_grouping_column(&mut self, scalar: NodeId) -> Result<(), PlanError> {
        let scope = self.current_scope_mut()?;
        let grouping = scope.grouping.get_or_insert_with(GroupingState::default);
        if !grouping.columns.contains(&scalar) {
            grouping.columns.push(scalar);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_grouping_column(&self, scalar: NodeId) -> bool {
        self.scopes
            .last()
            .and_then(|scope| scope.grouping.as_ref())
            .is_some_and(|grouping| grouping.columns.contains(&scalar))
    }

    /// # Errors
    /// - no open scope
    pub fn add_aggregate(&mut self, aggregate: NodeId) -> Result<(), PlanError> {
        let scope = self.current_scope_mut()?;
        let grouping = scope.grouping.get_or_insert_with(GroupingState::default);
        if !grouping.aggregates.contains(&aggregate) {
            grouping.aggregates.push(aggregate);
        }
        Ok(())
    }

    /// Set functions met in the current scope so far.
    #[must_use]
    pub fn aggregates(&self) -> Vec<NodeId> {
        self.scopes
            .last()
            .and_then(|scope| scope.grouping.as_ref())
            .map(|grouping| grouping.aggregates.clone())
            .unwrap_or_default()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Null knowledge
    ////////////////////////////////////////////////////////////////////////////

    /// Records what the current status tells about the scalar. Facts live
    /// in the current name scope and are dropped with it.
    pub fn note_nullability(&mut self, scalar: NodeId) {
        let status = self.current_status();
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        if status.contains(Status::KNOWN_NULL) {
            scope.nulls.null.insert(scalar);
        }
        if status.contains(Status::KNOWN_NOT_NULL) {
            scope.nulls.not_null.insert(scalar);
        }
    }

    /// Null facts of the current name scope.
    #[must_use]
    pub fn known_nulls(&self) -> KnownNulls {
        self.scopes
            .last()
            .map(|scope| scope.nulls.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_known_null(&self, scalar: NodeId) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.nulls.null.contains(&scalar))
    }

    #[must_use]
    pub fn is_known_not_null(&self, scalar: NodeId) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.nulls.not_null.contains(&scalar))
    }
}
