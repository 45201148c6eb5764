//! Bottom-up construction of access plan candidates for a single server.

use smol_str::format_smolstr;

use crate::errors::{Entity, PlanError};
use crate::ir::candidate::{CandidateKind, DmlOp, JoinAlgorithm, SortKind, SubPlan};
use crate::ir::cost::Cost;
use crate::ir::distributed;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::{CompareOp, JoinKind, Logical};
use crate::ir::predicate::{Comparison, Predicate};
use crate::ir::relation::inquiry::Inquiry;
use crate::ir::relation::{Filter, Join, Relation, Table};
use crate::ir::scalar::Scalar;
use crate::ir::source::Source;
use crate::schema::DEFAULT_ROW_COUNT;
use crate::tlog;

impl Environment {
    /// Builds the cheapest candidate for the relation. Over cascaded servers
    /// the distributed planner decides first.
    ///
    /// # Errors
    /// - the relation needs a physical operator that has no implementation
    pub fn create_access_plan(&mut self, relation: NodeId, source: &Source) -> Result<NodeId, PlanError> {
        if self.has_cascade() {
            return distributed::create_access_plan(self, relation, source);
        }
        self.create_local_access_plan(relation, source)
    }

    pub(crate) fn create_local_access_plan(
        &mut self,
        relation: NodeId,
        source: &Source,
    ) -> Result<NodeId, PlanError> {
        let node = self.get_relation(relation)?.clone();
        let mut consumed = false;
        let candidate = match node {
            Relation::Table(table) => {
                consumed = true;
                self.plan_table(relation, &table, source.predicate)?
            }
            Relation::Filter(filter) => {
                consumed = true;
                self.plan_filter(relation, &filter, source)?
            }
            Relation::Join(join) => {
                consumed = join.kind == JoinKind::Inner;
                self.plan_join(relation, &join, source)?
            }
            Relation::Projection(projection) => {
                let operand = self.create_access_plan(projection.operand, &source.passing_limit())?;
                let cost = Cost::computed(&self.candidate_cost(operand)?);
                self.add_candidate(
                    relation,
                    cost,
                    CandidateKind::Projection {
                        operand,
                        columns: projection.columns,
                    },
                )
            }
            Relation::Derived(derived) => {
                let operand = self.create_access_plan(derived.operand, &source.passing_limit())?;
                let cost = self.candidate_cost(operand)?;
                self.add_candidate(relation, cost, CandidateKind::Rename { operand })
            }
            Relation::Grouping(grouping) => {
                let operand = self.create_access_plan(grouping.operand, &source.for_operand())?;
                let cost = Cost::grouping(&self.candidate_cost(operand)?, !grouping.keys.is_empty());
                self.add_candidate(
                    relation,
                    cost,
                    CandidateKind::Grouping {
                        operand,
                        keys: grouping.keys,
                        aggregates: grouping.aggregates,
                        replacements: Vec::new(),
                    },
                )
            }
            Relation::Sort(sort) => {
                let operand = self.create_access_plan(sort.operand, &source.for_operand())?;
                let kind = match source.limit.and_then(|limit| limit.keep()) {
                    Some(limit) => SortKind::Partial { limit },
                    None => SortKind::Normal,
                };
                self.create_sort_candidate(relation, operand, sort.keys, kind)?
            }
            Relation::Limit(limit) => {
                let spec = self.limit_spec(limit.limit, limit.offset)?;
                let operand =
                    self.create_access_plan(limit.operand, &source.for_operand().with_limit(spec))?;
                let cost = Cost::limit(
                    &self.candidate_cost(operand)?,
                    spec.count.map(|count| count as f64),
                );
                self.add_candidate(
                    relation,
                    cost,
                    CandidateKind::Limit {
                        operand,
                        limit: limit.limit,
                        offset: limit.offset,
                    },
                )
            }
            Relation::Distinct(distinct) => {
                let operand = self.create_access_plan(distinct.operand, &source.for_operand())?;
                let cost = Cost::distinct(&self.candidate_cost(operand)?);
                self.add_candidate(relation, cost, CandidateKind::Distinct { operand })
            }
            Relation::Union(union) => {
                let mut operands = Vec::with_capacity(union.operands.len());
                let mut costs = Vec::with_capacity(union.operands.len());
                for operand in &union.operands {
                    let candidate = self.create_access_plan(*operand, &source.for_operand())?;
                    costs.push(self.candidate_cost(candidate)?);
                    operands.push(candidate);
                }
                let mut cost = Cost::union(&costs);
                if !union.all {
                    cost = Cost::distinct(&cost);
                }
                self.add_candidate(
                    relation,
                    cost,
                    CandidateKind::Union {
                        operands,
                        all: union.all,
                    },
                )
            }
            Relation::ValueList(values) => {
                let cost = Cost::scan(values.rows.len() as f64);
                self.add_candidate(relation, cost, CandidateKind::Values { rows: values.rows })
            }
            Relation::BulkInput(bulk) => self.add_candidate(
                relation,
                Cost::scan(DEFAULT_ROW_COUNT as f64),
                CandidateKind::BulkInput { path: bulk.path },
            ),
            Relation::BulkOutput(bulk) => {
                let operand = self.create_access_plan(bulk.operand, &source.for_operand())?;
                let cost = self.candidate_cost(operand)?;
                self.add_candidate(
                    relation,
                    cost,
                    CandidateKind::BulkOutput {
                        operand,
                        path: bulk.path,
                    },
                )
            }
            Relation::Insert(insert) => self.plan_dml(
                relation,
                insert.table.name.clone(),
                DmlOp::Insert {
                    columns: insert.columns,
                },
                insert.operand,
            )?,
            Relation::Update(update) => self.plan_dml(
                relation,
                update.table.name.clone(),
                DmlOp::Update {
                    assignments: update.assignments,
                },
                update.operand,
            )?,
            Relation::Delete(delete) => {
                self.plan_dml(relation, delete.table.name.clone(), DmlOp::Delete, delete.operand)?
            }
        };
        self.attach_subplans(candidate)?;
        match source.predicate {
            Some(predicate) if !consumed => self.add_filter_candidate(relation, candidate, predicate),
            _ => Ok(candidate),
        }
    }

    pub(crate) fn add_filter_candidate(
        &mut self,
        relation: NodeId,
        operand: NodeId,
        predicate: NodeId,
    ) -> Result<NodeId, PlanError> {
        let rate = self.selectivity(predicate)?;
        let cost = Cost::computed(&self.candidate_cost(operand)?).filtered(rate);
        let candidate = self.add_candidate(relation, cost, CandidateKind::Filter { operand, predicate });
        self.attach_subplans(candidate)?;
        Ok(candidate)
    }

    fn plan_dml(
        &mut self,
        relation: NodeId,
        table: smol_str::SmolStr,
        op: DmlOp,
        operand: NodeId,
    ) -> Result<NodeId, PlanError> {
        let operand = self.create_access_plan(operand, &Source::new())?;
        let cost = Cost::computed(&self.candidate_cost(operand)?);
        Ok(self.add_candidate(relation, cost, CandidateKind::Dml { table, op, operand }))
    }

    fn plan_table(
        &mut self,
        relation: NodeId,
        table: &Table,
        predicate: Option<NodeId>,
    ) -> Result<NodeId, PlanError> {
        let rows = table.schema.row_count as f64;
        let (cost, lookup) = match predicate {
            Some(predicate) if self.is_key_lookup(relation, table, predicate)? => {
                (Cost::index_lookup(rows), true)
            }
            Some(predicate) => (Cost::scan(rows).filtered(self.selectivity(predicate)?), false),
            None => (Cost::scan(rows), false),
        };
        Ok(self.add_candidate(
            relation,
            cost,
            CandidateKind::Scan {
                table: table.schema.name.clone(),
                predicate,
                lookup,
            },
        ))
    }

    /// Whether the predicate fixes every primary key column to a value not
    /// coming from the table itself.
    fn is_key_lookup(&self, relation: NodeId, table: &Table, predicate: NodeId) -> Result<bool, PlanError> {
        let pk = table
            .schema
            .primary_key
            .iter()
            .map(|pos| table.columns[*pos])
            .collect::<Vec<_>>();
        if pk.is_empty() {
            return Ok(false);
        }
        let conjuncts = match self.get_predicate(predicate)? {
            Predicate::Combinator(combinator) if combinator.op == Logical::And => {
                combinator.operands.clone()
            }
            _ => vec![predicate],
        };
        let mut covered = Vec::new();
        for conjunct in conjuncts {
            let Predicate::Comparison(Comparison {
                op: CompareOp::Eq,
                left,
                right,
            }) = self.get_predicate(conjunct)?
            else {
                continue;
            };
            for (key, other) in [(*left, *right), (*right, *left)] {
                if pk.contains(&key) && !self.scalar_refers_to(other, relation)? {
                    covered.push(key);
                }
            }
        }
        Ok(pk.iter().all(|key| covered.contains(key)))
    }

    fn scalar_refers_to(&self, scalar: NodeId, relation: NodeId) -> Result<bool, PlanError> {
        match self.get_scalar(scalar)? {
            Scalar::Field(field) => Ok(field.relation == relation),
            Scalar::SubQuery(_) | Scalar::Aggregation(_) => Ok(true),
            other => {
                for child in other.children() {
                    if self.scalar_refers_to(child, relation)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn plan_filter(&mut self, relation: NodeId, filter: &Filter, source: &Source) -> Result<NodeId, PlanError> {
        let mut pushed = source.for_operand();
        pushed.predicate = source.predicate;
        pushed.add_predicate(self, filter.predicate)?;
        let accepts = match self.get_relation(filter.operand)? {
            Relation::Table(_) | Relation::Filter(_) => true,
            Relation::Join(join) => join.kind == JoinKind::Inner,
            _ => false,
        };
        if accepts {
            return self.create_access_plan(filter.operand, &pushed);
        }
        let operand = self.create_access_plan(filter.operand, &source.for_operand())?;
        let predicate = pushed.take_predicate().ok_or_else(|| {
            PlanError::Unexpected(Entity::Predicate, Some("filter without predicate".into()))
        })?;
        self.add_filter_candidate(relation, operand, predicate)
    }

    fn plan_join(&mut self, relation: NodeId, join: &Join, source: &Source) -> Result<NodeId, PlanError> {
        match join.kind {
            JoinKind::FullOuter => Err(PlanError::NotSupported(
                Entity::Join,
                Some("full outer join".into()),
            )),
            JoinKind::Exists | JoinKind::NotExists => {
                let outer = self.create_access_plan(join.operands[0], &source.for_operand())?;
                let inner_source = source.for_inner(outer, join.predicate).with_exists(true);
                let inner = self.create_access_plan(join.operands[1], &inner_source)?;
                self.create_join_candidate(relation, JoinAlgorithm::Exists, join.kind, outer, inner, None)
            }
            JoinKind::LeftOuter | JoinKind::RightOuter => {
                let (outer, inner) = if join.kind == JoinKind::LeftOuter {
                    (join.operands[0], join.operands[1])
                } else {
                    (join.operands[1], join.operands[0])
                };
                self.plan_nested_loop(relation, join.kind, outer, inner, join.predicate, source)
            }
            JoinKind::Inner => {
                let mut predicate = join.predicate;
                if let Some(pushed) = source.predicate {
                    predicate = Some(match predicate {
                        Some(own) => self.add_combinator(Logical::And, vec![own, pushed])?,
                        None => pushed,
                    });
                }
                if let [left, right] = join.operands.as_slice() {
                    self.plan_dyadic(relation, *left, *right, predicate, source)
                } else {
                    self.plan_nadic(relation, &join.operands, predicate, source)
                }
            }
        }
    }

    fn refers(&self, relation: NodeId, other: NodeId) -> Result<bool, PlanError> {
        Ok(!self.inquiry(relation, &Inquiry::references(other))?.is_empty())
    }

    /// Inner join of two operands: both orders are costed unless the order
    /// is fixed by a correlation or the exploration budget.
    fn plan_dyadic(
        &mut self,
        relation: NodeId,
        left: NodeId,
        right: NodeId,
        predicate: Option<NodeId>,
        source: &Source,
    ) -> Result<NodeId, PlanError> {
        let right_first = self.refers(left, right)?;
        let fixed = right_first || self.refers(right, left)? || self.check_join_max_candidates();
        let (outer, inner) = if right_first { (right, left) } else { (left, right) };
        let first = self.plan_nested_loop(relation, JoinKind::Inner, outer, inner, predicate, source)?;
        if fixed {
            return Ok(first);
        }
        let second = self.plan_nested_loop(relation, JoinKind::Inner, inner, outer, predicate, source)?;
        let first_cost = self.candidate_cost(first)?;
        let second_cost = self.candidate_cost(second)?;
        tlog!(
            Debug,
            "join {relation}: {outer} first costs {}, {inner} first costs {}",
            first_cost.total,
            second_cost.total
        );
        if second_cost.is_cheaper_than(&first_cost) {
            self.erase_candidate(first)?;
            Ok(second)
        } else {
            self.erase_candidate(second)?;
            Ok(first)
        }
    }

    /// Left-deep nested loops in the written order. The predicate is
    /// checked by the last join, where every operand is bound.
    fn plan_nadic(
        &mut self,
        relation: NodeId,
        operands: &[NodeId],
        predicate: Option<NodeId>,
        source: &Source,
    ) -> Result<NodeId, PlanError> {
        let Some((first, rest)) = operands.split_first() else {
            return Err(PlanError::Unexpected(
                Entity::Join,
                Some(format_smolstr!("join {relation} without operands")),
            ));
        };
        let mut outer = self.create_access_plan(*first, &source.for_operand())?;
        for (pos, operand) in rest.iter().enumerate() {
            let last = pos + 1 == rest.len();
            let pushed = if last { predicate } else { None };
            let inner_relation = self.get_relation(*operand)?;
            let push_into_inner = pushed.is_some() && accepts_predicate(inner_relation);
            let inner_source = source.for_inner(outer, if push_into_inner { pushed } else { None });
            let inner = self.create_access_plan(*operand, &inner_source)?;
            let join_predicate = if push_into_inner { None } else { pushed };
            outer = self.create_join_candidate(
                relation,
                JoinAlgorithm::NestedLoop,
                JoinKind::Inner,
                outer,
                inner,
                join_predicate,
            )?;
        }
        Ok(outer)
    }

    fn plan_nested_loop(
        &mut self,
        relation: NodeId,
        kind: JoinKind,
        outer: NodeId,
        inner: NodeId,
        predicate: Option<NodeId>,
        source: &Source,
    ) -> Result<NodeId, PlanError> {
        let outer_candidate = self.create_access_plan(outer, &source.for_operand())?;
        let push_into_inner = predicate.is_some() && accepts_predicate(self.get_relation(inner)?);
        let inner_source = source.for_inner(outer_candidate, if push_into_inner { predicate } else { None });
        let inner_candidate = self.create_access_plan(inner, &inner_source)?;
        let join_predicate = if push_into_inner { None } else { predicate };
        self.create_join_candidate(
            relation,
            JoinAlgorithm::NestedLoop,
            kind,
            outer_candidate,
            inner_candidate,
            join_predicate,
        )
    }

    /// Plans the subqueries referenced by the expressions of a candidate.
    pub(crate) fn attach_subplans(&mut self, candidate: NodeId) -> Result<(), PlanError> {
        let node = self.get_candidate(candidate)?;
        if !node.subplans.is_empty() {
            return Ok(());
        }
        let (scalars, predicates) = candidate_expressions(&node.kind);
        let subqueries = self.expression_subqueries(scalars, predicates)?;
        if subqueries.is_empty() {
            return Ok(());
        }
        let mut subplans = Vec::with_capacity(subqueries.len());
        for (relation, exists) in subqueries {
            let plan = self.create_access_plan(relation, &Source::new().with_exists(exists))?;
            subplans.push(SubPlan {
                relation,
                candidate: plan,
            });
        }
        self.set_subplans(candidate, subplans)
    }

    /// Subquery relations of the expressions, not descending into the
    /// subqueries themselves. The flag tells an `EXISTS` check.
    pub(crate) fn expression_subqueries(
        &self,
        mut scalars: Vec<NodeId>,
        mut predicates: Vec<NodeId>,
    ) -> Result<Vec<(NodeId, bool)>, PlanError> {
        let mut res: Vec<(NodeId, bool)> = Vec::new();
        while !scalars.is_empty() || !predicates.is_empty() {
            while let Some(id) = predicates.pop() {
                let predicate = self.get_predicate(id)?;
                scalars.extend(predicate.scalars());
                predicates.extend(predicate.predicates());
                let exists = matches!(predicate, Predicate::Exists(_));
                for relation in predicate.subqueries() {
                    if !res.iter().any(|(r, _)| *r == relation) {
                        res.push((relation, exists));
                    }
                }
            }
            while let Some(id) = scalars.pop() {
                match self.get_scalar(id)? {
                    Scalar::SubQuery(subquery) => {
                        if !res.iter().any(|(r, _)| *r == subquery.relation) {
                            res.push((subquery.relation, false));
                        }
                    }
                    scalar => scalars.extend(scalar.children()),
                }
            }
        }
        Ok(res)
    }
}

/// Relations that take a pushed predicate into their own plan.
fn accepts_predicate(relation: &Relation) -> bool {
    match relation {
        Relation::Table(_) | Relation::Filter(_) => true,
        Relation::Join(join) => join.kind == JoinKind::Inner,
        _ => false,
    }
}

/// Scalars and predicates a candidate evaluates itself.
pub(crate) fn candidate_expressions(kind: &CandidateKind) -> (Vec<NodeId>, Vec<NodeId>) {
    match kind {
        CandidateKind::Scan { predicate, .. } | CandidateKind::Join { predicate, .. } => {
            (vec![], predicate.iter().copied().collect())
        }
        CandidateKind::Filter { predicate, .. } => (vec![], vec![*predicate]),
        CandidateKind::Projection { columns, .. } => (columns.clone(), vec![]),
        CandidateKind::Sort { keys, .. } => (keys.iter().map(|k| k.scalar).collect(), vec![]),
        CandidateKind::Limit { limit, offset, .. } => {
            let mut scalars = vec![*limit];
            scalars.extend(offset.iter().copied());
            (scalars, vec![])
        }
        CandidateKind::Grouping {
            keys, aggregates, ..
        } => (keys.iter().chain(aggregates).copied().collect(), vec![]),
        CandidateKind::Values { rows } => (rows.iter().flatten().copied().collect(), vec![]),
        CandidateKind::Dml {
            op: DmlOp::Update { assignments },
            ..
        } => (assignments.iter().map(|a| a.value).collect(), vec![]),
        _ => (vec![], vec![]),
    }
}
