//! Planning over cascaded back-end servers.
//!
//! Partitioned ("distribute") and mirrored ("replicate") tables live on the
//! back-ends. Subtrees the servers can evaluate on their own are shipped as
//! SQL text, everything else is gathered and computed by the planner's node.

use ahash::AHashSet;
use smol_str::{format_smolstr, SmolStr};

use crate::backend::sql::{insert_sql, sql_type_name};
use crate::errors::{Entity, PlanError};
use crate::ir::candidate::{CandidateKind, DistributeOp, Remote, ReplicateOp, SortKind};
use crate::ir::cost::Cost;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::{CompareOp, JoinKind, Logical};
use crate::ir::predicate::{Comparison, Predicate};
use crate::ir::relation::{Delete, Insert, Join, Relation, SortKey, Update};
use crate::ir::scalar::Scalar;
use crate::ir::source::Source;
use crate::schema::{Distribution, DEFAULT_ROW_COUNT};
use crate::tlog;

pub mod aggregation;

#[cfg(test)]
mod tests;

/// Where the rows of a relation live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Every server holds all rows.
    Replicated,
    /// Rows are partitioned by the values of the key fields.
    Distributed { key: Vec<NodeId> },
}

/// Join construction in a cascaded session.
///
/// # Errors
/// - full outer join
pub(crate) fn create_join(
    env: &mut Environment,
    kind: JoinKind,
    operands: Vec<NodeId>,
    predicate: Option<NodeId>,
) -> Result<NodeId, PlanError> {
    if kind == JoinKind::FullOuter {
        return Err(PlanError::NotSupported(
            Entity::Join,
            Some("full outer join over cascaded servers".into()),
        ));
    }
    tlog!(Debug, "distributed {kind} join of {} operands", operands.len());
    env.add_local_join(kind, operands, predicate)
}

/// `DISTINCT` has no distributed strategy.
///
/// # Errors
/// - always
pub(crate) fn create_distinct(_env: &mut Environment, operand: NodeId) -> Result<NodeId, PlanError> {
    Err(PlanError::NotSupported(
        Entity::Distinct,
        Some(format_smolstr!("distinct over {operand} on cascaded servers")),
    ))
}

/// Top-N sort of rows gathered from the servers.
///
/// # Errors
/// - always, distributed sorts are full sorts
pub fn create_partial_sort(
    _env: &mut Environment,
    relation: NodeId,
    _operand: NodeId,
    _keys: Vec<SortKey>,
    limit: u64,
) -> Result<NodeId, PlanError> {
    Err(PlanError::NotSupported(
        Entity::Sort,
        Some(format_smolstr!(
            "partial sort (top {limit}) of {relation} on cascaded servers"
        )),
    ))
}

/// Access plan in a cascaded session.
///
/// # Errors
/// - the relation needs an operator with no distributed implementation
pub(crate) fn create_access_plan(
    env: &mut Environment,
    relation: NodeId,
    source: &Source,
) -> Result<NodeId, PlanError> {
    let node = env.get_relation(relation)?.clone();
    if matches!(
        node,
        Relation::Table(_) | Relation::Filter(_) | Relation::Join(_)
    ) {
        if let Some(placement) = placement(env, relation)? {
            return plan_retrieve(env, relation, &placement, source);
        }
    }
    let candidate = match node {
        Relation::Grouping(grouping) => {
            match aggregation::plan_grouping(env, relation, &grouping)? {
                Some(candidate) => candidate,
                None => {
                    tlog!(Debug, "grouping {relation} is computed centrally");
                    return env.create_local_access_plan(relation, source);
                }
            }
        }
        Relation::Sort(sort) => {
            let operand = env.create_access_plan(sort.operand, &source.for_operand())?;
            env.create_sort_candidate(relation, operand, sort.keys, SortKind::Normal)?
        }
        Relation::Insert(insert) => plan_insert(env, relation, &insert)?,
        Relation::Update(update) => plan_update(env, relation, &update)?,
        Relation::Delete(delete) => plan_delete(env, relation, &delete)?,
        _ => return env.create_local_access_plan(relation, source),
    };
    env.attach_subplans(candidate)?;
    match source.predicate {
        Some(predicate) => env.add_filter_candidate(relation, candidate, predicate),
        None => Ok(candidate),
    }
}

fn servers(env: &Environment, placement: &Placement) -> Vec<SmolStr> {
    let servers = &env.config().cascade.servers;
    match placement {
        Placement::Replicated => servers.iter().take(1).cloned().collect(),
        Placement::Distributed { .. } => servers.clone(),
    }
}

fn server_count(env: &Environment) -> usize {
    env.config().cascade.servers.len().max(1)
}

/// Ships the relation with the part of the pushed predicate the servers can
/// evaluate. The rest is checked by a filter over the gathered rows.
fn plan_retrieve(
    env: &mut Environment,
    relation: NodeId,
    placement: &Placement,
    source: &Source,
) -> Result<NodeId, PlanError> {
    let scope = subtree(env, relation)?;
    let mut remote = Vec::new();
    let mut local = Vec::new();
    if let Some(predicate) = source.predicate {
        for conjunct in conjuncts(env, predicate)? {
            if is_remotable_predicate(env, conjunct, &scope)? {
                remote.push(conjunct);
            } else {
                local.push(conjunct);
            }
        }
    }
    let remote = combine(env, remote)?;
    let local = combine(env, local)?;

    let servers = servers(env, placement);
    let mut rows = estimate_rows(env, relation)?;
    if matches!(placement, Placement::Distributed { .. }) {
        rows /= server_count(env) as f64;
    }
    let mut local_cost = Cost::scan(rows);
    if let Some(predicate) = remote {
        local_cost = local_cost.filtered(env.selectivity(predicate)?);
    }
    let cost = Cost::remote(&local_cost, servers.len());
    let remote_query = Remote {
        sql: env.relation_sql_with(relation, remote)?.into(),
        columns: env.row_info(relation)?,
        servers,
    };
    tlog!(
        Debug,
        "relation {relation} is retrieved from {} server(s): {}",
        remote_query.servers.len(),
        remote_query.sql
    );
    let kind = match placement {
        Placement::Replicated => CandidateKind::Replicate {
            op: ReplicateOp::Retrieve,
            remote: remote_query,
            operand: None,
        },
        Placement::Distributed { .. } => CandidateKind::Distribute {
            op: DistributeOp::Retrieve,
            remote: remote_query,
            operand: None,
        },
    };
    let candidate = env.add_candidate(relation, cost, kind);
    match local {
        Some(predicate) => env.add_filter_candidate(relation, candidate, predicate),
        None => Ok(candidate),
    }
}

fn plan_insert(env: &mut Environment, relation: NodeId, insert: &Insert) -> Result<NodeId, PlanError> {
    let operand = env.create_access_plan(insert.operand, &Source::new())?;
    let servers = env.config().cascade.servers.clone();
    let cost = Cost::remote(&Cost::computed(&env.candidate_cost(operand)?), servers.len());
    let remote = Remote {
        sql: insert_sql(&insert.table, &insert.columns).into(),
        servers,
        columns: Vec::new(),
    };
    let kind = match &insert.table.distribution {
        Distribution::Distribute { key } => CandidateKind::Distribute {
            op: DistributeOp::Insert {
                relocate: !key.is_empty(),
            },
            remote,
            operand: Some(operand),
        },
        Distribution::Replicate | Distribution::Local => CandidateKind::Replicate {
            op: ReplicateOp::Insert,
            remote,
            operand: Some(operand),
        },
    };
    tlog!(Debug, "insert into {} is sent to the servers", insert.table.name);
    Ok(env.add_candidate(relation, cost, kind))
}

/// Table scan and condition of the rows an UPDATE or DELETE touches.
fn modified_rows(
    env: &Environment,
    operand: NodeId,
) -> Result<(Option<SmolStr>, Option<NodeId>), PlanError> {
    match env.get_relation(operand)? {
        Relation::Table(table) => Ok((table.correlation.clone(), None)),
        Relation::Filter(filter) => {
            let (correlation, inner) = modified_rows(env, filter.operand)?;
            if inner.is_some() {
                return Err(PlanError::NotSupported(
                    Entity::Predicate,
                    Some("nested conditions of a distributed modification".into()),
                ));
            }
            Ok((correlation, Some(filter.predicate)))
        }
        _ => Err(PlanError::NotSupported(
            Entity::Relation,
            Some("distributed modification of a derived row set".into()),
        )),
    }
}

fn partitioned_key(table: &crate::schema::Table, statement: &str) -> Result<Vec<usize>, PlanError> {
    match &table.distribution {
        Distribution::Distribute { key } => Ok(key.clone()),
        Distribution::Replicate | Distribution::Local => Err(PlanError::NotSupported(
            Entity::Table,
            Some(format_smolstr!(
                "{statement} of replicated table {} on cascaded servers",
                table.name
            )),
        )),
    }
}

fn ensure_remotable(
    env: &Environment,
    operand: NodeId,
    scalars: &[NodeId],
    predicate: Option<NodeId>,
) -> Result<(), PlanError> {
    let scope = subtree(env, operand)?;
    let mut remotable = match predicate {
        Some(predicate) => is_remotable_predicate(env, predicate, &scope)?,
        None => true,
    };
    for scalar in scalars {
        remotable = remotable && is_remotable_scalar(env, *scalar, &scope)?;
    }
    if remotable {
        Ok(())
    } else {
        Err(PlanError::NotSupported(
            Entity::Expression,
            Some("expression the servers can't evaluate in a distributed modification".into()),
        ))
    }
}

fn modification_cost(env: &Environment, operand: NodeId, predicate: Option<NodeId>) -> Result<Cost, PlanError> {
    let mut local = Cost::scan(estimate_rows(env, operand)? / server_count(env) as f64);
    if let Some(predicate) = predicate {
        local = local.filtered(env.selectivity(predicate)?);
    }
    Ok(Cost::remote(&local, server_count(env)))
}

fn plan_update(env: &mut Environment, relation: NodeId, update: &Update) -> Result<NodeId, PlanError> {
    let key = partitioned_key(&update.table, "UPDATE")?;
    let (correlation, predicate) = modified_rows(env, update.operand)?;
    let values = update.assignments.iter().map(|a| a.value).collect::<Vec<_>>();
    ensure_remotable(env, update.operand, &values, predicate)?;
    let relocate = update
        .assignments
        .iter()
        .any(|assignment| key.contains(&assignment.position));
    let remote = Remote {
        sql: env
            .update_sql(&update.table, correlation.as_ref(), &update.assignments, predicate)?
            .into(),
        servers: env.config().cascade.servers.clone(),
        columns: Vec::new(),
    };
    let cost = modification_cost(env, update.operand, predicate)?;
    tlog!(
        Debug,
        "update of {} is sent to the servers, relocate: {relocate}",
        update.table.name
    );
    Ok(env.add_candidate(
        relation,
        cost,
        CandidateKind::Distribute {
            op: DistributeOp::Update { relocate },
            remote,
            operand: None,
        },
    ))
}

fn plan_delete(env: &mut Environment, relation: NodeId, delete: &Delete) -> Result<NodeId, PlanError> {
    partitioned_key(&delete.table, "DELETE")?;
    let (correlation, predicate) = modified_rows(env, delete.operand)?;
    ensure_remotable(env, delete.operand, &[], predicate)?;
    let remote = Remote {
        sql: env
            .delete_sql(&delete.table, correlation.as_ref(), predicate)?
            .into(),
        servers: env.config().cascade.servers.clone(),
        columns: Vec::new(),
    };
    let cost = modification_cost(env, delete.operand, predicate)?;
    tlog!(Debug, "delete from {} is sent to the servers", delete.table.name);
    Ok(env.add_candidate(
        relation,
        cost,
        CandidateKind::Distribute {
            op: DistributeOp::Delete,
            remote,
            operand: None,
        },
    ))
}

////////////////////////////////////////////////////////////////////////////////
// Placement
////////////////////////////////////////////////////////////////////////////////

/// Placement of a relation the servers can compute without the planner's
/// help, `None` when the rows have to be gathered first.
///
/// # Errors
/// - relation nodes are not found
pub fn placement(env: &Environment, relation: NodeId) -> Result<Option<Placement>, PlanError> {
    let placement = match env.get_relation(relation)? {
        Relation::Table(table) => Some(match &table.schema.distribution {
            Distribution::Distribute { key } => {
                let key = key
                    .iter()
                    .map(|pos| table.columns.get(*pos).copied())
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        PlanError::Unexpected(
                            Entity::Table,
                            Some(format_smolstr!(
                                "distribution key of {} is out of range",
                                table.schema.name
                            )),
                        )
                    })?;
                Placement::Distributed { key }
            }
            Distribution::Replicate | Distribution::Local => Placement::Replicated,
        }),
        Relation::Filter(filter) => {
            let scope = subtree(env, relation)?;
            if is_remotable_predicate(env, filter.predicate, &scope)? {
                placement(env, filter.operand)?
            } else {
                None
            }
        }
        Relation::Join(join) => join_placement(env, relation, join)?,
        _ => None,
    };
    Ok(placement)
}

/// A join is computed by the servers when all operands are replicated, or
/// when exactly two operands are partitioned and the join condition matches
/// their keys column by column.
fn join_placement(env: &Environment, relation: NodeId, join: &Join) -> Result<Option<Placement>, PlanError> {
    if join.kind == JoinKind::FullOuter {
        return Ok(None);
    }
    if let Some(predicate) = join.predicate {
        let scope = subtree(env, relation)?;
        if !is_remotable_predicate(env, predicate, &scope)? {
            return Ok(None);
        }
    }
    let mut partitioned = Vec::new();
    for operand in &join.operands {
        match placement(env, *operand)? {
            None => return Ok(None),
            Some(Placement::Replicated) => {}
            Some(Placement::Distributed { key }) => partitioned.push(key),
        }
    }
    let placement = match partitioned.as_slice() {
        [] => Some(Placement::Replicated),
        [left, right] => match join.predicate {
            Some(predicate) if keys_matched(env, predicate, left, right)? => {
                Some(Placement::Distributed { key: left.clone() })
            }
            _ => None,
        },
        _ => None,
    };
    Ok(placement)
}

fn keys_matched(
    env: &Environment,
    predicate: NodeId,
    left: &[NodeId],
    right: &[NodeId],
) -> Result<bool, PlanError> {
    if left.len() != right.len() || left.is_empty() {
        return Ok(false);
    }
    let mut equalities = Vec::new();
    for conjunct in conjuncts(env, predicate)? {
        if let Predicate::Comparison(Comparison {
            op: CompareOp::Eq,
            left,
            right,
        }) = env.get_predicate(conjunct)?
        {
            equalities.push((*left, *right));
        }
    }
    Ok(left.iter().zip(right).all(|(l, r)| {
        equalities
            .iter()
            .any(|pair| *pair == (*l, *r) || *pair == (*r, *l))
    }))
}

/// Relations of the subtree rooted at `relation`.
fn subtree(env: &Environment, relation: NodeId) -> Result<AHashSet<NodeId>, PlanError> {
    let mut res = AHashSet::new();
    let mut stack = vec![relation];
    while let Some(id) = stack.pop() {
        if res.insert(id) {
            stack.extend(env.get_relation(id)?.operands());
        }
    }
    Ok(res)
}

fn conjuncts(env: &Environment, predicate: NodeId) -> Result<Vec<NodeId>, PlanError> {
    Ok(match env.get_predicate(predicate)? {
        Predicate::Combinator(combinator) if combinator.op == Logical::And => {
            combinator.operands.clone()
        }
        _ => vec![predicate],
    })
}

fn combine(env: &mut Environment, predicates: Vec<NodeId>) -> Result<Option<NodeId>, PlanError> {
    match predicates.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some(*single)),
        _ => Ok(Some(env.add_combinator(Logical::And, predicates)?)),
    }
}

/// Whether the servers can evaluate the scalar over rows of `scope`.
pub(crate) fn is_remotable_scalar(
    env: &Environment,
    scalar: NodeId,
    scope: &AHashSet<NodeId>,
) -> Result<bool, PlanError> {
    match env.get_scalar(scalar)? {
        Scalar::Field(field) => Ok(scope.contains(&field.relation)),
        Scalar::SubQuery(_) | Scalar::RemoteColumn(_) => Ok(false),
        Scalar::Cast(cast) if sql_type_name(&cast.to).is_err() => Ok(false),
        other => {
            for child in other.children() {
                if !is_remotable_scalar(env, child, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

fn is_remotable_predicate(
    env: &Environment,
    predicate: NodeId,
    scope: &AHashSet<NodeId>,
) -> Result<bool, PlanError> {
    let node = env.get_predicate(predicate)?;
    if !node.subqueries().is_empty() {
        return Ok(false);
    }
    for scalar in node.scalars() {
        if !is_remotable_scalar(env, scalar, scope)? {
            return Ok(false);
        }
    }
    for nested in node.predicates() {
        if !is_remotable_predicate(env, nested, scope)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Rough result size of a relation the servers compute.
///
/// # Errors
/// - relation nodes are not found
pub(crate) fn estimate_rows(env: &Environment, relation: NodeId) -> Result<f64, PlanError> {
    let rows = match env.get_relation(relation)? {
        Relation::Table(table) => table.schema.row_count as f64,
        Relation::Filter(filter) => {
            estimate_rows(env, filter.operand)? * env.selectivity(filter.predicate)?
        }
        Relation::Join(join) if join.kind.is_exists() => estimate_rows(env, join.operands[0])?,
        Relation::Join(join) => {
            let mut rows = 1.0;
            for operand in &join.operands {
                rows *= estimate_rows(env, *operand)?;
            }
            match join.predicate {
                Some(predicate) => rows * env.selectivity(predicate)?,
                None => rows,
            }
        }
        _ => DEFAULT_ROW_COUNT as f64,
    };
    Ok(rows)
}
