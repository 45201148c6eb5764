//! Two-phase aggregation over partitioned tables.
//!
//! Every server aggregates its partition, the planner's node combines the
//! partial results: `COUNT` becomes `SUM` of the counts, `AVG` becomes the
//! sum of the partial sums divided by the sum of the partial counts.

use smol_str::SmolStr;

use crate::errors::{Entity, PlanError};
use crate::ir::aggregates::AggregateKind;
use crate::ir::candidate::{CandidateKind, DistributeOp, Remote, ReplicateOp, Replacement};
use crate::ir::cost::Cost;
use crate::ir::distributed::{estimate_rows, is_remotable_scalar, placement, subtree, Placement};
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::Arithmetic;
use crate::ir::relation::Grouping;
use crate::ir::scalar::{Aggregation, Scalar};
use crate::ir::types::DataType;
use crate::tlog;


/// Partial aggregates computed by the servers, deduplicated by their SQL
/// text.
#[derive(Debug, Default)]
struct Partials {
    items: Vec<(String, NodeId)>,
}

impl Partials {
    /// Position of the partial among the remote aggregate columns. A
    /// duplicate partial is dropped together with the nodes built for it.
    fn add(&mut self, env: &mut Environment, partial: LocalPartial) -> Result<usize, PlanError> {
        let text = env.scalar_sql(partial.scalar)?;
        if let Some(pos) = self.items.iter().position(|(t, _)| *t == text) {
            for node in partial.built {
                env.erase(node)?;
            }
            return Ok(pos);
        }
        self.items.push((text, partial.scalar));
        Ok(self.items.len() - 1)
    }
}

/// Remote part of a local aggregate and every node registered for it. The
/// operand of the original aggregate is shared and not listed.
struct LocalPartial {
    scalar: NodeId,
    built: Vec<NodeId>,
}

/// Remote part of a local aggregate of `kind` over `operand`.
fn local_partial(
    env: &mut Environment,
    original: &Aggregation,
    local: AggregateKind,
) -> Result<LocalPartial, PlanError> {
    let fulltext = match original.operand {
        Some(operand) => matches!(
            env.get_scalar(operand)?,
            Scalar::Function(function) if function.kind.is_fulltext_statistic()
        ),
        None => false,
    };
    if original.kind == AggregateKind::Avg && local == AggregateKind::Sum && fulltext {
        // Statistics of the full-text index are only exposed as averages.
        let avg = env.add_aggregation(AggregateKind::Avg, original.operand, false)?;
        let count = env.add_aggregation(AggregateKind::Count, original.operand, false)?;
        let scalar = env.add_arithmetic(Arithmetic::Multiply, avg, count)?;
        return Ok(LocalPartial {
            scalar,
            built: vec![scalar, avg, count],
        });
    }
    let scalar = env.add_aggregation(local, original.operand, false)?;
    Ok(LocalPartial {
        scalar,
        built: vec![scalar],
    })
}

/// Plans a grouping whose operand the servers compute. `None` leaves the
/// grouping to the planner's node over the gathered rows.
///
/// # Errors
/// - aggregate nodes are malformed
pub(crate) fn plan_grouping(
    env: &mut Environment,
    relation: NodeId,
    grouping: &Grouping,
) -> Result<Option<NodeId>, PlanError> {
    let Some(placement) = placement(env, grouping.operand)? else {
        return Ok(None);
    };
    let scope = subtree(env, grouping.operand)?;
    for key in &grouping.keys {
        if !is_remotable_scalar(env, *key, &scope)? {
            return Ok(None);
        }
    }
    let mut aggregations = Vec::with_capacity(grouping.aggregates.len());
    for aggregate in &grouping.aggregates {
        let Scalar::Aggregation(aggregation) = env.get_scalar(*aggregate)? else {
            return Err(PlanError::Unexpected(
                Entity::Aggregate,
                Some(smol_str::format_smolstr!("{aggregate} is not a set function")),
            ));
        };
        if aggregation.distinct {
            return Ok(None);
        }
        let aggregation = aggregation.clone();
        if let Some(operand) = aggregation.operand {
            if !is_remotable_scalar(env, operand, &scope)? {
                return Ok(None);
            }
        }
        aggregations.push((*aggregate, aggregation));
    }

    let keyed = !grouping.keys.is_empty();
    let servers = env.config().cascade.servers.clone();
    if placement == Placement::Replicated {
        let local = Cost::grouping(&Cost::scan(estimate_rows(env, grouping.operand)?), keyed);
        let remote = Remote {
            sql: env.relation_sql(relation)?.into(),
            servers: servers.into_iter().take(1).collect(),
            columns: env.row_info(relation)?,
        };
        let cost = Cost::remote(&local, 1);
        tlog!(Debug, "grouping {relation} runs on {:?}", remote.servers);
        return Ok(Some(env.add_candidate(
            relation,
            cost,
            CandidateKind::Replicate {
                op: ReplicateOp::Retrieve,
                remote,
                operand: None,
            },
        )));
    }

    // Remote aggregates per original aggregate, in local kind order.
    let mut partials = Partials::default();
    let mut positions = Vec::with_capacity(aggregations.len());
    for (_, aggregation) in &aggregations {
        let mut local_positions = Vec::new();
        for local in aggregation.kind.get_local_aggregates_kinds() {
            let partial = local_partial(env, aggregation, local)?;
            local_positions.push((local, partials.add(env, partial)?));
        }
        positions.push(local_positions);
    }

    let helper = env.add_grouping(
        grouping.operand,
        grouping.keys.clone(),
        partials.items.iter().map(|(_, scalar)| *scalar).collect(),
    );
    let sql = env.relation_sql(helper);
    env.erase(helper)?;
    let sql = sql?;

    let mut columns = Vec::with_capacity(grouping.keys.len() + partials.items.len());
    let mut replacements = Vec::with_capacity(grouping.keys.len() + aggregations.len());
    for (pos, key) in grouping.keys.iter().enumerate() {
        let name = SmolStr::from(env.scalar_sql(*key)?);
        let data_type = env.scalar_type(*key)?;
        let column = env.add_remote_column(name, pos, data_type);
        columns.push(column);
        replacements.push(Replacement {
            original: *key,
            value: column,
        });
    }
    let remote_keys = columns.clone();
    for (pos, (text, scalar)) in partials.items.iter().enumerate() {
        let data_type = env.scalar_type(*scalar)?;
        columns.push(env.add_remote_column(
            SmolStr::from(text.as_str()),
            grouping.keys.len() + pos,
            data_type,
        ));
    }

    let mut finals = Vec::new();
    for ((original, aggregation), local_positions) in aggregations.iter().zip(positions) {
        let mut combined = Vec::with_capacity(local_positions.len());
        for (local, pos) in local_positions {
            let column = columns[grouping.keys.len() + pos];
            let kind = aggregation.kind.get_final_aggregate_kind(&local)?;
            let fin = env.add_aggregation(kind, Some(column), false)?;
            finals.push(fin);
            combined.push(fin);
        }
        let value = match (aggregation.kind, combined.as_slice()) {
            (AggregateKind::Avg, [sum, count]) => {
                let sum = env.add_cast(*sum, DataType::Double);
                env.add_arithmetic(Arithmetic::Divide, sum, *count)?
            }
            (_, [single]) => *single,
            _ => {
                return Err(PlanError::Unexpected(
                    Entity::Aggregate,
                    Some(smol_str::format_smolstr!(
                        "{} has {} partial results",
                        aggregation.kind,
                        combined.len()
                    )),
                ))
            }
        };
        replacements.push(Replacement {
            original: *original,
            value,
        });
    }

    tlog!(
        Debug,
        "grouping {relation} is split: {} keys, {} partial aggregates on {} servers",
        remote_keys.len(),
        partials.items.len(),
        servers.len()
    );
    let per_server = estimate_rows(env, grouping.operand)? / servers.len().max(1) as f64;
    let local = Cost::grouping(&Cost::scan(per_server), keyed);
    let remote_cost = Cost::remote(&local, servers.len());
    let remote = env.add_candidate(
        relation,
        remote_cost,
        CandidateKind::Distribute {
            op: DistributeOp::Retrieve,
            remote: Remote {
                sql: sql.into(),
                servers,
                columns,
            },
            operand: None,
        },
    );
    Ok(Some(env.add_candidate(
        relation,
        Cost::grouping(&remote_cost, keyed),
        CandidateKind::Grouping {
            operand: remote,
            keys: remote_keys,
            aggregates: finals,
            replacements,
        },
    )))
}
