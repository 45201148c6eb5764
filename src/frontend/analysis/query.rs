//! Query expressions: parse tree to relation trees.

use smol_str::{format_smolstr, SmolStr};

use crate::errors::{Entity, PlanError};
use crate::frontend::analysis::predicate::get_predicate;
use crate::frontend::analysis::value::{add_columns, get_scalar, NO_RELATION};
use crate::frontend::statement::{
    JoinType, OrderItem, Query, QueryBody, QuerySpecification, SelectItem, TableReference,
    ValueExpression,
};
use crate::ir::environment::{Environment, ScopeKind};
use crate::ir::node::NodeId;
use crate::ir::operator::{JoinKind, Logical};
use crate::ir::relation::inquiry::{Inquiry, Target};
use crate::ir::relation::SortKey;
use crate::ir::scalar::Scalar;
use crate::ir::status::Status;
use crate::ir::value::Value;
use crate::tlog;

/// Relation tree of a query analyzed in its own name scope.
///
/// # Errors
/// - name resolution, typing or relation construction failed
pub fn get_relation(env: &mut Environment, query: &Query) -> Result<NodeId, PlanError> {
    let mut env = env.push_name_scope(ScopeKind::Query);
    let relation = match &query.body {
        QueryBody::Specification(spec) => specification(&mut env, spec, &query.order_by)?,
        body => {
            let relation = body_relation(&mut env, body)?;
            let elements = env.row_elements(relation)?;
            env.add_relation_names(None, relation, elements)?;
            order_by(&mut env, relation, &query.order_by)?
        }
    };
    limit(&mut env, relation, query)
}

fn body_relation(env: &mut Environment, body: &QueryBody) -> Result<NodeId, PlanError> {
    match body {
        QueryBody::Specification(spec) => {
            let mut env = env.push_name_scope(ScopeKind::Query);
            specification(&mut env, spec, &[])
        }
        QueryBody::Union { left, right, all } => {
            let left = body_relation(env, left)?;
            let right = body_relation(env, right)?;
            env.add_union(vec![left, right], *all)
        }
        QueryBody::Values(rows) => {
            let mut scalars = Vec::with_capacity(rows.len());
            for row in rows {
                let mut columns = Vec::with_capacity(row.len());
                for expr in row {
                    add_columns(env, NO_RELATION, expr, &mut columns)?;
                }
                scalars.push(columns);
            }
            env.add_value_list(scalars)
        }
        QueryBody::Nested(query) => get_relation(env, query),
    }
}

/// Select list entry: the scalar, its output name and whether the name
/// was written as an alias.
struct OutputColumn {
    scalar: NodeId,
    name: SmolStr,
    aliased: bool,
}

fn specification(
    env: &mut Environment,
    spec: &QuerySpecification,
    order: &[OrderItem],
) -> Result<NodeId, PlanError> {
    let mut relation = from_clause(env, &spec.from)?;
    let scope = relation;

    if let Some(selection) = &spec.selection {
        relation = where_clause(env, relation, scope, selection)?;
    }

    let grouped = !spec.group_by.is_empty()
        || spec.having.is_some()
        || spec.select.iter().any(|item| match item {
            SelectItem::Expression { expr, .. } => expr.contains_set_function(),
            _ => false,
        })
        || order.iter().any(|item| item.expr.contains_set_function());
    let mut keys = Vec::with_capacity(spec.group_by.len());
    if grouped {
        env.begin_grouping()?;
        for expr in &spec.group_by {
            if expr.contains_set_function() {
                return Err(PlanError::NotSupported(
                    Entity::Aggregate,
                    Some("set function in GROUP BY".into()),
                ));
            }
            let key = {
                let mut env = env.push_status(Status::GROUP_BY);
                get_scalar(&mut env, scope, expr)?
            };
            env.add_grouping_column(key)?;
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    let columns = select_list(env, scope, &spec.select)?;

    let having = match &spec.having {
        Some(expr) => Some(filter_predicate(env, scope, expr)?),
        None => None,
    };
    let sort_keys = sort_keys(env, scope, order, &columns)?;

    if grouped {
        let aggregates = env.aggregates();
        tlog!(Debug, "grouped query";
            "keys" => keys.len(), "aggregates" => aggregates.len());
        relation = env.add_grouping(relation, keys, aggregates);
    }
    if let Some(having) = having {
        relation = env.add_filter(relation, having);
    }
    if !sort_keys.is_empty() {
        relation = env.add_sort(relation, sort_keys);
    }
    let (scalars, names): (Vec<_>, Vec<_>) = columns
        .into_iter()
        .map(|column| (column.scalar, column.name))
        .unzip();
    relation = env.add_projection(relation, scalars.clone(), names)?;
    if spec.distinct {
        let known = env.inquiry(relation, &Inquiry::distinct(scalars))?;
        if !known.contains(Target::DISTINCT) {
            relation = env.add_distinct(relation)?;
        }
    }
    Ok(relation)
}

fn from_clause(env: &mut Environment, from: &[TableReference]) -> Result<NodeId, PlanError> {
    if from.is_empty() {
        return env.add_value_list(vec![Vec::new()]);
    }
    let mut operands = Vec::with_capacity(from.len());
    for reference in from {
        operands.push(table_reference(env, reference)?);
    }
    if operands.len() == 1 {
        return Ok(operands[0]);
    }
    env.add_join(JoinKind::Inner, operands, None)
}

fn table_reference(env: &mut Environment, reference: &TableReference) -> Result<NodeId, PlanError> {
    match reference {
        TableReference::Table { name, alias } => {
            let relation = env.add_table(name, alias.clone())?;
            let correlation = alias.clone().unwrap_or_else(|| name.clone());
            let elements = env.row_elements(relation)?;
            env.add_relation_names(Some(correlation), relation, elements)?;
            Ok(relation)
        }
        TableReference::Derived {
            query,
            alias,
            columns,
        } => {
            let operand = get_relation(env, query)?;
            let relation = env.add_derived(operand, alias.clone(), columns.clone())?;
            let elements = env.row_elements(relation)?;
            env.add_relation_names(Some(alias.clone()), relation, elements)?;
            Ok(relation)
        }
        TableReference::Join {
            kind,
            left,
            right,
            condition,
        } => {
            let mut env = env.push_name_scope(ScopeKind::JoinedTable);
            let left = table_reference(&mut env, left)?;
            let right = table_reference(&mut env, right)?;
            let kind = match kind {
                JoinType::Cross | JoinType::Inner => JoinKind::Inner,
                JoinType::LeftOuter => JoinKind::LeftOuter,
                JoinType::RightOuter => JoinKind::RightOuter,
                JoinType::FullOuter => JoinKind::FullOuter,
            };
            let join = env.add_join(kind, vec![left, right], None)?;
            if let Some(condition) = condition {
                let status = if kind.is_outer() {
                    Status::NO_TOP_PREDICATE
                } else {
                    Status::empty()
                };
                let predicate = {
                    let mut env = env.push_status(status);
                    filter_predicate(&mut env, join, condition)?
                };
                env.set_join_predicate(join, predicate)?;
            }
            Ok(join)
        }
    }
}

/// Top level `EXISTS` conjuncts become semi-joins, the rest a filter.
fn where_clause(
    env: &mut Environment,
    mut relation: NodeId,
    scope: NodeId,
    selection: &ValueExpression,
) -> Result<NodeId, PlanError> {
    if selection.contains_set_function() {
        return Err(PlanError::NotSupported(
            Entity::Aggregate,
            Some("set function in WHERE".into()),
        ));
    }
    let mut rest = Vec::new();
    for conjunct in conjuncts(selection) {
        match conjunct {
            ValueExpression::Exists { query, negated } => {
                let subquery = get_relation(env, query)?;
                let kind = if *negated {
                    JoinKind::NotExists
                } else {
                    JoinKind::Exists
                };
                relation = env.add_join(kind, vec![relation, subquery], None)?;
            }
            other => rest.push(filter_predicate(env, scope, other)?),
        }
    }
    if rest.is_empty() {
        return Ok(relation);
    }
    let predicate = env.add_combinator(Logical::And, rest)?;
    Ok(env.add_filter(relation, predicate))
}

/// Predicate of a filter or a join, folded when it reads no row.
pub(crate) fn filter_predicate(
    env: &mut Environment,
    relation: NodeId,
    expr: &ValueExpression,
) -> Result<NodeId, PlanError> {
    let predicate = get_predicate(env, relation, expr)?;
    env.fold_constant_predicate(predicate)
}

fn conjuncts(expr: &ValueExpression) -> Vec<&ValueExpression> {
    use crate::frontend::statement::Operator;

    match expr {
        ValueExpression::Dyadic {
            op: Operator::And,
            left,
            right,
        } => {
            let mut res = conjuncts(left);
            res.extend(conjuncts(right));
            res
        }
        ValueExpression::Nadic {
            op: Operator::And,
            operands,
        } => operands.iter().flat_map(conjuncts).collect(),
        other => vec![other],
    }
}

fn select_list(
    env: &mut Environment,
    scope: NodeId,
    items: &[SelectItem],
) -> Result<Vec<OutputColumn>, PlanError> {
    let mut columns = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectItem::Wildcard => {
                for relation in env.scope_relations(None)? {
                    expand(env, relation, &mut columns)?;
                }
            }
            SelectItem::QualifiedWildcard(qualifier) => {
                for relation in env.scope_relations(Some(qualifier))? {
                    expand(env, relation, &mut columns)?;
                }
            }
            SelectItem::Expression { expr, alias } => {
                let scalar = get_scalar(env, scope, expr)?;
                let name = match (alias, expr) {
                    (Some(alias), _) => alias.clone(),
                    (None, ValueExpression::ItemReference { name, .. }) => name.clone(),
                    (None, _) => match env.get_scalar(scalar)? {
                        Scalar::Field(field) => field.name.clone(),
                        _ => format_smolstr!("column_{}", columns.len() + 1),
                    },
                };
                columns.push(OutputColumn {
                    scalar,
                    name,
                    aliased: alias.is_some(),
                });
            }
        }
    }
    Ok(columns)
}

/// Columns of a relation named by a wildcard.
fn expand(
    env: &mut Environment,
    relation: NodeId,
    columns: &mut Vec<OutputColumn>,
) -> Result<(), PlanError> {
    for (name, element) in env.row_elements(relation)? {
        if env.is_grouping() && !env.is_grouping_column(element.scalar) {
            return Err(PlanError::NonGroupingColumn(name));
        }
        env.note_nullability(element.scalar);
        columns.push(OutputColumn {
            scalar: element.scalar,
            name,
            aliased: false,
        });
    }
    Ok(())
}

/// Sort keys of `ORDER BY`. An item may name a select list alias or give
/// its one based position.
fn sort_keys(
    env: &mut Environment,
    scope: NodeId,
    items: &[OrderItem],
    columns: &[OutputColumn],
) -> Result<Vec<SortKey>, PlanError> {
    let mut keys = Vec::with_capacity(items.len());
    for item in items {
        let scalar = match &item.expr {
            ValueExpression::Literal(Value::Integer(position)) => {
                let column = usize::try_from(*position)
                    .ok()
                    .and_then(|pos| pos.checked_sub(1))
                    .and_then(|pos| columns.get(pos))
                    .ok_or_else(|| {
                        PlanError::ColumnNotFound(format_smolstr!("ORDER BY position {position}"))
                    })?;
                column.scalar
            }
            ValueExpression::ItemReference {
                qualifier: None,
                name,
            } if columns.iter().any(|c| c.aliased && &c.name == name) => {
                let mut matching = columns.iter().filter(|c| c.aliased && &c.name == name);
                let first = matching.next().map(|c| c.scalar);
                if matching.next().is_some() {
                    return Err(PlanError::DuplicateQualifiedName(name.clone()));
                }
                first.ok_or_else(|| PlanError::ColumnNotFound(name.clone()))?
            }
            expr => get_scalar(env, scope, expr)?,
        };
        keys.push(SortKey {
            scalar,
            descending: item.descending,
        });
    }
    Ok(keys)
}

/// `ORDER BY` of a union or a `VALUES` list, resolved against its output.
fn order_by(
    env: &mut Environment,
    relation: NodeId,
    items: &[OrderItem],
) -> Result<NodeId, PlanError> {
    if items.is_empty() {
        return Ok(relation);
    }
    let outputs = env
        .row_elements(relation)?
        .into_iter()
        .map(|(name, element)| OutputColumn {
            scalar: element.scalar,
            name,
            aliased: true,
        })
        .collect::<Vec<_>>();
    let keys = sort_keys(env, relation, items, &outputs)?;
    Ok(env.add_sort(relation, keys))
}

fn limit(env: &mut Environment, relation: NodeId, query: &Query) -> Result<NodeId, PlanError> {
    let Some(count) = &query.limit else {
        if query.offset.is_some() {
            return Err(PlanError::NotSupported(
                Entity::Query,
                Some("OFFSET without LIMIT".into()),
            ));
        }
        return Ok(relation);
    };
    let count = get_scalar(env, NO_RELATION, count)?;
    let offset = match &query.offset {
        Some(offset) => Some(get_scalar(env, NO_RELATION, offset)?),
        None => None,
    };
    env.add_limit(relation, count, offset)
}

/// Output degree of a query, derived from its text and the catalog.
///
/// # Errors
/// - a table is not in the catalog
/// - a qualified wildcard names no table of its `FROM` clause
pub fn query_degree(env: &Environment, query: &Query) -> Result<usize, PlanError> {
    body_degree(env, &query.body)
}

fn body_degree(env: &Environment, body: &QueryBody) -> Result<usize, PlanError> {
    match body {
        QueryBody::Specification(spec) => {
            let mut degree = 0;
            for item in &spec.select {
                degree += match item {
                    SelectItem::Wildcard => {
                        let mut sum = 0;
                        for reference in &spec.from {
                            sum += reference_degree(env, reference)?;
                        }
                        sum
                    }
                    SelectItem::QualifiedWildcard(qualifier) => spec
                        .from
                        .iter()
                        .find_map(|reference| find_correlation(reference, qualifier))
                        .map(|reference| reference_degree(env, reference))
                        .ok_or_else(|| {
                            PlanError::NotFound(Entity::Relation, qualifier.clone())
                        })??,
                    SelectItem::Expression { .. } => 1,
                };
            }
            Ok(degree)
        }
        QueryBody::Union { left, .. } => body_degree(env, left),
        QueryBody::Values(rows) => Ok(rows.first().map_or(0, Vec::len)),
        QueryBody::Nested(query) => query_degree(env, query),
    }
}

fn reference_degree(env: &Environment, reference: &TableReference) -> Result<usize, PlanError> {
    match reference {
        TableReference::Table { name, .. } => Ok(env.metadata().table(name)?.columns.len()),
        TableReference::Derived {
            columns: Some(columns),
            ..
        } => Ok(columns.len()),
        TableReference::Derived { query, .. } => query_degree(env, query),
        TableReference::Join { left, right, .. } => {
            Ok(reference_degree(env, left)? + reference_degree(env, right)?)
        }
    }
}

fn find_correlation<'r>(reference: &'r TableReference, name: &str) -> Option<&'r TableReference> {
    match reference {
        TableReference::Table { name: table, alias } => {
            (alias.as_ref().unwrap_or(table) == name).then_some(reference)
        }
        TableReference::Derived { alias, .. } => (alias == name).then_some(reference),
        TableReference::Join { left, right, .. } => {
            find_correlation(left, name).or_else(|| find_correlation(right, name))
        }
    }
}

#[cfg(test)]
mod tests;
