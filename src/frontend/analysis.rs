//! Translation of parse trees into plan nodes.
//!
//! Every parse tree node kind has an analyzer chosen by its operator or
//! function tag: [`value::ValueAnalyzer`] for scalars,
//! [`predicate::PredicateAnalyzer`] for boolean expressions. Query
//! expressions are walked by [`query::get_relation`]. Analyzers bind names
//! through the scopes of the [`Environment`] and memoize the nodes they
//! build per relation.

use smol_str::SmolStr;

use crate::errors::PlanError;
use crate::frontend::statement::{InsertSource, Statement, ValueExpression};
use crate::ir::environment::{Environment, ScopeKind};
use crate::ir::node::NodeId;
use crate::ir::relation::Assignment;
use crate::schema;
use crate::tlog;

pub mod predicate;
pub mod query;
pub mod value;

impl Environment {
    /// Relation tree of a statement.
    ///
    /// # Errors
    /// - the statement uses a construct the planner doesn't support
    /// - name resolution or typing failed
    pub fn analyze(&mut self, statement: &Statement) -> Result<NodeId, PlanError> {
        match statement {
            Statement::Query(query) => query::get_relation(self, query),
            Statement::Insert {
                table,
                columns,
                source,
            } => {
                let schema = self.metadata().table(table)?;
                let positions = match columns {
                    Some(names) => names
                        .iter()
                        .map(|name| schema.position(name))
                        .collect::<Result<Vec<_>, _>>()?,
                    None => (0..schema.columns.len()).collect(),
                };
                let operand = match source {
                    InsertSource::Query(query) => query::get_relation(self, query)?,
                    InsertSource::Bulk { path } => {
                        let columns = positions
                            .iter()
                            .map(|pos| schema.columns[*pos].clone())
                            .collect();
                        self.add_bulk_input(path.clone(), columns)?
                    }
                };
                tlog!(Debug, "insert into {table}"; "columns" => positions.len());
                self.add_insert(schema, positions, operand)
            }
            Statement::Update {
                table,
                alias,
                assignments,
                selection,
            } => {
                let mut env = self.push_name_scope(ScopeKind::Query);
                let (schema, scan, operand) =
                    target(&mut env, table, alias.as_ref(), selection.as_ref())?;
                let mut resolved = Vec::with_capacity(assignments.len());
                for assignment in assignments {
                    let position = schema.position(&assignment.column)?;
                    let value = value::get_scalar(&mut env, scan, &assignment.value)?;
                    resolved.push(Assignment { position, value });
                }
                env.add_update(schema, operand, resolved)
            }
            Statement::Delete {
                table,
                alias,
                selection,
            } => {
                let mut env = self.push_name_scope(ScopeKind::Query);
                let (schema, _, operand) =
                    target(&mut env, table, alias.as_ref(), selection.as_ref())?;
                Ok(env.add_delete(schema, operand))
            }
            Statement::BulkOutput { query, path } => {
                let operand = query::get_relation(self, query)?;
                Ok(self.add_bulk_output(operand, path.clone()))
            }
        }
    }
}

/// Scan of the modified table, filtered by the `WHERE` clause.
fn target(
    env: &mut Environment,
    table: &str,
    alias: Option<&SmolStr>,
    selection: Option<&ValueExpression>,
) -> Result<(schema::Table, NodeId, NodeId), PlanError> {
    let schema = env.metadata().table(table)?;
    let scan = env.add_table(table, alias.cloned())?;
    let correlation = alias.cloned().unwrap_or_else(|| schema.name.clone());
    let elements = env.row_elements(scan)?;
    env.add_relation_names(Some(correlation), scan, elements)?;
    let operand = match selection {
        Some(expr) => {
            let predicate = query::filter_predicate(env, scan, expr)?;
            env.add_filter(scan, predicate)
        }
        None => scan,
    };
    Ok((schema, scan, operand))
}

#[cfg(test)]
mod tests;
