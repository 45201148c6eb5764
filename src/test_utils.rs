//! Shared fixtures of the unit tests.

use std::cmp::Ordering;
use std::rc::Rc;

use smol_str::format_smolstr;

use crate::config::PlannerConfig;
use crate::errors::{Entity, PlanError};
use crate::ir::aggregates::AggregateKind;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::relation::Relation;
use crate::ir::types::DataType;
use crate::ir::value::Value;
use crate::schema::{Column, Distribution, MemoryCatalog, Table};

pub const CASCADE_SERVERS: [&str; 2] = ["db1", "db2"];

fn table(
    name: &str,
    columns: Vec<Column>,
    pk: &[&str],
    distribution: Distribution,
    rows: u64,
) -> Table {
    Table::new(name, columns, pk, distribution)
        .unwrap()
        .with_row_count(rows)
}

pub fn catalog() -> MemoryCatalog {
    let mut catalog = MemoryCatalog::new();
    for (name, rows) in [("t1", 1000), ("t2", 100), ("t3", 10)] {
        catalog.add_table(table(
            name,
            vec![
                Column::new("a", DataType::Integer, false),
                Column::new("b", DataType::String, true),
                Column::new("c", DataType::Integer, true),
            ],
            &["a"],
            Distribution::Local,
            rows,
        ));
    }
    catalog.add_table(table(
        "arrays",
        vec![
            Column::new("id", DataType::Integer, false),
            Column::new("tags", DataType::Array(Box::new(DataType::String)), true),
            Column::new("nums", DataType::Array(Box::new(DataType::Integer)), true),
        ],
        &["id"],
        Distribution::Local,
        1000,
    ));
    catalog.add_table(table(
        "orders",
        vec![
            Column::new("id", DataType::Integer, false),
            Column::new("customer", DataType::Integer, false),
            Column::new("amount", DataType::Double, true),
            Column::new("note", DataType::String, true),
        ],
        &["id"],
        Distribution::Distribute { key: vec![1] },
        10000,
    ));
    catalog.add_table(table(
        "customers",
        vec![
            Column::new("id", DataType::Integer, false),
            Column::new("name", DataType::String, true),
            Column::new("region", DataType::Integer, true),
        ],
        &["id"],
        Distribution::Distribute { key: vec![0] },
        1000,
    ));
    catalog.add_table(table(
        "regions",
        vec![
            Column::new("id", DataType::Integer, false),
            Column::new("name", DataType::String, true),
        ],
        &["id"],
        Distribution::Replicate,
        10,
    ));
    catalog
}

pub fn config(cascade: bool) -> PlannerConfig {
    if cascade {
        PlannerConfig::default().with_cascade(CASCADE_SERVERS)
    } else {
        PlannerConfig::default()
    }
}

pub fn env(cascade: bool) -> Environment {
    Environment::new(Rc::new(catalog()), config(cascade))
}

/// Field of the table scan at the column position.
pub fn field(env: &Environment, relation: NodeId, position: usize) -> NodeId {
    match env.get_relation(relation).unwrap() {
        Relation::Table(table) => table.columns[position],
        _ => env.row_info(relation).unwrap()[position],
    }
}

/// Reference evaluation of a set function over a materialized column.
/// `NULL`s are skipped; an empty input gives `0` for `COUNT` and `NULL`
/// for everything else.
pub fn fold(kind: AggregateKind, values: &[Value]) -> Result<Value, PlanError> {
    let present = values.iter().filter(|v| !v.is_null());
    match kind {
        AggregateKind::Count => Ok(Value::Integer(present.count() as i64)),
        AggregateKind::Sum | AggregateKind::Avg => {
            let mut count = 0_i64;
            let mut int_sum = 0_i64;
            let mut float_sum = 0.0_f64;
            let mut is_float = false;
            for value in present {
                count += 1;
                match value {
                    Value::Integer(i) => {
                        int_sum = int_sum.checked_add(*i).ok_or_else(|| {
                            PlanError::NotSupported(
                                Entity::Aggregate,
                                Some(format_smolstr!("{kind} overflow")),
                            )
                        })?;
                    }
                    Value::Double(d) => {
                        is_float = true;
                        float_sum += d.value;
                    }
                    other => {
                        return Err(PlanError::NotSupported(
                            Entity::Aggregate,
                            Some(format_smolstr!("{kind} over {}", other.get_type())),
                        ))
                    }
                }
            }
            if count == 0 {
                return Ok(Value::Null);
            }
            let total = float_sum + int_sum as f64;
            if kind == AggregateKind::Avg {
                Ok(Value::from(total / count as f64))
            } else if is_float {
                Ok(Value::from(total))
            } else {
                Ok(Value::Integer(int_sum))
            }
        }
        AggregateKind::Min | AggregateKind::Max => {
            let wanted = if kind == AggregateKind::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<&Value> = None;
            for value in present {
                best = match best {
                    None => Some(value),
                    Some(current) => {
                        if value.compare(current)? == Some(wanted) {
                            Some(value)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
            Ok(best.cloned().unwrap_or(Value::Null))
        }
    }
}
