//! SQL text regeneration.
//!
//! Relation subtrees shipped to cascaded back-end servers are turned back
//! into SQL. The same renderer prints scalars and predicates in plan
//! explanations.

use itertools::Itertools;
use smol_str::{format_smolstr, SmolStr};
use std::fmt::{Display, Formatter};

use crate::errors::{Entity, PlanError};
use crate::ir::boolean::Boolean;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::JoinKind;
use crate::ir::predicate::{
    Between, Combinator, Comparison, Exists, In, InValues, Like, NullCheck, Predicate,
};
use crate::ir::relation::{Assignment, Relation, SortKey};
use crate::ir::scalar::{AnyElement, Scalar};
use crate::ir::types::DataType;
use crate::schema;

#[cfg(test)]
mod tests;

/// Quotes an identifier.
#[must_use]
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Type name accepted by `CAST`.
///
/// # Errors
/// - the type has no SQL spelling
pub fn sql_type_name(data_type: &DataType) -> Result<&'static str, PlanError> {
    let name = match data_type {
        DataType::Boolean => "BOOLEAN",
        DataType::Integer => "INTEGER",
        DataType::Double => "DOUBLE",
        DataType::Decimal => "DECIMAL",
        DataType::String => "VARCHAR",
        DataType::Binary => "VARBINARY",
        DataType::DateTime => "DATETIME",
        DataType::Array(_) | DataType::Unknown => {
            return Err(PlanError::NotSupported(
                Entity::Type,
                Some(format_smolstr!("CAST to {data_type}")),
            ))
        }
    };
    Ok(name)
}

/// One query block under construction.
#[derive(Clone, Debug, Default)]
struct Select {
    distinct: bool,
    columns: Vec<String>,
    /// `FROM` clause text.
    from: String,
    filters: Vec<String>,
    group_by: Vec<String>,
    having: Vec<String>,
    order_by: Vec<String>,
    limit: Option<String>,
    offset: Option<String>,
    projected: bool,
    grouped: bool,
}

impl Select {
    /// A plain reference list with filters, safe to merge into a join.
    fn is_simple(&self) -> bool {
        !self.distinct
            && !self.projected
            && !self.grouped
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
    }

    fn is_bounded(&self) -> bool {
        self.limit.is_some() || self.offset.is_some() || !self.order_by.is_empty()
    }

    fn add_condition(&mut self, condition: String) -> Result<(), PlanError> {
        if self.grouped {
            self.having.push(condition);
        } else if self.projected || self.is_bounded() || self.distinct {
            return Err(PlanError::NotSupported(
                Entity::Relation,
                Some("condition over a finished query block".into()),
            ));
        } else {
            self.filters.push(condition);
        }
        Ok(())
    }
}

impl Display for Select {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        write!(f, "{}", self.columns.iter().join(", "))?;
        if !self.from.is_empty() {
            write!(f, " FROM {}", self.from)?;
        }
        if !self.filters.is_empty() {
            write!(f, " WHERE {}", self.filters.iter().join(" AND "))?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", self.group_by.iter().join(", "))?;
        }
        if !self.having.is_empty() {
            write!(f, " HAVING {}", self.having.iter().join(" AND "))?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY {}", self.order_by.iter().join(", "))?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

fn no_sql_form(what: &str) -> PlanError {
    PlanError::NotSupported(
        Entity::Relation,
        Some(format_smolstr!("{what} has no SQL form")),
    )
}

impl Environment {
    /// SQL text of a scalar.
    ///
    /// # Errors
    /// - the scalar can't be expressed in SQL
    pub fn scalar_sql(&self, id: NodeId) -> Result<String, PlanError> {
        let sql = match self.get_scalar(id)? {
            Scalar::Field(field) => match self.field_qualifier(field.relation)? {
                Some(qualifier) => format!("{}.{}", quote(&qualifier), quote(&field.name)),
                None => quote(&field.name),
            },
            Scalar::Constant(constant) => constant.value.to_string(),
            Scalar::Parameter(parameter) => format!("${}", parameter.index + 1),
            Scalar::Arithmetic(arithmetic) => format!(
                "({} {} {})",
                self.scalar_sql(arithmetic.left)?,
                arithmetic.op,
                self.scalar_sql(arithmetic.right)?
            ),
            Scalar::Negative(negative) => format!("(-{})", self.scalar_sql(negative.operand)?),
            Scalar::Concat(concat) => format!(
                "({} || {})",
                self.scalar_sql(concat.left)?,
                self.scalar_sql(concat.right)?
            ),
            Scalar::Aggregation(aggregation) => {
                let distinct = if aggregation.distinct { "DISTINCT " } else { "" };
                match aggregation.operand {
                    Some(operand) => format!(
                        "{}({distinct}{})",
                        aggregation.kind,
                        self.scalar_sql(operand)?
                    ),
                    None => format!("{}(*)", aggregation.kind),
                }
            }
            Scalar::Function(function) => {
                let args = function
                    .args
                    .iter()
                    .map(|arg| self.scalar_sql(*arg))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{}({})", function.kind.as_str(), args.join(", "))
            }
            Scalar::Cast(cast) => format!(
                "CAST({} AS {})",
                self.scalar_sql(cast.operand)?,
                sql_type_name(&cast.to)?
            ),
            Scalar::AnyElement(AnyElement { operand, .. }) => {
                format!("ANY({})", self.scalar_sql(*operand)?)
            }
            Scalar::SubQuery(subquery) => format!("({})", self.relation_sql(subquery.relation)?),
            Scalar::RemoteColumn(column) => column.name.to_string(),
        };
        Ok(sql)
    }

    /// Correlation name columns of the relation are qualified with.
    fn field_qualifier(&self, relation: NodeId) -> Result<Option<SmolStr>, PlanError> {
        Ok(match self.get_relation(relation)? {
            Relation::Table(table) => Some(table.qualifier().clone()),
            Relation::Derived(derived) => Some(derived.alias.clone()),
            _ => None,
        })
    }

    /// SQL text of a predicate.
    ///
    /// # Errors
    /// - an operand can't be expressed in SQL
    pub fn predicate_sql(&self, id: NodeId) -> Result<String, PlanError> {
        let not = |negated: bool| if negated { "NOT " } else { "" };
        let sql = match self.get_predicate(id)? {
            Predicate::Comparison(Comparison { op, left, right }) => {
                match self.get_scalar(*left)? {
                    // The element placeholder is only valid on the right of
                    // an SQL comparison.
                    Scalar::AnyElement(_) => format!(
                        "{} {} {}",
                        self.scalar_sql(*right)?,
                        op.commute(),
                        self.scalar_sql(*left)?
                    ),
                    _ => format!(
                        "{} {op} {}",
                        self.scalar_sql(*left)?,
                        self.scalar_sql(*right)?
                    ),
                }
            }
            Predicate::NullCheck(NullCheck { operand, negated }) => {
                format!("{} IS {}NULL", self.scalar_sql(*operand)?, not(*negated))
            }
            Predicate::Combinator(Combinator { op, operands }) => {
                let operands = operands
                    .iter()
                    .map(|p| self.predicate_sql(*p))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("({})", operands.join(&format!(" {op} ")))
            }
            Predicate::Not(not) => format!("NOT ({})", self.predicate_sql(not.operand)?),
            Predicate::In(In {
                operand,
                values,
                negated,
            }) => {
                let values = match values {
                    InValues::List(list) => list
                        .iter()
                        .map(|v| self.scalar_sql(*v))
                        .collect::<Result<Vec<_>, _>>()?
                        .join(", "),
                    InValues::Relation(relation) => self.relation_sql(*relation)?,
                };
                format!("{} {}IN ({values})", self.scalar_sql(*operand)?, not(*negated))
            }
            Predicate::Between(Between {
                operand,
                low,
                high,
                negated,
            }) => format!(
                "{} {}BETWEEN {} AND {}",
                self.scalar_sql(*operand)?,
                not(*negated),
                self.scalar_sql(*low)?,
                self.scalar_sql(*high)?
            ),
            Predicate::Like(Like {
                operand,
                pattern,
                escape,
                negated,
            }) => {
                let mut sql = format!(
                    "{} {}LIKE {}",
                    self.scalar_sql(*operand)?,
                    not(*negated),
                    self.scalar_sql(*pattern)?
                );
                if let Some(escape) = escape {
                    sql.push_str(&format!(" ESCAPE {}", self.scalar_sql(*escape)?));
                }
                sql
            }
            Predicate::Exists(Exists { relation, negated }) => {
                format!("{}EXISTS ({})", not(*negated), self.relation_sql(*relation)?)
            }
            Predicate::Fixed(fixed) => match fixed.value {
                Boolean::True => "TRUE".into(),
                Boolean::Unknown => "NULL".into(),
                Boolean::False | Boolean::NeverTrue => "FALSE".into(),
            },
        };
        Ok(sql)
    }

    /// SQL query computing the relation.
    ///
    /// # Errors
    /// - the subtree contains an operator without an SQL form
    pub fn relation_sql(&self, id: NodeId) -> Result<String, PlanError> {
        self.relation_sql_with(id, None)
    }

    /// SQL query computing the relation, restricted by an extra condition.
    ///
    /// # Errors
    /// - the subtree contains an operator without an SQL form
    pub fn relation_sql_with(
        &self,
        id: NodeId,
        predicate: Option<NodeId>,
    ) -> Result<String, PlanError> {
        let mut select = self.build_select(id)?;
        if let Some(predicate) = predicate {
            select.add_condition(self.predicate_sql(predicate)?)?;
        }
        Ok(select.to_string())
    }

    fn row_sql(&self, id: NodeId) -> Result<Vec<String>, PlanError> {
        self.row_info(id)?
            .into_iter()
            .map(|scalar| self.scalar_sql(scalar))
            .collect()
    }

    fn sort_key_sql(&self, key: &SortKey) -> Result<String, PlanError> {
        let order = if key.descending { " DESC" } else { "" };
        Ok(format!("{}{order}", self.scalar_sql(key.scalar)?))
    }

    fn build_select(&self, id: NodeId) -> Result<Select, PlanError> {
        let select = match self.get_relation(id)? {
            Relation::Table(table) => {
                let name = quote(&table.schema.name);
                let from = match &table.correlation {
                    Some(correlation) if *correlation != table.schema.name => {
                        format!("{name} AS {}", quote(correlation))
                    }
                    _ => name,
                };
                Select {
                    columns: self.row_sql(id)?,
                    from,
                    ..Select::default()
                }
            }
            Relation::Filter(filter) => {
                let mut select = self.build_select(filter.operand)?;
                select.add_condition(self.predicate_sql(filter.predicate)?)?;
                select
            }
            Relation::Join(join) if join.kind.is_exists() => {
                let mut select = self.build_select(join.operands[0])?;
                let inner = self.relation_sql_with(join.operands[1], join.predicate)?;
                let not = if join.kind == JoinKind::NotExists { "NOT " } else { "" };
                select.add_condition(format!("{not}EXISTS ({inner})"))?;
                select
            }
            Relation::Join(join) => {
                let mut operands = Vec::with_capacity(join.operands.len());
                for operand in &join.operands {
                    let select = self.build_select(*operand)?;
                    if !select.is_simple() {
                        return Err(no_sql_form("join over a finished query block"));
                    }
                    operands.push(select);
                }
                let predicate = match join.predicate {
                    Some(predicate) => Some(self.predicate_sql(predicate)?),
                    None => None,
                };
                join_select(join.kind, operands, predicate)?
            }
            Relation::Projection(projection) => {
                let mut select = self.build_select(projection.operand)?;
                if select.projected || select.distinct || select.limit.is_some() {
                    return Err(no_sql_form("projection over a finished query block"));
                }
                let mut columns = Vec::with_capacity(projection.columns.len());
                for (column, name) in projection.columns.iter().zip(&projection.names) {
                    columns.push(format!("{} AS {}", self.scalar_sql(*column)?, quote(name)));
                }
                select.columns = columns;
                select.projected = true;
                select
            }
            Relation::Derived(derived) => {
                let names = self
                    .row_names(id)?
                    .iter()
                    .map(|name| quote(name))
                    .join(", ");
                Select {
                    columns: self.row_sql(id)?,
                    from: format!(
                        "({}) AS {} ({names})",
                        self.relation_sql(derived.operand)?,
                        quote(&derived.alias)
                    ),
                    ..Select::default()
                }
            }
            Relation::Grouping(grouping) => {
                let mut select = self.build_select(grouping.operand)?;
                if !select.is_simple() {
                    return Err(no_sql_form("grouping over a finished query block"));
                }
                select.group_by = grouping
                    .keys
                    .iter()
                    .map(|key| self.scalar_sql(*key))
                    .collect::<Result<_, _>>()?;
                select.columns = self.row_sql(id)?;
                select.grouped = true;
                select
            }
            Relation::Sort(sort) => {
                let mut select = self.build_select(sort.operand)?;
                select.order_by = sort
                    .keys
                    .iter()
                    .map(|key| self.sort_key_sql(key))
                    .collect::<Result<_, _>>()?;
                select
            }
            Relation::Limit(limit) => {
                let mut select = self.build_select(limit.operand)?;
                select.limit = Some(self.scalar_sql(limit.limit)?);
                if let Some(offset) = limit.offset {
                    select.offset = Some(self.scalar_sql(offset)?);
                }
                select
            }
            Relation::Distinct(distinct) => {
                let mut select = self.build_select(distinct.operand)?;
                select.distinct = true;
                select
            }
            Relation::Union(union) => {
                let keyword = if union.all { " UNION ALL " } else { " UNION " };
                let operands = union
                    .operands
                    .iter()
                    .map(|operand| self.relation_sql(*operand).map(|sql| format!("({sql})")))
                    .collect::<Result<Vec<_>, _>>()?;
                Select {
                    columns: self.row_sql(id)?,
                    from: format!("({}) AS {}", operands.join(keyword), quote("union")),
                    ..Select::default()
                }
            }
            Relation::ValueList(values) => {
                let mut rows = Vec::with_capacity(values.rows.len());
                for row in &values.rows {
                    let row = row
                        .iter()
                        .map(|scalar| self.scalar_sql(*scalar))
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.push(format!("({})", row.join(", ")));
                }
                let names = self
                    .row_names(id)?
                    .iter()
                    .map(|name| quote(name))
                    .join(", ");
                Select {
                    columns: self.row_sql(id)?,
                    from: format!("(VALUES {}) AS {} ({names})", rows.join(", "), quote("values")),
                    ..Select::default()
                }
            }
            Relation::BulkInput(_) => return Err(no_sql_form("bulk input")),
            Relation::BulkOutput(_) => return Err(no_sql_form("bulk output")),
            Relation::Insert(_) | Relation::Update(_) | Relation::Delete(_) => {
                return Err(no_sql_form("data modification"))
            }
        };
        Ok(select)
    }

    /// `UPDATE` shipped to the partitions of a table.
    ///
    /// # Errors
    /// - a value or the predicate can't be expressed in SQL
    pub fn update_sql(
        &self,
        table: &schema::Table,
        correlation: Option<&SmolStr>,
        assignments: &[Assignment],
        predicate: Option<NodeId>,
    ) -> Result<String, PlanError> {
        let mut sql = format!("UPDATE {}", quote(&table.name));
        if let Some(correlation) = correlation.filter(|c| **c != table.name) {
            sql.push_str(&format!(" AS {}", quote(correlation)));
        }
        let mut sets = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let column = table.columns.get(assignment.position).ok_or_else(|| {
                PlanError::ColumnNotFound(format_smolstr!("{} column {}", table.name, assignment.position))
            })?;
            sets.push(format!("{} = {}", quote(&column.name), self.scalar_sql(assignment.value)?));
        }
        sql.push_str(&format!(" SET {}", sets.join(", ")));
        if let Some(predicate) = predicate {
            sql.push_str(&format!(" WHERE {}", self.predicate_sql(predicate)?));
        }
        Ok(sql)
    }

    /// `DELETE` shipped to the partitions of a table.
    ///
    /// # Errors
    /// - the predicate can't be expressed in SQL
    pub fn delete_sql(
        &self,
        table: &schema::Table,
        correlation: Option<&SmolStr>,
        predicate: Option<NodeId>,
    ) -> Result<String, PlanError> {
        let mut sql = format!("DELETE FROM {}", quote(&table.name));
        if let Some(correlation) = correlation.filter(|c| **c != table.name) {
            sql.push_str(&format!(" AS {}", quote(correlation)));
        }
        if let Some(predicate) = predicate {
            sql.push_str(&format!(" WHERE {}", self.predicate_sql(predicate)?));
        }
        Ok(sql)
    }
}

/// Parameterized `INSERT` receiving the rows sent by the planner.
#[must_use]
pub fn insert_sql(table: &schema::Table, columns: &[usize]) -> String {
    let names = columns
        .iter()
        .filter_map(|pos| table.columns.get(*pos))
        .map(|column| quote(&column.name))
        .join(", ");
    let params = (1..=columns.len()).map(|i| format!("${i}")).join(", ");
    format!(
        "INSERT INTO {} ({names}) VALUES ({params})",
        quote(&table.name)
    )
}

fn parenthesize(from: String) -> String {
    if from.contains(" JOIN ") || from.contains(", ") {
        format!("({from})")
    } else {
        from
    }
}

fn join_select(
    kind: JoinKind,
    operands: Vec<Select>,
    predicate: Option<String>,
) -> Result<Select, PlanError> {
    let columns = operands
        .iter()
        .flat_map(|select| select.columns.iter().cloned())
        .collect::<Vec<_>>();
    match kind {
        JoinKind::Inner => {
            let from = operands.iter().map(|select| select.from.as_str()).join(", ");
            let mut filters = operands
                .into_iter()
                .flat_map(|select| select.filters)
                .collect::<Vec<_>>();
            filters.extend(predicate);
            Ok(Select {
                columns,
                from,
                filters,
                ..Select::default()
            })
        }
        JoinKind::LeftOuter | JoinKind::RightOuter => {
            let Ok([left, right]) = <[Select; 2]>::try_from(operands) else {
                return Err(PlanError::Unexpected(
                    Entity::Join,
                    Some("outer join without two operands".into()),
                ));
            };
            // Conditions on the preserved side stay in WHERE, the others
            // move into ON.
            let (preserved, nullable, keyword) = if kind == JoinKind::LeftOuter {
                (left, right, "LEFT OUTER JOIN")
            } else {
                (right, left, "RIGHT OUTER JOIN")
            };
            let mut on = nullable.filters;
            on.extend(predicate);
            let on = if on.is_empty() {
                "TRUE".to_string()
            } else {
                on.join(" AND ")
            };
            let from = if kind == JoinKind::LeftOuter {
                format!(
                    "{} {keyword} {} ON {on}",
                    parenthesize(preserved.from),
                    parenthesize(nullable.from)
                )
            } else {
                format!(
                    "{} {keyword} {} ON {on}",
                    parenthesize(nullable.from),
                    parenthesize(preserved.from)
                )
            };
            Ok(Select {
                columns,
                from,
                filters: preserved.filters,
                ..Select::default()
            })
        }
        JoinKind::FullOuter | JoinKind::Exists | JoinKind::NotExists => Err(PlanError::NotSupported(
            Entity::Join,
            Some(format_smolstr!("{kind} join in SQL text")),
        )),
    }
}
