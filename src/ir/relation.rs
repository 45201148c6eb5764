//! Relational algebra nodes.
//!
//! Relations form a tree: every operand has exactly one parent. The output
//! row of a relation is a list of scalar nodes, see [`Environment::row_info`].

use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};

use crate::errors::{Entity, PlanError};
use crate::ir::environment::Environment;
use crate::ir::node::{Node, NodeId, NodeType};
use crate::ir::operator::JoinKind;
use crate::ir::scalar::Scalar;
use crate::ir::types::DataType;
use crate::ir::{distributed, name_map::RowElement};
use crate::schema;

pub mod access_plan;
pub mod inquiry;

/// Scan of a catalog table.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Table {
    pub schema: schema::Table,
    pub correlation: Option<SmolStr>,
    /// One field per table column.
    pub columns: Vec<NodeId>,
}

impl Table {
    /// Name the table columns are qualified with.
    #[must_use]
    pub fn qualifier(&self) -> &SmolStr {
        self.correlation.as_ref().unwrap_or(&self.schema.name)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Join {
    pub kind: JoinKind,
    /// Two operands for outer and semi-joins, two or more for inner joins.
    pub operands: Vec<NodeId>,
    pub predicate: Option<NodeId>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Filter {
    pub operand: NodeId,
    pub predicate: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Projection {
    pub operand: NodeId,
    pub columns: Vec<NodeId>,
    pub names: Vec<SmolStr>,
}

/// Subquery in `FROM` visible under a correlation name.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Derived {
    pub operand: NodeId,
    pub alias: SmolStr,
    /// Fields standing for the operand columns.
    pub columns: Vec<NodeId>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Grouping {
    pub operand: NodeId,
    pub keys: Vec<NodeId>,
    pub aggregates: Vec<NodeId>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SortKey {
    pub scalar: NodeId,
    pub descending: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Sort {
    pub operand: NodeId,
    pub keys: Vec<SortKey>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Limit {
    pub operand: NodeId,
    pub limit: NodeId,
    pub offset: Option<NodeId>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Distinct {
    pub operand: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Union {
    pub operands: Vec<NodeId>,
    pub all: bool,
    pub columns: Vec<NodeId>,
}

/// Table value constructor (`VALUES (..), (..)`).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ValueList {
    pub rows: Vec<Vec<NodeId>>,
    pub columns: Vec<NodeId>,
}

/// Rows read from an external file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BulkInput {
    pub path: SmolStr,
    pub columns: Vec<NodeId>,
}

/// Rows of the operand written to an external file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BulkOutput {
    pub operand: NodeId,
    pub path: SmolStr,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Insert {
    pub table: schema::Table,
    /// Target column positions, in the order of the operand columns.
    pub columns: Vec<usize>,
    pub operand: NodeId,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Assignment {
    pub position: usize,
    pub value: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Update {
    pub table: schema::Table,
    /// Rows to update: the table scan, possibly filtered.
    pub operand: NodeId,
    pub assignments: Vec<Assignment>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Delete {
    pub table: schema::Table,
    pub operand: NodeId,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Relation {
    Table(Table),
    Join(Join),
    Filter(Filter),
    Projection(Projection),
    Derived(Derived),
    Grouping(Grouping),
    Sort(Sort),
    Limit(Limit),
    Distinct(Distinct),
    Union(Union),
    ValueList(ValueList),
    BulkInput(BulkInput),
    BulkOutput(BulkOutput),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Relation {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Relation::Table(_) => NodeType::Table,
            Relation::Join(_) => NodeType::Join,
            Relation::Filter(_) => NodeType::Filter,
            Relation::Projection(_) => NodeType::Projection,
            Relation::Derived(_) => NodeType::Derived,
            Relation::Grouping(_) => NodeType::Grouping,
            Relation::Sort(_) => NodeType::Sort,
            Relation::Limit(_) => NodeType::Limit,
            Relation::Distinct(_) => NodeType::Distinct,
            Relation::Union(_) => NodeType::Union,
            Relation::ValueList(_) => NodeType::ValueList,
            Relation::BulkInput(_) => NodeType::BulkInput,
            Relation::BulkOutput(_) => NodeType::BulkOutput,
            Relation::Insert(_) => NodeType::Insert,
            Relation::Update(_) => NodeType::Update,
            Relation::Delete(_) => NodeType::Delete,
        }
    }

    #[must_use]
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            Relation::Join(Join { operands, .. }) | Relation::Union(Union { operands, .. }) => {
                operands.clone()
            }
            Relation::Filter(Filter { operand, .. })
            | Relation::Projection(Projection { operand, .. })
            | Relation::Derived(Derived { operand, .. })
            | Relation::Grouping(Grouping { operand, .. })
            | Relation::Sort(Sort { operand, .. })
            | Relation::Limit(Limit { operand, .. })
            | Relation::Distinct(Distinct { operand })
            | Relation::BulkOutput(BulkOutput { operand, .. })
            | Relation::Insert(Insert { operand, .. })
            | Relation::Update(Update { operand, .. })
            | Relation::Delete(Delete { operand, .. }) => vec![*operand],
            Relation::Table(_) | Relation::ValueList(_) | Relation::BulkInput(_) => vec![],
        }
    }

    /// Scalars computed by the node itself.
    #[must_use]
    pub fn scalars(&self) -> Vec<NodeId> {
        match self {
            Relation::Projection(Projection { columns, .. }) => columns.clone(),
            Relation::Grouping(Grouping {
                keys, aggregates, ..
            }) => keys.iter().chain(aggregates.iter()).copied().collect(),
            Relation::Sort(Sort { keys, .. }) => keys.iter().map(|k| k.scalar).collect(),
            Relation::Limit(Limit { limit, offset, .. }) => {
                let mut res = vec![*limit];
                res.extend(offset.iter().copied());
                res
            }
            Relation::ValueList(ValueList { rows, .. }) => rows.iter().flatten().copied().collect(),
            Relation::Update(Update { assignments, .. }) => {
                assignments.iter().map(|a| a.value).collect()
            }
            _ => vec![],
        }
    }

    /// Predicates evaluated by the node itself.
    #[must_use]
    pub fn predicates(&self) -> Vec<NodeId> {
        match self {
            Relation::Join(Join {
                predicate: Some(predicate),
                ..
            })
            | Relation::Filter(Filter { predicate, .. }) => vec![*predicate],
            _ => vec![],
        }
    }
}

impl Environment {
    /// # Errors
    /// - node is not found or is not a relation
    pub fn get_relation(&self, id: NodeId) -> Result<&Relation, PlanError> {
        match self.get_node(id)? {
            Node::Relation(relation) => Ok(relation),
            _ => Err(PlanError::Unexpected(
                Entity::Relation,
                Some(format_smolstr!("node {id} is not a relation")),
            )),
        }
    }

    /// # Errors
    /// - node is not found or is not a relation
    pub fn get_relation_mut(&mut self, id: NodeId) -> Result<&mut Relation, PlanError> {
        match self.get_node_mut(id)? {
            Node::Relation(relation) => Ok(relation),
            _ => Err(PlanError::Unexpected(
                Entity::Relation,
                Some(format_smolstr!("node {id} is not a relation")),
            )),
        }
    }

    /// Output row of the relation.
    ///
    /// # Errors
    /// - node is not a relation
    pub fn row_info(&self, id: NodeId) -> Result<Vec<NodeId>, PlanError> {
        let row = match self.get_relation(id)? {
            Relation::Table(Table { columns, .. })
            | Relation::Derived(Derived { columns, .. })
            | Relation::Union(Union { columns, .. })
            | Relation::ValueList(ValueList { columns, .. })
            | Relation::BulkInput(BulkInput { columns, .. })
            | Relation::Projection(Projection { columns, .. }) => columns.clone(),
            Relation::Join(Join { kind, operands, .. }) => {
                if kind.is_exists() {
                    self.row_info(operands[0])?
                } else {
                    let mut row = Vec::new();
                    for operand in operands {
                        row.extend(self.row_info(*operand)?);
                    }
                    row
                }
            }
            Relation::Filter(Filter { operand, .. })
            | Relation::Sort(Sort { operand, .. })
            | Relation::Limit(Limit { operand, .. })
            | Relation::Distinct(Distinct { operand }) => self.row_info(*operand)?,
            Relation::Grouping(Grouping {
                keys, aggregates, ..
            }) => keys.iter().chain(aggregates.iter()).copied().collect(),
            Relation::BulkOutput(_)
            | Relation::Insert(_)
            | Relation::Update(_)
            | Relation::Delete(_) => vec![],
        };
        Ok(row)
    }

    /// Number of output columns.
    ///
    /// # Errors
    /// - node is not a relation
    pub fn degree(&self, id: NodeId) -> Result<usize, PlanError> {
        Ok(self.row_info(id)?.len())
    }

    /// Names of the output columns.
    ///
    /// # Errors
    /// - node is not a relation
    pub fn row_names(&self, id: NodeId) -> Result<Vec<SmolStr>, PlanError> {
        let names = match self.get_relation(id)? {
            Relation::Projection(Projection { names, .. }) => names.clone(),
            Relation::Filter(Filter { operand, .. })
            | Relation::Sort(Sort { operand, .. })
            | Relation::Limit(Limit { operand, .. })
            | Relation::Distinct(Distinct { operand }) => self.row_names(*operand)?,
            _ => self
                .row_info(id)?
                .into_iter()
                .enumerate()
                .map(|(pos, scalar)| match self.get_scalar(scalar) {
                    Ok(Scalar::Field(field)) => field.name.clone(),
                    _ => format_smolstr!("column_{}", pos + 1),
                })
                .collect(),
        };
        Ok(names)
    }

    /// Name-map entries for the output columns of a relation.
    ///
    /// # Errors
    /// - node is not a relation
    pub fn row_elements(&self, id: NodeId) -> Result<Vec<(SmolStr, RowElement)>, PlanError> {
        let names = self.row_names(id)?;
        let row = self.row_info(id)?;
        Ok(names
            .into_iter()
            .zip(row)
            .enumerate()
            .map(|(position, (name, scalar))| {
                (
                    name,
                    RowElement {
                        relation: id,
                        position,
                        scalar,
                    },
                )
            })
            .collect())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Constructors
    ////////////////////////////////////////////////////////////////////////////

    /// Scan of a catalog table with one field per column.
    ///
    /// # Errors
    /// - the table is not in the catalog
    pub fn add_table(
        &mut self,
        name: &str,
        correlation: Option<SmolStr>,
    ) -> Result<NodeId, PlanError> {
        let schema = self.metadata().table(name)?;
        let columns = schema.columns.clone();
        let id = self.register(Relation::Table(Table {
            schema,
            correlation,
            columns: Vec::new(),
        }));
        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(pos, column)| {
                self.add_field(id, pos, column.name, column.data_type, column.nullable)
            })
            .collect::<Vec<_>>();
        if let Relation::Table(table) = self.get_relation_mut(id)? {
            table.columns = fields;
        }
        Ok(id)
    }

    /// Joins the operands. Over cascaded servers the construction is
    /// delegated to the distributed planner.
    ///
    /// # Errors
    /// - full outer join
    /// - wrong number of operands for the join kind
    pub fn add_join(
        &mut self,
        kind: JoinKind,
        operands: Vec<NodeId>,
        predicate: Option<NodeId>,
    ) -> Result<NodeId, PlanError> {
        if self.has_cascade() {
            return distributed::create_join(self, kind, operands, predicate);
        }
        self.add_local_join(kind, operands, predicate)
    }

    pub(crate) fn add_local_join(
        &mut self,
        kind: JoinKind,
        operands: Vec<NodeId>,
        predicate: Option<NodeId>,
    ) -> Result<NodeId, PlanError> {
        if kind == JoinKind::FullOuter {
            return Err(PlanError::NotSupported(
                Entity::Join,
                Some("full outer join".into()),
            ));
        }
        let valid = match kind {
            JoinKind::Inner => operands.len() >= 2,
            _ => operands.len() == 2,
        };
        if !valid {
            return Err(PlanError::Unexpected(
                Entity::Join,
                Some(format_smolstr!(
                    "{kind} join with {} operands",
                    operands.len()
                )),
            ));
        }
        Ok(self.register(Relation::Join(Join {
            kind,
            operands,
            predicate,
        })))
    }

    /// Attaches the `ON` condition analyzed after the join was built.
    ///
    /// # Errors
    /// - the node is not a join
    pub fn set_join_predicate(&mut self, join: NodeId, predicate: NodeId) -> Result<(), PlanError> {
        match self.get_relation_mut(join)? {
            Relation::Join(join) => {
                join.predicate = Some(predicate);
                Ok(())
            }
            _ => Err(PlanError::Unexpected(
                Entity::Join,
                Some(format_smolstr!("node {join} is not a join")),
            )),
        }
    }

    pub fn add_filter(&mut self, operand: NodeId, predicate: NodeId) -> NodeId {
        self.register(Relation::Filter(Filter { operand, predicate }))
    }

    /// # Errors
    /// - the number of names differs from the number of columns
    pub fn add_projection(
        &mut self,
        operand: NodeId,
        columns: Vec<NodeId>,
        names: Vec<SmolStr>,
    ) -> Result<NodeId, PlanError> {
        if columns.len() != names.len() {
            return Err(PlanError::Unexpected(
                Entity::Relation,
                Some("projection names don't match its columns".into()),
            ));
        }
        Ok(self.register(Relation::Projection(Projection {
            operand,
            columns,
            names,
        })))
    }

    /// Renames the operand output under `alias`.
    ///
    /// # Errors
    /// - the column name list doesn't match the operand degree
    pub fn add_derived(
        &mut self,
        operand: NodeId,
        alias: SmolStr,
        column_names: Option<Vec<SmolStr>>,
    ) -> Result<NodeId, PlanError> {
        let row = self.row_info(operand)?;
        let names = match column_names {
            Some(names) if names.len() != row.len() => {
                return Err(PlanError::InvalidRowValue(format_smolstr!(
                    "{alias} has {} columns, {} names given",
                    row.len(),
                    names.len()
                )))
            }
            Some(names) => names,
            None => self.row_names(operand)?,
        };
        let id = self.register(Relation::Derived(Derived {
            operand,
            alias,
            columns: Vec::new(),
        }));
        let mut fields = Vec::with_capacity(row.len());
        for (pos, (scalar, name)) in row.into_iter().zip(names).enumerate() {
            let data_type = self.scalar_type(scalar)?;
            fields.push(self.add_field(id, pos, name, data_type, true));
        }
        if let Relation::Derived(derived) = self.get_relation_mut(id)? {
            derived.columns = fields;
        }
        Ok(id)
    }

    pub fn add_grouping(
        &mut self,
        operand: NodeId,
        keys: Vec<NodeId>,
        aggregates: Vec<NodeId>,
    ) -> NodeId {
        self.register(Relation::Grouping(Grouping {
            operand,
            keys,
            aggregates,
        }))
    }

    pub fn add_sort(&mut self, operand: NodeId, keys: Vec<SortKey>) -> NodeId {
        self.register(Relation::Sort(Sort { operand, keys }))
    }

    /// # Errors
    /// - limit or offset is not an integer
    pub fn add_limit(
        &mut self,
        operand: NodeId,
        limit: NodeId,
        offset: Option<NodeId>,
    ) -> Result<NodeId, PlanError> {
        for scalar in std::iter::once(limit).chain(offset) {
            let ty = self.scalar_type(scalar)?;
            if !matches!(ty, DataType::Integer | DataType::Unknown) {
                return Err(PlanError::NotSupported(
                    Entity::Expression,
                    Some(format_smolstr!("LIMIT of {ty}")),
                ));
            }
        }
        Ok(self.register(Relation::Limit(Limit {
            operand,
            limit,
            offset,
        })))
    }

    /// # Errors
    /// - distinct over cascaded servers
    pub fn add_distinct(&mut self, operand: NodeId) -> Result<NodeId, PlanError> {
        if self.has_cascade() {
            return distributed::create_distinct(self, operand);
        }
        Ok(self.register(Relation::Distinct(Distinct { operand })))
    }

    /// # Errors
    /// - operands of different degree
    pub fn add_union(&mut self, operands: Vec<NodeId>, all: bool) -> Result<NodeId, PlanError> {
        let Some(first) = operands.first().copied() else {
            return Err(PlanError::Unexpected(
                Entity::Relation,
                Some("union without operands".into()),
            ));
        };
        let row = self.row_info(first)?;
        let mut types = row
            .iter()
            .map(|scalar| self.scalar_type(*scalar))
            .collect::<Result<Vec<_>, _>>()?;
        for operand in &operands[1..] {
            let other = self.row_info(*operand)?;
            if other.len() != row.len() {
                return Err(PlanError::InvalidRowValue(format_smolstr!(
                    "union operands have {} and {} columns",
                    row.len(),
                    other.len()
                )));
            }
            for (ty, scalar) in types.iter_mut().zip(other) {
                *ty = DataType::comparable(ty, &self.scalar_type(scalar)?)?;
            }
        }
        let names = self.row_names(first)?;
        let id = self.register(Relation::Union(Union {
            operands,
            all,
            columns: Vec::new(),
        }));
        let fields = names
            .into_iter()
            .zip(types)
            .enumerate()
            .map(|(pos, (name, ty))| self.add_field(id, pos, name, ty, true))
            .collect::<Vec<_>>();
        if let Relation::Union(union) = self.get_relation_mut(id)? {
            union.columns = fields;
        }
        Ok(id)
    }

    /// # Errors
    /// - no rows, or rows of different degree
    pub fn add_value_list(&mut self, rows: Vec<Vec<NodeId>>) -> Result<NodeId, PlanError> {
        let Some(first) = rows.first() else {
            return Err(PlanError::InvalidRowValue("empty VALUES list".into()));
        };
        let degree = first.len();
        let mut types = vec![DataType::Unknown; degree];
        for row in &rows {
            if row.len() != degree {
                return Err(PlanError::InvalidRowValue(format_smolstr!(
                    "VALUES rows have {degree} and {} columns",
                    row.len()
                )));
            }
            for (ty, scalar) in types.iter_mut().zip(row) {
                *ty = DataType::comparable(ty, &self.scalar_type(*scalar)?)?;
            }
        }
        let id = self.register(Relation::ValueList(ValueList {
            rows,
            columns: Vec::new(),
        }));
        let fields = types
            .into_iter()
            .enumerate()
            .map(|(pos, ty)| self.add_field(id, pos, format_smolstr!("column_{}", pos + 1), ty, true))
            .collect::<Vec<_>>();
        if let Relation::ValueList(values) = self.get_relation_mut(id)? {
            values.columns = fields;
        }
        Ok(id)
    }

    /// # Errors
    /// - node bookkeeping failed
    pub fn add_bulk_input(
        &mut self,
        path: SmolStr,
        columns: Vec<schema::Column>,
    ) -> Result<NodeId, PlanError> {
        let id = self.register(Relation::BulkInput(BulkInput {
            path,
            columns: Vec::new(),
        }));
        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(pos, column)| {
                self.add_field(id, pos, column.name, column.data_type, column.nullable)
            })
            .collect::<Vec<_>>();
        if let Relation::BulkInput(bulk) = self.get_relation_mut(id)? {
            bulk.columns = fields;
        }
        Ok(id)
    }

    pub fn add_bulk_output(&mut self, operand: NodeId, path: SmolStr) -> NodeId {
        self.register(Relation::BulkOutput(BulkOutput { operand, path }))
    }

    /// # Errors
    /// - the source degree differs from the number of target columns
    /// - a source column type doesn't fit its target
    pub fn add_insert(
        &mut self,
        table: schema::Table,
        columns: Vec<usize>,
        operand: NodeId,
    ) -> Result<NodeId, PlanError> {
        let row = self.row_info(operand)?;
        if row.len() != columns.len() {
            return Err(PlanError::InvalidRowValue(format_smolstr!(
                "{} has {} target columns, source has {}",
                table.name,
                columns.len(),
                row.len()
            )));
        }
        for (scalar, pos) in row.iter().zip(&columns) {
            let target = &table.columns[*pos].data_type;
            DataType::comparable(target, &self.scalar_type(*scalar)?)?;
        }
        for (pos, column) in table.columns.iter().enumerate() {
            if !column.nullable && !columns.contains(&pos) {
                return Err(PlanError::NotFound(
                    Entity::Column,
                    format_smolstr!("value for not null column {}.{}", table.name, column.name),
                ));
            }
        }
        Ok(self.register(Relation::Insert(Insert {
            table,
            columns,
            operand,
        })))
    }

    /// # Errors
    /// - assigned value type doesn't fit its column
    pub fn add_update(
        &mut self,
        table: schema::Table,
        operand: NodeId,
        assignments: Vec<Assignment>,
    ) -> Result<NodeId, PlanError> {
        for assignment in &assignments {
            let column = table.columns.get(assignment.position).ok_or_else(|| {
                PlanError::ColumnNotFound(format_smolstr!(
                    "{} column {}",
                    table.name,
                    assignment.position
                ))
            })?;
            DataType::comparable(&column.data_type, &self.scalar_type(assignment.value)?)?;
        }
        Ok(self.register(Relation::Update(Update {
            table,
            operand,
            assignments,
        })))
    }

    pub fn add_delete(&mut self, table: schema::Table, operand: NodeId) -> NodeId {
        self.register(Relation::Delete(Delete { table, operand }))
    }
}

#[cfg(test)]
mod tests;
