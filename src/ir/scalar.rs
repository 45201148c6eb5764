//! Scalar expression nodes.
//!
//! A scalar computes one typed value per row. Nodes are immutable after
//! registration and refer to their operands by [`NodeId`].

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};

use crate::errors::{Entity, PlanError};
use crate::ir::aggregates::AggregateKind;
use crate::ir::environment::Environment;
use crate::ir::node::{Node, NodeId, NodeType};
use crate::ir::operator::Arithmetic;
use crate::ir::types::DataType;
use crate::ir::value::{Double, Value};

/// Column of a relation's row.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Field {
    /// Relation producing the column.
    pub relation: NodeId,
    pub position: usize,
    pub name: SmolStr,
    pub data_type: DataType,
    pub nullable: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Constant {
    pub value: Value,
}

/// Placeholder bound by the caller at execution time.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Parameter {
    pub index: usize,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ArithmeticExpr {
    pub op: Arithmetic,
    pub left: NodeId,
    pub right: NodeId,
    pub data_type: DataType,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Negative {
    pub operand: NodeId,
    pub data_type: DataType,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Concat {
    pub left: NodeId,
    pub right: NodeId,
}

/// Set function. `operand` is `None` for `COUNT(*)`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Aggregation {
    pub kind: AggregateKind,
    pub operand: Option<NodeId>,
    pub distinct: bool,
    pub data_type: DataType,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FunctionKind {
    Abs,
    Cardinality,
    CharLength,
    Coalesce,
    FullTextLength,
    Lower,
    Upper,
    WordCount,
}

impl FunctionKind {
    /// # Errors
    /// - the name does not denote a known scalar function
    pub fn from_name(name: &str) -> Result<Self, PlanError> {
        let kind = match name.to_lowercase().as_str() {
            "abs" => FunctionKind::Abs,
            "cardinality" => FunctionKind::Cardinality,
            "char_length" | "character_length" => FunctionKind::CharLength,
            "coalesce" => FunctionKind::Coalesce,
            "fulltext_length" => FunctionKind::FullTextLength,
            "lower" => FunctionKind::Lower,
            "upper" => FunctionKind::Upper,
            "word_count" => FunctionKind::WordCount,
            _ => {
                return Err(PlanError::NotSupported(
                    Entity::Function,
                    Some(format_smolstr!("{name}")),
                ))
            }
        };
        Ok(kind)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Abs => "ABS",
            FunctionKind::Cardinality => "CARDINALITY",
            FunctionKind::CharLength => "CHAR_LENGTH",
            FunctionKind::Coalesce => "COALESCE",
            FunctionKind::FullTextLength => "FULLTEXT_LENGTH",
            FunctionKind::Lower => "LOWER",
            FunctionKind::Upper => "UPPER",
            FunctionKind::WordCount => "WORD_COUNT",
        }
    }

    /// Functions whose per-partition average can't be restored from a sum.
    #[must_use]
    pub fn is_fulltext_statistic(&self) -> bool {
        matches!(self, FunctionKind::FullTextLength | FunctionKind::WordCount)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Function {
    pub kind: FunctionKind,
    pub args: Vec<NodeId>,
    pub data_type: DataType,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Cast {
    pub operand: NodeId,
    pub to: DataType,
}

/// Arbitrary element of an array operand (`arr[] = 1`).
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct AnyElement {
    pub operand: NodeId,
    pub data_type: DataType,
}

/// Single-column subquery used as a value.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SubQuery {
    pub relation: NodeId,
    pub data_type: DataType,
}

/// Column of a result computed by a back-end server.
///
/// `name` is the SQL text the server evaluates for this column.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct RemoteColumn {
    pub name: SmolStr,
    pub position: usize,
    pub data_type: DataType,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Scalar {
    Field(Field),
    Constant(Constant),
    Parameter(Parameter),
    Arithmetic(ArithmeticExpr),
    Negative(Negative),
    Concat(Concat),
    Aggregation(Aggregation),
    Function(Function),
    Cast(Cast),
    AnyElement(AnyElement),
    SubQuery(SubQuery),
    RemoteColumn(RemoteColumn),
}

impl Scalar {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Scalar::Field(_) => NodeType::Field,
            Scalar::Constant(_) => NodeType::Constant,
            Scalar::Parameter(_) => NodeType::Parameter,
            Scalar::Arithmetic(_) => NodeType::Arithmetic,
            Scalar::Negative(_) => NodeType::Negative,
            Scalar::Concat(_) => NodeType::Concat,
            Scalar::Aggregation(_) => NodeType::Aggregation,
            Scalar::Function(_) => NodeType::Function,
            Scalar::Cast(_) => NodeType::Cast,
            Scalar::AnyElement(_) => NodeType::AnyElement,
            Scalar::SubQuery(_) => NodeType::SubQuery,
            Scalar::RemoteColumn(_) => NodeType::RemoteColumn,
        }
    }

    /// Type of the value the node produces. Parameters are untyped.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Field(Field { data_type, .. })
            | Scalar::Arithmetic(ArithmeticExpr { data_type, .. })
            | Scalar::Negative(Negative { data_type, .. })
            | Scalar::Aggregation(Aggregation { data_type, .. })
            | Scalar::Function(Function { data_type, .. })
            | Scalar::AnyElement(AnyElement { data_type, .. })
            | Scalar::SubQuery(SubQuery { data_type, .. })
            | Scalar::RemoteColumn(RemoteColumn { data_type, .. }) => data_type.clone(),
            Scalar::Constant(Constant { value }) => value.get_type(),
            Scalar::Parameter(_) => DataType::Unknown,
            Scalar::Concat(_) => DataType::String,
            Scalar::Cast(Cast { to, .. }) => to.clone(),
        }
    }

    /// Scalar operands of the node.
    #[must_use]
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Scalar::Arithmetic(ArithmeticExpr { left, right, .. })
            | Scalar::Concat(Concat { left, right }) => vec![*left, *right],
            Scalar::Negative(Negative { operand, .. })
            | Scalar::Cast(Cast { operand, .. })
            | Scalar::AnyElement(AnyElement { operand, .. }) => vec![*operand],
            Scalar::Aggregation(Aggregation { operand, .. }) => operand.iter().copied().collect(),
            Scalar::Function(Function { args, .. }) => args.clone(),
            Scalar::Field(_)
            | Scalar::Constant(_)
            | Scalar::Parameter(_)
            | Scalar::SubQuery(_)
            | Scalar::RemoteColumn(_) => vec![],
        }
    }
}

/// In-memory row used for constant folding: field node to its value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tuple {
    values: AHashMap<NodeId, Value>,
}

impl Tuple {
    /// Binds the values to the output columns of `relation`, in order.
    ///
    /// # Errors
    /// - the number of values differs from the relation degree
    pub fn from_row(
        env: &Environment,
        relation: NodeId,
        values: Vec<Value>,
    ) -> Result<Self, PlanError> {
        let row = env.row_info(relation)?;
        if row.len() != values.len() {
            return Err(PlanError::InvalidRowValue(format_smolstr!(
                "relation has {} columns, row has {} values",
                row.len(),
                values.len()
            )));
        }
        Ok(Tuple {
            values: row.into_iter().zip(values).collect(),
        })
    }

    pub fn bind(&mut self, field: NodeId, value: Value) {
        self.values.insert(field, value);
    }

    #[must_use]
    pub fn get(&self, field: NodeId) -> Option<&Value> {
        self.values.get(&field)
    }
}

impl Environment {
    /// # Errors
    /// - node is not found or is not a scalar
    pub fn get_scalar(&self, id: NodeId) -> Result<&Scalar, PlanError> {
        match self.get_node(id)? {
            Node::Scalar(scalar) => Ok(scalar),
            _ => Err(PlanError::Unexpected(
                Entity::Expression,
                Some(format_smolstr!("node {id} is not a scalar")),
            )),
        }
    }

    /// # Errors
    /// - node is not found or is not a scalar
    pub fn scalar_type(&self, id: NodeId) -> Result<DataType, PlanError> {
        Ok(self.get_scalar(id)?.data_type())
    }

    pub fn add_field(
        &mut self,
        relation: NodeId,
        position: usize,
        name: SmolStr,
        data_type: DataType,
        nullable: bool,
    ) -> NodeId {
        self.register(Scalar::Field(Field {
            relation,
            position,
            name,
            data_type,
            nullable,
        }))
    }

    pub fn add_constant(&mut self, value: Value) -> NodeId {
        self.register(Scalar::Constant(Constant { value }))
    }

    pub fn add_parameter(&mut self, index: usize) -> NodeId {
        self.note_parameter(index);
        self.register(Scalar::Parameter(Parameter { index }))
    }

    /// # Errors
    /// - operands are not numeric
    pub fn add_arithmetic(
        &mut self,
        op: Arithmetic,
        left: NodeId,
        right: NodeId,
    ) -> Result<NodeId, PlanError> {
        let data_type = DataType::arithmetic(&self.scalar_type(left)?, &self.scalar_type(right)?)?;
        Ok(self.register(Scalar::Arithmetic(ArithmeticExpr {
            op,
            left,
            right,
            data_type,
        })))
    }

    /// # Errors
    /// - operand is not numeric
    pub fn add_negative(&mut self, operand: NodeId) -> Result<NodeId, PlanError> {
        let data_type = DataType::arithmetic(&self.scalar_type(operand)?, &DataType::Unknown)?;
        Ok(self.register(Scalar::Negative(Negative { operand, data_type })))
    }

    /// # Errors
    /// - operands are not strings
    pub fn add_concat(&mut self, left: NodeId, right: NodeId) -> Result<NodeId, PlanError> {
        for side in [left, right] {
            let ty = self.scalar_type(side)?;
            if !ty.is_string() {
                return Err(PlanError::NotSupported(
                    Entity::Operator,
                    Some(format_smolstr!("concatenation of {ty}")),
                ));
            }
        }
        Ok(self.register(Scalar::Concat(Concat { left, right })))
    }

    /// # Errors
    /// - operand type doesn't fit the aggregate
    pub fn add_aggregation(
        &mut self,
        kind: AggregateKind,
        operand: Option<NodeId>,
        distinct: bool,
    ) -> Result<NodeId, PlanError> {
        let operand_type = match operand {
            Some(id) => Some(self.scalar_type(id)?),
            None => None,
        };
        let data_type = kind.data_type(operand_type.as_ref())?;
        Ok(self.register(Scalar::Aggregation(Aggregation {
            kind,
            operand,
            distinct,
            data_type,
        })))
    }

    /// # Errors
    /// - wrong number of arguments
    /// - `CARDINALITY` of a non-array operand
    /// - argument types don't fit the function
    pub fn add_function(
        &mut self,
        kind: FunctionKind,
        args: Vec<NodeId>,
    ) -> Result<NodeId, PlanError> {
        let types = args
            .iter()
            .map(|arg| self.scalar_type(*arg))
            .collect::<Result<Vec<_>, _>>()?;
        let expect_args = |n: usize| -> Result<(), PlanError> {
            if types.len() == n {
                return Ok(());
            }
            Err(PlanError::NotSupported(
                Entity::Function,
                Some(format_smolstr!(
                    "{} with {} arguments",
                    kind.as_str(),
                    types.len()
                )),
            ))
        };
        let data_type = match kind {
            FunctionKind::Cardinality => {
                expect_args(1)?;
                if !types[0].is_array() && types[0] != DataType::Unknown {
                    return Err(PlanError::InvalidCardinality(format_smolstr!(
                        "CARDINALITY of {}",
                        types[0]
                    )));
                }
                DataType::Integer
            }
            FunctionKind::CharLength | FunctionKind::FullTextLength | FunctionKind::WordCount => {
                expect_args(1)?;
                if !types[0].is_string() {
                    return Err(PlanError::NotSupported(
                        Entity::Function,
                        Some(format_smolstr!("{} of {}", kind.as_str(), types[0])),
                    ));
                }
                DataType::Integer
            }
            FunctionKind::Upper | FunctionKind::Lower => {
                expect_args(1)?;
                if !types[0].is_string() {
                    return Err(PlanError::NotSupported(
                        Entity::Function,
                        Some(format_smolstr!("{} of {}", kind.as_str(), types[0])),
                    ));
                }
                DataType::String
            }
            FunctionKind::Abs => {
                expect_args(1)?;
                DataType::arithmetic(&types[0], &DataType::Unknown)?
            }
            FunctionKind::Coalesce => {
                if types.is_empty() {
                    return Err(PlanError::NotSupported(
                        Entity::Function,
                        Some("COALESCE without arguments".into()),
                    ));
                }
                let mut common = DataType::Unknown;
                for ty in &types {
                    common = DataType::comparable(&common, ty)?;
                }
                common
            }
        };
        Ok(self.register(Scalar::Function(Function {
            kind,
            args,
            data_type,
        })))
    }

    pub fn add_cast(&mut self, operand: NodeId, to: DataType) -> NodeId {
        self.register(Scalar::Cast(Cast { operand, to }))
    }

    /// # Errors
    /// - operand is not an array
    pub fn add_any_element(&mut self, operand: NodeId) -> Result<NodeId, PlanError> {
        let ty = self.scalar_type(operand)?;
        let data_type = match ty {
            DataType::Array(element) => *element,
            DataType::Unknown => DataType::Unknown,
            other => {
                return Err(PlanError::InvalidCardinality(format_smolstr!(
                    "array element of {other}"
                )))
            }
        };
        Ok(self.register(Scalar::AnyElement(AnyElement { operand, data_type })))
    }

    /// # Errors
    /// - the subquery returns more than one column
    pub fn add_subquery(&mut self, relation: NodeId) -> Result<NodeId, PlanError> {
        let row = self.row_info(relation)?;
        let [column] = row.as_slice() else {
            return Err(PlanError::InvalidRowValue(format_smolstr!(
                "scalar subquery returns {} columns",
                row.len()
            )));
        };
        let data_type = self.scalar_type(*column)?;
        Ok(self.register(Scalar::SubQuery(SubQuery {
            relation,
            data_type,
        })))
    }

    pub fn add_remote_column(
        &mut self,
        name: SmolStr,
        position: usize,
        data_type: DataType,
    ) -> NodeId {
        self.register(Scalar::RemoteColumn(RemoteColumn {
            name,
            position,
            data_type,
        }))
    }

    /// Computes the scalar over an in-memory row.
    ///
    /// # Errors
    /// - the scalar needs execution-time state (parameters, subqueries,
    ///   aggregates)
    /// - a field is missing from the tuple
    pub fn evaluate(&self, id: NodeId, tuple: &Tuple) -> Result<Value, PlanError> {
        let value = match self.get_scalar(id)? {
            Scalar::Field(field) => tuple
                .get(id)
                .cloned()
                .ok_or_else(|| PlanError::ColumnNotFound(field.name.clone()))?,
            Scalar::Constant(Constant { value }) => value.clone(),
            Scalar::Arithmetic(ArithmeticExpr {
                op, left, right, ..
            }) => {
                let (op, left, right) = (*op, *left, *right);
                let left = self.evaluate(left, tuple)?;
                let right = self.evaluate(right, tuple)?;
                fold_arithmetic(op, &left, &right)?
            }
            Scalar::Negative(Negative { operand, .. }) => match self.evaluate(*operand, tuple)? {
                Value::Integer(i) => Value::Integer(-i),
                Value::Double(d) => Value::Double(Double::from(-d.value)),
                Value::Null => Value::Null,
                other => return Err(not_foldable(format_smolstr!("negation of {other}"))),
            },
            Scalar::Concat(Concat { left, right }) => {
                match (self.evaluate(*left, tuple)?, self.evaluate(*right, tuple)?) {
                    (Value::String(l), Value::String(r)) => {
                        Value::String(format_smolstr!("{l}{r}"))
                    }
                    (Value::Null, _) | (_, Value::Null) => Value::Null,
                    _ => return Err(not_foldable("concatenation".into())),
                }
            }
            Scalar::Function(Function { kind, args, .. }) => {
                let kind = *kind;
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(*arg, tuple))
                    .collect::<Result<Vec<_>, _>>()?;
                fold_function(kind, args)?
            }
            Scalar::Cast(Cast { operand, to }) => {
                let to = to.clone();
                fold_cast(self.evaluate(*operand, tuple)?, &to)?
            }
            Scalar::Parameter(Parameter { index }) => {
                return Err(not_foldable(format_smolstr!("parameter {index}")))
            }
            other => {
                return Err(not_foldable(format_smolstr!("{:?}", other.node_type())));
            }
        };
        Ok(value)
    }
}

fn not_foldable(what: SmolStr) -> PlanError {
    PlanError::NotSupported(
        Entity::Expression,
        Some(format_smolstr!("evaluation of {what}")),
    )
}

fn fold_arithmetic(op: Arithmetic, left: &Value, right: &Value) -> Result<Value, PlanError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if let (Value::Integer(l), Value::Integer(r)) = (left, right) {
        let (l, r) = (*l, *r);
        let res = match op {
            Arithmetic::Add => l.checked_add(r),
            Arithmetic::Subtract => l.checked_sub(r),
            Arithmetic::Multiply => l.checked_mul(r),
            Arithmetic::Divide => l.checked_div(r),
            Arithmetic::Modulo => l.checked_rem(r),
        };
        return res
            .map(Value::Integer)
            .ok_or_else(|| not_foldable(format_smolstr!("{l} {op} {r}")));
    }
    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return Err(not_foldable(format_smolstr!("{left} {op} {right}")));
    };
    let res = match op {
        Arithmetic::Add => l + r,
        Arithmetic::Subtract => l - r,
        Arithmetic::Multiply => l * r,
        Arithmetic::Divide if r == 0.0 => {
            return Err(not_foldable(format_smolstr!("{left} / {right}")))
        }
        Arithmetic::Divide => l / r,
        Arithmetic::Modulo => l % r,
    };
    Ok(Value::from(res))
}

fn fold_function(kind: FunctionKind, args: Vec<Value>) -> Result<Value, PlanError> {
    if kind == FunctionKind::Coalesce {
        return Ok(args
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null));
    }
    let Some(arg) = args.into_iter().next() else {
        return Err(not_foldable(kind.as_str().into()));
    };
    let value = match (kind, arg) {
        (_, Value::Null) => Value::Null,
        (FunctionKind::Abs, Value::Integer(i)) => Value::Integer(i.abs()),
        (FunctionKind::Abs, Value::Double(d)) => Value::from(d.value.abs()),
        (FunctionKind::Cardinality, Value::Array(items)) => Value::Integer(items.len() as i64),
        (FunctionKind::CharLength, Value::String(s)) => Value::Integer(s.chars().count() as i64),
        (FunctionKind::Upper, Value::String(s)) => Value::String(s.to_uppercase().into()),
        (FunctionKind::Lower, Value::String(s)) => Value::String(s.to_lowercase().into()),
        (kind, _) => return Err(not_foldable(kind.as_str().into())),
    };
    Ok(value)
}

fn fold_cast(value: Value, to: &DataType) -> Result<Value, PlanError> {
    let res = match (value, to) {
        (Value::Null, _) => Value::Null,
        (Value::Integer(i), DataType::Double | DataType::Decimal) => Value::from(i as f64),
        (Value::Double(d), DataType::Integer) => Value::Integer(d.value.trunc() as i64),
        (Value::Integer(i), DataType::String) => Value::String(format_smolstr!("{i}")),
        (Value::Double(d), DataType::String) => Value::String(format_smolstr!("{}", d.value)),
        (Value::String(s), DataType::Integer) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| not_foldable(format_smolstr!("CAST('{s}' AS {to})")))?,
        (value, to) if &value.get_type() == to => value,
        (value, to) => return Err(not_foldable(format_smolstr!("CAST({value} AS {to})"))),
    };
    Ok(res)
}
