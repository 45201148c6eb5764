//! Value expressions: parse tree to scalar nodes.

use smol_str::{format_smolstr, SmolStr};

use crate::errors::{Entity, PlanError};
use crate::frontend::analysis::query;
use crate::frontend::statement::{Operator, ValueExpression};
use crate::ir::aggregates::AggregateKind;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::Arithmetic;
use crate::ir::scalar::{FunctionKind, Scalar};
use crate::ir::status::Status;
use crate::ir::types::DataType;

/// Cache key of expressions that are not evaluated over a relation
/// (`VALUES` rows, `LIMIT` counts).
pub const NO_RELATION: NodeId = NodeId(u32::MAX);

/// Analyzer chosen by the shape and operator tag of a value expression.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueAnalyzer {
    Literal,
    Parameter,
    ItemReference,
    ArrayElement,
    Negative,
    Positive,
    Arithmetic(Arithmetic),
    Concat,
    Function(FunctionKind),
    SetFunction(AggregateKind),
    Cast,
    SubQuery,
    Row,
}

impl ValueAnalyzer {
    /// # Errors
    /// - the operator or function tag has no value analyzer
    pub fn create(expr: &ValueExpression) -> Result<Self, PlanError> {
        let analyzer = match expr {
            ValueExpression::Literal(_) => ValueAnalyzer::Literal,
            ValueExpression::Parameter(_) => ValueAnalyzer::Parameter,
            ValueExpression::ItemReference { .. } => ValueAnalyzer::ItemReference,
            ValueExpression::ArrayElement(_) => ValueAnalyzer::ArrayElement,
            ValueExpression::Monadic {
                op: Operator::Negative,
                ..
            } => ValueAnalyzer::Negative,
            ValueExpression::Monadic {
                op: Operator::Positive,
                ..
            } => ValueAnalyzer::Positive,
            ValueExpression::Dyadic { op, .. } => match op {
                Operator::Add => ValueAnalyzer::Arithmetic(Arithmetic::Add),
                Operator::Subtract => ValueAnalyzer::Arithmetic(Arithmetic::Subtract),
                Operator::Multiply => ValueAnalyzer::Arithmetic(Arithmetic::Multiply),
                Operator::Divide => ValueAnalyzer::Arithmetic(Arithmetic::Divide),
                Operator::Modulo => ValueAnalyzer::Arithmetic(Arithmetic::Modulo),
                Operator::Concat => ValueAnalyzer::Concat,
                other => return Err(not_a_value(other)),
            },
            ValueExpression::Function { name, .. } => match AggregateKind::from_name(name) {
                Some(kind) => ValueAnalyzer::SetFunction(kind),
                None => ValueAnalyzer::Function(FunctionKind::from_name(name)?),
            },
            ValueExpression::Cast { .. } => ValueAnalyzer::Cast,
            ValueExpression::SubQuery(_) => ValueAnalyzer::SubQuery,
            ValueExpression::RowConstructor(_) => ValueAnalyzer::Row,
            ValueExpression::Monadic { op, .. } | ValueExpression::Nadic { op, .. } => {
                return Err(not_a_value(op))
            }
            ValueExpression::In { .. }
            | ValueExpression::Between { .. }
            | ValueExpression::Like { .. }
            | ValueExpression::Exists { .. } => {
                return Err(PlanError::NotSupported(
                    Entity::Analyzer,
                    Some("predicate used as a value".into()),
                ))
            }
        };
        Ok(analyzer)
    }

    /// Column references and array elements depend on the analysis status,
    /// everything else is memoized per relation.
    fn is_cached(self) -> bool {
        !matches!(self, ValueAnalyzer::ItemReference | ValueAnalyzer::ArrayElement)
    }

    /// Null facts that don't carry over to the operands: a NULL result
    /// doesn't tell which operand was NULL, and `COALESCE`, set functions
    /// and subqueries may be non-NULL over NULL inputs.
    fn hidden_nulls(self) -> Status {
        match self {
            ValueAnalyzer::Literal
            | ValueAnalyzer::Parameter
            | ValueAnalyzer::ItemReference
            | ValueAnalyzer::Row => Status::empty(),
            ValueAnalyzer::Function(FunctionKind::Coalesce)
            | ValueAnalyzer::SetFunction(_)
            | ValueAnalyzer::SubQuery => Status::KNOWN_NULL | Status::KNOWN_NOT_NULL,
            _ => Status::KNOWN_NULL,
        }
    }

    /// Scalar node of the expression evaluated over `relation`.
    ///
    /// # Errors
    /// - name resolution or type checks failed
    pub fn get_scalar(
        self,
        env: &mut Environment,
        relation: NodeId,
        expr: &ValueExpression,
    ) -> Result<NodeId, PlanError> {
        if self.is_cached() {
            if let Some(scalar) = env.search_cached_scalar(relation, expr)? {
                if env.check_status(Status::SET_FUNCTION) {
                    check_no_set_function(env, scalar)?;
                }
                check_grouped(env, scalar)?;
                return Ok(scalar);
            }
        }
        let scalar = match self.hidden_nulls() {
            hidden if hidden.is_empty() => self.build(env, relation, expr)?,
            hidden => {
                let mut env = env.erase_status(hidden);
                self.build(&mut env, relation, expr)?
            }
        };
        if self.is_cached() {
            env.add_cached_scalar(relation, expr, scalar)?;
        }
        Ok(scalar)
    }

    fn build(
        self,
        env: &mut Environment,
        relation: NodeId,
        expr: &ValueExpression,
    ) -> Result<NodeId, PlanError> {
        match (self, expr) {
            (ValueAnalyzer::Literal, ValueExpression::Literal(value)) => {
                Ok(env.add_constant(value.clone()))
            }
            (ValueAnalyzer::Parameter, ValueExpression::Parameter(index)) => {
                Ok(env.add_parameter(*index))
            }
            (ValueAnalyzer::ItemReference, ValueExpression::ItemReference { qualifier, name }) => {
                item_reference(env, qualifier.as_deref(), name)
            }
            (ValueAnalyzer::ArrayElement, ValueExpression::ArrayElement(operand)) => {
                if !env.check_status(Status::ARBITRARY_ELEMENT_ALLOWED) {
                    return Err(PlanError::NotSupported(
                        Entity::Expression,
                        Some("array element outside the left side of a comparison".into()),
                    ));
                }
                let array = {
                    let mut env = env.erase_status(Status::ARBITRARY_ELEMENT_ALLOWED);
                    get_scalar(&mut env, relation, operand)?
                };
                env.add_any_element(array)
            }
            (ValueAnalyzer::Negative, ValueExpression::Monadic { operand, .. }) => {
                let operand = get_scalar(env, relation, operand)?;
                env.add_negative(operand)
            }
            (ValueAnalyzer::Positive, ValueExpression::Monadic { operand, .. }) => {
                let operand = get_scalar(env, relation, operand)?;
                DataType::arithmetic(&env.scalar_type(operand)?, &DataType::Unknown)?;
                Ok(operand)
            }
            (ValueAnalyzer::Arithmetic(op), ValueExpression::Dyadic { left, right, .. }) => {
                let left = get_scalar(env, relation, left)?;
                let right = get_scalar(env, relation, right)?;
                env.add_arithmetic(op, left, right)
            }
            (ValueAnalyzer::Concat, ValueExpression::Dyadic { left, right, .. }) => {
                let left = get_scalar(env, relation, left)?;
                let right = get_scalar(env, relation, right)?;
                env.add_concat(left, right)
            }
            (ValueAnalyzer::Function(kind), ValueExpression::Function { args, distinct, .. }) => {
                if *distinct {
                    return Err(PlanError::NotSupported(
                        Entity::Function,
                        Some(format_smolstr!("DISTINCT in {}", kind.as_str())),
                    ));
                }
                let args = args
                    .iter()
                    .map(|arg| get_scalar(env, relation, arg))
                    .collect::<Result<Vec<_>, _>>()?;
                env.add_function(kind, args)
            }
            (
                ValueAnalyzer::SetFunction(kind),
                ValueExpression::Function { args, distinct, .. },
            ) => set_function(env, relation, kind, args, *distinct),
            (ValueAnalyzer::Cast, ValueExpression::Cast { operand, to }) => {
                let operand = get_scalar(env, relation, operand)?;
                let to = DataType::from_name(to)?;
                Ok(env.add_cast(operand, to))
            }
            (ValueAnalyzer::SubQuery, ValueExpression::SubQuery(query)) => {
                let relation = query::get_relation(env, query)?;
                env.add_subquery(relation)
            }
            (ValueAnalyzer::Row, ValueExpression::RowConstructor(elements)) => match elements.as_slice() {
                [single] => get_scalar(env, relation, single),
                _ => Err(PlanError::InvalidRowValue(format_smolstr!(
                    "row of degree {} used as a value",
                    elements.len()
                ))),
            },
            (analyzer, expr) => Err(PlanError::Unexpected(
                Entity::Analyzer,
                Some(format_smolstr!("{analyzer:?} analyzer applied to {expr:?}")),
            )),
        }
    }
}

fn not_a_value(op: &Operator) -> PlanError {
    PlanError::NotSupported(Entity::Operator, Some(format_smolstr!("{op:?} as a value")))
}

fn item_reference(
    env: &mut Environment,
    qualifier: Option<&str>,
    name: &SmolStr,
) -> Result<NodeId, PlanError> {
    let element = env.search_scalar(qualifier, name)?;
    let scalar = element.scalar;
    if outside_set_function(env)
        && !env.is_grouping_column(scalar)
        && !env.is_outer_reference(scalar)?
    {
        return Err(PlanError::NonGroupingColumn(name.clone()));
    }
    env.note_nullability(scalar);
    Ok(scalar)
}

/// Grouping is active and the expression is neither a set function operand
/// nor a grouping key.
fn outside_set_function(env: &Environment) -> bool {
    env.is_grouping()
        && !env
            .current_status()
            .intersects(Status::SET_FUNCTION | Status::GROUP_BY)
}

/// A memoized scalar may have been built before grouping started. Its
/// columns must still be grouping keys.
fn check_grouped(env: &Environment, scalar: NodeId) -> Result<(), PlanError> {
    if !outside_set_function(env) || env.is_grouping_column(scalar) {
        return Ok(());
    }
    match env.get_scalar(scalar)? {
        Scalar::Field(field) => {
            if env.is_outer_reference(scalar)? {
                return Ok(());
            }
            Err(PlanError::NonGroupingColumn(field.name.clone()))
        }
        Scalar::Aggregation(_) | Scalar::SubQuery(_) => Ok(()),
        other => {
            for child in other.children() {
                check_grouped(env, child)?;
            }
            Ok(())
        }
    }
}

/// Rejects a set function found in a scalar reused inside another one.
fn check_no_set_function(env: &Environment, scalar: NodeId) -> Result<(), PlanError> {
    match env.get_scalar(scalar)? {
        Scalar::Aggregation(aggregation) => Err(nested_set_function(aggregation.kind)),
        Scalar::SubQuery(_) => Ok(()),
        other => {
            for child in other.children() {
                check_no_set_function(env, child)?;
            }
            Ok(())
        }
    }
}

fn nested_set_function(kind: AggregateKind) -> PlanError {
    PlanError::NotSupported(
        Entity::Aggregate,
        Some(format_smolstr!("{kind} inside another set function")),
    )
}

fn set_function(
    env: &mut Environment,
    relation: NodeId,
    kind: AggregateKind,
    args: &[ValueExpression],
    distinct: bool,
) -> Result<NodeId, PlanError> {
    if env.check_status(Status::SET_FUNCTION) {
        return Err(nested_set_function(kind));
    }
    let operand = match (kind, args) {
        (AggregateKind::Count, []) => None,
        (_, [arg]) => {
            let mut env = env.push_status(Status::SET_FUNCTION);
            Some(get_scalar(&mut env, relation, arg)?)
        }
        _ => {
            return Err(PlanError::NotSupported(
                Entity::Aggregate,
                Some(format_smolstr!("{kind} with {} arguments", args.len())),
            ))
        }
    };
    let aggregate = env.add_aggregation(kind, operand, distinct)?;
    env.add_aggregate(aggregate)?;
    Ok(aggregate)
}

/// Scalar node of a value expression, see [`ValueAnalyzer::get_scalar`].
///
/// # Errors
/// - no analyzer for the expression
/// - analysis of the expression failed
pub fn get_scalar(
    env: &mut Environment,
    relation: NodeId,
    expr: &ValueExpression,
) -> Result<NodeId, PlanError> {
    ValueAnalyzer::create(expr)?.get_scalar(env, relation, expr)
}

/// Number of columns the expression stands for, computed without building
/// any scalar.
///
/// # Errors
/// - a table of a subquery is not in the catalog
pub fn get_degree(env: &Environment, expr: &ValueExpression) -> Result<usize, PlanError> {
    match expr {
        ValueExpression::RowConstructor(elements) => {
            let mut degree = 0;
            for element in elements {
                degree += get_degree(env, element)?;
            }
            Ok(degree)
        }
        ValueExpression::SubQuery(query) => query::query_degree(env, query),
        _ => Ok(1),
    }
}

/// Appends the scalars of the expression to `columns`, flattening row
/// constructors.
///
/// # Errors
/// - a multi-column subquery inside the row
/// - analysis of an element failed
pub fn add_columns(
    env: &mut Environment,
    relation: NodeId,
    expr: &ValueExpression,
    columns: &mut Vec<NodeId>,
) -> Result<(), PlanError> {
    match expr {
        ValueExpression::RowConstructor(elements) => {
            for element in elements {
                add_columns(env, relation, element, columns)?;
            }
            Ok(())
        }
        ValueExpression::SubQuery(query) if query::query_degree(env, query)? != 1 => {
            Err(PlanError::NotSupported(
                Entity::Expression,
                Some("multi-column subquery inside a row value".into()),
            ))
        }
        _ => {
            columns.push(get_scalar(env, relation, expr)?);
            Ok(())
        }
    }
}
