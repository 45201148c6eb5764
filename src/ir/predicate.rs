//! Predicate nodes: boolean scalars with four-valued results.

use serde::{Deserialize, Serialize};
use smol_str::format_smolstr;

use crate::errors::{Entity, PlanError};
use crate::ir::boolean::Boolean;
use crate::ir::environment::Environment;
use crate::ir::node::{Node, NodeId, NodeType};
use crate::ir::operator::{CompareOp, Logical};
use crate::ir::scalar::{AnyElement, Scalar, Tuple};
use crate::ir::types::DataType;
use crate::ir::value::Value;

/// `left op right`. The left operand may be an [`AnyElement`] placeholder.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Comparison {
    pub op: CompareOp,
    pub left: NodeId,
    pub right: NodeId,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct NullCheck {
    pub operand: NodeId,
    pub negated: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Combinator {
    pub op: Logical,
    pub operands: Vec<NodeId>,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Not {
    pub operand: NodeId,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum InValues {
    List(Vec<NodeId>),
    /// Single-column subquery.
    Relation(NodeId),
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct In {
    pub operand: NodeId,
    pub values: InValues,
    pub negated: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Between {
    pub operand: NodeId,
    pub low: NodeId,
    pub high: NodeId,
    pub negated: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Like {
    pub operand: NodeId,
    pub pattern: NodeId,
    pub escape: Option<NodeId>,
    pub negated: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Exists {
    pub relation: NodeId,
    pub negated: bool,
}

/// Predicate whose value is known at planning time.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Fixed {
    pub value: Boolean,
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Predicate {
    Comparison(Comparison),
    NullCheck(NullCheck),
    Combinator(Combinator),
    Not(Not),
    In(In),
    Between(Between),
    Like(Like),
    Exists(Exists),
    Fixed(Fixed),
}

impl Predicate {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Predicate::Comparison(_) => NodeType::Comparison,
            Predicate::NullCheck(_) => NodeType::NullCheck,
            Predicate::Combinator(_) => NodeType::Combinator,
            Predicate::Not(_) => NodeType::Not,
            Predicate::In(_) => NodeType::In,
            Predicate::Between(_) => NodeType::Between,
            Predicate::Like(_) => NodeType::Like,
            Predicate::Exists(_) => NodeType::Exists,
            Predicate::Fixed(_) => NodeType::Fixed,
        }
    }

    /// Scalar operands of the node.
    #[must_use]
    pub fn scalars(&self) -> Vec<NodeId> {
        match self {
            Predicate::Comparison(Comparison { left, right, .. }) => vec![*left, *right],
            Predicate::NullCheck(NullCheck { operand, .. }) => vec![*operand],
            Predicate::In(In {
                operand, values, ..
            }) => {
                let mut res = vec![*operand];
                if let InValues::List(list) = values {
                    res.extend(list.iter().copied());
                }
                res
            }
            Predicate::Between(Between {
                operand, low, high, ..
            }) => vec![*operand, *low, *high],
            Predicate::Like(Like {
                operand,
                pattern,
                escape,
                ..
            }) => {
                let mut res = vec![*operand, *pattern];
                res.extend(escape.iter().copied());
                res
            }
            Predicate::Combinator(_)
            | Predicate::Not(_)
            | Predicate::Exists(_)
            | Predicate::Fixed(_) => vec![],
        }
    }

    /// Nested predicates of the node.
    #[must_use]
    pub fn predicates(&self) -> Vec<NodeId> {
        match self {
            Predicate::Combinator(Combinator { operands, .. }) => operands.clone(),
            Predicate::Not(Not { operand }) => vec![*operand],
            _ => vec![],
        }
    }

    /// Relations evaluated as subqueries of the node.
    #[must_use]
    pub fn subqueries(&self) -> Vec<NodeId> {
        match self {
            Predicate::Exists(Exists { relation, .. })
            | Predicate::In(In {
                values: InValues::Relation(relation),
                ..
            }) => vec![*relation],
            _ => vec![],
        }
    }
}

impl Environment {
    /// # Errors
    /// - node is not found or is not a predicate
    pub fn get_predicate(&self, id: NodeId) -> Result<&Predicate, PlanError> {
        match self.get_node(id)? {
            Node::Predicate(predicate) => Ok(predicate),
            _ => Err(PlanError::Unexpected(
                Entity::Predicate,
                Some(format_smolstr!("node {id} is not a predicate")),
            )),
        }
    }

    /// # Errors
    /// - operand types can't be compared
    pub fn add_comparison(
        &mut self,
        op: CompareOp,
        left: NodeId,
        right: NodeId,
    ) -> Result<NodeId, PlanError> {
        if matches!(self.get_scalar(right)?, Scalar::AnyElement(_)) {
            return Err(PlanError::NotSupported(
                Entity::Predicate,
                Some("array element on the right side of a comparison".into()),
            ));
        }
        DataType::comparable(&self.scalar_type(left)?, &self.scalar_type(right)?)?;
        Ok(self.register(Predicate::Comparison(Comparison { op, left, right })))
    }

    /// Null check over the operand.
    ///
    /// A non-nullable column makes the result known in advance.
    ///
    /// # Errors
    /// - node is not found
    pub fn add_null_check(&mut self, operand: NodeId, negated: bool) -> Result<NodeId, PlanError> {
        if let Scalar::Field(field) = self.get_scalar(operand)? {
            if !field.nullable {
                let value = if negated {
                    Boolean::True
                } else {
                    Boolean::NeverTrue
                };
                return Ok(self.add_fixed(value));
            }
        }
        Ok(self.register(Predicate::NullCheck(NullCheck { operand, negated })))
    }

    /// Combines predicates, flattening nested combinators of the same kind
    /// and folding operands with a known value.
    ///
    /// # Errors
    /// - no operands
    pub fn add_combinator(
        &mut self,
        op: Logical,
        operands: Vec<NodeId>,
    ) -> Result<NodeId, PlanError> {
        let mut flat = Vec::with_capacity(operands.len());
        let mut known: Option<Boolean> = None;
        for operand in operands {
            match self.get_predicate(operand)? {
                Predicate::Combinator(Combinator {
                    op: nested,
                    operands,
                }) if *nested == op => flat.extend(operands.iter().copied()),
                Predicate::Fixed(Fixed { value }) => {
                    let value = *value;
                    known = Some(match (known, op) {
                        (None, _) => value,
                        (Some(acc), Logical::And) => self.algebra().and(acc, value),
                        (Some(acc), Logical::Or) => self.algebra().or(acc, value),
                    });
                }
                _ => flat.push(operand),
            }
        }
        if let Some(value) = known {
            let decided = match op {
                Logical::And => matches!(value, Boolean::NeverTrue | Boolean::False),
                Logical::Or => value == Boolean::True,
            };
            if decided || flat.is_empty() {
                return Ok(self.add_fixed(value));
            }
            if value == Boolean::Unknown {
                flat.push(self.add_fixed(value));
            }
        }
        match flat.len() {
            0 => Err(PlanError::Unexpected(
                Entity::Predicate,
                Some("combinator without operands".into()),
            )),
            1 => Ok(flat[0]),
            _ => Ok(self.register(Predicate::Combinator(Combinator { op, operands: flat }))),
        }
    }

    /// # Errors
    /// - node is not found
    pub fn add_not(&mut self, operand: NodeId) -> Result<NodeId, PlanError> {
        let negated = match self.get_predicate(operand)? {
            Predicate::Fixed(Fixed { value }) => {
                let value = self.algebra().not(*value);
                return Ok(self.add_fixed(value));
            }
            Predicate::NullCheck(check) => Predicate::NullCheck(NullCheck {
                operand: check.operand,
                negated: !check.negated,
            }),
            _ => Predicate::Not(Not { operand }),
        };
        Ok(self.register(negated))
    }

    pub fn add_in(&mut self, operand: NodeId, values: InValues, negated: bool) -> NodeId {
        self.register(Predicate::In(In {
            operand,
            values,
            negated,
        }))
    }

    pub fn add_between(&mut self, operand: NodeId, low: NodeId, high: NodeId, negated: bool) -> NodeId {
        self.register(Predicate::Between(Between {
            operand,
            low,
            high,
            negated,
        }))
    }

    /// # Errors
    /// - operands are not strings
    pub fn add_like(
        &mut self,
        operand: NodeId,
        pattern: NodeId,
        escape: Option<NodeId>,
        negated: bool,
    ) -> Result<NodeId, PlanError> {
        for side in [Some(operand), Some(pattern), escape].into_iter().flatten() {
            let ty = self.scalar_type(side)?;
            if !ty.is_string() {
                return Err(PlanError::NotSupported(
                    Entity::Predicate,
                    Some(format_smolstr!("LIKE over {ty}")),
                ));
            }
        }
        Ok(self.register(Predicate::Like(Like {
            operand,
            pattern,
            escape,
            negated,
        })))
    }

    pub fn add_exists(&mut self, relation: NodeId, negated: bool) -> NodeId {
        self.register(Predicate::Exists(Exists { relation, negated }))
    }

    pub fn add_fixed(&mut self, value: Boolean) -> NodeId {
        self.register(Predicate::Fixed(Fixed { value }))
    }

    /// Replaces a predicate that reads no row, like `1 = 2`, with its value.
    ///
    /// # Errors
    /// - node is not found
    /// - a constant operand can't be evaluated
    pub fn fold_constant_predicate(&mut self, id: NodeId) -> Result<NodeId, PlanError> {
        if matches!(self.get_predicate(id)?, Predicate::Fixed(_)) || !self.reads_no_row(id)? {
            return Ok(id);
        }
        let value = self.check_by_data(id, &Tuple::default())?;
        Ok(self.add_fixed(value))
    }

    fn reads_no_row(&self, id: NodeId) -> Result<bool, PlanError> {
        let predicate = self.get_predicate(id)?;
        if matches!(predicate, Predicate::Like(_) | Predicate::Exists(_))
            || !predicate.subqueries().is_empty()
        {
            return Ok(false);
        }
        for scalar in predicate.scalars() {
            if !self.is_constant_scalar(scalar)? {
                return Ok(false);
            }
        }
        for nested in predicate.predicates() {
            if !self.reads_no_row(nested)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_constant_scalar(&self, id: NodeId) -> Result<bool, PlanError> {
        let scalar = self.get_scalar(id)?;
        match scalar {
            Scalar::Constant(_) => Ok(true),
            Scalar::Function(function) if function.kind.is_fulltext_statistic() => Ok(false),
            Scalar::Arithmetic(_)
            | Scalar::Negative(_)
            | Scalar::Concat(_)
            | Scalar::Cast(_)
            | Scalar::Function(_) => {
                for child in scalar.children() {
                    if !self.is_constant_scalar(child)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Evaluates the predicate against an in-memory row. The planner uses it
    /// to fold predicates that read no row, see
    /// [`Environment::fold_constant_predicate`].
    ///
    /// Only comparisons, null checks, connectives, `IN` lists, `BETWEEN` and
    /// fixed predicates can be checked; the rest need the executor.
    ///
    /// # Errors
    /// - the predicate kind can't be checked against data
    /// - a scalar operand can't be folded
    pub fn check_by_data(&self, id: NodeId, tuple: &Tuple) -> Result<Boolean, PlanError> {
        let algebra = *self.algebra();
        let res = match self.get_predicate(id)? {
            Predicate::Comparison(Comparison { op, left, right }) => {
                let right_value = self.evaluate(*right, tuple)?;
                match self.get_scalar(*left)? {
                    Scalar::AnyElement(AnyElement { operand, .. }) => {
                        let array = self.evaluate(*operand, tuple)?;
                        match array {
                            Value::Array(items) => {
                                let mut acc = Boolean::False;
                                for item in &items {
                                    acc = algebra.or(acc, compare(*op, item, &right_value)?);
                                }
                                acc
                            }
                            Value::Null => Boolean::Unknown,
                            other => {
                                return Err(PlanError::InvalidCardinality(format_smolstr!(
                                    "array element of {other}"
                                )))
                            }
                        }
                    }
                    _ => compare(*op, &self.evaluate(*left, tuple)?, &right_value)?,
                }
            }
            Predicate::NullCheck(NullCheck { operand, negated }) => {
                let is_null = self.evaluate(*operand, tuple)?.is_null();
                Boolean::from(is_null != *negated)
            }
            Predicate::Combinator(Combinator { op, operands }) => {
                let values = operands
                    .iter()
                    .map(|p| self.check_by_data(*p, tuple))
                    .collect::<Result<Vec<_>, _>>()?;
                match op {
                    Logical::And => algebra.and_all(values),
                    Logical::Or => algebra.or_all(values),
                }
            }
            Predicate::Not(Not { operand }) => algebra.not(self.check_by_data(*operand, tuple)?),
            Predicate::In(In {
                operand,
                values: InValues::List(list),
                negated,
            }) => {
                let value = self.evaluate(*operand, tuple)?;
                let mut acc = Boolean::False;
                for item in list {
                    let item = self.evaluate(*item, tuple)?;
                    acc = algebra.or(acc, compare(CompareOp::Eq, &value, &item)?);
                }
                if *negated {
                    algebra.not(acc)
                } else {
                    acc
                }
            }
            Predicate::Between(Between {
                operand,
                low,
                high,
                negated,
            }) => {
                let value = self.evaluate(*operand, tuple)?;
                let low = self.evaluate(*low, tuple)?;
                let high = self.evaluate(*high, tuple)?;
                let inside = algebra.and(
                    compare(CompareOp::GtEq, &value, &low)?,
                    compare(CompareOp::LtEq, &value, &high)?,
                );
                if *negated {
                    algebra.not(inside)
                } else {
                    inside
                }
            }
            Predicate::Fixed(Fixed { value }) => *value,
            other => {
                return Err(PlanError::NotSupported(
                    Entity::Predicate,
                    Some(format_smolstr!("check by data of {:?}", other.node_type())),
                ))
            }
        };
        Ok(res)
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<Boolean, PlanError> {
    Ok(match left.compare(right)? {
        None => Boolean::Unknown,
        Some(ord) => Boolean::from(op.holds(ord)),
    })
}
