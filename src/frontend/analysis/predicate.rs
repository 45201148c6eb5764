//! Boolean expressions: parse tree to predicate nodes.

use smol_str::format_smolstr;

use crate::errors::{Entity, PlanError};
use crate::frontend::analysis::query;
use crate::frontend::analysis::value::{add_columns, get_degree, get_scalar};
use crate::frontend::statement::{InList, Operator, ValueExpression};
use crate::ir::boolean::Boolean;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::{CompareOp, Logical};
use crate::ir::predicate::InValues;
use crate::ir::status::Status;
use crate::ir::types::DataType;
use crate::ir::value::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PredicateAnalyzer {
    Comparison(CompareOp),
    NullCheck { negated: bool },
    Combinator(Logical),
    Not,
    In,
    Between,
    Like,
    Exists,
    Fixed,
}

impl PredicateAnalyzer {
    /// # Errors
    /// - the expression is not boolean
    pub fn create(expr: &ValueExpression) -> Result<Self, PlanError> {
        let analyzer = match expr {
            ValueExpression::Dyadic {
                op: Operator::Compare(op),
                ..
            } => PredicateAnalyzer::Comparison(*op),
            ValueExpression::Monadic {
                op: Operator::IsNull,
                ..
            } => PredicateAnalyzer::NullCheck { negated: false },
            ValueExpression::Monadic {
                op: Operator::IsNotNull,
                ..
            } => PredicateAnalyzer::NullCheck { negated: true },
            ValueExpression::Monadic {
                op: Operator::Not, ..
            } => PredicateAnalyzer::Not,
            ValueExpression::Dyadic {
                op: Operator::And, ..
            }
            | ValueExpression::Nadic {
                op: Operator::And, ..
            } => PredicateAnalyzer::Combinator(Logical::And),
            ValueExpression::Dyadic {
                op: Operator::Or, ..
            }
            | ValueExpression::Nadic {
                op: Operator::Or, ..
            } => PredicateAnalyzer::Combinator(Logical::Or),
            ValueExpression::In { .. } => PredicateAnalyzer::In,
            ValueExpression::Between { .. } => PredicateAnalyzer::Between,
            ValueExpression::Like { .. } => PredicateAnalyzer::Like,
            ValueExpression::Exists { .. } => PredicateAnalyzer::Exists,
            ValueExpression::Literal(Value::Boolean(_) | Value::Null) => PredicateAnalyzer::Fixed,
            ValueExpression::RowConstructor(elements) if elements.len() == 1 => {
                return PredicateAnalyzer::create(&elements[0])
            }
            ValueExpression::Monadic { op, .. }
            | ValueExpression::Dyadic { op, .. }
            | ValueExpression::Nadic { op, .. } => {
                return Err(PlanError::NotSupported(
                    Entity::Analyzer,
                    Some(format_smolstr!("{op:?} as a predicate")),
                ))
            }
            _ => {
                return Err(PlanError::NotSupported(
                    Entity::Analyzer,
                    Some("value used as a predicate".into()),
                ))
            }
        };
        Ok(analyzer)
    }

    /// Predicate node of the expression evaluated over `relation`.
    ///
    /// Parameter-free predicates are memoized per relation. Inside a
    /// grouped query the cache is bypassed so that every occurrence is
    /// checked against the grouping keys.
    ///
    /// # Errors
    /// - analysis of an operand failed
    pub fn get_predicate(
        self,
        env: &mut Environment,
        relation: NodeId,
        expr: &ValueExpression,
    ) -> Result<NodeId, PlanError> {
        let cached = !env.is_grouping();
        if cached {
            if let Some(predicate) = env.search_predicate(relation, expr)? {
                return Ok(predicate);
            }
        }
        let predicate = self.build(env, relation, expr)?;
        if cached {
            env.add_predicate(relation, expr, predicate)?;
        }
        Ok(predicate)
    }

    fn build(
        self,
        env: &mut Environment,
        relation: NodeId,
        expr: &ValueExpression,
    ) -> Result<NodeId, PlanError> {
        match (self, expr) {
            (PredicateAnalyzer::Comparison(op), ValueExpression::Dyadic { left, right, .. }) => {
                comparison(env, relation, op, left, right)
            }
            (
                PredicateAnalyzer::NullCheck { negated },
                ValueExpression::Monadic { operand, .. },
            ) => {
                // Only a top predicate proves anything about the rows it passes.
                let known = if env.check_status(Status::NO_TOP_PREDICATE) {
                    Status::empty()
                } else if negated {
                    Status::KNOWN_NOT_NULL
                } else {
                    Status::KNOWN_NULL
                };
                let proven = env.known_nulls();
                let operand = {
                    let mut env = env.erase_status(Status::KNOWN_NULL | Status::KNOWN_NOT_NULL);
                    let mut env = env.push_status(known);
                    get_scalar(&mut env, relation, operand)?
                };
                match proven.is_null(operand) {
                    Some(is_null) => {
                        let value = if is_null != negated {
                            Boolean::True
                        } else {
                            Boolean::False
                        };
                        Ok(env.add_fixed(value))
                    }
                    None => env.add_null_check(operand, negated),
                }
            }
            (PredicateAnalyzer::Combinator(op), _) => {
                let operands = combinator_operands(expr);
                let mut env = match op {
                    Logical::And => env.push_status(Status::empty()),
                    Logical::Or => env.push_status(Status::NO_TOP_PREDICATE),
                };
                let predicates = operands
                    .into_iter()
                    .map(|operand| get_predicate(&mut env, relation, operand))
                    .collect::<Result<Vec<_>, _>>()?;
                env.add_combinator(op, predicates)
            }
            (PredicateAnalyzer::Not, ValueExpression::Monadic { operand, .. }) => {
                let operand = {
                    let mut env = env.push_status(Status::NO_TOP_PREDICATE);
                    get_predicate(&mut env, relation, operand)?
                };
                env.add_not(operand)
            }
            (
                PredicateAnalyzer::In,
                ValueExpression::In {
                    operand,
                    list,
                    negated,
                },
            ) => in_predicate(env, relation, operand, list, *negated),
            (
                PredicateAnalyzer::Between,
                ValueExpression::Between {
                    operand,
                    low,
                    high,
                    negated,
                },
            ) => {
                let operand = get_scalar(env, relation, operand)?;
                let low = get_scalar(env, relation, low)?;
                let high = get_scalar(env, relation, high)?;
                let ty = env.scalar_type(operand)?;
                DataType::comparable(&ty, &env.scalar_type(low)?)?;
                DataType::comparable(&ty, &env.scalar_type(high)?)?;
                Ok(env.add_between(operand, low, high, *negated))
            }
            (
                PredicateAnalyzer::Like,
                ValueExpression::Like {
                    operand,
                    pattern,
                    escape,
                    negated,
                },
            ) => {
                let operand = get_scalar(env, relation, operand)?;
                let pattern = get_scalar(env, relation, pattern)?;
                let escape = match escape {
                    Some(escape) => Some(get_scalar(env, relation, escape)?),
                    None => None,
                };
                env.add_like(operand, pattern, escape, *negated)
            }
            (PredicateAnalyzer::Exists, ValueExpression::Exists { query, negated }) => {
                let subquery = query::get_relation(env, query)?;
                Ok(env.add_exists(subquery, *negated))
            }
            (PredicateAnalyzer::Fixed, ValueExpression::Literal(value)) => {
                let fixed = match value {
                    Value::Boolean(true) => Boolean::True,
                    Value::Boolean(false) => Boolean::False,
                    _ => Boolean::Unknown,
                };
                Ok(env.add_fixed(fixed))
            }
            (analyzer, ValueExpression::RowConstructor(elements)) if elements.len() == 1 => {
                analyzer.get_predicate(env, relation, &elements[0])
            }
            (analyzer, expr) => Err(PlanError::Unexpected(
                Entity::Analyzer,
                Some(format_smolstr!("{analyzer:?} analyzer applied to {expr:?}")),
            )),
        }
    }
}

/// Operands of nested connectives of the same kind, flattened.
fn combinator_operands(expr: &ValueExpression) -> Vec<&ValueExpression> {
    let (op, operands) = match expr {
        ValueExpression::Dyadic { op, left, right } => (op, vec![left.as_ref(), right.as_ref()]),
        ValueExpression::Nadic { op, operands } => (op, operands.iter().collect()),
        other => return vec![other],
    };
    let mut res = Vec::with_capacity(operands.len());
    for operand in operands {
        match operand {
            ValueExpression::Dyadic { op: nested, .. } | ValueExpression::Nadic { op: nested, .. }
                if nested == op =>
            {
                res.extend(combinator_operands(operand));
            }
            _ => res.push(operand),
        }
    }
    res
}

fn comparison(
    env: &mut Environment,
    relation: NodeId,
    op: CompareOp,
    left: &ValueExpression,
    right: &ValueExpression,
) -> Result<NodeId, PlanError> {
    let left_degree = get_degree(env, left)?;
    let right_degree = get_degree(env, right)?;
    if left_degree != right_degree {
        return Err(PlanError::InvalidRowValue(format_smolstr!(
            "{op} between rows of degree {left_degree} and {right_degree}"
        )));
    }
    if left_degree == 0 {
        return Err(PlanError::InvalidRowValue(format_smolstr!(
            "{op} between empty rows"
        )));
    }
    // Operands of the top predicate can't be NULL in a matching row.
    let top = if env.check_status(Status::NO_TOP_PREDICATE) {
        Status::empty()
    } else {
        Status::KNOWN_NOT_NULL
    };
    let mut env = env.push_status(top);
    if left_degree == 1 {
        let left = {
            let mut env = env.push_status(Status::ARBITRARY_ELEMENT_ALLOWED);
            get_scalar(&mut env, relation, left)?
        };
        let right = get_scalar(&mut env, relation, right)?;
        return env.add_comparison(op, left, right);
    }
    if !matches!(left, ValueExpression::RowConstructor(_))
        || !matches!(right, ValueExpression::RowConstructor(_))
    {
        return Err(PlanError::NotSupported(
            Entity::Predicate,
            Some("row comparison with a subquery".into()),
        ));
    }
    let mut lefts = Vec::with_capacity(left_degree);
    add_columns(&mut env, relation, left, &mut lefts)?;
    let mut rights = Vec::with_capacity(right_degree);
    add_columns(&mut env, relation, right, &mut rights)?;
    row_comparison(&mut env, op, &lefts, &rights)
}

/// Element-wise expansion of a row comparison. Equality is the conjunction
/// of the element equalities, inequality their disjunction, orderings are
/// lexicographic.
fn row_comparison(
    env: &mut Environment,
    op: CompareOp,
    lefts: &[NodeId],
    rights: &[NodeId],
) -> Result<NodeId, PlanError> {
    match op {
        CompareOp::Eq | CompareOp::NotEq => {
            let mut elements = Vec::with_capacity(lefts.len());
            for (left, right) in lefts.iter().zip(rights) {
                elements.push(env.add_comparison(op, *left, *right)?);
            }
            let connective = if op == CompareOp::Eq {
                Logical::And
            } else {
                Logical::Or
            };
            env.add_combinator(connective, elements)
        }
        _ => {
            // (l1, l2) < (r1, r2) is l1 < r1 OR (l1 = r1 AND l2 < r2).
            let Some(last) = lefts.len().checked_sub(1) else {
                return Err(PlanError::InvalidRowValue(format_smolstr!(
                    "{op} between empty rows"
                )));
            };
            let mut acc = env.add_comparison(op, lefts[last], rights[last])?;
            for pos in (0..last).rev() {
                let equal = env.add_comparison(CompareOp::Eq, lefts[pos], rights[pos])?;
                let rest = env.add_combinator(Logical::And, vec![equal, acc])?;
                let strict = env.add_comparison(op.strict(), lefts[pos], rights[pos])?;
                acc = env.add_combinator(Logical::Or, vec![strict, rest])?;
            }
            Ok(acc)
        }
    }
}

fn in_predicate(
    env: &mut Environment,
    relation: NodeId,
    operand: &ValueExpression,
    list: &InList,
    negated: bool,
) -> Result<NodeId, PlanError> {
    if get_degree(env, operand)? != 1 {
        return Err(PlanError::NotSupported(
            Entity::Predicate,
            Some("IN over a row value".into()),
        ));
    }
    let operand = get_scalar(env, relation, operand)?;
    let ty = env.scalar_type(operand)?;
    let values = match list {
        InList::Values(values) => {
            let mut scalars = Vec::with_capacity(values.len());
            for value in values {
                let scalar = get_scalar(env, relation, value)?;
                DataType::comparable(&ty, &env.scalar_type(scalar)?)?;
                scalars.push(scalar);
            }
            InValues::List(scalars)
        }
        InList::Query(query) => {
            let subquery = query::get_relation(env, query)?;
            let row = env.row_info(subquery)?;
            let [column] = row.as_slice() else {
                return Err(PlanError::InvalidRowValue(format_smolstr!(
                    "IN subquery returns {} columns",
                    row.len()
                )));
            };
            DataType::comparable(&ty, &env.scalar_type(*column)?)?;
            InValues::Relation(subquery)
        }
    };
    Ok(env.add_in(operand, values, negated))
}

/// Predicate node of a boolean expression, see
/// [`PredicateAnalyzer::get_predicate`].
///
/// # Errors
/// - no analyzer for the expression
/// - analysis of the expression failed
pub fn get_predicate(
    env: &mut Environment,
    relation: NodeId,
    expr: &ValueExpression,
) -> Result<NodeId, PlanError> {
    PredicateAnalyzer::create(expr)?.get_predicate(env, relation, expr)
}
