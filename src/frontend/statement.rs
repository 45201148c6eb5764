//! Parse tree handed to the analysis.
//!
//! Nodes are plain values: the analysis never mutates them, and a
//! structurally equal sub-tree hashes equally, which is what the expression
//! caches of the name map rely on.

use smol_str::SmolStr;

use crate::ir::operator::CompareOp;
use crate::ir::value::Value;

/// Operator tag of a monadic, dyadic or n-adic expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negative,
    Positive,
    Concat,
    Compare(CompareOp),
    IsNull,
    IsNotNull,
    And,
    Or,
    Not,
    /// Operator the parser knows but the planner has no analyzer for.
    Other(SmolStr),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum InList {
    Values(Vec<ValueExpression>),
    Query(Box<Query>),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ValueExpression {
    Literal(Value),
    /// Zero based position of `$n` / `?`.
    Parameter(usize),
    ItemReference {
        qualifier: Option<SmolStr>,
        name: SmolStr,
    },
    /// Arbitrary element of an array column (`tags[]`).
    ArrayElement(Box<ValueExpression>),
    Monadic {
        op: Operator,
        operand: Box<ValueExpression>,
    },
    Dyadic {
        op: Operator,
        left: Box<ValueExpression>,
        right: Box<ValueExpression>,
    },
    Nadic {
        op: Operator,
        operands: Vec<ValueExpression>,
    },
    /// Scalar or set function call. `COUNT(*)` has no arguments.
    Function {
        name: SmolStr,
        args: Vec<ValueExpression>,
        distinct: bool,
    },
    Cast {
        operand: Box<ValueExpression>,
        to: SmolStr,
    },
    In {
        operand: Box<ValueExpression>,
        list: InList,
        negated: bool,
    },
    Between {
        operand: Box<ValueExpression>,
        low: Box<ValueExpression>,
        high: Box<ValueExpression>,
        negated: bool,
    },
    Like {
        operand: Box<ValueExpression>,
        pattern: Box<ValueExpression>,
        escape: Option<Box<ValueExpression>>,
        negated: bool,
    },
    Exists {
        query: Box<Query>,
        negated: bool,
    },
    SubQuery(Box<Query>),
    RowConstructor(Vec<ValueExpression>),
}

impl ValueExpression {
    pub fn column(name: &str) -> Self {
        ValueExpression::ItemReference {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: &str, name: &str) -> Self {
        ValueExpression::ItemReference {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        ValueExpression::Literal(value.into())
    }

    pub fn dyadic(op: Operator, left: ValueExpression, right: ValueExpression) -> Self {
        ValueExpression::Dyadic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn monadic(op: Operator, operand: ValueExpression) -> Self {
        ValueExpression::Monadic {
            op,
            operand: Box::new(operand),
        }
    }

    /// Direct sub-expressions, subqueries excluded.
    #[must_use]
    pub fn children(&self) -> Vec<&ValueExpression> {
        match self {
            ValueExpression::Literal(_)
            | ValueExpression::Parameter(_)
            | ValueExpression::ItemReference { .. }
            | ValueExpression::Exists { .. }
            | ValueExpression::SubQuery(_) => vec![],
            ValueExpression::ArrayElement(operand)
            | ValueExpression::Monadic { operand, .. }
            | ValueExpression::Cast { operand, .. } => vec![operand.as_ref()],
            ValueExpression::Dyadic { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ValueExpression::Nadic { operands, .. }
            | ValueExpression::RowConstructor(operands)
            | ValueExpression::Function { args: operands, .. } => operands.iter().collect(),
            ValueExpression::In { operand, list, .. } => {
                let mut res = vec![operand.as_ref()];
                if let InList::Values(values) = list {
                    res.extend(values);
                }
                res
            }
            ValueExpression::Between {
                operand, low, high, ..
            } => vec![operand.as_ref(), low.as_ref(), high.as_ref()],
            ValueExpression::Like {
                operand,
                pattern,
                escape,
                ..
            } => {
                let mut res = vec![operand.as_ref(), pattern.as_ref()];
                res.extend(escape.as_deref());
                res
            }
        }
    }

    /// Whether the value depends on statement parameters, subqueries
    /// included.
    #[must_use]
    pub fn has_parameters(&self) -> bool {
        match self {
            ValueExpression::Parameter(_) => true,
            ValueExpression::Exists { query, .. } | ValueExpression::SubQuery(query) => {
                query.has_parameters()
            }
            ValueExpression::In {
                list: InList::Query(query),
                operand,
                ..
            } => operand.has_parameters() || query.has_parameters(),
            other => other.children().into_iter().any(ValueExpression::has_parameters),
        }
    }

    /// Whether a set function of this query block appears in the
    /// expression. Subqueries have their own blocks.
    #[must_use]
    pub fn contains_set_function(&self) -> bool {
        match self {
            ValueExpression::Function { name, .. } if is_set_function(name) => true,
            other => other
                .children()
                .into_iter()
                .any(ValueExpression::contains_set_function),
        }
    }
}

/// Names of the set functions.
#[must_use]
pub fn is_set_function(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "count" | "sum" | "avg" | "min" | "max"
    )
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SelectItem {
    Wildcard,
    QualifiedWildcard(SmolStr),
    Expression {
        expr: ValueExpression,
        alias: Option<SmolStr>,
    },
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JoinType {
    Cross,
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum TableReference {
    Table {
        name: SmolStr,
        alias: Option<SmolStr>,
    },
    Derived {
        query: Box<Query>,
        alias: SmolStr,
        columns: Option<Vec<SmolStr>>,
    },
    Join {
        kind: JoinType,
        left: Box<TableReference>,
        right: Box<TableReference>,
        condition: Option<ValueExpression>,
    },
}

impl TableReference {
    pub fn table(name: &str) -> Self {
        TableReference::Table {
            name: name.into(),
            alias: None,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct QuerySpecification {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: Vec<TableReference>,
    pub selection: Option<ValueExpression>,
    pub group_by: Vec<ValueExpression>,
    pub having: Option<ValueExpression>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum QueryBody {
    Specification(Box<QuerySpecification>),
    Union {
        left: Box<QueryBody>,
        right: Box<QueryBody>,
        all: bool,
    },
    Values(Vec<Vec<ValueExpression>>),
    Nested(Box<Query>),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct OrderItem {
    pub expr: ValueExpression,
    pub descending: bool,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Query {
    pub body: QueryBody,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<ValueExpression>,
    pub offset: Option<ValueExpression>,
}

impl Query {
    pub fn new(body: QueryBody) -> Self {
        Query {
            body,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn specification(spec: QuerySpecification) -> Self {
        Query::new(QueryBody::Specification(Box::new(spec)))
    }

    #[must_use]
    pub fn has_parameters(&self) -> bool {
        self.body.has_parameters()
            || self.order_by.iter().any(|item| item.expr.has_parameters())
            || self.limit.iter().chain(&self.offset).any(ValueExpression::has_parameters)
    }
}

impl QueryBody {
    #[must_use]
    pub fn has_parameters(&self) -> bool {
        match self {
            QueryBody::Specification(spec) => {
                spec.select.iter().any(|item| match item {
                    SelectItem::Expression { expr, .. } => expr.has_parameters(),
                    _ => false,
                }) || spec.from.iter().any(TableReference::has_parameters)
                    || spec
                        .selection
                        .iter()
                        .chain(&spec.group_by)
                        .chain(&spec.having)
                        .any(ValueExpression::has_parameters)
            }
            QueryBody::Union { left, right, .. } => left.has_parameters() || right.has_parameters(),
            QueryBody::Values(rows) => rows.iter().flatten().any(ValueExpression::has_parameters),
            QueryBody::Nested(query) => query.has_parameters(),
        }
    }
}

impl TableReference {
    #[must_use]
    pub fn has_parameters(&self) -> bool {
        match self {
            TableReference::Table { .. } => false,
            TableReference::Derived { query, .. } => query.has_parameters(),
            TableReference::Join {
                left,
                right,
                condition,
                ..
            } => {
                left.has_parameters()
                    || right.has_parameters()
                    || condition.as_ref().is_some_and(ValueExpression::has_parameters)
            }
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum InsertSource {
    Query(Box<Query>),
    /// Rows read from a file in the column order of the target list.
    Bulk { path: SmolStr },
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Assignment {
    pub column: SmolStr,
    pub value: ValueExpression,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Statement {
    Query(Box<Query>),
    Insert {
        table: SmolStr,
        /// `None` lists every column of the table.
        columns: Option<Vec<SmolStr>>,
        source: InsertSource,
    },
    Update {
        table: SmolStr,
        alias: Option<SmolStr>,
        assignments: Vec<Assignment>,
        selection: Option<ValueExpression>,
    },
    Delete {
        table: SmolStr,
        alias: Option<SmolStr>,
        selection: Option<ValueExpression>,
    },
    /// Writes the query result to a file.
    BulkOutput { query: Box<Query>, path: SmolStr },
}
