//! SQL text to parse tree, over the `sqlparser` AST.
//!
//! Only query statements are read from text. Data modification statements
//! are handed to the planner as [`Statement`] values.

use smol_str::{format_smolstr, SmolStr};
use sqlparser::ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::errors::{Entity, PlanError};
use crate::frontend::statement::{
    InList, JoinType, Operator, OrderItem, Query, QueryBody, QuerySpecification, SelectItem,
    Statement, TableReference, ValueExpression,
};
use crate::ir::operator::CompareOp;
use crate::ir::value::Value;

/// Parses one SQL statement.
///
/// # Errors
/// - the text is not valid SQL
/// - the text holds more or less than one statement
/// - the statement uses syntax the planner doesn't support
pub fn parse(sql: &str) -> Result<Statement, PlanError> {
    let dialect = PostgreSqlDialect {};
    let mut ast = Parser::parse_sql(&dialect, sql)
        .map_err(|e| PlanError::ParsingError(format_smolstr!("{e}")))?;
    if ast.len() != 1 {
        return Err(PlanError::ParsingError(format_smolstr!(
            "expected one statement, got {}",
            ast.len()
        )));
    }
    let mut translator = Translator::default();
    match ast.remove(0) {
        ast::Statement::Query(query) => Ok(Statement::Query(Box::new(translator.query(&query)?))),
        other => Err(PlanError::NotSupported(
            Entity::Statement,
            Some(format_smolstr!("{}", statement_kind(&other))),
        )),
    }
}

fn statement_kind(statement: &ast::Statement) -> &'static str {
    match statement {
        ast::Statement::Insert { .. } => "INSERT text",
        ast::Statement::Update { .. } => "UPDATE text",
        ast::Statement::Delete { .. } => "DELETE text",
        _ => "statement",
    }
}

fn unsupported(what: impl std::fmt::Display) -> PlanError {
    PlanError::NotSupported(Entity::Expression, Some(format_smolstr!("{what}")))
}

fn ident(ident: &ast::Ident) -> SmolStr {
    SmolStr::from(ident.value.as_str())
}

fn object_name(name: &ast::ObjectName) -> SmolStr {
    // Schema qualifiers are ignored, tables live in one namespace.
    name.0.last().map(ident).unwrap_or_default()
}

/// Walks the AST of one statement. `?` placeholders are numbered in
/// order of appearance.
#[derive(Default)]
struct Translator {
    next_parameter: usize,
}

impl Translator {
    fn query(&mut self, query: &ast::Query) -> Result<Query, PlanError> {
        if query.with.is_some() {
            return Err(unsupported("WITH clause"));
        }
        let body = self.set_expr(&query.body)?;
        let order_by = query
            .order_by
            .iter()
            .map(|item| {
                Ok(OrderItem {
                    expr: self.expr(&item.expr)?,
                    descending: item.asc == Some(false),
                })
            })
            .collect::<Result<Vec<_>, PlanError>>()?;
        let limit = match &query.limit {
            Some(expr) => Some(self.expr(expr)?),
            None => None,
        };
        let offset = match &query.offset {
            Some(offset) => Some(self.expr(&offset.value)?),
            None => None,
        };
        Ok(Query {
            body,
            order_by,
            limit,
            offset,
        })
    }

    fn set_expr(&mut self, body: &ast::SetExpr) -> Result<QueryBody, PlanError> {
        match body {
            ast::SetExpr::Select(select) => {
                Ok(QueryBody::Specification(Box::new(self.select(select)?)))
            }
            ast::SetExpr::Query(query) => Ok(QueryBody::Nested(Box::new(self.query(query)?))),
            ast::SetExpr::SetOperation {
                op: ast::SetOperator::Union,
                set_quantifier,
                left,
                right,
            } => {
                let all = match set_quantifier {
                    ast::SetQuantifier::All => true,
                    ast::SetQuantifier::Distinct | ast::SetQuantifier::None => false,
                    other => return Err(unsupported(format_smolstr!("UNION {other}"))),
                };
                Ok(QueryBody::Union {
                    left: Box::new(self.set_expr(left)?),
                    right: Box::new(self.set_expr(right)?),
                    all,
                })
            }
            ast::SetExpr::SetOperation { op, .. } => Err(unsupported(op)),
            ast::SetExpr::Values(values) => {
                let mut rows = Vec::with_capacity(values.rows.len());
                for row in &values.rows {
                    rows.push(
                        row.iter()
                            .map(|expr| self.expr(expr))
                            .collect::<Result<Vec<_>, _>>()?,
                    );
                }
                Ok(QueryBody::Values(rows))
            }
            other => Err(unsupported(other)),
        }
    }

    fn select(&mut self, select: &ast::Select) -> Result<QuerySpecification, PlanError> {
        let distinct = match &select.distinct {
            None => false,
            Some(ast::Distinct::Distinct) => true,
            Some(ast::Distinct::On(_)) => return Err(unsupported("DISTINCT ON")),
        };
        let mut items = Vec::with_capacity(select.projection.len());
        for item in &select.projection {
            items.push(match item {
                ast::SelectItem::Wildcard(_) => SelectItem::Wildcard,
                ast::SelectItem::QualifiedWildcard(name, _) => {
                    SelectItem::QualifiedWildcard(object_name(name))
                }
                ast::SelectItem::UnnamedExpr(expr) => SelectItem::Expression {
                    expr: self.expr(expr)?,
                    alias: None,
                },
                ast::SelectItem::ExprWithAlias { expr, alias } => SelectItem::Expression {
                    expr: self.expr(expr)?,
                    alias: Some(ident(alias)),
                },
            });
        }
        let mut from = Vec::with_capacity(select.from.len());
        for table in &select.from {
            from.push(self.table_with_joins(table)?);
        }
        let selection = match &select.selection {
            Some(expr) => Some(self.expr(expr)?),
            None => None,
        };
        let group_by = match &select.group_by {
            ast::GroupByExpr::Expressions(exprs) => exprs
                .iter()
                .map(|expr| self.expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
            ast::GroupByExpr::All => return Err(unsupported("GROUP BY ALL")),
        };
        let having = match &select.having {
            Some(expr) => Some(self.expr(expr)?),
            None => None,
        };
        Ok(QuerySpecification {
            distinct,
            select: items,
            from,
            selection,
            group_by,
            having,
        })
    }

    fn table_with_joins(&mut self, table: &ast::TableWithJoins) -> Result<TableReference, PlanError> {
        let mut reference = self.table_factor(&table.relation)?;
        for join in &table.joins {
            let right = self.table_factor(&join.relation)?;
            let (kind, constraint) = match &join.join_operator {
                ast::JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
                ast::JoinOperator::LeftOuter(c) => (JoinType::LeftOuter, Some(c)),
                ast::JoinOperator::RightOuter(c) => (JoinType::RightOuter, Some(c)),
                ast::JoinOperator::FullOuter(c) => (JoinType::FullOuter, Some(c)),
                ast::JoinOperator::CrossJoin => (JoinType::Cross, None),
                _ => return Err(unsupported("join operator")),
            };
            let condition = match constraint {
                Some(ast::JoinConstraint::On(expr)) => Some(self.expr(expr)?),
                Some(ast::JoinConstraint::None) | None => None,
                Some(ast::JoinConstraint::Using(_)) => return Err(unsupported("JOIN USING")),
                Some(ast::JoinConstraint::Natural) => return Err(unsupported("NATURAL JOIN")),
            };
            reference = TableReference::Join {
                kind,
                left: Box::new(reference),
                right: Box::new(right),
                condition,
            };
        }
        Ok(reference)
    }

    fn table_factor(&mut self, factor: &ast::TableFactor) -> Result<TableReference, PlanError> {
        match factor {
            ast::TableFactor::Table { name, alias, .. } => {
                if alias.as_ref().is_some_and(|a| !a.columns.is_empty()) {
                    return Err(unsupported("column aliases of a table"));
                }
                Ok(TableReference::Table {
                    name: object_name(name),
                    alias: alias.as_ref().map(|a| ident(&a.name)),
                })
            }
            ast::TableFactor::Derived {
                subquery, alias, ..
            } => {
                let Some(alias) = alias else {
                    return Err(PlanError::ParsingError(
                        "subquery in FROM must have an alias".into(),
                    ));
                };
                let columns = if alias.columns.is_empty() {
                    None
                } else {
                    Some(alias.columns.iter().map(ident).collect())
                };
                Ok(TableReference::Derived {
                    query: Box::new(self.query(subquery)?),
                    alias: ident(&alias.name),
                    columns,
                })
            }
            ast::TableFactor::NestedJoin {
                table_with_joins,
                alias: None,
            } => self.table_with_joins(table_with_joins),
            other => Err(unsupported(other)),
        }
    }

    fn expr(&mut self, expr: &ast::Expr) -> Result<ValueExpression, PlanError> {
        let res = match expr {
            ast::Expr::Identifier(name) => ValueExpression::ItemReference {
                qualifier: None,
                name: ident(name),
            },
            ast::Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [.., qualifier, name] => ValueExpression::ItemReference {
                    qualifier: Some(ident(qualifier)),
                    name: ident(name),
                },
                [name] => ValueExpression::ItemReference {
                    qualifier: None,
                    name: ident(name),
                },
                [] => return Err(PlanError::ParsingError("empty identifier".into())),
            },
            ast::Expr::Value(value) => self.value(value)?,
            ast::Expr::Nested(inner) => self.expr(inner)?,
            ast::Expr::BinaryOp { left, op, right } => {
                let op = match op {
                    ast::BinaryOperator::Plus => Operator::Add,
                    ast::BinaryOperator::Minus => Operator::Subtract,
                    ast::BinaryOperator::Multiply => Operator::Multiply,
                    ast::BinaryOperator::Divide => Operator::Divide,
                    ast::BinaryOperator::Modulo => Operator::Modulo,
                    ast::BinaryOperator::StringConcat => Operator::Concat,
                    ast::BinaryOperator::And => Operator::And,
                    ast::BinaryOperator::Or => Operator::Or,
                    ast::BinaryOperator::Eq => Operator::Compare(CompareOp::Eq),
                    ast::BinaryOperator::NotEq => Operator::Compare(CompareOp::NotEq),
                    ast::BinaryOperator::Lt => Operator::Compare(CompareOp::Lt),
                    ast::BinaryOperator::LtEq => Operator::Compare(CompareOp::LtEq),
                    ast::BinaryOperator::Gt => Operator::Compare(CompareOp::Gt),
                    ast::BinaryOperator::GtEq => Operator::Compare(CompareOp::GtEq),
                    other => Operator::Other(format_smolstr!("{other}")),
                };
                ValueExpression::Dyadic {
                    op,
                    left: Box::new(self.expr(left)?),
                    right: Box::new(self.expr(right)?),
                }
            }
            ast::Expr::UnaryOp { op, expr } => {
                let op = match op {
                    ast::UnaryOperator::Minus => Operator::Negative,
                    ast::UnaryOperator::Plus => Operator::Positive,
                    ast::UnaryOperator::Not => Operator::Not,
                    other => Operator::Other(format_smolstr!("{other}")),
                };
                ValueExpression::Monadic {
                    op,
                    operand: Box::new(self.expr(expr)?),
                }
            }
            ast::Expr::IsNull(operand) => ValueExpression::Monadic {
                op: Operator::IsNull,
                operand: Box::new(self.expr(operand)?),
            },
            ast::Expr::IsNotNull(operand) => ValueExpression::Monadic {
                op: Operator::IsNotNull,
                operand: Box::new(self.expr(operand)?),
            },
            ast::Expr::InList {
                expr,
                list,
                negated,
            } => ValueExpression::In {
                operand: Box::new(self.expr(expr)?),
                list: InList::Values(
                    list.iter()
                        .map(|item| self.expr(item))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                negated: *negated,
            },
            ast::Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => ValueExpression::In {
                operand: Box::new(self.expr(expr)?),
                list: InList::Query(Box::new(self.query(subquery)?)),
                negated: *negated,
            },
            ast::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => ValueExpression::Between {
                operand: Box::new(self.expr(expr)?),
                low: Box::new(self.expr(low)?),
                high: Box::new(self.expr(high)?),
                negated: *negated,
            },
            ast::Expr::Like {
                negated,
                expr,
                pattern,
                escape_char,
                ..
            } => ValueExpression::Like {
                operand: Box::new(self.expr(expr)?),
                pattern: Box::new(self.expr(pattern)?),
                escape: escape_char.map(|c| {
                    Box::new(ValueExpression::Literal(Value::String(format_smolstr!("{c}"))))
                }),
                negated: *negated,
            },
            ast::Expr::Cast {
                expr, data_type, ..
            } => {
                let name = data_type.to_string();
                // Length and precision arguments don't change the planner type.
                let to = name.split('(').next().unwrap_or_default().trim();
                ValueExpression::Cast {
                    operand: Box::new(self.expr(expr)?),
                    to: SmolStr::from(to),
                }
            }
            ast::Expr::Exists { subquery, negated } => ValueExpression::Exists {
                query: Box::new(self.query(subquery)?),
                negated: *negated,
            },
            ast::Expr::Subquery(query) => ValueExpression::SubQuery(Box::new(self.query(query)?)),
            ast::Expr::Tuple(elements) => ValueExpression::RowConstructor(
                elements
                    .iter()
                    .map(|element| self.expr(element))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            ast::Expr::Function(function) => self.function(function)?,
            other => return Err(unsupported(other)),
        };
        Ok(res)
    }

    fn function(&mut self, function: &ast::Function) -> Result<ValueExpression, PlanError> {
        if function.over.is_some() {
            return Err(unsupported("window function"));
        }
        let mut args = Vec::with_capacity(function.args.len());
        for arg in &function.args {
            match arg {
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(expr)) => {
                    args.push(self.expr(expr)?);
                }
                // COUNT(*) has no operand.
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => {}
                other => return Err(unsupported(other)),
            }
        }
        Ok(ValueExpression::Function {
            name: object_name(&function.name).to_lowercase().into(),
            args,
            distinct: function.distinct,
        })
    }

    fn value(&mut self, value: &ast::Value) -> Result<ValueExpression, PlanError> {
        let value = match value {
            ast::Value::Number(text, _) => {
                if let Ok(integer) = text.parse::<i64>() {
                    Value::Integer(integer)
                } else {
                    let double = text.parse::<f64>().map_err(|e| {
                        PlanError::ParsingError(format_smolstr!("number {text}: {e}"))
                    })?;
                    Value::from(double)
                }
            }
            ast::Value::SingleQuotedString(text) => Value::String(SmolStr::from(text.as_str())),
            ast::Value::Boolean(b) => Value::Boolean(*b),
            ast::Value::Null => Value::Null,
            ast::Value::Placeholder(name) => return self.placeholder(name),
            other => return Err(unsupported(other)),
        };
        Ok(ValueExpression::Literal(value))
    }

    fn placeholder(&mut self, name: &str) -> Result<ValueExpression, PlanError> {
        let index = match name.strip_prefix('$') {
            Some(number) => number
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .ok_or_else(|| PlanError::ParsingError(format_smolstr!("parameter {name}")))?,
            None => {
                let index = self.next_parameter;
                self.next_parameter += 1;
                index
            }
        };
        Ok(ValueExpression::Parameter(index))
    }
}

#[cfg(test)]
pub mod tests_helpers {
    use std::rc::Rc;

    use crate::config::PlannerConfig;
    use crate::schema::Metadata;
    use crate::test_utils::catalog;
    use crate::CompiledStatement;
    use crate::PreparedStatement;

    /// Compiles SQL against the test catalog, over cascaded servers when
    /// `cascade` is set.
    pub fn sql_to_plan(sql: &str, cascade: bool) -> CompiledStatement {
        let metadata: Rc<dyn Metadata> = Rc::new(catalog());
        PreparedStatement::parse(metadata, crate::test_utils::config(cascade), sql).unwrap()
    }

    pub fn sql_to_error(sql: &str, config: PlannerConfig) -> crate::errors::PlanError {
        let metadata: Rc<dyn Metadata> = Rc::new(catalog());
        PreparedStatement::parse(metadata, config, sql).unwrap_err()
    }
}

#[cfg(test)]
mod tests;
