use pretty_assertions::assert_eq;

use super::*;

fn query(sql: &str) -> Query {
    match parse(sql).unwrap() {
        Statement::Query(query) => *query,
        other => panic!("expected a query, got {other:?}"),
    }
}

fn specification(sql: &str) -> QuerySpecification {
    match query(sql).body {
        QueryBody::Specification(spec) => *spec,
        other => panic!("expected a query specification, got {other:?}"),
    }
}

#[test]
fn simple_select() {
    let statement = parse("SELECT a FROM t1 WHERE a = 1").unwrap();
    let expected = Statement::Query(Box::new(Query::specification(QuerySpecification {
        distinct: false,
        select: vec![SelectItem::Expression {
            expr: ValueExpression::column("a"),
            alias: None,
        }],
        from: vec![TableReference::table("t1")],
        selection: Some(ValueExpression::dyadic(
            Operator::Compare(CompareOp::Eq),
            ValueExpression::column("a"),
            ValueExpression::literal(1_i64),
        )),
        group_by: vec![],
        having: None,
    })));
    assert_eq!(statement, expected);
}

#[test]
fn order_limit_offset() {
    let query = query("SELECT a FROM t1 ORDER BY b DESC, 1 LIMIT 5 OFFSET 2");
    assert_eq!(
        query.order_by,
        vec![
            OrderItem {
                expr: ValueExpression::column("b"),
                descending: true,
            },
            OrderItem {
                expr: ValueExpression::literal(1_i64),
                descending: false,
            },
        ]
    );
    assert_eq!(query.limit, Some(ValueExpression::literal(5_i64)));
    assert_eq!(query.offset, Some(ValueExpression::literal(2_i64)));
}

#[test]
fn qualified_names_and_aliases() {
    let spec = specification("SELECT x.a AS k, x.* FROM t1 AS x");
    assert_eq!(
        spec.select,
        vec![
            SelectItem::Expression {
                expr: ValueExpression::qualified("x", "a"),
                alias: Some("k".into()),
            },
            SelectItem::QualifiedWildcard("x".into()),
        ]
    );
    assert_eq!(
        spec.from,
        vec![TableReference::Table {
            name: "t1".into(),
            alias: Some("x".into()),
        }]
    );
}

#[test]
fn parameters() {
    let spec = specification("SELECT a FROM t1 WHERE a = $2 AND c = $1");
    let Some(ValueExpression::Dyadic {
        op: Operator::And,
        left,
        right,
    }) = spec.selection
    else {
        panic!("expected a conjunction");
    };
    assert_eq!(
        *left,
        ValueExpression::dyadic(
            Operator::Compare(CompareOp::Eq),
            ValueExpression::column("a"),
            ValueExpression::Parameter(1),
        )
    );
    assert_eq!(
        *right,
        ValueExpression::dyadic(
            Operator::Compare(CompareOp::Eq),
            ValueExpression::column("c"),
            ValueExpression::Parameter(0),
        )
    );

    // Anonymous placeholders are numbered in order of appearance.
    let mut translator = Translator::default();
    assert_eq!(
        translator.placeholder("?").unwrap(),
        ValueExpression::Parameter(0)
    );
    assert_eq!(
        translator.placeholder("?").unwrap(),
        ValueExpression::Parameter(1)
    );
    assert_eq!(
        translator.placeholder("$0").unwrap_err().category(),
        "SQLSyntaxError"
    );
}

#[test]
fn count_star() {
    let spec = specification("SELECT COUNT(*), Sum(DISTINCT b) FROM t1");
    assert_eq!(
        spec.select,
        vec![
            SelectItem::Expression {
                expr: ValueExpression::Function {
                    name: "count".into(),
                    args: vec![],
                    distinct: false,
                },
                alias: None,
            },
            SelectItem::Expression {
                expr: ValueExpression::Function {
                    name: "sum".into(),
                    args: vec![ValueExpression::column("b")],
                    distinct: true,
                },
                alias: None,
            },
        ]
    );
}

#[test]
fn predicates() {
    let spec = specification(
        "SELECT a FROM t1 WHERE b IS NULL OR a NOT IN (1, 2) OR c BETWEEN 1 AND 3",
    );
    let expected = ValueExpression::dyadic(
        Operator::Or,
        ValueExpression::dyadic(
            Operator::Or,
            ValueExpression::monadic(Operator::IsNull, ValueExpression::column("b")),
            ValueExpression::In {
                operand: Box::new(ValueExpression::column("a")),
                list: InList::Values(vec![
                    ValueExpression::literal(1_i64),
                    ValueExpression::literal(2_i64),
                ]),
                negated: true,
            },
        ),
        ValueExpression::Between {
            operand: Box::new(ValueExpression::column("c")),
            low: Box::new(ValueExpression::literal(1_i64)),
            high: Box::new(ValueExpression::literal(3_i64)),
            negated: false,
        },
    );
    assert_eq!(spec.selection, Some(expected));
}

#[test]
fn joins() {
    let spec = specification("SELECT * FROM t1 LEFT JOIN t2 ON t1.a = t2.a CROSS JOIN t3");
    assert_eq!(spec.select, vec![SelectItem::Wildcard]);
    assert_eq!(
        spec.from,
        vec![TableReference::Join {
            kind: JoinType::Cross,
            left: Box::new(TableReference::Join {
                kind: JoinType::LeftOuter,
                left: Box::new(TableReference::table("t1")),
                right: Box::new(TableReference::table("t2")),
                condition: Some(ValueExpression::dyadic(
                    Operator::Compare(CompareOp::Eq),
                    ValueExpression::qualified("t1", "a"),
                    ValueExpression::qualified("t2", "a"),
                )),
            }),
            right: Box::new(TableReference::table("t3")),
            condition: None,
        }]
    );

    let err = parse("SELECT * FROM t1 JOIN t2 USING (a)").unwrap_err();
    assert_eq!(
        err,
        PlanError::NotSupported(Entity::Expression, Some("JOIN USING".into()))
    );
}

#[test]
fn derived_table() {
    let spec = specification("SELECT * FROM (SELECT a FROM t1) AS d (x)");
    let [TableReference::Derived { alias, columns, .. }] = spec.from.as_slice() else {
        panic!("expected a derived table");
    };
    assert_eq!(alias, "d");
    assert_eq!(columns, &Some(vec![SmolStr::from("x")]));

    let err = parse("SELECT * FROM (SELECT a FROM t1)").unwrap_err();
    assert_eq!(
        err,
        PlanError::ParsingError("subquery in FROM must have an alias".into())
    );
}

#[test]
fn union_quantifier() {
    let query = query("SELECT a FROM t1 UNION SELECT a FROM t2 UNION ALL VALUES (1)");
    let QueryBody::Union { left, right, all } = query.body else {
        panic!("expected a union");
    };
    assert!(all);
    assert_eq!(
        *right,
        QueryBody::Values(vec![vec![ValueExpression::literal(1_i64)]])
    );
    assert!(matches!(*left, QueryBody::Union { all: false, .. }));
}

#[test]
fn rejected_statements() {
    let err = parse("INSERT INTO t1 VALUES (1)").unwrap_err();
    assert_eq!(
        err,
        PlanError::NotSupported(Entity::Statement, Some("INSERT text".into()))
    );

    let err = parse("SELECT a FROM t1; SELECT b FROM t1").unwrap_err();
    assert_eq!(
        err,
        PlanError::ParsingError("expected one statement, got 2".into())
    );

    assert_eq!(parse("SELEC a FROM t1").unwrap_err().category(), "SQLSyntaxError");

    let err = parse("WITH q AS (SELECT a FROM t1) SELECT * FROM q").unwrap_err();
    assert_eq!(
        err,
        PlanError::NotSupported(Entity::Expression, Some("WITH clause".into()))
    );
}
