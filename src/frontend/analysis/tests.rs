use pretty_assertions::assert_eq;

use super::*;
use crate::errors::Entity;
use crate::frontend::sql::parse;
use crate::frontend::statement::{self, Query, QueryBody};
use crate::ir::boolean::Boolean;
use crate::ir::node::NodeType;
use crate::ir::operator::JoinKind;
use crate::ir::relation::Relation;
use crate::ir::scalar::Tuple;
use crate::ir::value::Value;
use crate::test_utils::env;

fn relation(env: &Environment, id: NodeId) -> Relation {
    env.get_relation(id).unwrap().clone()
}

fn query(sql: &str) -> Box<Query> {
    match parse(sql).unwrap() {
        Statement::Query(query) => query,
        other => panic!("expected a query, got {other:?}"),
    }
}

fn values(rows: Vec<Vec<i64>>) -> Box<Query> {
    Box::new(Query::new(QueryBody::Values(
        rows.into_iter()
            .map(|row| row.into_iter().map(ValueExpression::literal).collect())
            .collect(),
    )))
}

#[test]
fn table_list_is_an_unconditioned_join() {
    let mut env = env(false);
    let top = env
        .analyze(&Statement::Query(query("SELECT t1.a FROM t1, t2")))
        .unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    let Relation::Join(join) = relation(&env, projection.operand) else {
        panic!("expected a join");
    };
    assert_eq!(join.kind, JoinKind::Inner);
    assert_eq!(join.predicate, None);
    assert_eq!(env.row_info(projection.operand).unwrap().len(), 6);

    // Both tables have a column named "a".
    let err = env
        .analyze(&Statement::Query(query("SELECT a FROM t1, t2")))
        .unwrap_err();
    assert_eq!(err, PlanError::DuplicateQualifiedName("a".into()));
}

#[test]
fn null_check_status_reaches_the_row() {
    let mut env = env(false);
    let top = env
        .analyze(&Statement::Query(query("SELECT * FROM t1 WHERE b IS NULL")))
        .unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    let Relation::Filter(filter) = relation(&env, projection.operand) else {
        panic!("expected a filter");
    };
    let tuple = Tuple::from_row(
        &env,
        filter.operand,
        vec![Value::Integer(1), Value::Null, Value::Null],
    )
    .unwrap();
    assert_eq!(env.check_by_data(filter.predicate, &tuple).unwrap(), Boolean::True);
    let negated = env.add_not(filter.predicate).unwrap();
    assert_eq!(env.check_by_data(negated, &tuple).unwrap(), Boolean::False);
}

fn filter_sql(env: &mut Environment, sql: &str) -> String {
    let top = env.analyze(&Statement::Query(query(sql))).unwrap();
    let Relation::Projection(projection) = relation(env, top) else {
        panic!("expected a projection");
    };
    let Relation::Filter(filter) = relation(env, projection.operand) else {
        panic!("expected a filter");
    };
    env.predicate_sql(filter.predicate).unwrap()
}

#[test]
fn proven_null_checks_fold_within_their_scope() {
    let mut env = env(false);
    assert_eq!(
        filter_sql(&mut env, "SELECT a FROM t1 WHERE c > 1 AND c IS NOT NULL"),
        r#""t1"."c" > 1"#
    );
    assert_eq!(
        filter_sql(&mut env, "SELECT a FROM t1 WHERE b IS NULL AND b IS NOT NULL"),
        "FALSE"
    );
    // Under OR nothing is proven.
    assert_eq!(
        filter_sql(&mut env, "SELECT a FROM t1 WHERE (b IS NULL OR c = 1) AND b IS NOT NULL"),
        r#"(("t1"."b" IS NULL OR "t1"."c" = 1) AND "t1"."b" IS NOT NULL)"#
    );
    // What the subquery proves holds for its rows only.
    assert_eq!(
        filter_sql(
            &mut env,
            "SELECT a FROM t1 WHERE EXISTS (SELECT a FROM t2 WHERE t1.c IS NULL) AND t1.c IS NOT NULL"
        ),
        r#""t1"."c" IS NOT NULL"#
    );
}

#[test]
fn predicates_reading_no_row_fold() {
    let mut env = env(false);
    assert_eq!(
        filter_sql(&mut env, "SELECT a FROM t1 WHERE c > 1 AND 1 = 2"),
        "FALSE"
    );
    assert_eq!(
        filter_sql(&mut env, "SELECT a FROM t1 WHERE c > 1 AND 2 BETWEEN 1 AND 1 + 2"),
        r#""t1"."c" > 1"#
    );
    assert_eq!(
        filter_sql(&mut env, "SELECT a FROM t1 WHERE c > 1 AND $1 = 2"),
        r#"("t1"."c" > 1 AND $1 = 2)"#
    );
}

#[test]
fn repeated_expression_is_one_node() {
    let mut env = env(false);
    let top = env
        .analyze(&Statement::Query(query("SELECT a + 1, a + 1, a + 2 FROM t1")))
        .unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    assert_eq!(projection.columns[0], projection.columns[1]);
    assert_ne!(projection.columns[0], projection.columns[2]);
}

#[test]
fn insert_from_query_and_file() {
    let mut env = env(false);
    let insert = Statement::Insert {
        table: "t1".into(),
        columns: Some(vec!["a".into(), "c".into()]),
        source: InsertSource::Query(values(vec![vec![1, 2], vec![3, 4]])),
    };
    let top = env.analyze(&insert).unwrap();
    let Relation::Insert(insert) = relation(&env, top) else {
        panic!("expected an insert");
    };
    assert_eq!(insert.columns, vec![0, 2]);
    assert_eq!(relation(&env, insert.operand).node_type(), NodeType::ValueList);

    let bulk = Statement::Insert {
        table: "t2".into(),
        columns: None,
        source: InsertSource::Bulk {
            path: "/tmp/t2.csv".into(),
        },
    };
    let top = env.analyze(&bulk).unwrap();
    let Relation::Insert(insert) = relation(&env, top) else {
        panic!("expected an insert");
    };
    assert_eq!(insert.columns, vec![0, 1, 2]);
    let Relation::BulkInput(input) = relation(&env, insert.operand) else {
        panic!("expected a bulk input");
    };
    assert_eq!(input.path, "/tmp/t2.csv");
    assert_eq!(input.columns.len(), 3);

    let unknown = Statement::Insert {
        table: "t1".into(),
        columns: Some(vec!["a".into(), "z".into()]),
        source: InsertSource::Query(values(vec![vec![1, 2]])),
    };
    assert_eq!(
        env.analyze(&unknown).unwrap_err(),
        PlanError::ColumnNotFound("t1.z".into())
    );

    let missing = Statement::Insert {
        table: "nowhere".into(),
        columns: None,
        source: InsertSource::Query(values(vec![vec![1]])),
    };
    assert_eq!(env.analyze(&missing).unwrap_err().category(), "NotFound");
}

#[test]
fn update_and_delete_filter_their_target() {
    let mut env = env(false);
    let update = Statement::Update {
        table: "t1".into(),
        alias: None,
        assignments: vec![statement::Assignment {
            column: "c".into(),
            value: ValueExpression::dyadic(
                statement::Operator::Add,
                ValueExpression::column("c"),
                ValueExpression::literal(1_i64),
            ),
        }],
        selection: Some(ValueExpression::dyadic(
            statement::Operator::Compare(crate::ir::operator::CompareOp::Eq),
            ValueExpression::column("a"),
            ValueExpression::literal(1_i64),
        )),
    };
    let top = env.analyze(&update).unwrap();
    let Relation::Update(update) = relation(&env, top) else {
        panic!("expected an update");
    };
    assert_eq!(update.table.name, "t1");
    assert_eq!(update.assignments.len(), 1);
    assert_eq!(update.assignments[0].position, 2);
    assert_eq!(relation(&env, update.operand).node_type(), NodeType::Filter);

    let wrong_type = Statement::Update {
        table: "t1".into(),
        alias: None,
        assignments: vec![statement::Assignment {
            column: "c".into(),
            value: ValueExpression::literal("x"),
        }],
        selection: None,
    };
    assert_eq!(
        env.analyze(&wrong_type).unwrap_err(),
        PlanError::NotSupported(
            Entity::Type,
            Some("comparison between int and string".into())
        )
    );

    let delete = Statement::Delete {
        table: "t2".into(),
        alias: Some("x".into()),
        selection: Some(ValueExpression::monadic(
            statement::Operator::IsNull,
            ValueExpression::qualified("x", "b"),
        )),
    };
    let top = env.analyze(&delete).unwrap();
    let Relation::Delete(delete) = relation(&env, top) else {
        panic!("expected a delete");
    };
    let Relation::Filter(filter) = relation(&env, delete.operand) else {
        panic!("expected a filter");
    };
    assert_eq!(relation(&env, filter.operand).node_type(), NodeType::Table);

    let no_filter = Statement::Delete {
        table: "t2".into(),
        alias: None,
        selection: None,
    };
    let top = env.analyze(&no_filter).unwrap();
    let Relation::Delete(delete) = relation(&env, top) else {
        panic!("expected a delete");
    };
    assert_eq!(relation(&env, delete.operand).node_type(), NodeType::Table);
}

#[test]
fn bulk_output_wraps_the_query() {
    let mut env = env(false);
    let statement = Statement::BulkOutput {
        query: query("SELECT a, b FROM t2"),
        path: "/tmp/out.csv".into(),
    };
    let top = env.analyze(&statement).unwrap();
    let Relation::BulkOutput(output) = relation(&env, top) else {
        panic!("expected a bulk output");
    };
    assert_eq!(output.path, "/tmp/out.csv");
    assert_eq!(relation(&env, output.operand).node_type(), NodeType::Projection);
}
