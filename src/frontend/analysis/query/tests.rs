use pretty_assertions::assert_eq;

use super::*;
use crate::frontend::sql::parse;
use crate::frontend::statement::Statement;
use crate::ir::node::NodeType;
use crate::ir::relation::Relation;
use crate::test_utils::env;

fn parse_query(sql: &str) -> Query {
    match parse(sql).unwrap() {
        Statement::Query(query) => *query,
        other => panic!("expected a query, got {other:?}"),
    }
}

fn analyze(env: &mut Environment, sql: &str) -> Result<NodeId, PlanError> {
    get_relation(env, &parse_query(sql))
}

fn relation(env: &Environment, id: NodeId) -> Relation {
    env.get_relation(id).unwrap().clone()
}

/// Operand chain from the top relation down, by node type.
fn chain(env: &Environment, mut id: NodeId) -> Vec<NodeType> {
    let mut res = Vec::new();
    loop {
        let relation = relation(env, id);
        res.push(relation.node_type());
        id = match relation {
            Relation::Filter(filter) => filter.operand,
            Relation::Projection(projection) => projection.operand,
            Relation::Grouping(grouping) => grouping.operand,
            Relation::Sort(sort) => sort.operand,
            Relation::Limit(limit) => limit.operand,
            Relation::Distinct(distinct) => distinct.operand,
            _ => return res,
        };
    }
}

#[test]
fn clauses_stack_in_evaluation_order() {
    let mut env = env(false);
    let top = analyze(
        &mut env,
        "SELECT DISTINCT b FROM t1 WHERE c > 1 ORDER BY b LIMIT 3",
    )
    .unwrap();
    assert_eq!(
        chain(&env, top),
        vec![
            NodeType::Limit,
            NodeType::Distinct,
            NodeType::Projection,
            NodeType::Sort,
            NodeType::Filter,
            NodeType::Table,
        ]
    );
}

#[test]
fn distinct_over_key_is_elided() {
    let mut env = env(false);
    let top = analyze(&mut env, "SELECT DISTINCT a, b FROM t1").unwrap();
    assert_eq!(chain(&env, top), vec![NodeType::Projection, NodeType::Table]);
}

#[test]
fn grouping_and_having() {
    let mut env = env(false);
    let top = analyze(
        &mut env,
        "SELECT b, COUNT(*) FROM t1 GROUP BY b HAVING COUNT(*) > 1",
    )
    .unwrap();
    assert_eq!(
        chain(&env, top),
        vec![
            NodeType::Projection,
            NodeType::Filter,
            NodeType::Grouping,
            NodeType::Table,
        ]
    );
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    assert_eq!(projection.names, vec![SmolStr::from("b"), "column_2".into()]);
    let Relation::Filter(having) = relation(&env, projection.operand) else {
        panic!("expected a filter");
    };
    let Relation::Grouping(grouping) = relation(&env, having.operand) else {
        panic!("expected a grouping");
    };
    assert_eq!(grouping.keys.len(), 1);
    assert_eq!(grouping.aggregates, vec![projection.columns[1]]);

    // A set function alone groups the whole input.
    let top = analyze(&mut env, "SELECT COUNT(*) FROM t1").unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    let Relation::Grouping(grouping) = relation(&env, projection.operand) else {
        panic!("expected a grouping");
    };
    assert!(grouping.keys.is_empty());
}

#[test]
fn order_by_alias_and_position() {
    let mut env = env(false);
    let top = analyze(&mut env, "SELECT c AS k, b FROM t1 ORDER BY k DESC, 2").unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    let Relation::Sort(sort) = relation(&env, projection.operand) else {
        panic!("expected a sort");
    };
    let row = env.row_info(sort.operand).unwrap();
    assert_eq!(
        sort.keys,
        vec![
            SortKey {
                scalar: row[2],
                descending: true,
            },
            SortKey {
                scalar: row[1],
                descending: false,
            },
        ]
    );

    let err = analyze(&mut env, "SELECT a FROM t1 ORDER BY 2").unwrap_err();
    assert_eq!(err, PlanError::ColumnNotFound("ORDER BY position 2".into()));
    let err = analyze(&mut env, "SELECT a FROM t1 ORDER BY 0").unwrap_err();
    assert_eq!(err, PlanError::ColumnNotFound("ORDER BY position 0".into()));

    let err = analyze(&mut env, "SELECT c AS k, b AS k FROM t1 ORDER BY k").unwrap_err();
    assert_eq!(err, PlanError::DuplicateQualifiedName("k".into()));
}

#[test]
fn limit_and_offset() {
    let mut env = env(false);
    let top = analyze(&mut env, "SELECT a FROM t1 LIMIT 5 OFFSET 2").unwrap();
    let Relation::Limit(limit) = relation(&env, top) else {
        panic!("expected a limit");
    };
    assert!(limit.offset.is_some());

    let mut query = parse_query("SELECT a FROM t1");
    query.offset = Some(ValueExpression::literal(2_i64));
    let err = get_relation(&mut env, &query).unwrap_err();
    assert_eq!(
        err,
        PlanError::NotSupported(Entity::Query, Some("OFFSET without LIMIT".into()))
    );
}

#[test]
fn set_function_placement() {
    let mut env = env(false);
    let err = analyze(&mut env, "SELECT a FROM t1 WHERE COUNT(*) > 1").unwrap_err();
    assert_eq!(
        err,
        PlanError::NotSupported(Entity::Aggregate, Some("set function in WHERE".into()))
    );
    let err = analyze(&mut env, "SELECT COUNT(*) FROM t1 GROUP BY COUNT(*)").unwrap_err();
    assert_eq!(
        err,
        PlanError::NotSupported(Entity::Aggregate, Some("set function in GROUP BY".into()))
    );
    let err = analyze(&mut env, "SELECT * FROM t1 GROUP BY a").unwrap_err();
    assert_eq!(err, PlanError::NonGroupingColumn("b".into()));
}

#[test]
fn exists_becomes_semi_join() {
    let mut env = env(false);
    let top = analyze(
        &mut env,
        "SELECT a FROM t1 WHERE NOT EXISTS (SELECT a FROM t2 WHERE t2.a = t1.a) AND c > 1",
    )
    .unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    let Relation::Filter(filter) = relation(&env, projection.operand) else {
        panic!("expected a filter");
    };
    let Relation::Join(join) = relation(&env, filter.operand) else {
        panic!("expected a join");
    };
    assert_eq!(join.kind, JoinKind::NotExists);
    assert_eq!(join.predicate, None);
    assert_eq!(join.operands.len(), 2);
    assert_eq!(relation(&env, join.operands[0]).node_type(), NodeType::Table);
    assert_eq!(
        env.predicate_sql(filter.predicate).unwrap(),
        r#""t1"."c" > 1"#
    );
}

#[test]
fn joined_tables() {
    let mut env = env(false);
    let top = analyze(&mut env, "SELECT * FROM t1 LEFT JOIN t2 ON t1.a = t2.a").unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    assert_eq!(projection.columns.len(), 6);
    let Relation::Join(join) = relation(&env, projection.operand) else {
        panic!("expected a join");
    };
    assert_eq!(join.kind, JoinKind::LeftOuter);
    let predicate = join.predicate.unwrap();
    assert_eq!(
        env.predicate_sql(predicate).unwrap(),
        r#""t1"."a" = "t2"."a""#
    );

    let top = analyze(&mut env, "SELECT t2.* FROM t1, t2").unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    assert_eq!(projection.names, vec![SmolStr::from("a"), "b".into(), "c".into()]);
    let Relation::Join(join) = relation(&env, projection.operand) else {
        panic!("expected a join");
    };
    assert_eq!(join.kind, JoinKind::Inner);
}

#[test]
fn union_and_values_order_by_their_output() {
    let mut env = env(false);
    let top = analyze(
        &mut env,
        "SELECT a FROM t1 UNION SELECT a FROM t2 ORDER BY 1 LIMIT 2",
    )
    .unwrap();
    assert_eq!(
        chain(&env, top),
        vec![NodeType::Limit, NodeType::Sort, NodeType::Union]
    );

    let top = analyze(&mut env, "VALUES (1, 'x'), (2, 'y') ORDER BY column_2").unwrap();
    let Relation::Sort(sort) = relation(&env, top) else {
        panic!("expected a sort");
    };
    assert_eq!(sort.keys[0].scalar, env.row_info(sort.operand).unwrap()[1]);
}

#[test]
fn select_without_from() {
    let mut env = env(false);
    let top = analyze(&mut env, "SELECT 1").unwrap();
    let Relation::Projection(projection) = relation(&env, top) else {
        panic!("expected a projection");
    };
    let Relation::ValueList(values) = relation(&env, projection.operand) else {
        panic!("expected a value list");
    };
    assert_eq!(values.rows, vec![Vec::<NodeId>::new()]);
}

#[test]
fn degree_from_text() {
    let env = env(false);
    let query = parse_query("SELECT *, x.a FROM t1 AS x, (SELECT a, b FROM t2) AS d");
    assert_eq!(query_degree(&env, &query).unwrap(), 6);

    let query = parse_query("SELECT d.* FROM t1 JOIN (SELECT a FROM t2) AS d (k) ON true");
    assert_eq!(query_degree(&env, &query).unwrap(), 1);

    let query = parse_query("SELECT y.* FROM t1");
    assert_eq!(
        query_degree(&env, &query).unwrap_err(),
        PlanError::NotFound(Entity::Relation, "y".into())
    );
}
