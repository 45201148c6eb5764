use pretty_assertions::assert_eq;
use smol_str::SmolStr;

use super::*;
use crate::ir::aggregates::AggregateKind;
use crate::ir::operator::{CompareOp, Logical};
use crate::ir::relation::SortKey;
use crate::ir::value::Value;
use crate::test_utils::{env, field};

#[test]
fn table_scan_with_predicate() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let a = field(&env, t1, 0);
    let one = env.add_constant(Value::Integer(1));
    let eq = env.add_comparison(CompareOp::Eq, a, one).unwrap();
    assert_eq!(
        env.relation_sql_with(t1, Some(eq)).unwrap(),
        r#"SELECT "t1"."a", "t1"."b", "t1"."c" FROM "t1" WHERE "t1"."a" = 1"#
    );
}

#[test]
fn correlation_names_qualify_columns() {
    let mut env = env(false);
    let t1 = env.add_table("t1", Some(SmolStr::from("x"))).unwrap();
    let b = field(&env, t1, 1);
    let projection = env
        .add_projection(t1, vec![b], vec![SmolStr::from("b")])
        .unwrap();
    assert_eq!(
        env.relation_sql(projection).unwrap(),
        r#"SELECT "x"."b" AS "b" FROM "t1" AS "x""#
    );
}

#[test]
fn inner_and_outer_joins() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let a1 = field(&env, t1, 0);
    let a2 = field(&env, t2, 0);
    let eq = env.add_comparison(CompareOp::Eq, a1, a2).unwrap();

    let inner = env.add_join(JoinKind::Inner, vec![t1, t2], Some(eq)).unwrap();
    let projection = env
        .add_projection(inner, vec![a1], vec![SmolStr::from("a")])
        .unwrap();
    assert_eq!(
        env.relation_sql(projection).unwrap(),
        r#"SELECT "t1"."a" AS "a" FROM "t1", "t2" WHERE "t1"."a" = "t2"."a""#
    );

    let t3 = env.add_table("t3", None).unwrap();
    let t4 = env.add_table("t2", Some(SmolStr::from("y"))).unwrap();
    let a3 = field(&env, t3, 0);
    let a4 = field(&env, t4, 0);
    let on = env.add_comparison(CompareOp::Eq, a3, a4).unwrap();
    let outer = env
        .add_join(JoinKind::LeftOuter, vec![t3, t4], Some(on))
        .unwrap();
    let projection = env
        .add_projection(outer, vec![a3, a4], vec![SmolStr::from("a"), SmolStr::from("y")])
        .unwrap();
    assert_eq!(
        env.relation_sql(projection).unwrap(),
        r#"SELECT "t3"."a" AS "a", "y"."a" AS "y" FROM "t3" LEFT OUTER JOIN "t2" AS "y" ON "t3"."a" = "y"."a""#
    );
}

#[test]
fn exists_join_becomes_subquery() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let c1 = field(&env, t1, 2);
    let c2 = field(&env, t2, 2);
    let eq = env.add_comparison(CompareOp::Eq, c1, c2).unwrap();
    let join = env
        .add_join(JoinKind::NotExists, vec![t1, t2], Some(eq))
        .unwrap();
    assert_eq!(
        env.relation_sql(join).unwrap(),
        r#"SELECT "t1"."a", "t1"."b", "t1"."c" FROM "t1" WHERE NOT EXISTS (SELECT "t2"."a", "t2"."b", "t2"."c" FROM "t2" WHERE "t1"."c" = "t2"."c")"#
    );
}

#[test]
fn grouping_sort_and_limit() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let b = field(&env, t1, 1);
    let c = field(&env, t1, 2);
    let sum = env
        .add_aggregation(AggregateKind::Sum, Some(c), false)
        .unwrap();
    let grouping = env.add_grouping(t1, vec![b], vec![sum]);
    let zero = env.add_constant(Value::Integer(0));
    let positive = env.add_comparison(CompareOp::Gt, sum, zero).unwrap();
    let having = env.add_filter(grouping, positive);
    let sort = env.add_sort(
        having,
        vec![SortKey {
            scalar: b,
            descending: true,
        }],
    );
    let projection = env
        .add_projection(sort, vec![b, sum], vec![SmolStr::from("b"), SmolStr::from("s")])
        .unwrap();
    let ten = env.add_constant(Value::Integer(10));
    let limit = env.add_limit(projection, ten, None).unwrap();
    assert_eq!(
        env.relation_sql(limit).unwrap(),
        r#"SELECT "t1"."b" AS "b", SUM("t1"."c") AS "s" FROM "t1" GROUP BY "t1"."b" HAVING SUM("t1"."c") > 0 ORDER BY "t1"."b" DESC LIMIT 10"#
    );
}

#[test]
fn predicates_render_as_sql() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let a = field(&env, t1, 0);
    let b = field(&env, t1, 1);
    let c = field(&env, t1, 2);
    let one = env.add_constant(Value::Integer(1));
    let two = env.add_constant(Value::Integer(2));
    let pattern = env.add_constant(Value::String("x%".into()));
    let param = env.add_parameter(0);

    let between = env.add_between(c, one, two, true);
    let like = env.add_like(b, pattern, None, false).unwrap();
    let is_null = env.add_null_check(c, false).unwrap();
    let in_list = env.add_in(a, InValues::List(vec![one, param]), false);
    let or = env
        .add_combinator(Logical::Or, vec![between, like, is_null])
        .unwrap();
    let and = env.add_combinator(Logical::And, vec![or, in_list]).unwrap();
    assert_eq!(
        env.predicate_sql(and).unwrap(),
        r#"(("t1"."c" NOT BETWEEN 1 AND 2 OR "t1"."b" LIKE 'x%' OR "t1"."c" IS NULL) AND "t1"."a" IN (1, $1))"#
    );
}

#[test]
fn element_placeholder_moves_right() {
    let mut env = env(false);
    let arrays = env.add_table("arrays", None).unwrap();
    let nums = field(&env, arrays, 2);
    let any = env.add_any_element(nums).unwrap();
    let five = env.add_constant(Value::Integer(5));
    let lt = env.add_comparison(CompareOp::Lt, any, five).unwrap();
    assert_eq!(
        env.predicate_sql(lt).unwrap(),
        r#"5 > ANY("arrays"."nums")"#
    );
}

#[test]
fn value_list_and_union() {
    let mut env = env(false);
    let one = env.add_constant(Value::Integer(1));
    let two = env.add_constant(Value::Integer(2));
    let values = env.add_value_list(vec![vec![one], vec![two]]).unwrap();
    assert_eq!(
        env.relation_sql(values).unwrap(),
        r#"SELECT "column_1" FROM (VALUES (1), (2)) AS "values" ("column_1")"#
    );

    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let a1 = field(&env, t1, 0);
    let a2 = field(&env, t2, 0);
    let p1 = env.add_projection(t1, vec![a1], vec![SmolStr::from("a")]).unwrap();
    let p2 = env.add_projection(t2, vec![a2], vec![SmolStr::from("a")]).unwrap();
    let union = env.add_union(vec![p1, p2], true).unwrap();
    assert_eq!(
        env.relation_sql(union).unwrap(),
        r#"SELECT "a" FROM ((SELECT "t1"."a" AS "a" FROM "t1") UNION ALL (SELECT "t2"."a" AS "a" FROM "t2")) AS "union""#
    );
}

#[test]
fn data_modification_text() {
    let mut env = env(false);
    let table = env.metadata().table("orders").unwrap();
    assert_eq!(
        insert_sql(&table, &[0, 1]),
        r#"INSERT INTO "orders" ("id", "customer") VALUES ($1, $2)"#
    );

    let scan = env.add_table("orders", None).unwrap();
    let id = field(&env, scan, 0);
    let zero = env.add_constant(Value::Double(0.0.into()));
    let seven = env.add_constant(Value::Integer(7));
    let eq = env.add_comparison(CompareOp::Eq, id, seven).unwrap();
    let assignments = [Assignment {
        position: 2,
        value: zero,
    }];
    assert_eq!(
        env.update_sql(&table, None, &assignments, Some(eq)).unwrap(),
        r#"UPDATE "orders" SET "amount" = 0.0 WHERE "orders"."id" = 7"#
    );
    assert_eq!(
        env.delete_sql(&table, None, None).unwrap(),
        r#"DELETE FROM "orders""#
    );
}

#[test]
fn bulk_relations_have_no_sql() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let output = env.add_bulk_output(t1, SmolStr::from("/tmp/out"));
    assert!(env.relation_sql(output).unwrap_err().is_not_supported());
}
