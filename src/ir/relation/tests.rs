use pretty_assertions::assert_eq;
use smol_str::SmolStr;

use super::*;
use crate::ir::operator::CompareOp;
use crate::ir::relation::inquiry::{Inquiry, Target};
use crate::ir::value::Value;
use crate::test_utils::{env, field};

#[test]
fn join_degree() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let t3 = env.add_table("t3", None).unwrap();

    let inner = env.add_join(JoinKind::Inner, vec![t1, t2, t3], None).unwrap();
    assert_eq!(env.degree(inner).unwrap(), 9);

    let t4 = env.add_table("t2", None).unwrap();
    let t5 = env.add_table("t3", None).unwrap();
    let exists = env.add_join(JoinKind::Exists, vec![t4, t5], None).unwrap();
    assert_eq!(env.degree(exists).unwrap(), 3);
    assert_eq!(env.row_info(exists).unwrap(), env.row_info(t4).unwrap());
}

#[test]
fn join_operand_count() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let t3 = env.add_table("t3", None).unwrap();
    let err = env
        .add_join(JoinKind::LeftOuter, vec![t1, t2, t3], None)
        .unwrap_err();
    assert_eq!(err.category(), "Unexpected");

    let err = env.add_join(JoinKind::FullOuter, vec![t1, t2], None).unwrap_err();
    assert_eq!(
        err,
        PlanError::NotSupported(Entity::Join, Some("full outer join".into()))
    );
}

#[test]
fn output_names() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    assert_eq!(
        env.row_names(t1).unwrap(),
        vec![SmolStr::from("a"), "b".into(), "c".into()]
    );

    let a = field(&env, t1, 0);
    let one = env.add_constant(Value::Integer(1));
    let projection = env
        .add_projection(t1, vec![a, one], vec!["x".into(), "y".into()])
        .unwrap();
    let sort = env.add_sort(projection, vec![]);
    assert_eq!(
        env.row_names(sort).unwrap(),
        vec![SmolStr::from("x"), "y".into()]
    );

    let two = env.add_constant(Value::Integer(2));
    let values = env.add_value_list(vec![vec![one, two]]).unwrap();
    assert_eq!(
        env.row_names(values).unwrap(),
        vec![SmolStr::from("column_1"), "column_2".into()]
    );

    let err = env
        .add_projection(t1, vec![a], vec!["x".into(), "y".into()])
        .unwrap_err();
    assert_eq!(err.category(), "Unexpected");
}

#[test]
fn derived_renames_columns() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let derived = env
        .add_derived(
            t1,
            "d".into(),
            Some(vec!["x".into(), "y".into(), "z".into()]),
        )
        .unwrap();
    assert_eq!(
        env.row_names(derived).unwrap(),
        vec![SmolStr::from("x"), "y".into(), "z".into()]
    );
    assert_eq!(env.scalar_type(field(&env, derived, 1)).unwrap(), DataType::String);

    let err = env
        .add_derived(t1, "e".into(), Some(vec!["x".into()]))
        .unwrap_err();
    assert_eq!(err.category(), "InvalidRowValue");
}

#[test]
fn union_checks_degree() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let union = env.add_union(vec![t1, t2], true).unwrap();
    assert_eq!(env.degree(union).unwrap(), 3);
    assert_eq!(env.row_names(union).unwrap()[0], "a");

    let a = field(&env, t2, 0);
    let projection = env.add_projection(t2, vec![a], vec!["a".into()]).unwrap();
    let t3 = env.add_table("t3", None).unwrap();
    let err = env.add_union(vec![t3, projection], false).unwrap_err();
    assert_eq!(
        err,
        PlanError::InvalidRowValue("union operands have 3 and 1 columns".into())
    );
}

#[test]
fn value_list_rows() {
    let mut env = env(false);
    let err = env.add_value_list(vec![]).unwrap_err();
    assert_eq!(err.category(), "InvalidRowValue");

    let one = env.add_constant(Value::Integer(1));
    let two = env.add_constant(Value::Integer(2));
    let err = env.add_value_list(vec![vec![one, two], vec![one]]).unwrap_err();
    assert_eq!(
        err,
        PlanError::InvalidRowValue("VALUES rows have 2 and 1 columns".into())
    );

    let null = env.add_constant(Value::Null);
    let values = env.add_value_list(vec![vec![null], vec![one]]).unwrap();
    assert_eq!(
        env.scalar_type(field(&env, values, 0)).unwrap(),
        DataType::Integer
    );
}

#[test]
fn limit_over_correlated_operand_depends() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let outer_a = field(&env, t1, 0);
    let inner_a = field(&env, t2, 0);
    let cmp = env.add_comparison(CompareOp::Eq, inner_a, outer_a).unwrap();
    let filter = env.add_filter(t2, cmp);
    let one = env.add_constant(Value::Integer(1));
    let limit = env.add_limit(filter, one, None).unwrap();

    let res = env.inquiry(limit, &Inquiry::references(t1)).unwrap();
    assert_eq!(res, Target::DEPENDING | Target::REFERING);

    // Uncorrelated limit.
    let t3 = env.add_table("t3", None).unwrap();
    let limit = env.add_limit(t3, one, None).unwrap();
    assert!(env.inquiry(limit, &Inquiry::references(t1)).unwrap().is_empty());
}

#[test]
fn limit_must_be_integer() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let text = env.add_constant(Value::from("ten"));
    let err = env.add_limit(t1, text, None).unwrap_err();
    assert_eq!(err.category(), "NotSupported");

    let param = env.add_parameter(0);
    assert!(env.add_limit(t1, param, None).is_ok());
}

#[test]
fn insert_targets() {
    let mut env = env(false);
    let schema = env.metadata().table("t1").unwrap();
    let one = env.add_constant(Value::Integer(1));
    let text = env.add_constant(Value::from("x"));

    let values = env.add_value_list(vec![vec![one, text]]).unwrap();
    let insert = env.add_insert(schema.clone(), vec![0, 1], values).unwrap();
    assert_eq!(env.degree(insert).unwrap(), 0);

    let values = env.add_value_list(vec![vec![text]]).unwrap();
    let err = env.add_insert(schema.clone(), vec![1], values).unwrap_err();
    assert_eq!(err.category(), "NotFound");

    let values = env.add_value_list(vec![vec![one]]).unwrap();
    let err = env.add_insert(schema, vec![0, 1], values).unwrap_err();
    assert_eq!(
        err,
        PlanError::InvalidRowValue("t1 has 2 target columns, source has 1".into())
    );
}

#[test]
fn update_checks_positions() {
    let mut env = env(false);
    let schema = env.metadata().table("t1").unwrap();
    let t1 = env.add_table("t1", None).unwrap();
    let one = env.add_constant(Value::Integer(1));
    let err = env
        .add_update(
            schema,
            t1,
            vec![Assignment {
                position: 7,
                value: one,
            }],
        )
        .unwrap_err();
    assert_eq!(err, PlanError::ColumnNotFound("t1 column 7".into()));
}
