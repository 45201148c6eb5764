use pretty_assertions::assert_eq;
use smol_str::SmolStr;

use super::*;
use crate::ir::candidate::{CandidateKind, JoinAlgorithm};
use crate::ir::relation::Assignment;
use crate::ir::value::Value;
use crate::test_utils::{env, field, CASCADE_SERVERS};

fn remote_of(env: &Environment, candidate: NodeId) -> (CandidateKind, Remote) {
    let kind = env.get_candidate(candidate).unwrap().kind.clone();
    let remote = match &kind {
        CandidateKind::Distribute { remote, .. } | CandidateKind::Replicate { remote, .. } => {
            remote.clone()
        }
        other => panic!("not a remote candidate: {other:?}"),
    };
    (kind, remote)
}

#[test]
fn unsupported_paths_fail() {
    let mut env = env(true);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();

    let err = env.add_join(JoinKind::FullOuter, vec![t1, t2], None).unwrap_err();
    assert!(err.is_not_supported());
    assert!(env.add_distinct(t1).unwrap_err().is_not_supported());
    let err = create_partial_sort(&mut env, t1, t1, vec![], 10).unwrap_err();
    assert_eq!(err, PlanError::NotSupported(
        Entity::Sort,
        Some(SmolStr::from(format!("partial sort (top 10) of {t1} on cascaded servers")))
    ));
}

#[test]
fn partitioned_table_is_read_from_every_server() {
    let mut env = env(true);
    let orders = env.add_table("orders", None).unwrap();
    let amount = field(&env, orders, 2);
    let hundred = env.add_constant(Value::from(100.0));
    let gt = env.add_comparison(CompareOp::Gt, amount, hundred).unwrap();
    let filter = env.add_filter(orders, gt);
    let candidate = env.create_access_plan(filter, &Source::new()).unwrap();

    let (kind, remote) = remote_of(&env, candidate);
    assert!(matches!(
        kind,
        CandidateKind::Distribute {
            op: DistributeOp::Retrieve,
            operand: None,
            ..
        }
    ));
    assert_eq!(remote.servers, CASCADE_SERVERS.map(SmolStr::from).to_vec());
    assert_eq!(
        remote.sql,
        r#"SELECT "orders"."id", "orders"."customer", "orders"."amount", "orders"."note" FROM "orders" WHERE "orders"."amount" > 100.0"#
    );
    assert_eq!(remote.columns, env.row_info(orders).unwrap());
}

#[test]
fn replicated_table_is_read_from_one_server() {
    let mut env = env(true);
    let regions = env.add_table("regions", None).unwrap();
    let candidate = env.create_access_plan(regions, &Source::new()).unwrap();
    let (kind, remote) = remote_of(&env, candidate);
    assert!(matches!(
        kind,
        CandidateKind::Replicate {
            op: ReplicateOp::Retrieve,
            ..
        }
    ));
    assert_eq!(remote.servers, vec![SmolStr::from("db1")]);
    assert_eq!(
        remote.sql,
        r#"SELECT "regions"."id", "regions"."name" FROM "regions""#
    );
}

#[test]
fn colocated_join_is_pushed_down() {
    let mut env = env(true);
    let orders = env.add_table("orders", None).unwrap();
    let customers = env.add_table("customers", None).unwrap();
    let customer = field(&env, orders, 1);
    let id = field(&env, customers, 0);
    let eq = env.add_comparison(CompareOp::Eq, customer, id).unwrap();
    let join = env
        .add_join(JoinKind::Inner, vec![orders, customers], Some(eq))
        .unwrap();
    assert_eq!(
        placement(&env, join).unwrap(),
        Some(Placement::Distributed {
            key: vec![customer]
        })
    );
    let candidate = env.create_access_plan(join, &Source::new()).unwrap();
    let (_, remote) = remote_of(&env, candidate);
    assert_eq!(
        remote.sql,
        r#"SELECT "orders"."id", "orders"."customer", "orders"."amount", "orders"."note", "customers"."id", "customers"."name", "customers"."region" FROM "orders", "customers" WHERE "orders"."customer" = "customers"."id""#
    );
}

#[test]
fn replicated_join_is_pushed_down() {
    let mut env = env(true);
    let t1 = env.add_table("t1", None).unwrap();
    let regions = env.add_table("regions", None).unwrap();
    let join = env.add_join(JoinKind::LeftOuter, vec![t1, regions], None).unwrap();
    assert_eq!(placement(&env, join).unwrap(), Some(Placement::Replicated));
}

#[test]
fn scattered_join_runs_centrally() {
    let mut env = env(true);
    let orders = env.add_table("orders", None).unwrap();
    let customers = env.add_table("customers", None).unwrap();
    let order_id = field(&env, orders, 0);
    let customer_id = field(&env, customers, 0);
    let eq = env.add_comparison(CompareOp::Eq, order_id, customer_id).unwrap();
    let join = env
        .add_join(JoinKind::Inner, vec![orders, customers], Some(eq))
        .unwrap();
    assert_eq!(placement(&env, join).unwrap(), None);

    let candidate = env.create_access_plan(join, &Source::new()).unwrap();
    let CandidateKind::Join {
        algorithm,
        outer,
        inner,
        ..
    } = env.get_candidate(candidate).unwrap().kind.clone()
    else {
        panic!("expected a join");
    };
    assert_eq!(algorithm, JoinAlgorithm::NestedLoop);
    assert!(matches!(
        env.get_candidate(outer).unwrap().kind,
        CandidateKind::Distribute { .. }
    ));
    // The condition refers to the outer row and is checked centrally.
    let CandidateKind::Filter { operand, predicate } = env.get_candidate(inner).unwrap().kind.clone()
    else {
        panic!("expected a filter over the inner retrieve");
    };
    assert_eq!(predicate, eq);
    let (_, remote) = remote_of(&env, operand);
    assert!(!remote.sql.contains("WHERE"));
}

#[test]
fn modifications_of_partitioned_tables() {
    let mut env = env(true);
    let schema = env.metadata().table("orders").unwrap();
    let scan = env.add_table("orders", None).unwrap();
    let id = field(&env, scan, 0);
    let one = env.add_constant(Value::Integer(1));
    let eq = env.add_comparison(CompareOp::Eq, id, one).unwrap();
    let rows = env.add_filter(scan, eq);
    let two = env.add_constant(Value::Integer(2));
    let update = env
        .add_update(
            schema.clone(),
            rows,
            vec![Assignment {
                position: 1,
                value: two,
            }],
        )
        .unwrap();
    let candidate = env.create_access_plan(update, &Source::new()).unwrap();
    let (kind, remote) = remote_of(&env, candidate);
    assert!(matches!(
        kind,
        CandidateKind::Distribute {
            op: DistributeOp::Update { relocate: true },
            ..
        }
    ));
    assert_eq!(
        remote.sql,
        r#"UPDATE "orders" SET "customer" = 2 WHERE "orders"."id" = 1"#
    );

    let scan = env.add_table("orders", None).unwrap();
    let delete = env.add_delete(schema, scan);
    let candidate = env.create_access_plan(delete, &Source::new()).unwrap();
    let (kind, remote) = remote_of(&env, candidate);
    assert!(matches!(
        kind,
        CandidateKind::Distribute {
            op: DistributeOp::Delete,
            ..
        }
    ));
    assert_eq!(remote.sql, r#"DELETE FROM "orders""#);
}

#[test]
fn replicated_tables_accept_inserts_only() {
    let mut env = env(true);
    let schema = env.metadata().table("regions").unwrap();
    let one = env.add_constant(Value::Integer(1));
    let name = env.add_constant(Value::from("north"));
    let values = env.add_value_list(vec![vec![one, name]]).unwrap();
    let insert = env.add_insert(schema.clone(), vec![0, 1], values).unwrap();
    let candidate = env.create_access_plan(insert, &Source::new()).unwrap();
    let (kind, remote) = remote_of(&env, candidate);
    assert!(matches!(
        kind,
        CandidateKind::Replicate {
            op: ReplicateOp::Insert,
            operand: Some(_),
            ..
        }
    ));
    assert_eq!(remote.servers.len(), 2);

    let scan = env.add_table("regions", None).unwrap();
    let delete = env.add_delete(schema.clone(), scan);
    let err = env.create_access_plan(delete, &Source::new()).unwrap_err();
    assert!(err.is_not_supported());

    let scan = env.add_table("regions", None).unwrap();
    let update = env.add_update(schema, scan, vec![]).unwrap();
    let err = env.create_access_plan(update, &Source::new()).unwrap_err();
    assert!(err.is_not_supported());
}

#[test]
fn sort_is_always_full() {
    let mut env = env(true);
    let orders = env.add_table("orders", None).unwrap();
    let id = field(&env, orders, 0);
    let sort = env.add_sort(
        orders,
        vec![SortKey {
            scalar: id,
            descending: false,
        }],
    );
    let ten = env.add_constant(Value::Integer(10));
    let limit = env.add_limit(sort, ten, None).unwrap();
    let candidate = env.create_access_plan(limit, &Source::new()).unwrap();
    let CandidateKind::Limit { operand, .. } = env.get_candidate(candidate).unwrap().kind.clone()
    else {
        panic!("expected a limit");
    };
    assert!(matches!(
        env.get_candidate(operand).unwrap().kind,
        CandidateKind::Sort {
            kind: SortKind::Normal,
            ..
        }
    ));
}
