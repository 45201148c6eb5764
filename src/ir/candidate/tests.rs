use pretty_assertions::assert_eq;

use super::*;
use crate::errors::{Entity, PlanError};
use crate::ir::node::NodeType;
use crate::ir::operator::JoinKind;
use crate::ir::source::Source;
use crate::test_utils::env;

fn scans(env: &mut Environment) -> (NodeId, NodeId, NodeId) {
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let join = env.add_join(JoinKind::Inner, vec![t1, t2], None).unwrap();
    let outer = env.create_access_plan(t1, &Source::new()).unwrap();
    let inner = env.create_access_plan(t2, &Source::new()).unwrap();
    (join, outer, inner)
}

#[test]
fn merge_and_hash_joins_have_no_implementation() {
    let mut env = env(false);
    let (join, outer, inner) = scans(&mut env);
    for algorithm in [JoinAlgorithm::Merge, JoinAlgorithm::Hash] {
        let err = env
            .create_join_candidate(join, algorithm, JoinKind::Inner, outer, inner, None)
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::NotSupported(
                Entity::JoinAlgorithm,
                Some(format_smolstr!("{} join", algorithm.as_str()))
            )
        );
    }
}

#[test]
fn algorithm_must_fit_join_kind() {
    let mut env = env(false);
    let (join, outer, inner) = scans(&mut env);
    let err = env
        .create_join_candidate(join, JoinAlgorithm::Exists, JoinKind::Inner, outer, inner, None)
        .unwrap_err();
    assert_eq!(err.category(), "Unexpected");
    let err = env
        .create_join_candidate(
            join,
            JoinAlgorithm::NestedLoop,
            JoinKind::NotExists,
            outer,
            inner,
            None,
        )
        .unwrap_err();
    assert_eq!(err.category(), "Unexpected");
}

#[test]
fn nested_loop_cost() {
    let mut env = env(false);
    let (join, outer, inner) = scans(&mut env);
    let candidate = env
        .create_join_candidate(join, JoinAlgorithm::NestedLoop, JoinKind::Inner, outer, inner, None)
        .unwrap();
    let cost = env.candidate_cost(candidate).unwrap();
    assert_eq!(cost.tuple_count, 100_000.0);
    assert_eq!(cost.total, 1000.0 + 1000.0 * 100.0);

    let node = env.get_candidate(candidate).unwrap();
    assert_eq!(node.node_type(), NodeType::NestedLoopJoin);
    assert_eq!(node.name(), "nested loop join (inner)");
    assert_eq!(node.children(), vec![outer, inner]);
}

#[test]
fn sort_names() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let sort = env.add_sort(t1, vec![]);
    let scan = env.create_access_plan(t1, &Source::new()).unwrap();
    let partial = env
        .create_sort_candidate(sort, scan, vec![], SortKind::Partial { limit: 5 })
        .unwrap();
    let candidate = env.get_candidate(partial).unwrap();
    assert_eq!(candidate.node_type(), NodeType::PartialSort);
    assert_eq!(candidate.name(), "partial sort (top 5)");

    let scan = env.create_access_plan(t1, &Source::new()).unwrap();
    let full = env
        .create_sort_candidate(sort, scan, vec![], SortKind::Normal)
        .unwrap();
    assert_eq!(env.get_candidate(full).unwrap().node_type(), NodeType::FullSort);
    assert!(env.candidate_cost(partial).unwrap().is_cheaper_than(&env.candidate_cost(full).unwrap()));
}

#[test]
fn erase_rejected_tree() {
    let mut env = env(false);
    let (join, outer, inner) = scans(&mut env);
    let candidate = env
        .create_join_candidate(join, JoinAlgorithm::NestedLoop, JoinKind::Inner, outer, inner, None)
        .unwrap();
    env.erase_candidate(candidate).unwrap();
    for id in [candidate, outer, inner] {
        assert_eq!(
            env.get_candidate(id).unwrap_err(),
            PlanError::NotFound(Entity::Node, format_smolstr!("{id}"))
        );
    }
    // Relations are kept.
    assert!(env.get_relation(join).is_ok());

    let err = env.get_candidate(join).unwrap_err();
    assert_eq!(err.category(), "Unexpected");
}
