use pretty_assertions::assert_eq;

use crate::errors::{Entity, PlanError};
use crate::executor::program::{Instruction, RemoteOp};
use crate::ir::aggregates::AggregateKind;
use crate::ir::candidate::CandidateKind;
use crate::ir::cost::Cost;
use crate::ir::operator::{CompareOp, JoinKind};
use crate::ir::relation::{Assignment, SortKey};
use crate::ir::source::Source;
use crate::ir::value::Value;
use crate::test_utils::{env, field};

#[test]
fn scan_binds_its_row_before_the_predicate() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let a = field(&env, t1, 0);
    let one = env.add_constant(Value::Integer(1));
    let eq = env.add_comparison(CompareOp::Eq, a, one).unwrap();
    let filter = env.add_filter(t1, eq);
    let top = env.create_access_plan(filter, &Source::new()).unwrap();

    let program = env.generate(top).unwrap();
    assert_eq!(
        program.instructions(),
        &[
            Instruction::Row { degree: 3 },
            Instruction::Column { row: 0, position: 0 },
            Instruction::Column { row: 0, position: 1 },
            Instruction::Column { row: 0, position: 2 },
            Instruction::Constant {
                value: Value::Integer(1)
            },
            Instruction::Compare {
                op: CompareOp::Eq,
                left: 1,
                right: 4
            },
            Instruction::Scan {
                table: "t1".into(),
                lookup: true,
                output: 0,
                predicate: Some(5)
            },
        ]
    );
    assert_eq!(program.root(), Some(6));
}

#[test]
fn inner_side_sees_the_outer_row() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let outer_a = field(&env, t1, 0);
    let inner_a = field(&env, t2, 0);
    let eq = env.add_comparison(CompareOp::Eq, inner_a, outer_a).unwrap();
    let join = env.add_join(JoinKind::Exists, vec![t1, t2], Some(eq)).unwrap();
    let top = env.create_access_plan(join, &Source::new()).unwrap();

    let program = env.generate(top).unwrap();
    let instructions = program.instructions();
    assert_eq!(
        instructions[9],
        Instruction::Compare {
            op: CompareOp::Eq,
            left: 6,
            right: 1
        }
    );
    assert_eq!(
        instructions[10],
        Instruction::Scan {
            table: "t2".into(),
            lookup: true,
            output: 5,
            predicate: Some(9)
        }
    );
    assert_eq!(
        instructions[11],
        Instruction::ExistsLoop {
            outer: 4,
            inner: 10,
            negated: false
        }
    );
    assert_eq!(program.root(), Some(11));
}

#[test]
fn top_n_sort_and_limit() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let b = field(&env, t1, 1);
    let sort = env.add_sort(
        t1,
        vec![SortKey {
            scalar: b,
            descending: false,
        }],
    );
    let ten = env.add_constant(Value::Integer(10));
    let limit = env.add_limit(sort, ten, None).unwrap();
    let top = env.create_access_plan(limit, &Source::new()).unwrap();

    let program = env.generate(top).unwrap();
    assert_eq!(
        &program.instructions()[4..],
        &[
            Instruction::Scan {
                table: "t1".into(),
                lookup: false,
                output: 0,
                predicate: None
            },
            Instruction::Sort {
                input: 4,
                keys: vec![(2, false)],
                limit: Some(10)
            },
            Instruction::Constant {
                value: Value::Integer(10)
            },
            Instruction::Limit {
                input: 5,
                limit: 6,
                offset: None
            },
        ]
    );
}

#[test]
fn split_grouping_reads_partial_results() {
    let mut env = env(true);
    let orders = env.add_table("orders", None).unwrap();
    let note = field(&env, orders, 3);
    let count = env.add_aggregation(AggregateKind::Count, None, false).unwrap();
    let grouping = env.add_grouping(orders, vec![note], vec![count]);
    let projection = env
        .add_projection(grouping, vec![count, note], vec!["n".into(), "note".into()])
        .unwrap();
    let top = env.create_access_plan(projection, &Source::new()).unwrap();

    let program = env.generate(top).unwrap();
    let instructions = program.instructions();
    assert_eq!(instructions[0], Instruction::Row { degree: 2 });
    assert!(matches!(
        &instructions[3],
        Instruction::Remote {
            op: RemoteOp::Retrieve,
            replicated: false,
            input: None,
            output: Some(0),
            ..
        }
    ));
    assert_eq!(
        instructions[4],
        Instruction::Aggregate {
            kind: AggregateKind::Sum,
            operand: Some(2),
            distinct: false
        }
    );
    assert_eq!(
        instructions[5],
        Instruction::Group {
            input: 3,
            keys: vec![1],
            aggregates: vec![4]
        }
    );
    assert_eq!(
        instructions[6],
        Instruction::Project {
            input: 5,
            columns: vec![4, 1]
        }
    );
}

#[test]
fn update_evaluates_assignments_over_the_scan() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let schema = env.metadata().table("t1").unwrap();
    let five = env.add_constant(Value::Integer(5));
    let update = env
        .add_update(
            schema,
            t1,
            vec![Assignment {
                position: 2,
                value: five,
            }],
        )
        .unwrap();
    let top = env.create_access_plan(update, &Source::new()).unwrap();

    let program = env.generate(top).unwrap();
    assert_eq!(
        &program.instructions()[4..],
        &[
            Instruction::Scan {
                table: "t1".into(),
                lookup: false,
                output: 0,
                predicate: None
            },
            Instruction::Constant {
                value: Value::Integer(5)
            },
            Instruction::Update {
                table: "t1".into(),
                assignments: vec![(2, 5)],
                input: 4
            },
        ]
    );
}

#[test]
fn unbound_field_is_rejected() {
    let mut env = env(false);
    let t1 = env.add_table("t1", None).unwrap();
    let t2 = env.add_table("t2", None).unwrap();
    let scan = env.create_access_plan(t1, &Source::new()).unwrap();
    let foreign = field(&env, t2, 0);
    let projection = env.add_candidate(
        t1,
        Cost::scan(1.0),
        CandidateKind::Projection {
            operand: scan,
            columns: vec![foreign],
        },
    );

    let err = env.generate(projection).unwrap_err();
    assert!(matches!(err, PlanError::Unexpected(Entity::Program, _)));
}
