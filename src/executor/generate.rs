//! Lowering of a candidate tree into a [`Program`].
//!
//! Iterators producing new rows declare a row variable first and bind the
//! scalars of their output to its columns, so the expressions of parents,
//! inner loops and correlated subqueries find them in the memo.

use ahash::AHashMap;
use smol_str::format_smolstr;

use crate::errors::{Entity, PlanError};
use crate::executor::program::{Instruction, Program, RemoteOp};
use crate::ir::candidate::{
    Candidate, CandidateKind, DistributeOp, DmlOp, JoinAlgorithm, ReplicateOp, SortKind,
};
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::{JoinKind, Logical};
use crate::ir::predicate::{InValues, Predicate};
use crate::ir::scalar::Scalar;
use crate::tlog;

#[cfg(test)]
mod tests;

impl Environment {
    /// Emits the program running the candidate tree rooted at `top`.
    ///
    /// # Errors
    /// - an expression refers to a row no iterator produces
    pub fn generate(&self, top: NodeId) -> Result<Program, PlanError> {
        let mut generator = Generator {
            env: self,
            program: Program::new(),
            subqueries: AHashMap::new(),
        };
        let root = generator.candidate(top)?;
        let mut program = generator.program;
        program.set_root(root)?;
        tlog!(Debug, "candidate {top} compiled into {} instructions", program.len());
        Ok(program)
    }
}

struct Generator<'e> {
    env: &'e Environment,
    program: Program,
    /// Subquery relation to the iterator computing it.
    subqueries: AHashMap<NodeId, usize>,
}

impl<'e> Generator<'e> {
    fn bind_row(&mut self, columns: &[NodeId]) -> usize {
        let row = self.program.push(Instruction::Row {
            degree: columns.len(),
        });
        for (position, scalar) in columns.iter().enumerate() {
            let column = self.program.push(Instruction::Column { row, position });
            self.program.memoize(*scalar, column);
        }
        row
    }

    fn subplans(&mut self, candidate: &Candidate) -> Result<(), PlanError> {
        for plan in &candidate.subplans {
            let iterator = self.candidate(plan.candidate)?;
            self.subqueries.insert(plan.relation, iterator);
        }
        Ok(())
    }

    fn subquery(&self, relation: NodeId) -> Result<usize, PlanError> {
        self.subqueries.get(&relation).copied().ok_or_else(|| {
            PlanError::Unexpected(
                Entity::Program,
                Some(format_smolstr!("subquery {relation} has no plan")),
            )
        })
    }

    fn scalars(&mut self, ids: &[NodeId]) -> Result<Vec<usize>, PlanError> {
        ids.iter().map(|id| self.scalar(*id)).collect()
    }

    fn optional_scalar(&mut self, id: Option<NodeId>) -> Result<Option<usize>, PlanError> {
        id.map(|id| self.scalar(id)).transpose()
    }

    fn optional_predicate(&mut self, id: Option<NodeId>) -> Result<Option<usize>, PlanError> {
        id.map(|id| self.predicate(id)).transpose()
    }

    fn candidate(&mut self, id: NodeId) -> Result<usize, PlanError> {
        let env = self.env;
        let candidate = env.get_candidate(id)?;
        let instruction = match &candidate.kind {
            CandidateKind::Scan {
                table,
                predicate,
                lookup,
            } => {
                let output = self.bind_row(&env.row_info(candidate.relation)?);
                self.subplans(candidate)?;
                Instruction::Scan {
                    table: table.clone(),
                    lookup: *lookup,
                    output,
                    predicate: self.optional_predicate(*predicate)?,
                }
            }
            CandidateKind::Filter { operand, predicate } => {
                let input = self.candidate(*operand)?;
                self.subplans(candidate)?;
                Instruction::Filter {
                    input,
                    predicate: self.predicate(*predicate)?,
                }
            }
            CandidateKind::Projection { operand, columns } => {
                let input = self.candidate(*operand)?;
                self.subplans(candidate)?;
                Instruction::Project {
                    input,
                    columns: self.scalars(columns)?,
                }
            }
            CandidateKind::Rename { operand } => {
                let input = self.candidate(*operand)?;
                let operand_relation = env.get_candidate(*operand)?.relation;
                let values = self.scalars(&env.row_info(operand_relation)?)?;
                let output = self.bind_row(&env.row_info(candidate.relation)?);
                Instruction::Rename {
                    input,
                    values,
                    output,
                }
            }
            CandidateKind::Join {
                algorithm,
                kind,
                outer,
                inner,
                predicate,
            } => {
                let outer = self.candidate(*outer)?;
                let inner = self.candidate(*inner)?;
                self.subplans(candidate)?;
                match algorithm {
                    JoinAlgorithm::Exists => Instruction::ExistsLoop {
                        outer,
                        inner,
                        negated: *kind == JoinKind::NotExists,
                    },
                    JoinAlgorithm::NestedLoop => Instruction::NestedLoop {
                        kind: *kind,
                        outer,
                        inner,
                        predicate: self.optional_predicate(*predicate)?,
                    },
                    JoinAlgorithm::Merge | JoinAlgorithm::Hash => {
                        return Err(PlanError::NotSupported(
                            Entity::JoinAlgorithm,
                            Some(format_smolstr!("{} join", algorithm.as_str())),
                        ))
                    }
                }
            }
            CandidateKind::Sort {
                operand,
                keys,
                kind,
            } => {
                let input = self.candidate(*operand)?;
                self.subplans(candidate)?;
                let mut sort_keys = Vec::with_capacity(keys.len());
                for key in keys {
                    sort_keys.push((self.scalar(key.scalar)?, key.descending));
                }
                Instruction::Sort {
                    input,
                    keys: sort_keys,
                    limit: match kind {
                        SortKind::Normal => None,
                        SortKind::Partial { limit } => Some(*limit),
                    },
                }
            }
            CandidateKind::Limit {
                operand,
                limit,
                offset,
            } => {
                let input = self.candidate(*operand)?;
                Instruction::Limit {
                    input,
                    limit: self.scalar(*limit)?,
                    offset: self.optional_scalar(*offset)?,
                }
            }
            CandidateKind::Distinct { operand } => Instruction::Distinct {
                input: self.candidate(*operand)?,
            },
            CandidateKind::Grouping {
                operand,
                keys,
                aggregates,
                replacements,
            } => {
                let input = self.candidate(*operand)?;
                self.subplans(candidate)?;
                let keys = self.scalars(keys)?;
                let aggregates = self.scalars(aggregates)?;
                let group = self.program.push(Instruction::Group {
                    input,
                    keys,
                    aggregates,
                });
                for replacement in replacements {
                    let value = self.scalar(replacement.value)?;
                    self.program.memoize(replacement.original, value);
                }
                return Ok(group);
            }
            CandidateKind::Union { operands, all } => {
                let inputs = operands
                    .iter()
                    .map(|operand| self.candidate(*operand))
                    .collect::<Result<Vec<_>, _>>()?;
                Instruction::Union {
                    inputs,
                    all: *all,
                    output: self.bind_row(&env.row_info(candidate.relation)?),
                }
            }
            CandidateKind::Values { rows } => {
                self.subplans(candidate)?;
                let mut values = Vec::with_capacity(rows.len());
                for row in rows {
                    values.push(self.scalars(row)?);
                }
                Instruction::Values {
                    rows: values,
                    output: self.bind_row(&env.row_info(candidate.relation)?),
                }
            }
            CandidateKind::BulkInput { path } => Instruction::BulkInput {
                path: path.clone(),
                output: self.bind_row(&env.row_info(candidate.relation)?),
            },
            CandidateKind::BulkOutput { operand, path } => Instruction::BulkOutput {
                input: self.candidate(*operand)?,
                path: path.clone(),
            },
            CandidateKind::Dml { table, op, operand } => {
                let input = self.candidate(*operand)?;
                self.subplans(candidate)?;
                match op {
                    DmlOp::Insert { columns } => Instruction::Insert {
                        table: table.clone(),
                        columns: columns.clone(),
                        input,
                    },
                    DmlOp::Update { assignments } => {
                        let mut values = Vec::with_capacity(assignments.len());
                        for assignment in assignments {
                            values.push((assignment.position, self.scalar(assignment.value)?));
                        }
                        Instruction::Update {
                            table: table.clone(),
                            assignments: values,
                            input,
                        }
                    }
                    DmlOp::Delete => Instruction::Delete {
                        table: table.clone(),
                        input,
                    },
                }
            }
            CandidateKind::Distribute {
                op,
                remote,
                operand,
            } => {
                let op = match op {
                    DistributeOp::Retrieve => RemoteOp::Retrieve,
                    DistributeOp::Insert { relocate } => RemoteOp::Insert {
                        relocate: *relocate,
                    },
                    DistributeOp::Update { relocate } => RemoteOp::Update {
                        relocate: *relocate,
                    },
                    DistributeOp::Delete => RemoteOp::Delete,
                };
                self.remote(op, false, remote, *operand)?
            }
            CandidateKind::Replicate {
                op,
                remote,
                operand,
            } => {
                let op = match op {
                    ReplicateOp::Retrieve => RemoteOp::Retrieve,
                    ReplicateOp::Insert => RemoteOp::Insert { relocate: false },
                };
                self.remote(op, true, remote, *operand)?
            }
        };
        Ok(self.program.push(instruction))
    }

    fn remote(
        &mut self,
        op: RemoteOp,
        replicated: bool,
        remote: &crate::ir::candidate::Remote,
        operand: Option<NodeId>,
    ) -> Result<Instruction, PlanError> {
        let input = operand.map(|operand| self.candidate(operand)).transpose()?;
        let output = if remote.columns.is_empty() {
            None
        } else {
            Some(self.bind_row(&remote.columns))
        };
        Ok(Instruction::Remote {
            op,
            replicated,
            sql: remote.sql.clone(),
            servers: remote.servers.clone(),
            input,
            output,
        })
    }

    fn scalar(&mut self, id: NodeId) -> Result<usize, PlanError> {
        if let Some(instruction) = self.program.memoized(id) {
            return Ok(instruction);
        }
        let env = self.env;
        let instruction = match env.get_scalar(id)? {
            Scalar::Field(field) => {
                return Err(PlanError::Unexpected(
                    Entity::Program,
                    Some(format_smolstr!(
                        "field {} of relation {} is not produced by any iterator",
                        field.name,
                        field.relation
                    )),
                ))
            }
            Scalar::RemoteColumn(column) => {
                return Err(PlanError::Unexpected(
                    Entity::Program,
                    Some(format_smolstr!("remote column {} is not retrieved", column.name)),
                ))
            }
            Scalar::Constant(constant) => Instruction::Constant {
                value: constant.value.clone(),
            },
            Scalar::Parameter(parameter) => Instruction::Parameter {
                index: parameter.index,
            },
            Scalar::Arithmetic(arithmetic) => Instruction::Arithmetic {
                op: arithmetic.op,
                left: self.scalar(arithmetic.left)?,
                right: self.scalar(arithmetic.right)?,
            },
            Scalar::Negative(negative) => Instruction::Negative {
                operand: self.scalar(negative.operand)?,
            },
            Scalar::Concat(concat) => Instruction::Concat {
                left: self.scalar(concat.left)?,
                right: self.scalar(concat.right)?,
            },
            Scalar::Aggregation(aggregation) => Instruction::Aggregate {
                kind: aggregation.kind,
                operand: self.optional_scalar(aggregation.operand)?,
                distinct: aggregation.distinct,
            },
            Scalar::Function(function) => Instruction::Function {
                kind: function.kind,
                args: self.scalars(&function.args)?,
            },
            Scalar::Cast(cast) => Instruction::Cast {
                operand: self.scalar(cast.operand)?,
                to: cast.to.clone(),
            },
            Scalar::AnyElement(element) => Instruction::AnyElement {
                operand: self.scalar(element.operand)?,
            },
            Scalar::SubQuery(subquery) => Instruction::Subquery {
                iterator: self.subquery(subquery.relation)?,
            },
        };
        let res = self.program.push(instruction);
        self.program.memoize(id, res);
        Ok(res)
    }

    fn predicate(&mut self, id: NodeId) -> Result<usize, PlanError> {
        if let Some(instruction) = self.program.memoized(id) {
            return Ok(instruction);
        }
        let env = self.env;
        let instruction = match env.get_predicate(id)? {
            Predicate::Comparison(comparison) => Instruction::Compare {
                op: comparison.op,
                left: self.scalar(comparison.left)?,
                right: self.scalar(comparison.right)?,
            },
            Predicate::NullCheck(check) => Instruction::IsNull {
                operand: self.scalar(check.operand)?,
                negated: check.negated,
            },
            Predicate::Combinator(combinator) => {
                let operands = combinator
                    .operands
                    .iter()
                    .map(|operand| self.predicate(*operand))
                    .collect::<Result<Vec<_>, _>>()?;
                match combinator.op {
                    Logical::And => Instruction::And { operands },
                    Logical::Or => Instruction::Or { operands },
                }
            }
            Predicate::Not(not) => Instruction::Not {
                operand: self.predicate(not.operand)?,
            },
            Predicate::In(in_pred) => {
                let operand = self.scalar(in_pred.operand)?;
                match &in_pred.values {
                    InValues::List(values) => Instruction::In {
                        operand,
                        values: self.scalars(values)?,
                        negated: in_pred.negated,
                    },
                    InValues::Relation(relation) => Instruction::InSubquery {
                        operand,
                        iterator: self.subquery(*relation)?,
                        negated: in_pred.negated,
                    },
                }
            }
            Predicate::Between(between) => Instruction::Between {
                operand: self.scalar(between.operand)?,
                low: self.scalar(between.low)?,
                high: self.scalar(between.high)?,
                negated: between.negated,
            },
            Predicate::Like(like) => Instruction::Like {
                operand: self.scalar(like.operand)?,
                pattern: self.scalar(like.pattern)?,
                escape: self.optional_scalar(like.escape)?,
                negated: like.negated,
            },
            Predicate::Exists(exists) => Instruction::Exists {
                iterator: self.subquery(exists.relation)?,
                negated: exists.negated,
            },
            Predicate::Fixed(fixed) => Instruction::Fixed { value: fixed.value },
        };
        let res = self.program.push(instruction);
        self.program.memoize(id, res);
        Ok(res)
    }
}
