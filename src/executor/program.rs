use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};

use crate::errors::{Entity, PlanError};
use crate::ir::aggregates::AggregateKind;
use crate::ir::boolean::Boolean;
use crate::ir::node::NodeId;
use crate::ir::operator::{Arithmetic, CompareOp, JoinKind};
use crate::ir::scalar::FunctionKind;
use crate::ir::types::DataType;
use crate::ir::value::Value;

/// Statement a remote instruction sends to the back-end servers.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RemoteOp {
    Retrieve,
    Insert { relocate: bool },
    Update { relocate: bool },
    Delete,
}

/// One step of a program. Operands are positions of earlier instructions.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Instruction {
    ////////////////////////////////////////////////////////////////////////
    // Values
    ////////////////////////////////////////////////////////////////////////
    /// Row variable filled by the iterator declaring it as its output.
    Row { degree: usize },
    Column { row: usize, position: usize },
    Constant { value: Value },
    Parameter { index: usize },
    Arithmetic { op: Arithmetic, left: usize, right: usize },
    Negative { operand: usize },
    Concat { left: usize, right: usize },
    Function { kind: FunctionKind, args: Vec<usize> },
    Cast { operand: usize, to: DataType },
    /// Accumulated by the grouping iterator listing it.
    Aggregate {
        kind: AggregateKind,
        operand: Option<usize>,
        distinct: bool,
    },
    AnyElement { operand: usize },
    /// Single value of the subquery iterator.
    Subquery { iterator: usize },

    ////////////////////////////////////////////////////////////////////////
    // Checks
    ////////////////////////////////////////////////////////////////////////
    Compare { op: CompareOp, left: usize, right: usize },
    IsNull { operand: usize, negated: bool },
    And { operands: Vec<usize> },
    Or { operands: Vec<usize> },
    Not { operand: usize },
    In {
        operand: usize,
        values: Vec<usize>,
        negated: bool,
    },
    InSubquery {
        operand: usize,
        iterator: usize,
        negated: bool,
    },
    Between {
        operand: usize,
        low: usize,
        high: usize,
        negated: bool,
    },
    Like {
        operand: usize,
        pattern: usize,
        escape: Option<usize>,
        negated: bool,
    },
    Exists { iterator: usize, negated: bool },
    Fixed { value: Boolean },

    ////////////////////////////////////////////////////////////////////////
    // Iterators
    ////////////////////////////////////////////////////////////////////////
    Scan {
        table: SmolStr,
        lookup: bool,
        output: usize,
        predicate: Option<usize>,
    },
    Filter { input: usize, predicate: usize },
    Project { input: usize, columns: Vec<usize> },
    Rename {
        input: usize,
        values: Vec<usize>,
        output: usize,
    },
    NestedLoop {
        kind: JoinKind,
        outer: usize,
        inner: usize,
        predicate: Option<usize>,
    },
    ExistsLoop {
        outer: usize,
        inner: usize,
        negated: bool,
    },
    /// `limit` keeps only the first rows of the order.
    Sort {
        input: usize,
        keys: Vec<(usize, bool)>,
        limit: Option<u64>,
    },
    Limit {
        input: usize,
        limit: usize,
        offset: Option<usize>,
    },
    Distinct { input: usize },
    Group {
        input: usize,
        keys: Vec<usize>,
        aggregates: Vec<usize>,
    },
    Union {
        inputs: Vec<usize>,
        all: bool,
        output: usize,
    },
    Values { rows: Vec<Vec<usize>>, output: usize },
    BulkInput { path: SmolStr, output: usize },
    BulkOutput { input: usize, path: SmolStr },
    Insert {
        table: SmolStr,
        columns: Vec<usize>,
        input: usize,
    },
    Update {
        table: SmolStr,
        /// Column position and the instruction computing its new value.
        assignments: Vec<(usize, usize)>,
        input: usize,
    },
    Delete { table: SmolStr, input: usize },
    Remote {
        op: RemoteOp,
        replicated: bool,
        sql: SmolStr,
        servers: Vec<SmolStr>,
        input: Option<usize>,
        output: Option<usize>,
    },
}

impl Instruction {
    #[must_use]
    pub fn is_iterator(&self) -> bool {
        matches!(
            self,
            Instruction::Scan { .. }
                | Instruction::Filter { .. }
                | Instruction::Project { .. }
                | Instruction::Rename { .. }
                | Instruction::NestedLoop { .. }
                | Instruction::ExistsLoop { .. }
                | Instruction::Sort { .. }
                | Instruction::Limit { .. }
                | Instruction::Distinct { .. }
                | Instruction::Group { .. }
                | Instruction::Union { .. }
                | Instruction::Values { .. }
                | Instruction::BulkInput { .. }
                | Instruction::BulkOutput { .. }
                | Instruction::Insert { .. }
                | Instruction::Update { .. }
                | Instruction::Delete { .. }
                | Instruction::Remote { .. }
        )
    }
}

/// Append-only instruction list with the top iterator.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Program {
    instructions: Vec<Instruction>,
    /// Plan node to the instruction computing it. Only needed while the
    /// program is generated.
    #[serde(skip)]
    memo: AHashMap<NodeId, usize>,
    root: Option<usize>,
}

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.instructions == other.instructions && self.root == other.root
    }
}

impl Program {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction and returns its position.
    pub fn push(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Instruction> {
        self.instructions.get(id)
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    #[must_use]
    pub fn memoized(&self, node: NodeId) -> Option<usize> {
        self.memo.get(&node).copied()
    }

    pub fn memoize(&mut self, node: NodeId, instruction: usize) {
        self.memo.insert(node, instruction);
    }

    #[must_use]
    pub fn root(&self) -> Option<usize> {
        self.root
    }

    /// # Errors
    /// - the root is not an iterator of this program
    pub fn set_root(&mut self, root: usize) -> Result<(), PlanError> {
        match self.get(root) {
            Some(instruction) if instruction.is_iterator() => {
                self.root = Some(root);
                Ok(())
            }
            _ => Err(PlanError::Unexpected(
                Entity::Program,
                Some(format_smolstr!("instruction {root} is not an iterator")),
            )),
        }
    }

    /// Encodes the program as `MessagePack` for the execution engine.
    ///
    /// # Errors
    /// - serialization failed
    pub fn encode(&self) -> Result<Vec<u8>, PlanError> {
        rmp_serde::to_vec_named(self).map_err(|e| {
            PlanError::Unexpected(Entity::Program, Some(format_smolstr!("encode: {e}")))
        })
    }

    /// # Errors
    /// - the bytes are not an encoded program
    pub fn decode(bytes: &[u8]) -> Result<Self, PlanError> {
        rmp_serde::from_slice(bytes).map_err(|e| {
            PlanError::Unexpected(Entity::Program, Some(format_smolstr!("decode: {e}")))
        })
    }
}
