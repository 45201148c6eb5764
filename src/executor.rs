//! Program emitted for the execution engine.
//!
//! The planner's job ends with a [`Program`]: an append-only list of
//! instructions referring to each other by position. The engine running it
//! lives outside this crate.

pub mod generate;
pub mod program;

pub use program::{Instruction, Program, RemoteOp};
