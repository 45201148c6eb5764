//! Statement input: SQL text, parse tree and its analysis.

pub mod analysis;
pub mod sql;
pub mod statement;
