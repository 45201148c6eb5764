//! Planner intermediate representation.
//!
//! Every node lives in the arena of an [`environment::Environment`] and is
//! addressed by a [`node::NodeId`].

pub mod aggregates;
pub mod boolean;
pub mod candidate;
pub mod cost;
pub mod distributed;
pub mod environment;
pub mod explain;
pub mod name_map;
pub mod node;
pub mod operator;
pub mod predicate;
pub mod relation;
pub mod scalar;
pub mod source;
pub mod status;
pub mod tree;
pub mod types;
pub mod value;
