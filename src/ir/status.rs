use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Analysis context flags kept on the environment status stack.
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
    pub struct Status: u32 {
        /// Operands being resolved are known not to be `NULL`.
        const KNOWN_NOT_NULL = 1 << 0;
        /// Operands being resolved are known to be `NULL`.
        const KNOWN_NULL = 1 << 1;
        /// An array element placeholder may appear here.
        const ARBITRARY_ELEMENT_ALLOWED = 1 << 2;
        /// The predicate being analyzed is nested, not the top one.
        const NO_TOP_PREDICATE = 1 << 3;
        /// Inside the operand of a set function.
        const SET_FUNCTION = 1 << 4;
        /// Resolving grouping keys.
        const GROUP_BY = 1 << 5;
        /// Replace the current set instead of extending it.
        const RESET = 1 << 31;
    }
}
