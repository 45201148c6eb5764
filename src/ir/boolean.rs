//! Four-valued predicate logic.
//!
//! `NeverTrue` is the value of a predicate that is statically known not to
//! hold. It absorbs everything under AND and behaves like `False` under OR.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Serialize, Deserialize, PartialEq, Debug, Eq, Hash, Clone, Copy)]
pub enum Boolean {
    False,
    True,
    Unknown,
    NeverTrue,
}

impl Boolean {
    pub const ALL: [Boolean; 4] = [
        Boolean::False,
        Boolean::True,
        Boolean::Unknown,
        Boolean::NeverTrue,
    ];

    fn index(self) -> usize {
        match self {
            Boolean::False => 0,
            Boolean::True => 1,
            Boolean::Unknown => 2,
            Boolean::NeverTrue => 3,
        }
    }
}

impl From<bool> for Boolean {
    fn from(b: bool) -> Self {
        if b {
            Boolean::True
        } else {
            Boolean::False
        }
    }
}

impl Display for Boolean {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Boolean::False => "false",
            Boolean::True => "true",
            Boolean::Unknown => "unknown",
            Boolean::NeverTrue => "never true",
        };
        write!(f, "{s}")
    }
}

use Boolean::{False as F, NeverTrue as N, True as T, Unknown as U};

// Rows and columns are indexed in `Boolean::ALL` order: F, T, U, N.
const AND_STANDARD: [[Boolean; 4]; 4] = [
    [F, F, F, N],
    [F, T, U, N],
    [F, U, U, N],
    [N, N, N, N],
];

const OR_STANDARD: [[Boolean; 4]; 4] = [
    [F, T, U, F],
    [T, T, T, T],
    [U, T, U, U],
    [F, T, U, N],
];

const NOT_STANDARD: [Boolean; 4] = [T, F, U, T];

const AND_NO_UNKNOWN: [[Boolean; 4]; 4] = [
    [F, F, F, N],
    [F, T, F, N],
    [F, F, F, N],
    [N, N, N, N],
];

const OR_NO_UNKNOWN: [[Boolean; 4]; 4] = [
    [F, T, F, F],
    [T, T, T, T],
    [F, T, F, F],
    [F, T, F, N],
];

const NOT_NO_UNKNOWN: [Boolean; 4] = [T, F, F, T];

/// Truth tables selected once from the configuration.
#[derive(Serialize, Deserialize, PartialEq, Debug, Eq, Clone, Copy, Default)]
pub struct BooleanAlgebra {
    no_unknown: bool,
}

impl BooleanAlgebra {
    #[must_use]
    pub fn new(no_unknown: bool) -> Self {
        Self { no_unknown }
    }

    #[must_use]
    pub fn and(&self, a: Boolean, b: Boolean) -> Boolean {
        let table = if self.no_unknown {
            &AND_NO_UNKNOWN
        } else {
            &AND_STANDARD
        };
        table[a.index()][b.index()]
    }

    #[must_use]
    pub fn or(&self, a: Boolean, b: Boolean) -> Boolean {
        let table = if self.no_unknown {
            &OR_NO_UNKNOWN
        } else {
            &OR_STANDARD
        };
        table[a.index()][b.index()]
    }

    #[must_use]
    pub fn not(&self, a: Boolean) -> Boolean {
        let table = if self.no_unknown {
            &NOT_NO_UNKNOWN
        } else {
            &NOT_STANDARD
        };
        table[a.index()]
    }

    /// Folds a list of values with `and`, starting from `True`.
    pub fn and_all(&self, values: impl IntoIterator<Item = Boolean>) -> Boolean {
        values.into_iter().fold(T, |acc, v| self.and(acc, v))
    }

    /// Folds a list of values with `or`, starting from `False`.
    pub fn or_all(&self, values: impl IntoIterator<Item = Boolean>) -> Boolean {
        values.into_iter().fold(F, |acc, v| self.or(acc, v))
    }
}

#[cfg(test)]
mod tests;
