//! Cost estimation of access plan candidates.
//!
//! Costs are in abstract page-read units. They only need to be comparable
//! between candidates of one statement.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::errors::PlanError;
use crate::ir::boolean::Boolean;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::{CompareOp, Logical};
use crate::ir::predicate::{Comparison, InValues, Predicate};

/// Per-tuple transfer cost of a result fetched from a back-end server.
pub const REMOTE_TUPLE_COST: f64 = 0.1;
/// Fixed cost of one round trip to a back-end server.
pub const REMOTE_OVERHEAD: f64 = 10.0;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Cost {
    /// Cost paid once before the first tuple.
    pub overhead: f64,
    /// Cost of producing every tuple.
    pub total: f64,
    /// Expected number of tuples.
    pub tuple_count: f64,
    /// Fraction of input tuples passing the predicate of the candidate.
    pub rate: f64,
}

impl Cost {
    /// Full scan over `rows` tuples.
    #[must_use]
    pub fn scan(rows: f64) -> Self {
        Cost {
            overhead: 0.0,
            total: rows.max(1.0),
            tuple_count: rows,
            rate: 1.0,
        }
    }

    /// Primary key lookup in a table of `rows` tuples.
    #[must_use]
    pub fn index_lookup(rows: f64) -> Self {
        Cost {
            overhead: 0.0,
            total: rows.max(2.0).log2() + 1.0,
            tuple_count: 1.0,
            rate: 1.0 / rows.max(1.0),
        }
    }

    /// Applies a predicate of selectivity `rate` to the output.
    #[must_use]
    pub fn filtered(mut self, rate: f64) -> Self {
        self.rate *= rate;
        self.tuple_count *= rate;
        self
    }

    /// Inner operand evaluated once per outer tuple.
    #[must_use]
    pub fn nested_loop(outer: &Cost, inner: &Cost) -> Self {
        Cost {
            overhead: outer.overhead + inner.overhead,
            total: outer.total + outer.tuple_count.max(1.0) * inner.total,
            tuple_count: outer.tuple_count * inner.tuple_count,
            rate: outer.rate * inner.rate,
        }
    }

    /// Semi-join: every outer tuple stops at the first inner match.
    #[must_use]
    pub fn exists_loop(outer: &Cost, inner: &Cost, negated: bool) -> Self {
        let pass = if negated {
            1.0 - inner.rate.min(1.0)
        } else {
            inner.rate.min(1.0)
        };
        Cost {
            overhead: outer.overhead + inner.overhead,
            total: outer.total + outer.tuple_count.max(1.0) * inner.total,
            tuple_count: outer.tuple_count * pass,
            rate: outer.rate * pass,
        }
    }

    #[must_use]
    pub fn sort(input: &Cost) -> Self {
        let n = input.tuple_count.max(2.0);
        Cost {
            overhead: input.overhead + input.total + n * n.log2(),
            total: input.total + n * n.log2(),
            ..*input
        }
    }

    /// Top-k sort keeping `limit` tuples.
    #[must_use]
    pub fn partial_sort(input: &Cost, limit: f64) -> Self {
        let n = input.tuple_count.max(2.0);
        let k = limit.clamp(2.0, n);
        Cost {
            overhead: input.overhead + input.total + n * k.log2(),
            total: input.total + n * k.log2(),
            tuple_count: input.tuple_count.min(limit),
            rate: input.rate,
        }
    }

    #[must_use]
    pub fn limit(input: &Cost, count: Option<f64>) -> Self {
        let Some(count) = count else {
            return *input;
        };
        let tuple_count = input.tuple_count.min(count);
        // Only the consumed fraction of the input is paid for.
        let fraction = if input.tuple_count > 0.0 {
            (tuple_count / input.tuple_count).min(1.0)
        } else {
            1.0
        };
        Cost {
            overhead: input.overhead,
            total: input.overhead + (input.total - input.overhead) * fraction,
            tuple_count,
            rate: input.rate,
        }
    }

    /// Hash based grouping. Without keys the result is a single tuple.
    #[must_use]
    pub fn grouping(input: &Cost, grouped: bool) -> Self {
        let tuple_count = if grouped {
            (input.tuple_count / 10.0).max(1.0)
        } else {
            1.0
        };
        Cost {
            overhead: input.overhead + input.total,
            total: input.total + input.tuple_count,
            tuple_count,
            rate: input.rate,
        }
    }

    #[must_use]
    pub fn distinct(input: &Cost) -> Self {
        Cost {
            overhead: input.overhead + input.total,
            total: input.total + input.tuple_count,
            tuple_count: (input.tuple_count / 2.0).max(1.0),
            rate: input.rate,
        }
    }

    #[must_use]
    pub fn union<'c>(operands: impl IntoIterator<Item = &'c Cost>) -> Self {
        operands.into_iter().fold(Cost::default(), |acc, cost| Cost {
            overhead: acc.overhead + cost.overhead,
            total: acc.total + cost.total,
            tuple_count: acc.tuple_count + cost.tuple_count,
            rate: 1.0,
        })
    }

    /// Result produced by `servers` back-ends and shipped to the planner.
    #[must_use]
    pub fn remote(local: &Cost, servers: usize) -> Self {
        let servers = servers.max(1) as f64;
        let tuple_count = local.tuple_count * servers;
        Cost {
            overhead: REMOTE_OVERHEAD,
            total: REMOTE_OVERHEAD + local.total + tuple_count * REMOTE_TUPLE_COST,
            tuple_count,
            rate: local.rate,
        }
    }

    /// Per-row evaluation of expressions over the input.
    #[must_use]
    pub fn computed(input: &Cost) -> Self {
        Cost {
            total: input.total + input.tuple_count * 0.01,
            ..*input
        }
    }

    /// Orders candidates by total cost, then by result size.
    #[must_use]
    pub fn compare(&self, other: &Cost) -> Ordering {
        self.total
            .total_cmp(&other.total)
            .then_with(|| self.tuple_count.total_cmp(&other.tuple_count))
    }

    #[must_use]
    pub fn is_cheaper_than(&self, other: &Cost) -> bool {
        self.compare(other) == Ordering::Less
    }
}

impl Environment {
    /// Estimated fraction of tuples satisfying the predicate.
    ///
    /// # Errors
    /// - a node of the predicate is not found
    pub fn selectivity(&self, predicate: NodeId) -> Result<f64, PlanError> {
        let rate = match self.get_predicate(predicate)? {
            Predicate::Comparison(Comparison { op, .. }) => match op {
                CompareOp::Eq => 0.1,
                CompareOp::NotEq => 0.9,
                _ => 0.33,
            },
            Predicate::NullCheck(check) => {
                if check.negated {
                    0.9
                } else {
                    0.1
                }
            }
            Predicate::Combinator(combinator) => {
                let mut rates = Vec::with_capacity(combinator.operands.len());
                for operand in &combinator.operands {
                    rates.push(self.selectivity(*operand)?);
                }
                match combinator.op {
                    Logical::And => rates.iter().product(),
                    Logical::Or => rates.iter().sum::<f64>().min(1.0),
                }
            }
            Predicate::Not(not) => 1.0 - self.selectivity(not.operand)?,
            Predicate::In(in_pred) => {
                let rate = match &in_pred.values {
                    InValues::List(values) => (values.len() as f64 * 0.1).min(1.0),
                    InValues::Relation(_) => 0.5,
                };
                if in_pred.negated {
                    1.0 - rate
                } else {
                    rate
                }
            }
            Predicate::Between(_) | Predicate::Like(_) => 0.25,
            Predicate::Exists(_) => 0.5,
            Predicate::Fixed(fixed) => match fixed.value {
                Boolean::True => 1.0,
                _ => 0.0,
            },
        };
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn index_lookup_beats_scan() {
        let scan = Cost::scan(1000.0).filtered(0.1);
        let lookup = Cost::index_lookup(1000.0);
        assert!(lookup.is_cheaper_than(&scan));
        assert_eq!(lookup.tuple_count, 1.0);
    }

    #[test]
    fn nested_loop_prefers_small_outer() {
        let small = Cost::scan(10.0);
        let large = Cost::scan(1000.0);
        let small_outer = Cost::nested_loop(&small, &large);
        let large_outer = Cost::nested_loop(&large, &small);
        assert_eq!(small_outer.tuple_count, large_outer.tuple_count);
        assert!(small_outer.total < large_outer.total);
    }

    #[test]
    fn limit_caps_count() {
        let scan = Cost::scan(1000.0);
        let limited = Cost::limit(&scan, Some(10.0));
        assert_eq!(limited.tuple_count, 10.0);
        assert!(limited.is_cheaper_than(&scan));
        assert_eq!(Cost::limit(&scan, None), scan);
        let partial = Cost::partial_sort(&scan, 10.0);
        assert!(partial.is_cheaper_than(&Cost::sort(&scan)));
    }
}
