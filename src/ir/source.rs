//! Context handed down while access plans are built.

use crate::errors::PlanError;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::operator::Logical;
use crate::ir::relation::SortKey;
use crate::ir::scalar::Scalar;
use crate::ir::value::Value;

/// Row limit requested by an enclosing `LIMIT`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LimitSpec {
    /// `None` when the limit is only known at execution time.
    pub count: Option<u64>,
    pub offset: u64,
}

impl LimitSpec {
    /// Rows a top-N sort has to keep to serve the limit.
    #[must_use]
    pub fn keep(&self) -> Option<u64> {
        self.count.map(|count| count.saturating_add(self.offset))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Source {
    /// Predicate pushed down to the table scan.
    pub predicate: Option<NodeId>,
    /// Order required by the consumer.
    pub order: Vec<SortKey>,
    pub limit: Option<LimitSpec>,
    /// Candidates of the outer operands already planned.
    pub preceding: Vec<NodeId>,
    /// The relation is the inner side of an `EXISTS` check.
    pub exists: bool,
}

impl Source {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: Option<NodeId>) -> Self {
        self.predicate = predicate;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: LimitSpec) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_exists(mut self, exists: bool) -> Self {
        self.exists = exists;
        self
    }

    /// Source for an operand: order, limit and the pushed predicate stay
    /// with the current node.
    #[must_use]
    pub fn for_operand(&self) -> Self {
        Source {
            predicate: None,
            order: Vec::new(),
            limit: None,
            preceding: self.preceding.clone(),
            exists: self.exists,
        }
    }

    /// Source for an operand producing the same rows: the limit still
    /// applies to it.
    #[must_use]
    pub fn passing_limit(&self) -> Self {
        Source {
            limit: self.limit,
            ..self.for_operand()
        }
    }

    /// Source for the inner operand of a nested loop.
    #[must_use]
    pub fn for_inner(&self, outer: NodeId, predicate: Option<NodeId>) -> Self {
        let mut preceding = self.preceding.clone();
        preceding.push(outer);
        Source {
            predicate,
            order: Vec::new(),
            limit: None,
            preceding,
            exists: false,
        }
    }

    /// Adds a conjunct to the pushed predicate.
    ///
    /// # Errors
    /// - predicate nodes are not found
    pub fn add_predicate(&mut self, env: &mut Environment, predicate: NodeId) -> Result<(), PlanError> {
        self.predicate = Some(match self.predicate {
            Some(current) => env.add_combinator(Logical::And, vec![current, predicate])?,
            None => predicate,
        });
        Ok(())
    }

    /// Takes the pushed predicate out of the source.
    pub fn take_predicate(&mut self) -> Option<NodeId> {
        self.predicate.take()
    }
}

impl Environment {
    /// Row limit of a `LIMIT`/`OFFSET` pair. Parameters leave the count
    /// unknown.
    ///
    /// # Errors
    /// - a negative constant
    pub fn limit_spec(&self, limit: NodeId, offset: Option<NodeId>) -> Result<LimitSpec, PlanError> {
        let count = self.constant_count(limit)?;
        let offset = match offset {
            Some(offset) => self.constant_count(offset)?.unwrap_or(0),
            None => 0,
        };
        Ok(LimitSpec { count, offset })
    }

    fn constant_count(&self, scalar: NodeId) -> Result<Option<u64>, PlanError> {
        match self.get_scalar(scalar)? {
            Scalar::Constant(constant) => match &constant.value {
                Value::Integer(i) => u64::try_from(*i).map(Some).map_err(|_| {
                    PlanError::InvalidRowValue(smol_str::format_smolstr!("negative limit {i}"))
                }),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }
}
