//! Relational query planner.
//!
//! A statement goes through four stages:
//! 1. [`frontend`] turns SQL text or a parse tree into a relation tree,
//!    binding names through the scopes of an [`ir::environment::Environment`];
//! 2. every relation computes its access plan candidate, delegating to the
//!    distributed planner when the configuration lists cascaded servers;
//! 3. [`backend::sql`] regenerates SQL text for sub-plans shipped to those
//!    servers;
//! 4. [`executor`] lowers the chosen candidates into an instruction list.

use std::rc::Rc;

use crate::config::PlannerConfig;
use crate::errors::PlanError;
use crate::executor::Program;
use crate::frontend::statement::Statement;
use crate::ir::environment::Environment;
use crate::ir::node::NodeId;
use crate::ir::source::Source;
use crate::schema::Metadata;

pub mod backend;
pub mod config;
pub mod errors;
pub mod executor;
pub mod frontend;
pub mod ir;
pub mod schema;
pub mod tlog;

#[cfg(test)]
pub mod test_utils;

/// Entry point of the planner.
pub struct PreparedStatement;

impl PreparedStatement {
    /// Parses and compiles SQL text.
    ///
    /// # Errors
    /// - the text can't be parsed
    /// - see [`PreparedStatement::compile`]
    pub fn parse(
        metadata: Rc<dyn Metadata>,
        config: PlannerConfig,
        sql: &str,
    ) -> Result<CompiledStatement, PlanError> {
        let statement = frontend::sql::parse(sql)?;
        Self::compile(metadata, config, &statement)
    }

    /// Analyzes the statement, chooses its access plan and emits the
    /// program.
    ///
    /// # Errors
    /// - invalid configuration
    /// - the statement can't be planned
    pub fn compile(
        metadata: Rc<dyn Metadata>,
        config: PlannerConfig,
        statement: &Statement,
    ) -> Result<CompiledStatement, PlanError> {
        config.validate()?;
        tlog::set_log_level(config.log_level);
        tlog!(Debug, "compiling statement";
            "cascade" => config.has_cascade(), "no_unknown" => config.no_unknown);

        let mut environment = Environment::new(metadata, config);
        let relation = environment.analyze(statement)?;
        let candidate = environment.create_access_plan(relation, &Source::new())?;
        let program = environment.generate(candidate)?;

        tlog!(Debug, "statement compiled";
            "nodes" => environment.nodes().len(),
            "instructions" => program.len(),
            "parameters" => environment.parameter_count());
        Ok(CompiledStatement {
            environment,
            relation,
            candidate,
            program,
        })
    }
}

/// Result of planning one statement. The environment owns every node the
/// ids refer to.
#[derive(Debug)]
pub struct CompiledStatement {
    pub environment: Environment,
    pub relation: NodeId,
    pub candidate: NodeId,
    pub program: Program,
}

impl CompiledStatement {
    /// Chosen plan as indented text.
    ///
    /// # Errors
    /// - the plan refers to an erased node
    pub fn explain(&self) -> Result<String, PlanError> {
        self.environment.explain(self.candidate)
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.environment.parameter_count()
    }
}
