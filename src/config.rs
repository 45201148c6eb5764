use crate::errors::PlanError;
use crate::tlog::LogLevel;
use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};
use std::collections::HashSet;

pub const DEFAULT_JOIN_MAX_CANDIDATES: usize = 64;

////////////////////////////////////////////////////////////////////////////////
// PlannerConfig
////////////////////////////////////////////////////////////////////////////////

/// Process-wide planner toggles. Read-only during a planning pass.
#[derive(PartialEq, Eq, Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    /// Collapse `Unknown` toward non-matching results in the boolean algebra.
    #[serde(default)]
    pub no_unknown: bool,

    #[serde(default)]
    pub cascade: CascadeConfig,

    /// Number of join orders explored before the written order is kept.
    #[serde(default = "default_join_max_candidates")]
    pub join_max_candidates: usize,

    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_join_max_candidates() -> usize {
    DEFAULT_JOIN_MAX_CANDIDATES
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            no_unknown: false,
            cascade: CascadeConfig::default(),
            join_max_candidates: DEFAULT_JOIN_MAX_CANDIDATES,
            log_level: LogLevel::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_yaml(contents: &str) -> Result<Self, PlanError> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| PlanError::InvalidConfiguration(format_smolstr!("{e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        let mut seen = HashSet::with_capacity(self.cascade.servers.len());
        for server in &self.cascade.servers {
            if !seen.insert(server) {
                return Err(PlanError::InvalidConfiguration(format_smolstr!(
                    "cascade server {server} is listed twice"
                )));
            }
        }
        if self.join_max_candidates == 0 {
            return Err(PlanError::InvalidConfiguration(
                "join_max_candidates must be positive".into(),
            ));
        }
        Ok(())
    }

    #[inline(always)]
    #[must_use]
    pub fn has_cascade(&self) -> bool {
        !self.cascade.servers.is_empty()
    }

    #[must_use]
    pub fn with_cascade<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.cascade.servers = servers.into_iter().map(Into::into).collect();
        self
    }
}

////////////////////////////////////////////////////////////////////////////////
// CascadeConfig
////////////////////////////////////////////////////////////////////////////////

/// Back-end servers of a cascaded deployment. Empty means a local session.
#[derive(PartialEq, Eq, Default, Debug, Clone, Deserialize, Serialize)]
pub struct CascadeConfig {
    #[serde(default)]
    pub servers: Vec<SmolStr>,
}
