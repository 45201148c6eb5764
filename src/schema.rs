//! Catalog collaborator: what the planner needs to know about tables.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};

use crate::errors::{Entity, PlanError};
use crate::ir::types::DataType;

/// Row count assumed for a table without statistics.
pub const DEFAULT_ROW_COUNT: u64 = 1000;

////////////////////////////////////////////////////////////////////////////////
// Distribution
////////////////////////////////////////////////////////////////////////////////

/// How the rows of a table are placed across cascaded back-end servers.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "kind")]
pub enum Distribution {
    /// The table lives on the local server only.
    #[default]
    Local,
    /// Rows are partitioned by the hash of the key columns.
    Distribute { key: Vec<usize> },
    /// Every back-end keeps a full copy.
    Replicate,
}

////////////////////////////////////////////////////////////////////////////////
// Table
////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Column {
    pub name: SmolStr,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    #[must_use]
    pub fn new(name: &str, data_type: DataType, nullable: bool) -> Self {
        Column {
            name: SmolStr::from(name),
            data_type,
            nullable,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Table {
    pub name: SmolStr,
    pub columns: Vec<Column>,
    /// Positions of the primary key columns.
    pub primary_key: Vec<usize>,
    #[serde(default)]
    pub distribution: Distribution,
    #[serde(default = "default_row_count")]
    pub row_count: u64,
}

fn default_row_count() -> u64 {
    DEFAULT_ROW_COUNT
}

impl Table {
    /// # Errors
    /// - duplicate column names
    /// - key positions out of range
    pub fn new(
        name: &str,
        columns: Vec<Column>,
        primary_key: &[&str],
        distribution: Distribution,
    ) -> Result<Self, PlanError> {
        for (pos, column) in columns.iter().enumerate() {
            if columns[..pos].iter().any(|c| c.name == column.name) {
                return Err(PlanError::DuplicateQualifiedName(format_smolstr!(
                    "{name}.{}",
                    column.name
                )));
            }
        }
        let mut table = Table {
            name: SmolStr::from(name),
            columns,
            primary_key: Vec::with_capacity(primary_key.len()),
            distribution,
            row_count: DEFAULT_ROW_COUNT,
        };
        for key in primary_key {
            let pos = table.position(key)?;
            table.primary_key.push(pos);
        }
        if let Distribution::Distribute { key } = &table.distribution {
            if key.is_empty() || key.iter().any(|pos| *pos >= table.columns.len()) {
                return Err(PlanError::NotFound(
                    Entity::Column,
                    format_smolstr!("distribution key of {name}"),
                ));
            }
        }
        Ok(table)
    }

    #[must_use]
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = row_count;
        self
    }

    /// # Errors
    /// - no column with this name
    pub fn position(&self, column: &str) -> Result<usize, PlanError> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| PlanError::ColumnNotFound(format_smolstr!("{}.{column}", self.name)))
    }

    /// Positions of the distribution key, empty unless the table is
    /// partitioned.
    #[must_use]
    pub fn distribution_key(&self) -> &[usize] {
        match &self.distribution {
            Distribution::Distribute { key } => key,
            Distribution::Local | Distribution::Replicate => &[],
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Metadata
////////////////////////////////////////////////////////////////////////////////

/// Schema lookup used during planning.
pub trait Metadata {
    /// # Errors
    /// - the table is not known
    fn table(&self, name: &str) -> Result<Table, PlanError>;
}

/// Catalog kept in memory. Used by embedders without a schema service and
/// by tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    tables: Vec<Table>,
    index: AHashMap<SmolStr, usize>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) {
        match self.index.get(&table.name) {
            Some(pos) => self.tables[*pos] = table,
            None => {
                self.index.insert(table.name.clone(), self.tables.len());
                self.tables.push(table);
            }
        }
    }

    /// Loads table definitions from a YAML list.
    ///
    /// # Errors
    /// - malformed YAML
    pub fn from_yaml(contents: &str) -> Result<Self, PlanError> {
        let tables: Vec<Table> = serde_yaml::from_str(contents)
            .map_err(|e| PlanError::InvalidConfiguration(format_smolstr!("{e}")))?;
        let mut catalog = MemoryCatalog::new();
        for table in tables {
            catalog.add_table(table);
        }
        Ok(catalog)
    }
}

impl Metadata for MemoryCatalog {
    fn table(&self, name: &str) -> Result<Table, PlanError> {
        self.index
            .get(name)
            .map(|pos| self.tables[*pos].clone())
            .ok_or_else(|| PlanError::NotFound(Entity::Table, SmolStr::from(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_lookup() {
        let mut catalog = MemoryCatalog::new();
        let table = Table::new(
            "t",
            vec![
                Column::new("a", DataType::Integer, false),
                Column::new("b", DataType::String, true),
            ],
            &["a"],
            Distribution::Distribute { key: vec![0] },
        )
        .unwrap();
        catalog.add_table(table.clone());
        assert_eq!(catalog.table("t").unwrap(), table);
        assert_eq!(table.distribution_key(), &[0]);
        assert_eq!(
            catalog.table("u").unwrap_err(),
            PlanError::NotFound(Entity::Table, "u".into())
        );
    }

    #[test]
    fn bad_definitions() {
        let dup = Table::new(
            "t",
            vec![
                Column::new("a", DataType::Integer, false),
                Column::new("a", DataType::Integer, false),
            ],
            &[],
            Distribution::Local,
        );
        assert!(dup.is_err());
        let no_pk = Table::new(
            "t",
            vec![Column::new("a", DataType::Integer, false)],
            &["b"],
            Distribution::Local,
        );
        assert_eq!(no_pk.unwrap_err().category(), "ColumnNotFound");
    }

    #[test]
    fn catalog_from_yaml() {
        let yaml = r#"
- name: t
  columns:
    - {name: a, data_type: Integer, nullable: false}
  primary_key: [0]
  distribution: {kind: replicate}
"#;
        let catalog = MemoryCatalog::from_yaml(yaml).unwrap();
        let table = catalog.table("t").unwrap();
        assert_eq!(table.distribution, Distribution::Replicate);
        assert_eq!(table.row_count, DEFAULT_ROW_COUNT);
    }
}
