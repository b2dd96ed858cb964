// ============================================================================
// Relational schema model
// ============================================================================
//
// Tables derived from the mappings. The schema is built once by the persister
// builder and is immutable afterwards.
//
// ============================================================================

pub mod ddl;
mod table;

pub use table::{Column, ForeignKey, Table, UniqueConstraint};

use crate::core::{ConfigResult, ConfigurationError};
use crate::naming::{ForeignKeyDescriptor, ForeignKeyNamingStrategy, HashedForeignKeyNaming};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub start: i64,
    pub increment: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    tables: Vec<Table>,
    sequences: Vec<Sequence>,
    /// Mapping element that requested each table.
    #[serde(skip)]
    owners: HashMap<String, String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name() == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Mapping element that requested `table`.
    pub fn table_owner(&self, table: &str) -> Option<&str> {
        self.owners.get(table).map(String::as_str)
    }

    /// Registers `table` on behalf of `owner`. A second request for the same
    /// table name is a configuration error.
    pub fn add_table(&mut self, table: Table, owner: &str) -> ConfigResult<()> {
        if let Some(first) = self.owners.get(table.name()) {
            return Err(ConfigurationError::DuplicateTable {
                table: table.name().to_string(),
                first: first.clone(),
                second: owner.to_string(),
            });
        }
        debug!("Registering table '{}' for {}", table.name(), owner);
        self.owners.insert(table.name().to_string(), owner.to_string());
        self.tables.push(table);
        Ok(())
    }

    pub fn add_sequence(&mut self, sequence: Sequence) {
        if !self.sequences.iter().any(|s| s.name == sequence.name) {
            self.sequences.push(sequence);
        }
    }

    /// Adds a foreign key from `table.columns` to `target.target_columns` and
    /// returns its name.
    ///
    /// The readable name from `naming` is replaced by a content hash when it
    /// exceeds `max_length` or when a different key of the schema already
    /// uses it. Adding the same key twice is a no-op.
    pub fn add_foreign_key(
        &mut self,
        table: &str,
        columns: &[String],
        target_table: &str,
        target_columns: &[String],
        naming: &dyn ForeignKeyNamingStrategy,
        max_length: usize,
    ) -> ConfigResult<String> {
        let descriptor = ForeignKeyDescriptor {
            table: table.to_string(),
            columns: columns.to_vec(),
            target_table: target_table.to_string(),
            target_columns: target_columns.to_vec(),
        };
        let readable = naming.foreign_key_name(&descriptor);
        self.validate_foreign_key(&readable, &descriptor)?;

        let mut key = ForeignKey {
            name: readable,
            columns: descriptor.columns.clone(),
            target_table: descriptor.target_table.clone(),
            target_columns: descriptor.target_columns.clone(),
        };

        if let Some(existing) = self
            .table(table)
            .and_then(|t| t.foreign_keys().iter().find(|k| k.same_shape(&key)))
        {
            return Ok(existing.name.clone());
        }

        let collides = self
            .tables
            .iter()
            .flat_map(|t| t.foreign_keys())
            .any(|k| k.name == key.name);
        if key.name.len() > max_length || collides {
            let hashed = HashedForeignKeyNaming.foreign_key_name(&descriptor);
            debug!(
                "Foreign key name '{}' replaced by '{}' ({})",
                key.name,
                hashed,
                if collides { "name clash" } else { "too long" }
            );
            key.name = hashed;
        }

        let name = key.name.clone();
        let owner = self
            .table_mut(table)
            .ok_or_else(|| ConfigurationError::InvalidForeignKey {
                name: name.clone(),
                reason: format!("table '{}' does not exist", table),
            })?;
        owner.push_foreign_key(key);
        Ok(name)
    }

    fn validate_foreign_key(&self, name: &str, key: &ForeignKeyDescriptor) -> ConfigResult<()> {
        let invalid = |reason: String| ConfigurationError::InvalidForeignKey {
            name: name.to_string(),
            reason,
        };
        if key.columns.len() != key.target_columns.len() {
            return Err(invalid(format!(
                "{} column(s) reference {} column(s)",
                key.columns.len(),
                key.target_columns.len()
            )));
        }
        let source = self
            .table(&key.table)
            .ok_or_else(|| invalid(format!("table '{}' does not exist", key.table)))?;
        let target = self
            .table(&key.target_table)
            .ok_or_else(|| invalid(format!("table '{}' does not exist", key.target_table)))?;
        for (column, target_column) in key.columns.iter().zip(&key.target_columns) {
            let from = source.column(column).ok_or_else(|| {
                invalid(format!("column '{}.{}' does not exist", key.table, column))
            })?;
            let to = target.column(target_column).ok_or_else(|| {
                invalid(format!(
                    "column '{}.{}' does not exist",
                    key.target_table, target_column
                ))
            })?;
            if !from.data_type.can_reference(&to.data_type) {
                return Err(invalid(format!(
                    "'{}.{}' ({}) cannot reference '{}.{}' ({})",
                    key.table,
                    column,
                    from.data_type,
                    key.target_table,
                    target_column,
                    to.data_type
                )));
            }
        }
        Ok(())
    }

    /// Tables ordered so that every table comes after the tables its foreign
    /// keys reference. Self references are ignored; tables caught in a cycle
    /// keep their registration order at the end.
    pub fn creation_order(&self) -> Vec<&Table> {
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut ordered: Vec<&Table> = Vec::with_capacity(self.tables.len());
        loop {
            let before = ordered.len();
            for table in &self.tables {
                if placed.contains(table.name()) {
                    continue;
                }
                let ready = table.foreign_keys().iter().all(|k| {
                    k.target_table == table.name() || placed.contains(k.target_table.as_str())
                });
                if ready {
                    placed.insert(table.name());
                    ordered.push(table);
                }
            }
            if ordered.len() == self.tables.len() || ordered.len() == before {
                break;
            }
        }
        for table in &self.tables {
            if !placed.contains(table.name()) {
                ordered.push(table);
            }
        }
        ordered
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
