use crate::core::{ConfigResult, ConfigurationError, DataType, DbError, DbResult, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub auto_increment: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            auto_increment: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> DbResult<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }
        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
}

impl ForeignKey {
    /// Same column mapping, whatever the name.
    pub fn same_shape(&self, other: &ForeignKey) -> bool {
        self.columns == other.columns
            && self.target_table == other.target_table
            && self.target_columns == other.target_columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// Table of the relational model: ordered, uniquely named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    unique_constraints: Vec<UniqueConstraint>,
    /// Mapping element that produced each column, for error messages.
    #[serde(skip)]
    origins: BTreeMap<String, String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
            origins: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Mapping element that produced `column`.
    pub fn column_origin(&self, column: &str) -> Option<&str> {
        self.origins.get(column).map(String::as_str)
    }

    /// Adds a column produced by `origin` (an accessor description such as
    /// `Person::name`). Column names are unique per table; the same origin
    /// asking again for its column is a no-op.
    pub fn add_column(&mut self, column: Column, origin: &str) -> ConfigResult<()> {
        if self.has_column(&column.name) {
            if self.column_origin(&column.name) == Some(origin) {
                return Ok(());
            }
            return Err(ConfigurationError::DuplicateColumn {
                table: self.name.clone(),
                column: column.name.clone(),
                first: self
                    .column_origin(&column.name)
                    .unwrap_or("<unknown>")
                    .to_string(),
                second: origin.to_string(),
            });
        }
        self.origins.insert(column.name.clone(), origin.to_string());
        self.columns.push(column);
        Ok(())
    }

    pub fn set_primary_key(&mut self, columns: Vec<String>) -> ConfigResult<()> {
        if let Some(missing) = columns.iter().find(|c| !self.has_column(c)) {
            return Err(ConfigurationError::InvalidMapping {
                entity: self.name.clone(),
                reason: format!("primary key column '{}' does not exist", missing),
            });
        }
        for column in &mut self.columns {
            if columns.contains(&column.name) {
                column.nullable = false;
            }
        }
        self.primary_key = columns;
        Ok(())
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    pub(crate) fn push_foreign_key(&mut self, key: ForeignKey) {
        self.foreign_keys.push(key);
    }

    /// Adds a unique constraint unless one already covers the same columns.
    pub fn add_unique_constraint(&mut self, constraint: UniqueConstraint) -> ConfigResult<()> {
        if let Some(missing) = constraint.columns.iter().find(|c| !self.has_column(c)) {
            return Err(ConfigurationError::InvalidMapping {
                entity: self.name.clone(),
                reason: format!("unique constraint column '{}' does not exist", missing),
            });
        }
        if self
            .unique_constraints
            .iter()
            .any(|u| u.columns == constraint.columns)
        {
            return Ok(());
        }
        self.unique_constraints.push(constraint);
        Ok(())
    }
}
