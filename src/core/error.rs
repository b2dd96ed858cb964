use super::Value;
use thiserror::Error;

/// Errors raised by the statement/connection layer.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Sequence '{0}' not found")]
    SequenceNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

/// Mapping mistakes detected while compiling persisters. Never raised at runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Property '{property}' of '{entity}' is mapped twice")]
    DuplicateProperty { entity: String, property: String },

    #[error("Column '{column}' of table '{table}' is produced by both '{first}' and '{second}'")]
    DuplicateColumn {
        table: String,
        column: String,
        first: String,
        second: String,
    },

    #[error("Table '{table}' is requested by both '{first}' and '{second}'")]
    DuplicateTable {
        table: String,
        first: String,
        second: String,
    },

    #[error("Identifier of '{entity}' is already defined by '{defined_by}', it cannot be redefined")]
    IdentifierRedefinition { entity: String, defined_by: String },

    #[error("Entity '{0}' has no identifier")]
    MissingIdentifier(String),

    #[error("Entity '{0}' cannot combine a mapped super class with entity inheritance")]
    InheritanceConflict(String),

    #[error(
        "Combining {parent} polymorphism policy with {child} is not implemented (entity '{entity}')"
    )]
    UnsupportedPolymorphismComposition {
        entity: String,
        parent: String,
        child: String,
    },

    #[error("Relation '{entity}::{property}' cannot use ASSOCIATION_ONLY: it has no association table")]
    AssociationOnlyNotSupported { entity: String, property: String },

    #[error("Entity '{0}' is not mapped")]
    UnknownEntity(String),

    #[error("'{entity}' has no mapped property '{property}'")]
    UnknownProperty { entity: String, property: String },

    #[error("Invalid foreign key '{name}': {reason}")]
    InvalidForeignKey { name: String, reason: String },

    #[error("Identifier policy {policy} is not supported by '{entity}': {reason}")]
    UnsupportedIdentifierPolicy {
        entity: String,
        policy: String,
        reason: String,
    },

    #[error("Invalid mapping of '{entity}': {reason}")]
    InvalidMapping { entity: String, reason: String },
}

/// Runtime failures of persister operations.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Mandatory relation '{entity}::{property}' is null")]
    MandatoryRelationMissing { entity: String, property: String },

    #[error("Mandatory property '{entity}::{property}' is null")]
    MandatoryPropertyMissing { entity: String, property: String },

    #[error("Cannot convert '{entity}::{property}': {reason}")]
    Conversion {
        entity: String,
        property: String,
        reason: String,
    },

    #[error("Stale '{entity}' with id {id}: expected {expected} row(s) at version {version}, {actual} affected")]
    StaleState {
        entity: String,
        id: Value,
        version: Value,
        expected: usize,
        actual: usize,
    },

    #[error("Identifier of '{entity}' is already persisted as {current}, cannot reassign it to {requested}")]
    IdentifierReassigned {
        entity: String,
        current: Value,
        requested: Value,
    },

    #[error("'{entity}' is not part of the hierarchy of '{root}'")]
    UnknownSubtype { root: String, entity: String },

    #[error("'{entity}' is abstract in its hierarchy and cannot be persisted")]
    AbstractEntity { entity: String },

    #[error("Cannot resolve concrete type of '{root}' row with id {id}")]
    UnresolvableRow { root: String, id: Value },

    #[error("Index column of '{entity}::{property}' holds {index} twice for owner {owner}")]
    CorruptedIndex {
        entity: String,
        property: String,
        owner: Value,
        index: i64,
    },

    #[error("'{entity}' has no identifier value")]
    NotPersisted { entity: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, PersistError>;
pub type DbResult<T> = std::result::Result<T, DbError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
