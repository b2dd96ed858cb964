// ============================================================================
// relmap Library
// ============================================================================
//
// Compiles declarative entity mappings into persisters that insert, update,
// delete and load whole aggregates: relations are cascaded, inheritance
// hierarchies resolved, identifiers generated and versions checked.
//
// ============================================================================

pub mod config;
pub mod connection;
pub mod context;
pub mod core;
pub mod mapping;
pub mod naming;
pub mod persister;
pub mod prelude;
pub mod result;
pub mod schema;
pub mod statement;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::PersistenceConfig;
pub use connection::Connection;
pub use context::{PersistenceContext, PersistenceContextBuilder};
pub use core::{
    ConfigurationError, DataType, DbError, Element, Entity, PersistError, Persistable, Record,
    Result, Value,
};
pub use persister::{EntityPersister, IdentifierPolicy, PersisterListeners, PooledHiLoSequence};
pub use schema::Schema;
pub use storage::{InMemoryConnection, InMemoryDatabase};
