//! Everything needed to declare mappings and run persisters.
//!
//! ```
//! use relmap::prelude::*;
//! ```

pub use crate::config::PersistenceConfig;
pub use crate::connection::Connection;
pub use crate::context::PersistenceContext;
pub use crate::core::{
    ConfigurationError, DataType, Element, Entity, PersistError, Persistable, Record, Value,
};
pub use crate::mapping::{
    ElementCollectionMapping, EmbeddableMapping, EmbeddedMapping, EntityMapping,
    IdentifierMapping, MapMapping, PolymorphismPolicy, PropertyMapping, RelationMapping,
    RelationMode, VersionMapping,
};
pub use crate::naming::NamingScope;
pub use crate::persister::{
    EntityPersister, IdentifierPolicy, PersistedMarker, PooledHiLoSequence,
};
pub use crate::storage::{InMemoryConnection, InMemoryDatabase};
