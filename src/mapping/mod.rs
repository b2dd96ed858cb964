//! Declarative description of how entity types map to tables.
//!
//! Mappings are plain values built with consuming methods. Declaration
//! mistakes are recorded on the mapping and reported when the
//! [`crate::PersistenceContext`] is built.

pub mod entity;
pub mod property;
pub mod relation;

pub use entity::{EntityMapping, PolymorphismKind, PolymorphismPolicy, SubEntity};
pub use property::{
    EmbeddableMapping, EmbeddedMapping, IdentifierMapping, PropertyMapping, VersionKind,
    VersionMapping,
};
pub use relation::{
    CollectionKind, ElementCollectionMapping, ElementKind, MapMapping, RelationKind,
    RelationMapping, RelationMode,
};
