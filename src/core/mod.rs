pub mod entity;
pub mod error;
pub mod identifier;
pub mod types;
pub mod value;

pub use entity::{
    Element, Entity, EntitySnapshot, Field, FieldSnapshot, Persistable, Record, RelatedSnapshot,
};
pub use error::{ConfigResult, ConfigurationError, DbError, DbResult, PersistError, Result};
pub use identifier::{Identifier, IdentifierState};
pub use types::{DataType, Row};
pub use value::Value;
