use crate::connection::Connection;
use crate::core::{Entity, PersistError, Result, Value};
use crate::mapping::VersionMapping;
use crate::statement::Condition;
use log::debug;

/// Optimistic lock of a hierarchy. The version column lives in the first
/// table of every concrete layout.
#[derive(Debug, Clone)]
pub(crate) struct VersionRuntime {
    pub mapping: VersionMapping,
    pub column: String,
}

/// Version values of one versioned write.
#[derive(Debug, Clone)]
pub(crate) struct VersionBump {
    pub expected: Value,
    pub next: Value,
}

impl VersionRuntime {
    pub fn property(&self) -> &str {
        &self.mapping.property
    }

    /// Sets the initial version of a new instance, unless the application
    /// already chose one.
    pub fn initialize(&self, entity: &Entity) {
        if entity.get(self.property()).is_null() {
            entity.set(self.property(), self.mapping.initial());
        }
    }

    pub fn current(&self, entity: &Entity) -> Value {
        entity.get(self.property())
    }

    /// Moves the in-memory version forward before the statement runs. The
    /// previous value comes back if the connection's transaction rolls back.
    pub fn bump(&self, entity: &Entity, connection: &mut dyn Connection) -> VersionBump {
        let expected = self.current(entity);
        let next = self.mapping.next_value(&expected);
        entity.set(self.property(), next.clone());

        let handle = entity.clone();
        let property = self.property().to_string();
        let restored = expected.clone();
        connection.on_rollback(Box::new(move || {
            debug!("Restoring {} of {:?} to {}", property, handle, restored);
            handle.set(&property, restored);
        }));
        VersionBump { expected, next }
    }

    pub fn predicate(&self, expected: &Value) -> Condition {
        if expected.is_null() {
            Condition::IsNull(self.column.clone())
        } else {
            Condition::eq(&self.column, expected.clone())
        }
    }

    /// One row per entity, or the row changed since it was read.
    pub fn check(&self, entity: &Entity, expected: &Value, affected: usize) -> Result<()> {
        if affected == 1 {
            return Ok(());
        }
        Err(PersistError::StaleState {
            entity: entity.type_name(),
            id: entity.id().unwrap_or(Value::Null),
            version: expected.clone(),
            expected: 1,
            actual: affected,
        })
    }
}
