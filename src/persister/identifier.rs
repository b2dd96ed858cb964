// ============================================================================
// Identifier policies
// ============================================================================
//
// How primary keys are produced and how an instance is known to be persisted.
//
// ============================================================================

use crate::connection::Connection;
use crate::core::{Entity, PersistError, Result, Value};
use crate::schema::Sequence;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

type Predicate = Arc<dyn Fn(&Entity) -> bool + Send + Sync>;
type Marker = Arc<dyn Fn(&Entity) + Send + Sync>;

/// Predicate/marker pair telling whether an already-assigned identifier has
/// been persisted. The default reads and flips the entity's
/// [`crate::core::Identifier`] state.
#[derive(Clone)]
pub struct PersistedMarker {
    is_persisted: Predicate,
    mark: Marker,
}

impl PersistedMarker {
    pub fn new(
        is_persisted: impl Fn(&Entity) -> bool + Send + Sync + 'static,
        mark: impl Fn(&Entity) + Send + Sync + 'static,
    ) -> Self {
        Self {
            is_persisted: Arc::new(is_persisted),
            mark: Arc::new(mark),
        }
    }

    pub fn is_persisted(&self, entity: &Entity) -> bool {
        (self.is_persisted)(entity)
    }

    pub fn mark(&self, entity: &Entity) {
        (self.mark)(entity)
    }
}

impl Default for PersistedMarker {
    fn default() -> Self {
        Self::new(Entity::is_persisted, |e| {
            e.mark_persisted();
        })
    }
}

impl fmt::Debug for PersistedMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PersistedMarker")
    }
}

/// Source of high values for a [`PooledHiLoSequence`].
pub trait HighValueSource: Send + Sync {
    fn next_high(&self, connection: &mut dyn Connection) -> Result<i64>;

    /// Database sequence the source reads, to be created with the schema.
    fn sequence(&self) -> Option<Sequence> {
        None
    }
}

/// Process-local counter, starting at 0.
#[derive(Debug, Default)]
pub struct InMemoryHighValues {
    next: AtomicI64,
}

impl InMemoryHighValues {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HighValueSource for InMemoryHighValues {
    fn next_high(&self, _connection: &mut dyn Connection) -> Result<i64> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// High values read from a database sequence starting at 0.
#[derive(Debug, Clone)]
pub struct SequenceHighValues {
    name: String,
}

impl SequenceHighValues {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl HighValueSource for SequenceHighValues {
    fn next_high(&self, connection: &mut dyn Connection) -> Result<i64> {
        Ok(connection.next_sequence_value(&self.name)?)
    }

    fn sequence(&self) -> Option<Sequence> {
        Some(Sequence {
            name: self.name.clone(),
            start: 0,
            increment: 1,
        })
    }
}

#[derive(Debug)]
struct HiLoRange {
    next: i64,
    last: i64,
}

/// Hi-lo generator: each high value `h` reserves `h * pool_size + 1 ..=
/// (h + 1) * pool_size`. Values are issued from the reserved range under a
/// mutex, so entity types sharing one sequence draw from a single increasing
/// stream.
pub struct PooledHiLoSequence {
    name: String,
    pool_size: i64,
    source: Box<dyn HighValueSource>,
    range: Mutex<HiLoRange>,
}

impl PooledHiLoSequence {
    /// Sequence backed by an in-memory high value counter.
    pub fn new(name: &str, pool_size: i64) -> Self {
        Self::with_source(name, pool_size, InMemoryHighValues::new())
    }

    pub fn with_source(name: &str, pool_size: i64, source: impl HighValueSource + 'static) -> Self {
        Self {
            name: name.to_string(),
            pool_size: pool_size.max(1),
            source: Box::new(source),
            range: Mutex::new(HiLoRange { next: 1, last: 0 }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_size(&self) -> i64 {
        self.pool_size
    }

    pub fn database_sequence(&self) -> Option<Sequence> {
        self.source.sequence()
    }

    pub fn next(&self, connection: &mut dyn Connection) -> Result<i64> {
        let mut range = self.range.lock().map_err(crate::core::DbError::from)?;
        if range.next > range.last {
            let high = self.source.next_high(connection)?;
            range.next = high * self.pool_size + 1;
            range.last = (high + 1) * self.pool_size;
            log::trace!(
                "Hi-lo '{}' reserved {}..={}",
                self.name,
                range.next,
                range.last
            );
        }
        let value = range.next;
        range.next += 1;
        Ok(value)
    }
}

impl fmt::Debug for PooledHiLoSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledHiLoSequence")
            .field("name", &self.name)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum IdentifierPolicy {
    /// Set by the application before insert.
    AlreadyAssigned(PersistedMarker),
    /// Generated by the database on insert.
    AutoIncrement,
    /// Read from a named database sequence before insert.
    Sequence(String),
    /// Drawn from a shared hi-lo sequence.
    PooledHiLo(Arc<PooledHiLoSequence>),
    /// Hi-lo sequence resolved at build time: one shared generator per name,
    /// backed by a database sequence of that name and sized by
    /// [`crate::PersistenceConfig::hilo_pool_size`].
    NamedHiLo(String),
}

impl IdentifierPolicy {
    pub fn already_assigned() -> Self {
        IdentifierPolicy::AlreadyAssigned(PersistedMarker::default())
    }

    pub fn sequence(name: &str) -> Self {
        IdentifierPolicy::Sequence(name.to_string())
    }

    pub fn pooled_hilo(sequence: &Arc<PooledHiLoSequence>) -> Self {
        IdentifierPolicy::PooledHiLo(Arc::clone(sequence))
    }

    pub fn label(&self) -> &'static str {
        match self {
            IdentifierPolicy::AlreadyAssigned(_) => "already-assigned",
            IdentifierPolicy::AutoIncrement => "auto-increment",
            IdentifierPolicy::Sequence(_) => "sequence",
            IdentifierPolicy::PooledHiLo(_) | IdentifierPolicy::NamedHiLo(_) => "pooled-hilo",
        }
    }
}

/// Identifier policy of a compiled hierarchy.
#[derive(Debug, Clone)]
pub(crate) enum IdentifierRuntime {
    AlreadyAssigned(PersistedMarker),
    AutoIncrement,
    Sequence(String),
    PooledHiLo(Arc<PooledHiLoSequence>),
}

impl IdentifierRuntime {
    pub fn is_persisted(&self, entity: &Entity) -> bool {
        match self {
            IdentifierRuntime::AlreadyAssigned(marker) => marker.is_persisted(entity),
            _ => entity.is_persisted(),
        }
    }

    pub fn generated_by_database(&self) -> bool {
        matches!(self, IdentifierRuntime::AutoIncrement)
    }

    /// Gives `entity` its identifier before the insert statements. Database
    /// generated identifiers are left to [`IdentifierRuntime::after_insert`].
    pub fn before_insert(&self, entity: &Entity, connection: &mut dyn Connection) -> Result<()> {
        if entity.id().is_some() {
            return Ok(());
        }
        let value = match self {
            IdentifierRuntime::AlreadyAssigned(_) => {
                return Err(PersistError::NotPersisted {
                    entity: entity.type_name(),
                });
            }
            IdentifierRuntime::AutoIncrement => return Ok(()),
            IdentifierRuntime::Sequence(name) => connection.next_sequence_value(name)?,
            IdentifierRuntime::PooledHiLo(sequence) => sequence.next(connection)?,
        };
        entity.assign_id(Value::Integer(value))
    }

    /// Records the generated key, if any, and flips the persisted state.
    pub fn after_insert(&self, entity: &Entity, generated: Option<Value>) -> Result<()> {
        if let Some(key) = generated
            && entity.id().is_none()
        {
            entity.assign_id(key)?;
        }
        if entity.id().is_none() {
            return Err(PersistError::NotPersisted {
                entity: entity.type_name(),
            });
        }
        self.mark_persisted(entity);
        Ok(())
    }

    pub fn mark_persisted(&self, entity: &Entity) {
        entity.mark_persisted();
        if let IdentifierRuntime::AlreadyAssigned(marker) = self {
            marker.mark(entity);
        }
    }
}
