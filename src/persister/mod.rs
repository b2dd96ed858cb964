// ============================================================================
// Persisters
// ============================================================================
//
// Compilation of entity mappings into per-hierarchy runtime data (class tree,
// table layouts, compiled relations, join tree) and the operations running
// over it.
//
// ============================================================================

mod builder;
pub mod cascade;
mod entity_persister;
mod hierarchy;
pub mod identifier;
pub mod join_tree;
pub mod listener;
mod load;
mod polymorphism;
mod relation;
mod session;
mod versioning;
mod writer;

pub(crate) use builder::PersisterBuilder;
pub(crate) use hierarchy::Registry;

pub use cascade::{CascadeDecision, CascadeOperation, RemovedTarget, decide};
pub use entity_persister::EntityPersister;
pub use identifier::{
    HighValueSource, IdentifierPolicy, InMemoryHighValues, PersistedMarker, PooledHiLoSequence,
    SequenceHighValues,
};
pub use join_tree::{JoinNode, JoinTree};
pub use listener::{ListenerSet, PersisterListeners};
