// ============================================================================
// Cascade engine
// ============================================================================
//
// Decides, per operation and relation mode, whether the owner's operation
// reaches the related entities, whether link rows are maintained, and what
// happens to entities dropped from a relation.
//
// ============================================================================

use crate::mapping::RelationMode;
use std::fmt;
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for CascadeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeOperation::Insert => write!(f, "insert"),
            CascadeOperation::Update => write!(f, "update"),
            CascadeOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Fate of an entity that left a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovedTarget {
    /// Nothing is written.
    Keep,
    /// The link (association row or back reference) is severed.
    Unlink,
    /// The link is severed and the entity deleted.
    DeleteOrphan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeDecision {
    /// The operation is applied to the related entities.
    pub propagate: bool,
    /// Link rows and back references are written.
    pub links: bool,
    pub removed: RemovedTarget,
}

/// What `operation` on an owner does through a relation in `mode`.
///
/// | mode               | propagate | links | removed       |
/// |--------------------|-----------|-------|---------------|
/// | READ_ONLY          | no        | no    | Keep          |
/// | ASSOCIATION_ONLY   | no        | yes   | Unlink        |
/// | ALL                | yes       | yes   | Unlink        |
/// | ALL_ORPHAN_REMOVAL | yes       | yes   | DeleteOrphan  |
///
/// Whatever the mode, deleting an owner removes its own association rows.
pub fn decide(operation: CascadeOperation, mode: RelationMode) -> CascadeDecision {
    let decision = match mode {
        RelationMode::ReadOnly => CascadeDecision {
            propagate: false,
            links: false,
            removed: RemovedTarget::Keep,
        },
        RelationMode::AssociationOnly => CascadeDecision {
            propagate: false,
            links: true,
            removed: RemovedTarget::Unlink,
        },
        RelationMode::All => CascadeDecision {
            propagate: true,
            links: true,
            removed: RemovedTarget::Unlink,
        },
        RelationMode::AllOrphanRemoval => CascadeDecision {
            propagate: true,
            links: true,
            removed: RemovedTarget::DeleteOrphan,
        },
    };
    event!(
        Level::DEBUG,
        operation = %operation,
        mode = %mode,
        propagate = decision.propagate,
        links = decision.links,
        "cascade decided"
    );
    decision
}
