// ============================================================================
// Transaction State
// ============================================================================
//
// Active ──commit──> Committed
//   │
//   └──rollback──> Aborted
//
// A transaction owns the undo log of its statements plus the rollback hooks
// registered by persisters (restoring in-memory versions, identifiers...).
//
// ============================================================================

use super::Change;
use crate::connection::RollbackHook;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    changes: Vec<Change>,
    hooks: Vec<RollbackHook>,
}

impl Transaction {
    pub fn begin() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            changes: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn record(&mut self, changes: impl IntoIterator<Item = Change>) {
        self.changes.extend(changes);
    }

    pub fn add_hook(&mut self, hook: RollbackHook) {
        self.hooks.push(hook);
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn commit(mut self) -> TransactionState {
        self.state = TransactionState::Committed;
        self.hooks.clear();
        self.state
    }

    /// Ends the transaction, handing back the undo log and the hooks, both
    /// newest first.
    pub fn abort(mut self) -> (Vec<Change>, Vec<RollbackHook>) {
        self.state = TransactionState::Aborted;
        let mut changes = std::mem::take(&mut self.changes);
        let mut hooks = std::mem::take(&mut self.hooks);
        changes.reverse();
        hooks.reverse();
        (changes, hooks)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
