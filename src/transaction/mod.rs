// ============================================================================
// Transactions of the in-memory store
// ============================================================================
//
// Command Pattern: every write statement records reversible changes; rollback
// replays them backwards and then runs the registered rollback hooks.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, TransactionState};
