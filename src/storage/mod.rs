// ============================================================================
// In-memory storage
// ============================================================================
//
// Reference implementation of the `Connection` collaborator: tables, keys,
// sequences and transactions held in memory. Persister tests run against it.
//
// ============================================================================

mod connection;
mod memory;
mod table;

pub use connection::InMemoryConnection;
pub use memory::InMemoryDatabase;
pub use table::StoredTable;
