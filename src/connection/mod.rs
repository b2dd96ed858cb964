use crate::core::DbResult;
use crate::result::Rows;
use crate::statement::{ExecutionOutcome, Select, Statement};

/// Callback run when the enclosing transaction rolls back.
pub type RollbackHook = Box<dyn FnOnce() + Send>;

/// Statement execution over a transactional connection.
///
/// Persisters issue every statement of one operation sequentially on the
/// connection handed to them. Transaction demarcation belongs to the concrete
/// connection: persisters never begin, commit or roll back.
pub trait Connection {
    fn execute(&mut self, statement: &Statement) -> DbResult<ExecutionOutcome>;

    /// Executes statements in order, stopping at the first failure.
    fn execute_batch(&mut self, statements: &[Statement]) -> DbResult<Vec<ExecutionOutcome>> {
        statements.iter().map(|s| self.execute(s)).collect()
    }

    fn query(&mut self, select: &Select) -> DbResult<Rows>;

    /// Next value of a named database sequence. One roundtrip per call.
    fn next_sequence_value(&mut self, name: &str) -> DbResult<i64>;

    /// Registers a hook run if the current transaction rolls back. Hooks run
    /// in reverse registration order. Outside a transaction the hook is
    /// dropped since nothing can be rolled back.
    fn on_rollback(&mut self, hook: RollbackHook);
}
