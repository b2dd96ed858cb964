use super::InMemoryDatabase;
use crate::connection::{Connection, RollbackHook};
use crate::core::{DbError, DbResult};
use crate::result::Rows;
use crate::statement::{ExecutionOutcome, Select, Statement};
use crate::transaction::Transaction;
use log::{debug, warn};

/// Connection to an [`InMemoryDatabase`].
///
/// Outside a transaction every statement commits on its own. Inside one,
/// statements record undo changes which `rollback` replays, then runs the
/// registered rollback hooks. Dropping the connection with an open
/// transaction rolls it back.
pub struct InMemoryConnection {
    db: InMemoryDatabase,
    transaction: Option<Transaction>,
    executed: Vec<Statement>,
    queries: usize,
}

impl InMemoryConnection {
    pub(crate) fn new(db: InMemoryDatabase) -> Self {
        Self {
            db,
            transaction: None,
            executed: Vec::new(),
            queries: 0,
        }
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.db
    }

    pub fn begin(&mut self) -> DbResult<()> {
        if self.transaction.is_some() {
            return Err(DbError::ExecutionError(
                "Transaction already in progress".to_string(),
            ));
        }
        let txn = Transaction::begin();
        debug!("BEGIN {}", txn.id());
        self.transaction = Some(txn);
        Ok(())
    }

    pub fn commit(&mut self) -> DbResult<()> {
        let txn = self
            .transaction
            .take()
            .ok_or_else(|| DbError::ExecutionError("No transaction in progress".to_string()))?;
        debug!("COMMIT {} ({} change(s))", txn.id(), txn.change_count());
        txn.commit();
        Ok(())
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        let txn = self
            .transaction
            .take()
            .ok_or_else(|| DbError::ExecutionError("No transaction in progress".to_string()))?;
        debug!("ROLLBACK {}", txn.id());
        let (changes, hooks) = txn.abort();
        self.db.undo(changes)?;
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Write statements executed so far, successful or not.
    pub fn executed_statements(&self) -> &[Statement] {
        &self.executed
    }

    pub fn query_count(&self) -> usize {
        self.queries
    }

    pub fn clear_history(&mut self) {
        self.executed.clear();
        self.queries = 0;
    }
}

impl Connection for InMemoryConnection {
    fn execute(&mut self, statement: &Statement) -> DbResult<ExecutionOutcome> {
        self.executed.push(statement.clone());
        let (outcome, changes) = self.db.execute(statement)?;
        if let Some(txn) = self.transaction.as_mut() {
            txn.record(changes);
        }
        Ok(outcome)
    }

    fn query(&mut self, select: &Select) -> DbResult<Rows> {
        self.queries += 1;
        self.db.query(select)
    }

    fn next_sequence_value(&mut self, name: &str) -> DbResult<i64> {
        self.db.next_sequence_value(name)
    }

    fn on_rollback(&mut self, hook: RollbackHook) {
        if let Some(txn) = self.transaction.as_mut() {
            txn.add_hook(hook);
        }
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if self.transaction.is_some()
            && let Err(e) = self.rollback()
        {
            warn!("Rollback on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Value};
    use crate::schema::{Column, Table};
    use crate::statement::Insert;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn setup() -> InMemoryDatabase {
        let db = InMemoryDatabase::new();
        let mut table = Table::new("Item");
        table
            .add_column(Column::new("id", DataType::Integer), "Item::<id>")
            .unwrap();
        table.set_primary_key(vec!["id".into()]).unwrap();
        db.connect().execute(&Statement::CreateTable(table)).unwrap();
        db
    }

    #[test]
    fn test_rollback_undoes_rows_and_runs_hooks() {
        let db = setup();
        let mut conn = db.connect();
        let fired = Arc::new(AtomicBool::new(false));

        conn.begin().unwrap();
        conn.execute(&Insert::new("Item").value("id", 1i64).into()).unwrap();
        let flag = Arc::clone(&fired);
        conn.on_rollback(Box::new(move || flag.store(true, Ordering::SeqCst)));
        conn.rollback().unwrap();

        assert_eq!(db.row_count("Item").unwrap(), 0);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_commit_keeps_rows() {
        let db = setup();
        let mut conn = db.connect();
        conn.begin().unwrap();
        conn.execute(&Insert::new("Item").value("id", Value::Integer(1)).into()).unwrap();
        conn.commit().unwrap();
        assert!(conn.rollback().is_err());
        assert_eq!(db.row_count("Item").unwrap(), 1);
        assert_eq!(conn.executed_statements().len(), 1);
    }

    #[test]
    fn test_drop_rolls_back() {
        let db = setup();
        {
            let mut conn = db.connect();
            conn.begin().unwrap();
            conn.execute(&Insert::new("Item").value("id", 1i64).into()).unwrap();
        }
        assert_eq!(db.row_count("Item").unwrap(), 0);
    }
}
