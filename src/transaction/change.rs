// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Undo log entries. Each Change records what a statement did to one row so
// that rollback can restore the previous state, newest change first.
//
// ============================================================================

use crate::core::Row;

/// A single reversible change recorded inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Row `row_id` was inserted
    InsertRow { table: String, row_id: usize },

    /// Row `row_id` held `old_row` before the update
    UpdateRow {
        table: String,
        row_id: usize,
        old_row: Row,
    },

    /// Row `row_id` held `old_row` before it was deleted
    DeleteRow {
        table: String,
        row_id: usize,
        old_row: Row,
    },

    /// Table created inside the transaction
    CreateTable { table: String },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. }
            | Change::UpdateRow { table, .. }
            | Change::DeleteRow { table, .. }
            | Change::CreateTable { table } => table,
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, Change::CreateTable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    #[test]
    fn test_change_table_name() {
        let change = Change::UpdateRow {
            table: "Person".to_string(),
            row_id: 0,
            old_row: vec![Value::Integer(1)],
        };
        assert_eq!(change.table_name(), "Person");
        assert!(!change.is_ddl());
        assert!(Change::CreateTable { table: "Person".into() }.is_ddl());
    }
}
