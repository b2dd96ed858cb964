// ============================================================================
// In-memory relational store
// ============================================================================
//
// Executes structured statements against tables held in memory. Each write
// statement is applied, then checked (uniqueness, foreign keys); a failing
// statement is undone before the error is returned.
//
// ============================================================================

use super::table::StoredTable;
use crate::core::{DbError, DbResult, Record, Row, Value};
use crate::result::Rows;
use crate::statement::{
    ColumnRef, Condition, Delete, ExecutionOutcome, Insert, JoinKind, Select, Statement, Update,
};
use crate::transaction::Change;
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy)]
struct SequenceState {
    next: i64,
    increment: i64,
}

#[derive(Debug, Default)]
pub(crate) struct DatabaseState {
    tables: HashMap<String, StoredTable>,
    sequences: HashMap<String, SequenceState>,
}

/// Shared in-memory database. Cloning shares the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<RwLock<DatabaseState>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> super::InMemoryConnection {
        super::InMemoryConnection::new(self.clone())
    }

    pub fn table_names(&self) -> DbResult<Vec<String>> {
        let state = self.state.read()?;
        let mut names: Vec<String> = state.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Every row of `table` as column/value records, in insertion order.
    pub fn scan(&self, table: &str) -> DbResult<Vec<Record>> {
        let state = self.state.read()?;
        let stored = state.table(table)?;
        Ok(stored
            .rows()
            .map(|(_, row)| {
                let mut record = Record::new();
                for (column, value) in stored.schema().columns().iter().zip(row) {
                    record.set(&column.name, value.clone());
                }
                record
            })
            .collect())
    }

    pub fn row_count(&self, table: &str) -> DbResult<usize> {
        Ok(self.state.read()?.table(table)?.row_count())
    }

    pub(crate) fn execute(&self, statement: &Statement) -> DbResult<(ExecutionOutcome, Vec<Change>)> {
        let mut state = self.state.write()?;
        state.execute(statement)
    }

    pub(crate) fn query(&self, select: &Select) -> DbResult<Rows> {
        self.state.read()?.query(select)
    }

    pub(crate) fn next_sequence_value(&self, name: &str) -> DbResult<i64> {
        let mut state = self.state.write()?;
        let sequence = state
            .sequences
            .get_mut(name)
            .ok_or_else(|| DbError::SequenceNotFound(name.to_string()))?;
        let value = sequence.next;
        sequence.next += sequence.increment;
        trace!("Sequence '{}' issued {}", name, value);
        Ok(value)
    }

    pub(crate) fn undo(&self, changes: Vec<Change>) -> DbResult<()> {
        let mut state = self.state.write()?;
        state.undo(changes);
        Ok(())
    }
}

impl DatabaseState {
    fn table(&self, name: &str) -> DbResult<&StoredTable> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> DbResult<&mut StoredTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn execute(&mut self, statement: &Statement) -> DbResult<(ExecutionOutcome, Vec<Change>)> {
        match statement {
            Statement::Insert(insert) => self.guarded(|s, changes| s.insert(insert, changes)),
            Statement::Update(update) => self.guarded(|s, changes| s.update(update, changes)),
            Statement::Delete(delete) => self.guarded(|s, changes| s.delete(delete, changes)),
            Statement::CreateTable(table) => {
                if self.tables.contains_key(table.name()) {
                    return Err(DbError::TableExists(table.name().to_string()));
                }
                debug!("Creating table '{}'", table.name());
                self.tables
                    .insert(table.name().to_string(), StoredTable::new(table.clone()));
                Ok((
                    ExecutionOutcome::affected(0),
                    vec![Change::CreateTable {
                        table: table.name().to_string(),
                    }],
                ))
            }
            Statement::CreateSequence {
                name,
                start,
                increment,
            } => {
                if self.sequences.contains_key(name) {
                    return Err(DbError::ExecutionError(format!(
                        "Sequence '{}' already exists",
                        name
                    )));
                }
                self.sequences.insert(
                    name.clone(),
                    SequenceState {
                        next: *start,
                        increment: *increment,
                    },
                );
                Ok((ExecutionOutcome::affected(0), Vec::new()))
            }
        }
    }

    /// Runs a write, undoing whatever it applied when it fails.
    fn guarded<F>(&mut self, write: F) -> DbResult<(ExecutionOutcome, Vec<Change>)>
    where
        F: FnOnce(&mut Self, &mut Vec<Change>) -> DbResult<ExecutionOutcome>,
    {
        let mut changes = Vec::new();
        match write(self, &mut changes) {
            Ok(outcome) => Ok((outcome, changes)),
            Err(e) => {
                changes.reverse();
                self.undo(changes);
                Err(e)
            }
        }
    }

    fn insert(&mut self, insert: &Insert, changes: &mut Vec<Change>) -> DbResult<ExecutionOutcome> {
        let table = self.table_mut(&insert.table)?;
        let (row, generated) = table.build_row(&insert.values)?;
        let row_id = table.insert(row);
        changes.push(Change::InsertRow {
            table: insert.table.clone(),
            row_id,
        });
        table.check_uniqueness()?;
        self.check_outgoing_keys(&insert.table, &[row_id])?;
        Ok(ExecutionOutcome {
            affected: 1,
            generated_keys: generated.into_iter().collect(),
        })
    }

    fn update(&mut self, update: &Update, changes: &mut Vec<Change>) -> DbResult<ExecutionOutcome> {
        let table = self.table_mut(&update.table)?;
        let assignments = update
            .set
            .iter()
            .map(|(c, v)| Ok((table.column_index(c)?, v.clone())))
            .collect::<DbResult<Vec<_>>>()?;
        let ids = table.matching(&update.conditions)?;

        let mut replaced = Vec::with_capacity(ids.len());
        for &id in &ids {
            let Some(old_row) = table.row(id).cloned() else {
                continue;
            };
            let mut new_row = old_row.clone();
            for (idx, value) in &assignments {
                new_row[*idx] = value.clone();
            }
            table.validate_row(&new_row)?;
            table.replace(id, new_row);
            changes.push(Change::UpdateRow {
                table: update.table.clone(),
                row_id: id,
                old_row: old_row.clone(),
            });
            replaced.push(old_row);
        }
        table.check_uniqueness()?;
        self.check_outgoing_keys(&update.table, &ids)?;
        self.check_incoming_keys(&update.table, &replaced)?;
        Ok(ExecutionOutcome::affected(ids.len()))
    }

    fn delete(&mut self, delete: &Delete, changes: &mut Vec<Change>) -> DbResult<ExecutionOutcome> {
        let table = self.table_mut(&delete.table)?;
        let ids = table.matching(&delete.conditions)?;
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(old_row) = table.remove(id) {
                changes.push(Change::DeleteRow {
                    table: delete.table.clone(),
                    row_id: id,
                    old_row: old_row.clone(),
                });
                removed.push(old_row);
            }
        }
        self.check_incoming_keys(&delete.table, &removed)?;
        Ok(ExecutionOutcome::affected(removed.len()))
    }

    /// Foreign keys of `table`: the given rows must reference existing keys.
    fn check_outgoing_keys(&self, table: &str, row_ids: &[usize]) -> DbResult<()> {
        let source = self.table(table)?;
        for key in source.schema().foreign_keys() {
            let columns = key
                .columns
                .iter()
                .map(|c| source.column_index(c))
                .collect::<DbResult<Vec<_>>>()?;
            let target = self.table(&key.target_table)?;
            let target_columns = key
                .target_columns
                .iter()
                .map(|c| target.column_index(c))
                .collect::<DbResult<Vec<_>>>()?;
            for &id in row_ids {
                let Some(row) = source.row(id) else {
                    continue;
                };
                let Some(values) = source.key_of(row, &columns) else {
                    continue;
                };
                if !target.contains_key(&target_columns, &values) {
                    let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                    return Err(DbError::ConstraintViolation(format!(
                        "Foreign key violation: Value ({}) in '{}.{}' references non-existent key in '{}.{}' ({})",
                        rendered.join(", "),
                        table,
                        key.columns.join(", "),
                        key.target_table,
                        key.target_columns.join(", "),
                        key.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Keys of `table` that disappeared with `old_rows` must not be referenced
    /// anymore.
    fn check_incoming_keys(&self, table: &str, old_rows: &[Row]) -> DbResult<()> {
        if old_rows.is_empty() {
            return Ok(());
        }
        let target = self.table(table)?;
        for referencing in self.tables.values() {
            for key in referencing.schema().foreign_keys() {
                if key.target_table != table {
                    continue;
                }
                let target_columns = key
                    .target_columns
                    .iter()
                    .map(|c| target.column_index(c))
                    .collect::<DbResult<Vec<_>>>()?;
                let gone: HashSet<Vec<Value>> = old_rows
                    .iter()
                    .filter_map(|row| target.key_of(row, &target_columns))
                    .filter(|k| !target.contains_key(&target_columns, k))
                    .collect();
                if gone.is_empty() {
                    continue;
                }
                let columns = key
                    .columns
                    .iter()
                    .map(|c| referencing.column_index(c))
                    .collect::<DbResult<Vec<_>>>()?;
                for (_, row) in referencing.rows() {
                    if let Some(values) = referencing.key_of(row, &columns)
                        && gone.contains(&values)
                    {
                        let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                        return Err(DbError::ConstraintViolation(format!(
                            "Foreign key violation: key ({}) of '{}.{}' is still referenced by '{}.{}' ({})",
                            rendered.join(", "),
                            table,
                            key.target_columns.join(", "),
                            referencing.name(),
                            key.columns.join(", "),
                            key.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies undo changes, newest first.
    fn undo(&mut self, changes: Vec<Change>) {
        for change in changes {
            match change {
                Change::InsertRow { table, row_id } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.remove(row_id);
                    }
                }
                Change::UpdateRow {
                    table,
                    row_id,
                    old_row,
                } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.replace(row_id, old_row);
                    }
                }
                Change::DeleteRow {
                    table,
                    row_id,
                    old_row,
                } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.restore(row_id, old_row);
                    }
                }
                Change::CreateTable { table } => {
                    self.tables.remove(&table);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    fn query(&self, select: &Select) -> DbResult<Rows> {
        let mut aliases: HashMap<&str, (usize, &StoredTable)> = HashMap::new();
        let base = self.table(&select.table)?;
        aliases.insert(select.alias.as_str(), (0, base));
        let mut tuples: Vec<Vec<Option<&Row>>> = base.rows().map(|(_, r)| vec![Some(r)]).collect();

        for (position, join) in select.joins.iter().enumerate() {
            let joined = self.table(&join.table)?;
            aliases.insert(join.alias.as_str(), (position + 1, joined));
            let on = join
                .on
                .iter()
                .map(|(left, right)| {
                    Ok((
                        Self::locate(&aliases, left)?,
                        joined.column_index(&right.column)?,
                    ))
                })
                .collect::<DbResult<Vec<_>>>()?;

            let mut next = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                let mut matched = false;
                for (_, candidate) in joined.rows() {
                    let hit = on.iter().all(|((slot, left_idx), right_idx)| {
                        match tuple[*slot] {
                            Some(left_row) => {
                                let left = &left_row[*left_idx];
                                !left.is_null() && *left == candidate[*right_idx]
                            }
                            None => false,
                        }
                    });
                    if hit {
                        matched = true;
                        let mut extended = tuple.clone();
                        extended.push(Some(candidate));
                        next.push(extended);
                    }
                }
                if !matched && join.kind == JoinKind::LeftOuter {
                    let mut extended = tuple;
                    extended.push(None);
                    next.push(extended);
                }
            }
            tuples = next;
        }

        let filters = select
            .filters
            .iter()
            .map(|(alias, condition)| {
                Ok((Self::locate(&aliases, &ColumnRef::new(alias, condition.column()))?, condition))
            })
            .collect::<DbResult<Vec<_>>>()?;
        tuples.retain(|tuple| {
            filters
                .iter()
                .all(|((slot, idx), condition)| condition.matches(&Self::read(tuple, *slot, *idx)))
        });

        let order = select
            .order_by
            .iter()
            .map(|c| Self::locate(&aliases, c))
            .collect::<DbResult<Vec<_>>>()?;
        if !order.is_empty() {
            tuples.sort_by(|a, b| {
                order
                    .iter()
                    .map(|(slot, idx)| Self::read(a, *slot, *idx).cmp(&Self::read(b, *slot, *idx)))
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let projection = select
            .columns
            .iter()
            .map(|c| Self::locate(&aliases, c))
            .collect::<DbResult<Vec<_>>>()?;
        let rows = tuples
            .iter()
            .map(|tuple| {
                projection
                    .iter()
                    .map(|(slot, idx)| Self::read(tuple, *slot, *idx))
                    .collect()
            })
            .collect();
        Ok(Rows::new(
            select.columns.iter().map(ColumnRef::label).collect(),
            rows,
        ))
    }

    fn locate(
        aliases: &HashMap<&str, (usize, &StoredTable)>,
        column: &ColumnRef,
    ) -> DbResult<(usize, usize)> {
        let (slot, table) = aliases.get(column.alias.as_str()).ok_or_else(|| {
            DbError::ExecutionError(format!("Unknown table alias '{}'", column.alias))
        })?;
        Ok((*slot, table.column_index(&column.column)?))
    }

    fn read(tuple: &[Option<&Row>], slot: usize, idx: usize) -> Value {
        tuple
            .get(slot)
            .copied()
            .flatten()
            .map(|row| row[idx].clone())
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::naming::ReadableForeignKeyNaming;
    use crate::schema::{Column, Schema, Table};
    use crate::statement::Join;

    fn database() -> InMemoryDatabase {
        let mut schema = Schema::new();
        let mut country = Table::new("Country");
        country
            .add_column(Column::new("id", DataType::Integer), "Country::<id>")
            .unwrap();
        country.set_primary_key(vec!["id".into()]).unwrap();
        let mut person = Table::new("Person");
        person
            .add_column(Column::new("id", DataType::Integer).auto_increment(), "Person::<id>")
            .unwrap();
        person
            .add_column(Column::new("countryId", DataType::Integer), "Person::country")
            .unwrap();
        person.set_primary_key(vec!["id".into()]).unwrap();
        schema.add_table(country, "Country").unwrap();
        schema.add_table(person, "Person").unwrap();
        schema
            .add_foreign_key(
                "Person",
                &["countryId".to_string()],
                "Country",
                &["id".to_string()],
                &ReadableForeignKeyNaming,
                64,
            )
            .unwrap();

        let db = InMemoryDatabase::new();
        for table in schema.creation_order() {
            db.execute(&Statement::CreateTable(table.clone())).unwrap();
        }
        db
    }

    #[test]
    fn test_foreign_keys_are_enforced_both_ways() {
        let db = database();
        let orphan = Insert::new("Person").value("countryId", 7i64);
        assert!(matches!(
            db.execute(&orphan.into()),
            Err(DbError::ConstraintViolation(_))
        ));
        assert_eq!(db.row_count("Person").unwrap(), 0);

        db.execute(&Insert::new("Country").value("id", 7i64).into()).unwrap();
        let (outcome, _) = db
            .execute(&Insert::new("Person").value("countryId", 7i64).into())
            .unwrap();
        // Generated keys are not reused after a failed insert
        assert_eq!(outcome.generated_keys, vec![Value::Integer(2)]);

        let delete = Delete::new("Country").filter(Condition::eq("id", 7i64));
        assert!(db.execute(&delete.into()).is_err());
        assert_eq!(db.row_count("Country").unwrap(), 1);
    }

    #[test]
    fn test_failed_update_leaves_no_trace() {
        let db = database();
        db.execute(&Insert::new("Country").value("id", 1i64).into()).unwrap();
        db.execute(&Insert::new("Country").value("id", 2i64).into()).unwrap();
        let clash = Update::new("Country").set("id", 2i64).filter(Condition::eq("id", 1i64));
        assert!(db.execute(&clash.into()).is_err());
        let ids: Vec<Value> = db.scan("Country").unwrap().iter().map(|r| r.get("id")).collect();
        assert_eq!(ids, vec![Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn test_left_outer_join() {
        let db = database();
        db.execute(&Insert::new("Country").value("id", 1i64).into()).unwrap();
        db.execute(&Insert::new("Country").value("id", 2i64).into()).unwrap();
        db.execute(&Insert::new("Person").value("countryId", 1i64).into()).unwrap();
        let select = Select::from("Country", "c")
            .column("c", "id")
            .column("p", "id")
            .join(Join {
                kind: JoinKind::LeftOuter,
                table: "Person".into(),
                alias: "p".into(),
                on: vec![(ColumnRef::new("c", "id"), ColumnRef::new("p", "countryId"))],
            })
            .order_by("c", "id");
        let rows = db.query(&select).unwrap();
        let pairs: Vec<(Value, Value)> = rows.iter().map(|r| (r.get("c", "id"), r.get("p", "id"))).collect();
        assert_eq!(
            pairs,
            vec![(Value::Integer(1), Value::Integer(1)), (Value::Integer(2), Value::Null)]
        );
    }

    #[test]
    fn test_sequences() {
        let db = InMemoryDatabase::new();
        db.execute(&Statement::CreateSequence { name: "s".into(), start: 1, increment: 10 })
            .unwrap();
        assert_eq!(db.next_sequence_value("s").unwrap(), 1);
        assert_eq!(db.next_sequence_value("s").unwrap(), 11);
        assert!(matches!(db.next_sequence_value("t"), Err(DbError::SequenceNotFound(_))));
    }
}
