use crate::core::{DbError, DbResult, Row, Value};
use crate::schema::Table;
use crate::statement::Condition;
use std::collections::{BTreeMap, HashSet};

/// Rows of one table, keyed by a stable row id.
#[derive(Debug, Clone)]
pub struct StoredTable {
    schema: Table,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    next_auto_value: i64,
}

impl StoredTable {
    pub fn new(schema: Table) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            next_auto_value: 1,
        }
    }

    pub fn schema(&self) -> &Table {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn rows(&self) -> impl Iterator<Item = (usize, &Row)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    pub fn row(&self, id: usize) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, column: &str) -> DbResult<usize> {
        self.schema
            .column_index(column)
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), self.name().to_string()))
    }

    /// Full row from column/value pairs. Missing columns are NULL, a NULL
    /// auto-increment column receives the next generated value.
    pub fn build_row(&mut self, values: &[(String, Value)]) -> DbResult<(Row, Option<Value>)> {
        let mut row = vec![Value::Null; self.schema.columns().len()];
        for (column, value) in values {
            let idx = self.column_index(column)?;
            row[idx] = value.clone();
        }

        let mut generated = None;
        for (idx, column) in self.schema.columns().iter().enumerate() {
            if !column.auto_increment {
                continue;
            }
            match &row[idx] {
                Value::Null => {
                    let key = Value::Integer(self.next_auto_value);
                    self.next_auto_value += 1;
                    row[idx] = key.clone();
                    generated = Some(key);
                }
                Value::Integer(i) if *i >= self.next_auto_value => {
                    self.next_auto_value = i + 1;
                }
                _ => {}
            }
        }

        self.validate_row(&row)?;
        Ok((row, generated))
    }

    pub fn validate_row(&self, row: &Row) -> DbResult<()> {
        let columns = self.schema.columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value).map_err(|e| match e {
                DbError::ConstraintViolation(msg) => {
                    DbError::ConstraintViolation(format!("{} (table '{}')", msg, self.name()))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn insert(&mut self, row: Row) -> usize {
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, row);
        id
    }

    /// Puts back a row removed earlier, under its original id.
    pub fn restore(&mut self, id: usize, row: Row) {
        self.rows.insert(id, row);
    }

    pub fn replace(&mut self, id: usize, row: Row) -> Option<Row> {
        self.rows.insert(id, row)
    }

    pub fn remove(&mut self, id: usize) -> Option<Row> {
        self.rows.remove(&id)
    }

    /// Ids of the rows satisfying every condition.
    pub fn matching(&self, conditions: &[Condition]) -> DbResult<Vec<usize>> {
        let resolved = conditions
            .iter()
            .map(|c| Ok((self.column_index(c.column())?, c)))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(self
            .rows
            .iter()
            .filter(|(_, row)| resolved.iter().all(|(idx, c)| c.matches(&row[*idx])))
            .map(|(id, _)| *id)
            .collect())
    }

    /// Values of `columns` in `row`, or None when one of them is NULL.
    pub fn key_of(&self, row: &Row, columns: &[usize]) -> Option<Vec<Value>> {
        let key: Vec<Value> = columns.iter().map(|&i| row[i].clone()).collect();
        if key.iter().any(Value::is_null) {
            None
        } else {
            Some(key)
        }
    }

    pub fn contains_key(&self, columns: &[usize], key: &[Value]) -> bool {
        self.rows
            .values()
            .any(|row| columns.iter().zip(key).all(|(&i, v)| row[i] == *v))
    }

    /// Primary key and unique constraints over the current rows.
    pub fn check_uniqueness(&self) -> DbResult<()> {
        let mut keys: Vec<(&str, Vec<String>)> = Vec::new();
        if !self.schema.primary_key().is_empty() {
            keys.push(("PRIMARY KEY", self.schema.primary_key().to_vec()));
        }
        for unique in self.schema.unique_constraints() {
            keys.push((unique.name.as_str(), unique.columns.clone()));
        }

        for (name, columns) in keys {
            let indices = columns
                .iter()
                .map(|c| self.column_index(c))
                .collect::<DbResult<Vec<_>>>()?;
            let mut seen = HashSet::new();
            for row in self.rows.values() {
                let Some(key) = self.key_of(row, &indices) else {
                    continue;
                };
                if !seen.insert(key.clone()) {
                    let rendered: Vec<String> = key.iter().map(Value::to_string).collect();
                    return Err(DbError::ConstraintViolation(format!(
                        "Unique constraint violation: {} of '{}' ({}) already contains ({})",
                        name,
                        self.name(),
                        columns.join(", "),
                        rendered.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::schema::{Column, UniqueConstraint};

    fn table() -> StoredTable {
        let mut schema = Table::new("Person");
        schema
            .add_column(Column::new("id", DataType::Integer).auto_increment(), "id")
            .unwrap();
        schema
            .add_column(Column::new("email", DataType::Text), "email")
            .unwrap();
        schema.set_primary_key(vec!["id".into()]).unwrap();
        schema
            .add_unique_constraint(UniqueConstraint {
                name: "UK_Person_email".into(),
                columns: vec!["email".into()],
            })
            .unwrap();
        StoredTable::new(schema)
    }

    #[test]
    fn test_auto_increment_generates_keys() {
        let mut t = table();
        let (row, key) = t.build_row(&[("email".into(), Value::from("a"))]).unwrap();
        assert_eq!(key, Some(Value::Integer(1)));
        t.insert(row);
        let (_, key) = t.build_row(&[]).unwrap();
        assert_eq!(key, Some(Value::Integer(2)));
        let (_, key) = t.build_row(&[("id".into(), Value::Integer(10))]).unwrap();
        assert_eq!(key, None);
        let (_, key) = t.build_row(&[]).unwrap();
        assert_eq!(key, Some(Value::Integer(11)));
    }

    #[test]
    fn test_unique_ignores_nulls() {
        let mut t = table();
        for _ in 0..2 {
            let (row, _) = t.build_row(&[]).unwrap();
            t.insert(row);
        }
        assert!(t.check_uniqueness().is_ok());
        for _ in 0..2 {
            let (row, _) = t.build_row(&[("email".into(), Value::from("x"))]).unwrap();
            t.insert(row);
        }
        assert!(matches!(t.check_uniqueness(), Err(DbError::ConstraintViolation(_))));
    }

    #[test]
    fn test_matching_rows() {
        let mut t = table();
        for email in ["a", "b", "c"] {
            let (row, _) = t.build_row(&[("email".into(), Value::from(email))]).unwrap();
            t.insert(row);
        }
        let ids = t
            .matching(&[Condition::is_in("email", vec![Value::from("a"), Value::from("c")])])
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(t.matching(&[Condition::eq("missing", 1i64)]).is_err());
    }
}
