use crate::core::{Row, Value};
use crate::statement::ColumnRef;
use std::collections::HashMap;
use std::fmt;

/// Rows returned by [`crate::connection::Connection::query`]. Columns are
/// labelled `alias.column`.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    columns: Vec<String>,
    positions: HashMap<String, usize>,
    rows: Vec<Row>,
}

impl Rows {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let positions = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Self {
            columns,
            positions,
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ResultRow<'_>> {
        self.rows.iter().map(move |row| ResultRow { rows: self, row })
    }
}

/// One row of [`Rows`] with access by alias and column.
#[derive(Clone, Copy)]
pub struct ResultRow<'a> {
    rows: &'a Rows,
    row: &'a Row,
}

impl ResultRow<'_> {
    /// Value of `alias.column`; unknown columns read as NULL.
    pub fn get(&self, alias: &str, column: &str) -> Value {
        self.get_label(&format!("{}.{}", alias, column))
    }

    pub fn get_ref(&self, column: &ColumnRef) -> Value {
        self.get_label(&column.label())
    }

    fn get_label(&self, label: &str) -> Value {
        self.rows
            .positions
            .get(label)
            .and_then(|&i| self.row.get(i))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

impl fmt::Display for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return writeln!(f, "Empty result set");
        }

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();
        for row in &self.rows {
            for (i, value) in row.iter().enumerate() {
                widths[i] = widths[i].max(value.to_string().len());
            }
        }

        let header: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{:width$}", col, width = widths[i]))
            .collect();
        writeln!(f, "{}", header.join(" | "))?;

        let separator: String = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-");
        writeln!(f, "{}", separator)?;

        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, val)| format!("{:width$}", val.to_string(), width = widths[i]))
                .collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }

        write!(f, "({} row(s))", self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_by_alias() {
        let rows = Rows::new(
            vec!["t0.id".into(), "t1.id".into()],
            vec![vec![Value::Integer(1), Value::Null]],
        );
        let row = rows.iter().next().unwrap();
        assert_eq!(row.get("t0", "id"), Value::Integer(1));
        assert_eq!(row.get("t1", "id"), Value::Null);
        assert_eq!(row.get("t2", "id"), Value::Null);
        assert!(rows.to_string().contains("(1 row(s))"));
    }
}
