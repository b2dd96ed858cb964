use super::{Column, Sequence, Table};
use crate::core::{DataType, Value};
use crate::statement::{Condition, JoinKind, Select, Statement};
use std::collections::HashMap;

/// SQL text generation. Used for DDL scripts and statement logging.
pub trait Dialect: Send + Sync {
    fn sql_type(&self, data_type: DataType) -> String;

    /// Whether `table.column` has a registered type overriding [`Dialect::sql_type`].
    fn has_column_type(&self, table: &str, column: &str) -> bool;

    fn column_type(&self, table: &str, column: &Column) -> String;

    fn create_table(&self, table: &Table) -> String;

    fn create_sequence(&self, sequence: &Sequence) -> String {
        format!(
            "CREATE SEQUENCE {} START WITH {} INCREMENT BY {}",
            sequence.name, sequence.start, sequence.increment
        )
    }

    fn render(&self, statement: &Statement) -> String;

    fn render_select(&self, select: &Select) -> String;
}

/// Plain ANSI SQL rendering.
#[derive(Debug, Clone, Default)]
pub struct AnsiDialect {
    column_types: HashMap<(String, String), String>,
}

impl AnsiDialect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the SQL type of one column, e.g. `VARCHAR(32)` for a code column.
    pub fn register_column_type(mut self, table: &str, column: &str, sql_type: &str) -> Self {
        self.column_types
            .insert((table.to_string(), column.to_string()), sql_type.to_string());
        self
    }

    fn render_condition(condition: &Condition, alias: Option<&str>) -> String {
        let qualify = |c: &str| match alias {
            Some(a) => format!("{}.{}", a, c),
            None => c.to_string(),
        };
        match condition {
            Condition::Eq(c, v) => format!("{} = {}", qualify(c), v),
            Condition::In(c, values) => format!(
                "{} IN ({})",
                qualify(c),
                values.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
            ),
            Condition::IsNull(c) => format!("{} IS NULL", qualify(c)),
        }
    }

    fn render_where(conditions: &[Condition]) -> String {
        if conditions.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = conditions
            .iter()
            .map(|c| Self::render_condition(c, None))
            .collect();
        format!(" WHERE {}", parts.join(" AND "))
    }
}

impl Dialect for AnsiDialect {
    fn sql_type(&self, data_type: DataType) -> String {
        match data_type {
            DataType::Integer => "BIGINT",
            DataType::Float => "DOUBLE PRECISION",
            DataType::Text => "VARCHAR(255)",
            DataType::Boolean => "BOOLEAN",
            DataType::Timestamp => "TIMESTAMP",
        }
        .to_string()
    }

    fn has_column_type(&self, table: &str, column: &str) -> bool {
        self.column_types
            .contains_key(&(table.to_string(), column.to_string()))
    }

    fn column_type(&self, table: &str, column: &Column) -> String {
        self.column_types
            .get(&(table.to_string(), column.name.clone()))
            .cloned()
            .unwrap_or_else(|| self.sql_type(column.data_type))
    }

    fn create_table(&self, table: &Table) -> String {
        let mut parts: Vec<String> = table
            .columns()
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", c.name, self.column_type(table.name(), c));
                if c.auto_increment {
                    def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
                }
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();
        if !table.primary_key().is_empty() {
            parts.push(format!("PRIMARY KEY ({})", table.primary_key().join(", ")));
        }
        for unique in table.unique_constraints() {
            parts.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                unique.name,
                unique.columns.join(", ")
            ));
        }
        for key in table.foreign_keys() {
            parts.push(format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
                key.name,
                key.columns.join(", "),
                key.target_table,
                key.target_columns.join(", ")
            ));
        }
        format!("CREATE TABLE {} ({})", table.name(), parts.join(", "))
    }

    fn render(&self, statement: &Statement) -> String {
        match statement {
            Statement::Insert(insert) => {
                let columns: Vec<&str> = insert.values.iter().map(|(c, _)| c.as_str()).collect();
                let values: Vec<String> = insert.values.iter().map(|(_, v)| v.to_string()).collect();
                format!(
                    "INSERT INTO {}({}) VALUES ({})",
                    insert.table,
                    columns.join(", "),
                    values.join(", ")
                )
            }
            Statement::Update(update) => {
                let set: Vec<String> = update
                    .set
                    .iter()
                    .map(|(c, v)| format!("{} = {}", c, v))
                    .collect();
                format!(
                    "UPDATE {} SET {}{}",
                    update.table,
                    set.join(", "),
                    Self::render_where(&update.conditions)
                )
            }
            Statement::Delete(delete) => format!(
                "DELETE FROM {}{}",
                delete.table,
                Self::render_where(&delete.conditions)
            ),
            Statement::CreateTable(table) => self.create_table(table),
            Statement::CreateSequence {
                name,
                start,
                increment,
            } => self.create_sequence(&Sequence {
                name: name.clone(),
                start: *start,
                increment: *increment,
            }),
        }
    }

    fn render_select(&self, select: &Select) -> String {
        let columns: Vec<String> = select
            .columns
            .iter()
            .map(|c| format!("{}.{} AS {}_{}", c.alias, c.column, c.alias, c.column))
            .collect();
        let mut sql = format!(
            "SELECT {} FROM {} {}",
            columns.join(", "),
            select.table,
            select.alias
        );
        for join in &select.joins {
            let kind = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::LeftOuter => "LEFT OUTER JOIN",
            };
            let on: Vec<String> = join
                .on
                .iter()
                .map(|(l, r)| format!("{}.{} = {}.{}", l.alias, l.column, r.alias, r.column))
                .collect();
            sql.push_str(&format!(" {} {} {} ON {}", kind, join.table, join.alias, on.join(" AND ")));
        }
        if !select.filters.is_empty() {
            let filters: Vec<String> = select
                .filters
                .iter()
                .map(|(alias, c)| Self::render_condition(c, Some(alias)))
                .collect();
            sql.push_str(&format!(" WHERE {}", filters.join(" AND ")));
        }
        if !select.order_by.is_empty() {
            let order: Vec<String> = select
                .order_by
                .iter()
                .map(|c| format!("{}.{}", c.alias, c.column))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        sql
    }
}
