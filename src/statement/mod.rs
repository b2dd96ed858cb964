// ============================================================================
// Structured statements
// ============================================================================
//
// Persisters never build SQL text: they hand these values to a `Connection`.
// A dialect renders them to text for logging or for a SQL backend.
//
// ============================================================================

use crate::core::Value;
use crate::schema::Table;

/// Predicate on one column. Statements AND their conditions together.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
}

impl Condition {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Condition::Eq(column.to_string(), value.into())
    }

    pub fn is_in(column: &str, values: Vec<Value>) -> Self {
        Condition::In(column.to_string(), values)
    }

    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(c, _) | Condition::In(c, _) | Condition::IsNull(c) => c,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            // NULL never equals anything, as in SQL
            Condition::Eq(_, expected) => !value.is_null() && value == expected,
            Condition::In(_, candidates) => !value.is_null() && candidates.contains(value),
            Condition::IsNull(_) => value.is_null(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<(String, Value)>,
}

impl Insert {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.push((column.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub set: Vec<(String, Value)>,
    pub conditions: Vec<Condition>,
}

impl Update {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            set: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set.push((column.to_string(), value.into()));
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub conditions: Vec<Condition>,
}

impl Delete {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            conditions: Vec::new(),
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    CreateTable(Table),
    CreateSequence { name: String, start: i64, increment: i64 },
}

impl Statement {
    /// Table the statement writes to, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Insert(i) => Some(&i.table),
            Statement::Update(u) => Some(&u.table),
            Statement::Delete(d) => Some(&d.table),
            Statement::CreateTable(t) => Some(t.name()),
            Statement::CreateSequence { .. } => None,
        }
    }
}

impl From<Insert> for Statement {
    fn from(i: Insert) -> Self {
        Statement::Insert(i)
    }
}

impl From<Update> for Statement {
    fn from(u: Update) -> Self {
        Statement::Update(u)
    }
}

impl From<Delete> for Statement {
    fn from(d: Delete) -> Self {
        Statement::Delete(d)
    }
}

/// Result of a write: affected row count plus auto-generated keys, in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub affected: usize,
    pub generated_keys: Vec<Value>,
}

impl ExecutionOutcome {
    pub fn affected(affected: usize) -> Self {
        Self {
            affected,
            generated_keys: Vec::new(),
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Column of an aliased table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: &str, column: &str) -> Self {
        Self {
            alias: alias.to_string(),
            column: column.to_string(),
        }
    }

    /// `alias.column`, the label of the column in [`crate::result::Rows`].
    pub fn label(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    /// Equality pairs: (column of an earlier alias, column of this alias)
    pub on: Vec<(ColumnRef, ColumnRef)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub alias: String,
    pub joins: Vec<Join>,
    pub columns: Vec<ColumnRef>,
    pub filters: Vec<(String, Condition)>,
    pub order_by: Vec<ColumnRef>,
}

impl Select {
    pub fn from(table: &str, alias: &str) -> Self {
        Self {
            table: table.to_string(),
            alias: alias.to_string(),
            joins: Vec::new(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn column(mut self, alias: &str, column: &str) -> Self {
        self.columns.push(ColumnRef::new(alias, column));
        self
    }

    pub fn columns<'a>(mut self, alias: &str, columns: impl IntoIterator<Item = &'a str>) -> Self {
        for column in columns {
            self.columns.push(ColumnRef::new(alias, column));
        }
        self
    }

    pub fn filter(mut self, alias: &str, condition: Condition) -> Self {
        self.filters.push((alias.to_string(), condition));
        self
    }

    pub fn order_by(mut self, alias: &str, column: &str) -> Self {
        self.order_by.push(ColumnRef::new(alias, column));
        self
    }
}
