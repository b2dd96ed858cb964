// ============================================================================
// Naming Strategies
// ============================================================================
//
// Pure functions deriving physical names from mapping metadata. Every kind of
// name is a separate trait so that a mapping scope can override one kind and
// inherit the rest. Resolution order: child scope, parent scope, global.
//
// ============================================================================

use std::fmt;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Decapitalizes the way bean accessors do: `FirstName` -> `firstName`,
/// but an acronym prefix (`URL`) is kept as is.
pub fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let second = chars.next();
    if first.is_uppercase() && second.is_some_and(char::is_uppercase) {
        return name.to_string();
    }
    let mut out: String = first.to_lowercase().collect();
    out.push_str(&name[first.len_utf8()..]);
    out
}

pub trait TableNamingStrategy: Send + Sync {
    fn table_name(&self, entity: &str) -> String;
}

pub trait ColumnNamingStrategy: Send + Sync {
    fn column_name(&self, property: &str) -> String;
}

pub trait JoinColumnNamingStrategy: Send + Sync {
    /// Column of the owner table pointing to the target of a to-one relation.
    fn join_column_name(&self, property: &str) -> String;

    /// Column of the target table pointing back to the owner.
    fn reverse_column_name(&self, owner_table: &str, owner_key: &str) -> String;
}

pub trait AssociationTableNamingStrategy: Send + Sync {
    fn table_name(&self, owner_table: &str, property: &str) -> String;

    fn owner_column_name(&self, owner_table: &str, owner_key: &str) -> String;

    fn target_column_name(&self, target_table: &str, target_key: &str, property: &str) -> String;
}

pub trait IndexColumnNamingStrategy: Send + Sync {
    fn index_column_name(&self, property: &str) -> String;
}

/// Both sides of a foreign key, as handed to [`ForeignKeyNamingStrategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    pub table: String,
    pub columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
}

impl ForeignKeyDescriptor {
    fn absolute(table: &str, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| format!("{}.{}", table, c))
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub trait ForeignKeyNamingStrategy: Send + Sync {
    fn foreign_key_name(&self, key: &ForeignKeyDescriptor) -> String;
}

pub trait UniqueKeyNamingStrategy: Send + Sync {
    fn unique_key_name(&self, table: &str, columns: &[String]) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTableNaming;

impl TableNamingStrategy for DefaultTableNaming {
    fn table_name(&self, entity: &str) -> String {
        entity.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultColumnNaming;

impl ColumnNamingStrategy for DefaultColumnNaming {
    fn column_name(&self, property: &str) -> String {
        decapitalize(property)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultJoinColumnNaming;

impl JoinColumnNamingStrategy for DefaultJoinColumnNaming {
    fn join_column_name(&self, property: &str) -> String {
        format!("{}Id", decapitalize(property))
    }

    fn reverse_column_name(&self, owner_table: &str, _owner_key: &str) -> String {
        format!("{}Id", decapitalize(owner_table))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAssociationTableNaming;

impl AssociationTableNamingStrategy for DefaultAssociationTableNaming {
    fn table_name(&self, owner_table: &str, property: &str) -> String {
        format!("{}_{}", owner_table, property)
    }

    fn owner_column_name(&self, owner_table: &str, owner_key: &str) -> String {
        format!("{}_{}", owner_table, owner_key)
    }

    fn target_column_name(&self, target_table: &str, target_key: &str, _property: &str) -> String {
        format!("{}_{}", target_table, target_key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIndexColumnNaming;

impl IndexColumnNamingStrategy for DefaultIndexColumnNaming {
    fn index_column_name(&self, property: &str) -> String {
        format!("{}Idx", decapitalize(property))
    }
}

/// `FK_<table>_<columns>_<targetTable>_<targetColumns>`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadableForeignKeyNaming;

impl ForeignKeyNamingStrategy for ReadableForeignKeyNaming {
    fn foreign_key_name(&self, key: &ForeignKeyDescriptor) -> String {
        format!(
            "FK_{}_{}_{}_{}",
            key.table,
            key.columns.join("_"),
            key.target_table,
            key.target_columns.join("_")
        )
    }
}

/// `FK_` followed by a hash of the absolute column names of both sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedForeignKeyNaming;

impl ForeignKeyNamingStrategy for HashedForeignKeyNaming {
    fn foreign_key_name(&self, key: &ForeignKeyDescriptor) -> String {
        let content = format!(
            "{}->{}",
            ForeignKeyDescriptor::absolute(&key.table, &key.columns),
            ForeignKeyDescriptor::absolute(&key.target_table, &key.target_columns)
        );
        format!("FK_{:016x}", xxh3_64(content.as_bytes()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUniqueKeyNaming;

impl UniqueKeyNamingStrategy for DefaultUniqueKeyNaming {
    fn unique_key_name(&self, table: &str, columns: &[String]) -> String {
        format!("UK_{}_{}", table, columns.join("_"))
    }
}

/// Strategy overrides of one mapping scope. Unset kinds fall back to the
/// enclosing scope.
#[derive(Clone, Default)]
pub struct NamingScope {
    pub table: Option<Arc<dyn TableNamingStrategy>>,
    pub column: Option<Arc<dyn ColumnNamingStrategy>>,
    pub join_column: Option<Arc<dyn JoinColumnNamingStrategy>>,
    pub association_table: Option<Arc<dyn AssociationTableNamingStrategy>>,
    pub index_column: Option<Arc<dyn IndexColumnNamingStrategy>>,
    pub foreign_key: Option<Arc<dyn ForeignKeyNamingStrategy>>,
    pub unique_key: Option<Arc<dyn UniqueKeyNamingStrategy>>,
}

impl NamingScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope defining every kind with the built-in strategies.
    pub fn defaults() -> Self {
        Self {
            table: Some(Arc::new(DefaultTableNaming)),
            column: Some(Arc::new(DefaultColumnNaming)),
            join_column: Some(Arc::new(DefaultJoinColumnNaming)),
            association_table: Some(Arc::new(DefaultAssociationTableNaming)),
            index_column: Some(Arc::new(DefaultIndexColumnNaming)),
            foreign_key: Some(Arc::new(ReadableForeignKeyNaming)),
            unique_key: Some(Arc::new(DefaultUniqueKeyNaming)),
        }
    }

    pub fn with_table(mut self, strategy: impl TableNamingStrategy + 'static) -> Self {
        self.table = Some(Arc::new(strategy));
        self
    }

    pub fn with_column(mut self, strategy: impl ColumnNamingStrategy + 'static) -> Self {
        self.column = Some(Arc::new(strategy));
        self
    }

    pub fn with_join_column(mut self, strategy: impl JoinColumnNamingStrategy + 'static) -> Self {
        self.join_column = Some(Arc::new(strategy));
        self
    }

    pub fn with_association_table(
        mut self,
        strategy: impl AssociationTableNamingStrategy + 'static,
    ) -> Self {
        self.association_table = Some(Arc::new(strategy));
        self
    }

    pub fn with_index_column(mut self, strategy: impl IndexColumnNamingStrategy + 'static) -> Self {
        self.index_column = Some(Arc::new(strategy));
        self
    }

    pub fn with_foreign_key(mut self, strategy: impl ForeignKeyNamingStrategy + 'static) -> Self {
        self.foreign_key = Some(Arc::new(strategy));
        self
    }

    pub fn with_unique_key(mut self, strategy: impl UniqueKeyNamingStrategy + 'static) -> Self {
        self.unique_key = Some(Arc::new(strategy));
        self
    }

    /// This scope layered over `parent`: kinds defined here win.
    pub fn over(&self, parent: &NamingScope) -> NamingScope {
        NamingScope {
            table: self.table.clone().or_else(|| parent.table.clone()),
            column: self.column.clone().or_else(|| parent.column.clone()),
            join_column: self.join_column.clone().or_else(|| parent.join_column.clone()),
            association_table: self
                .association_table
                .clone()
                .or_else(|| parent.association_table.clone()),
            index_column: self.index_column.clone().or_else(|| parent.index_column.clone()),
            foreign_key: self.foreign_key.clone().or_else(|| parent.foreign_key.clone()),
            unique_key: self.unique_key.clone().or_else(|| parent.unique_key.clone()),
        }
    }

    /// Fully resolved strategies; kinds still unset after layering use the
    /// built-in defaults.
    pub fn resolve(&self) -> Naming {
        let defaults = NamingScope::defaults();
        let full = self.over(&defaults);
        Naming {
            table: full.table.unwrap_or_else(|| Arc::new(DefaultTableNaming)),
            column: full.column.unwrap_or_else(|| Arc::new(DefaultColumnNaming)),
            join_column: full
                .join_column
                .unwrap_or_else(|| Arc::new(DefaultJoinColumnNaming)),
            association_table: full
                .association_table
                .unwrap_or_else(|| Arc::new(DefaultAssociationTableNaming)),
            index_column: full
                .index_column
                .unwrap_or_else(|| Arc::new(DefaultIndexColumnNaming)),
            foreign_key: full
                .foreign_key
                .unwrap_or_else(|| Arc::new(ReadableForeignKeyNaming)),
            unique_key: full
                .unique_key
                .unwrap_or_else(|| Arc::new(DefaultUniqueKeyNaming)),
        }
    }
}

impl fmt::Debug for NamingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingScope")
            .field("table", &self.table.is_some())
            .field("column", &self.column.is_some())
            .field("join_column", &self.join_column.is_some())
            .field("association_table", &self.association_table.is_some())
            .field("index_column", &self.index_column.is_some())
            .field("foreign_key", &self.foreign_key.is_some())
            .field("unique_key", &self.unique_key.is_some())
            .finish()
    }
}

/// Resolved strategies for one mapping scope.
#[derive(Clone)]
pub struct Naming {
    pub table: Arc<dyn TableNamingStrategy>,
    pub column: Arc<dyn ColumnNamingStrategy>,
    pub join_column: Arc<dyn JoinColumnNamingStrategy>,
    pub association_table: Arc<dyn AssociationTableNamingStrategy>,
    pub index_column: Arc<dyn IndexColumnNamingStrategy>,
    pub foreign_key: Arc<dyn ForeignKeyNamingStrategy>,
    pub unique_key: Arc<dyn UniqueKeyNamingStrategy>,
}

impl fmt::Debug for Naming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Naming { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperColumns;

    impl ColumnNamingStrategy for UpperColumns {
        fn column_name(&self, property: &str) -> String {
            property.to_uppercase()
        }
    }

    struct PrefixedTables(&'static str);

    impl TableNamingStrategy for PrefixedTables {
        fn table_name(&self, entity: &str) -> String {
            format!("{}{}", self.0, entity)
        }
    }

    fn key(table: &str, column: &str, target: &str, target_column: &str) -> ForeignKeyDescriptor {
        ForeignKeyDescriptor {
            table: table.into(),
            columns: vec![column.into()],
            target_table: target.into(),
            target_columns: vec![target_column.into()],
        }
    }

    #[test]
    fn test_decapitalize() {
        assert_eq!(decapitalize("FirstName"), "firstName");
        assert_eq!(decapitalize("name"), "name");
        assert_eq!(decapitalize("URL"), "URL");
        assert_eq!(decapitalize(""), "");
    }

    #[test]
    fn test_default_names() {
        let naming = NamingScope::new().resolve();
        assert_eq!(naming.column.column_name("Name"), "name");
        assert_eq!(naming.join_column.join_column_name("country"), "countryId");
        assert_eq!(naming.association_table.table_name("Person", "phones"), "Person_phones");
        assert_eq!(naming.index_column.index_column_name("phones"), "phonesIdx");
        assert_eq!(
            naming.foreign_key.foreign_key_name(&key("Person", "countryId", "Country", "id")),
            "FK_Person_countryId_Country_id"
        );
    }

    #[test]
    fn test_child_scope_wins_over_parent() {
        let global = NamingScope::defaults().with_table(PrefixedTables("T_"));
        let parent = NamingScope::new().with_column(UpperColumns);
        let child = NamingScope::new().with_table(PrefixedTables("C_"));

        let naming = child.over(&parent).over(&global).resolve();
        assert_eq!(naming.table.table_name("Person"), "C_Person");
        assert_eq!(naming.column.column_name("name"), "NAME");

        let naming = parent.over(&global).resolve();
        assert_eq!(naming.table.table_name("Person"), "T_Person");
    }

    #[test]
    fn test_hashed_key_differs_when_tables_differ() {
        let hashed = HashedForeignKeyNaming;
        // Same local column names, different owning tables.
        let a = hashed.foreign_key_name(&key("Car", "ownerId", "Person", "id"));
        let b = hashed.foreign_key_name(&key("Truck", "ownerId", "Person", "id"));
        let c = hashed.foreign_key_name(&key("Car", "ownerId", "Company", "id"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, hashed.foreign_key_name(&key("Car", "ownerId", "Person", "id")));
        assert!(a.starts_with("FK_"));
    }
}
