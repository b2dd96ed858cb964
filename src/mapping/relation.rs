use super::EmbeddableMapping;
use crate::core::DataType;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    pub fn is_to_many(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKind::OneToOne => write!(f, "one-to-one"),
            RelationKind::ManyToOne => write!(f, "many-to-one"),
            RelationKind::OneToMany => write!(f, "one-to-many"),
            RelationKind::ManyToMany => write!(f, "many-to-many"),
        }
    }
}

/// How owner operations propagate to the related entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationMode {
    /// Nothing is written through the relation. Targets must already exist.
    ReadOnly,
    /// Only association rows are maintained, targets are never touched.
    AssociationOnly,
    /// Inserts, updates and deletes cascade; targets removed from the
    /// relation are detached and kept.
    #[default]
    All,
    /// As `All`, but targets removed from the relation are deleted.
    AllOrphanRemoval,
}

impl fmt::Display for RelationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationMode::ReadOnly => write!(f, "READ_ONLY"),
            RelationMode::AssociationOnly => write!(f, "ASSOCIATION_ONLY"),
            RelationMode::All => write!(f, "ALL"),
            RelationMode::AllOrphanRemoval => write!(f, "ALL_ORPHAN_REMOVAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionKind {
    #[default]
    Set,
    List,
}

/// Relation from one entity property to another mapped entity.
#[derive(Debug, Clone)]
pub struct RelationMapping {
    pub(crate) property: String,
    pub(crate) target: String,
    pub(crate) kind: RelationKind,
    pub(crate) mode: RelationMode,
    pub(crate) collection: CollectionKind,
    pub(crate) index_column: Option<String>,
    pub(crate) allow_duplicates: bool,
    pub(crate) mapped_by: Option<String>,
    pub(crate) reverse_column: Option<String>,
    pub(crate) join_column: Option<String>,
    pub(crate) association_table: Option<String>,
    pub(crate) mandatory: bool,
}

impl RelationMapping {
    fn new(property: &str, target: &str, kind: RelationKind) -> Self {
        Self {
            property: property.to_string(),
            target: target.to_string(),
            kind,
            mode: RelationMode::default(),
            collection: CollectionKind::default(),
            index_column: None,
            allow_duplicates: false,
            mapped_by: None,
            reverse_column: None,
            join_column: None,
            association_table: None,
            mandatory: false,
        }
    }

    pub fn one_to_one(property: &str, target: &str) -> Self {
        Self::new(property, target, RelationKind::OneToOne)
    }

    pub fn many_to_one(property: &str, target: &str) -> Self {
        Self::new(property, target, RelationKind::ManyToOne)
    }

    pub fn one_to_many(property: &str, target: &str) -> Self {
        Self::new(property, target, RelationKind::OneToMany)
    }

    pub fn many_to_many(property: &str, target: &str) -> Self {
        Self::new(property, target, RelationKind::ManyToMany)
    }

    pub fn mode(mut self, mode: RelationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Ordered collection with an index column.
    pub fn list(mut self) -> Self {
        self.collection = CollectionKind::List;
        self
    }

    /// Ordered collection with an explicitly named index column.
    pub fn indexed_by(mut self, column: &str) -> Self {
        self.collection = CollectionKind::List;
        self.index_column = Some(column.to_string());
        self
    }

    /// Lets a list hold the same target several times. Association rows are
    /// then keyed by owner and index.
    pub fn allow_duplicates(mut self) -> Self {
        self.collection = CollectionKind::List;
        self.allow_duplicates = true;
        self
    }

    /// The target table holds the key: `property` is the target's reference
    /// back to the owner, set when loading.
    pub fn mapped_by(mut self, property: &str) -> Self {
        self.mapped_by = Some(property.to_string());
        self
    }

    /// The target table holds the key, in `column`.
    pub fn reverse_column(mut self, column: &str) -> Self {
        self.reverse_column = Some(column.to_string());
        self
    }

    pub fn join_column(mut self, column: &str) -> Self {
        self.join_column = Some(column.to_string());
        self
    }

    pub fn association_table(mut self, table: &str) -> Self {
        self.association_table = Some(table.to_string());
        self
    }

    /// Null references are rejected at insert and update time.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn target_owned(&self) -> bool {
        self.mapped_by.is_some() || self.reverse_column.is_some()
    }
}

/// Element type of an element collection.
#[derive(Debug, Clone)]
pub enum ElementKind {
    Value {
        data_type: DataType,
        column: Option<String>,
    },
    Record(EmbeddableMapping),
}

/// Collection of values or value objects stored in a table of its own.
#[derive(Debug, Clone)]
pub struct ElementCollectionMapping {
    pub(crate) property: String,
    pub(crate) element: ElementKind,
    pub(crate) table: Option<String>,
    pub(crate) owner_column: Option<String>,
    pub(crate) collection: CollectionKind,
    pub(crate) index_column: Option<String>,
}

impl ElementCollectionMapping {
    pub fn values(property: &str, data_type: DataType) -> Self {
        Self::new(property, ElementKind::Value {
            data_type,
            column: None,
        })
    }

    pub fn records(property: &str, embeddable: EmbeddableMapping) -> Self {
        Self::new(property, ElementKind::Record(embeddable))
    }

    fn new(property: &str, element: ElementKind) -> Self {
        Self {
            property: property.to_string(),
            element,
            table: None,
            owner_column: None,
            collection: CollectionKind::default(),
            index_column: None,
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Column of single-value elements.
    pub fn element_column(mut self, column: &str) -> Self {
        if let ElementKind::Value { column: c, .. } = &mut self.element {
            *c = Some(column.to_string());
        }
        self
    }

    pub fn owner_column(mut self, column: &str) -> Self {
        self.owner_column = Some(column.to_string());
        self
    }

    pub fn list(mut self) -> Self {
        self.collection = CollectionKind::List;
        self
    }

    pub fn indexed_by(mut self, column: &str) -> Self {
        self.collection = CollectionKind::List;
        self.index_column = Some(column.to_string());
        self
    }
}

/// Key/value map stored in a table of its own.
#[derive(Debug, Clone)]
pub struct MapMapping {
    pub(crate) property: String,
    pub(crate) key_type: DataType,
    pub(crate) value_type: DataType,
    pub(crate) table: Option<String>,
    pub(crate) owner_column: Option<String>,
    pub(crate) key_column: String,
    pub(crate) value_column: String,
}

impl MapMapping {
    pub fn new(property: &str, key_type: DataType, value_type: DataType) -> Self {
        Self {
            property: property.to_string(),
            key_type,
            value_type,
            table: None,
            owner_column: None,
            key_column: "key".to_string(),
            value_column: "value".to_string(),
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn owner_column(mut self, column: &str) -> Self {
        self.owner_column = Some(column.to_string());
        self
    }

    pub fn key_column(mut self, column: &str) -> Self {
        self.key_column = column.to_string();
        self
    }

    pub fn value_column(mut self, column: &str) -> Self {
        self.value_column = column.to_string();
        self
    }
}
