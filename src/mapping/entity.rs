use super::{
    ElementCollectionMapping, EmbeddableMapping, EmbeddedMapping, IdentifierMapping, MapMapping,
    PropertyMapping, RelationMapping, VersionMapping,
};
use crate::core::{ConfigurationError, DataType};
use crate::naming::NamingScope;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolymorphismKind {
    SingleTable,
    JoinedTables,
    TablePerClass,
}

impl fmt::Display for PolymorphismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolymorphismKind::SingleTable => write!(f, "single-table"),
            PolymorphismKind::JoinedTables => write!(f, "joined-tables"),
            PolymorphismKind::TablePerClass => write!(f, "table-per-class"),
        }
    }
}

/// Sub-entity of a polymorphic entity.
#[derive(Debug, Clone)]
pub struct SubEntity {
    pub(crate) mapping: EntityMapping,
    pub(crate) discriminator: Option<String>,
}

/// How the sub-entities of an entity are laid out in tables.
#[derive(Debug, Clone)]
pub struct PolymorphismPolicy {
    pub(crate) kind: PolymorphismKind,
    pub(crate) discriminator_column: Option<String>,
    pub(crate) subclasses: Vec<SubEntity>,
}

impl PolymorphismPolicy {
    /// Every sub-entity shares the parent's table, told apart by a
    /// discriminator column (`DTYPE` unless renamed).
    pub fn single_table() -> Self {
        Self::new(PolymorphismKind::SingleTable)
    }

    /// Each sub-entity has its own table holding its own properties, joined
    /// to the parent table on the identifier.
    pub fn joined_tables() -> Self {
        Self::new(PolymorphismKind::JoinedTables)
    }

    /// Each sub-entity has a table holding all of its properties, inherited
    /// ones included. The parent has no table.
    pub fn table_per_class() -> Self {
        Self::new(PolymorphismKind::TablePerClass)
    }

    fn new(kind: PolymorphismKind) -> Self {
        Self {
            kind,
            discriminator_column: None,
            subclasses: Vec::new(),
        }
    }

    pub fn discriminator(mut self, column: &str) -> Self {
        self.discriminator_column = Some(column.to_string());
        self
    }

    /// Sub-entity; under single-table its discriminator value is its entity name.
    pub fn subclass(mut self, mapping: EntityMapping) -> Self {
        self.subclasses.push(SubEntity {
            mapping,
            discriminator: None,
        });
        self
    }

    pub fn discriminated(mut self, mapping: EntityMapping, value: &str) -> Self {
        self.subclasses.push(SubEntity {
            mapping,
            discriminator: Some(value.to_string()),
        });
        self
    }

    pub fn kind(&self) -> PolymorphismKind {
        self.kind
    }
}

/// Entity inherited through `inherits`.
#[derive(Debug, Clone)]
pub(crate) struct Inheritance {
    pub mapping: EntityMapping,
    pub joined: bool,
}

/// Persistent shape of one entity type.
///
/// ```
/// use relmap::prelude::*;
///
/// let mapping = EntityMapping::new("Person")
///     .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::AutoIncrement))
///     .with_property("name", DataType::Text)
///     .relation(RelationMapping::many_to_one("country", "Country"));
/// assert_eq!(mapping.entity(), "Person");
/// ```
#[derive(Debug, Clone)]
pub struct EntityMapping {
    pub(crate) entity: String,
    pub(crate) table: Option<String>,
    pub(crate) identifier: Option<IdentifierMapping>,
    pub(crate) properties: Vec<PropertyMapping>,
    pub(crate) embedded: Vec<EmbeddedMapping>,
    pub(crate) relations: Vec<RelationMapping>,
    pub(crate) element_collections: Vec<ElementCollectionMapping>,
    pub(crate) maps: Vec<MapMapping>,
    pub(crate) mapped_super_class: Option<EmbeddableMapping>,
    pub(crate) parent: Option<Box<Inheritance>>,
    pub(crate) polymorphism: Option<PolymorphismPolicy>,
    pub(crate) version: Option<VersionMapping>,
    pub(crate) naming: NamingScope,
    pub(crate) issues: Vec<ConfigurationError>,
}

impl EntityMapping {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            table: None,
            identifier: None,
            properties: Vec::new(),
            embedded: Vec::new(),
            relations: Vec::new(),
            element_collections: Vec::new(),
            maps: Vec::new(),
            mapped_super_class: None,
            parent: None,
            polymorphism: None,
            version: None,
            naming: NamingScope::new(),
            issues: Vec::new(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn identifier(mut self, identifier: IdentifierMapping) -> Self {
        if self.identifier.is_some() {
            self.issues.push(ConfigurationError::IdentifierRedefinition {
                entity: self.entity.clone(),
                defined_by: self.entity.clone(),
            });
            return self;
        }
        if self.claim(&identifier.property) {
            self.identifier = Some(identifier);
        }
        self
    }

    pub fn property(mut self, property: PropertyMapping) -> Self {
        if self.claim(&property.name) {
            self.properties.push(property);
        }
        self
    }

    pub fn with_property(self, name: &str, data_type: DataType) -> Self {
        self.property(PropertyMapping::new(name, data_type))
    }

    /// Renames the column of an already mapped property.
    pub fn override_column(mut self, property: &str, column: &str) -> Self {
        match self.properties.iter_mut().find(|p| p.name == property) {
            Some(mapping) => mapping.column = Some(column.to_string()),
            None => self.unknown(property),
        }
        self
    }

    /// Replaces the mapping of an already mapped property.
    pub fn override_property(mut self, property: PropertyMapping) -> Self {
        match self.properties.iter_mut().find(|p| p.name == property.name) {
            Some(mapping) => *mapping = property,
            None => self.unknown(&property.name),
        }
        self
    }

    pub fn embed(mut self, embedded: EmbeddedMapping) -> Self {
        if self.claim(&embedded.property) {
            self.embedded.push(embedded);
        }
        self
    }

    pub fn relation(mut self, relation: RelationMapping) -> Self {
        if self.claim(&relation.property) {
            self.relations.push(relation);
        }
        self
    }

    pub fn element_collection(mut self, collection: ElementCollectionMapping) -> Self {
        if self.claim(&collection.property) {
            self.element_collections.push(collection);
        }
        self
    }

    pub fn map_collection(mut self, map: MapMapping) -> Self {
        if self.claim(&map.property) {
            self.maps.push(map);
        }
        self
    }

    /// Merges the properties of a non-entity super type into this entity.
    pub fn mapped_super_class(mut self, super_class: EmbeddableMapping) -> Self {
        for property in &super_class.properties {
            self.claim(&property.name);
        }
        self.mapped_super_class = Some(super_class);
        self
    }

    /// Inherits `parent`'s identifier and properties. A joined parent keeps
    /// its own table, inner-joined on the identifier; otherwise its columns
    /// are merged into this entity's table.
    pub fn inherits(mut self, parent: EntityMapping, joined: bool) -> Self {
        self.parent = Some(Box::new(Inheritance {
            mapping: parent,
            joined,
        }));
        self
    }

    pub fn polymorphism(mut self, policy: PolymorphismPolicy) -> Self {
        self.polymorphism = Some(policy);
        self
    }

    pub fn version(mut self, version: VersionMapping) -> Self {
        if self.claim(&version.property) {
            self.version = Some(version);
        }
        self
    }

    pub fn naming(mut self, naming: NamingScope) -> Self {
        self.naming = naming;
        self
    }

    fn mapped_names(&self) -> impl Iterator<Item = &str> {
        let identifier = self.identifier.iter().map(|i| i.property.as_str());
        let version = self.version.iter().map(|v| v.property.as_str());
        let super_class = self
            .mapped_super_class
            .iter()
            .flat_map(|s| s.properties.iter().map(|p| p.name.as_str()));
        identifier
            .chain(version)
            .chain(super_class)
            .chain(self.properties.iter().map(|p| p.name.as_str()))
            .chain(self.embedded.iter().map(|e| e.property.as_str()))
            .chain(self.relations.iter().map(|r| r.property.as_str()))
            .chain(self.element_collections.iter().map(|c| c.property.as_str()))
            .chain(self.maps.iter().map(|m| m.property.as_str()))
    }

    /// Whether `property` names a mapped relation of this entity.
    pub(crate) fn maps_relation(&self, property: &str) -> bool {
        self.relations.iter().any(|r| r.property == property)
    }

    fn claim(&mut self, property: &str) -> bool {
        if self.mapped_names().any(|name| name == property) {
            self.issues.push(ConfigurationError::DuplicateProperty {
                entity: self.entity.clone(),
                property: property.to_string(),
            });
            return false;
        }
        true
    }

    fn unknown(&mut self, property: &str) {
        self.issues.push(ConfigurationError::UnknownProperty {
            entity: self.entity.clone(),
            property: property.to_string(),
        });
    }

    /// First declaration mistake of this mapping, its embeddables, its
    /// ancestors or its sub-entities.
    pub(crate) fn first_issue(&self) -> Option<ConfigurationError> {
        if let Some(issue) = self.issues.first() {
            return Some(issue.clone());
        }
        let embeddables = self
            .embedded
            .iter()
            .map(|e| &e.embeddable)
            .chain(self.mapped_super_class.iter());
        for embeddable in embeddables {
            if let Some(issue) = embeddable.issues.first() {
                return Some(issue.clone());
            }
        }
        if let Some(issue) = self
            .parent
            .as_ref()
            .and_then(|p| p.mapping.first_issue())
        {
            return Some(issue);
        }
        self.polymorphism
            .iter()
            .flat_map(|p| p.subclasses.iter())
            .find_map(|s| s.mapping.first_issue())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persister::identifier::IdentifierPolicy;

    fn person() -> EntityMapping {
        EntityMapping::new("Person")
            .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::AutoIncrement))
            .with_property("name", DataType::Text)
    }

    #[test]
    fn test_duplicate_property_is_recorded() {
        let mapping = person().with_property("name", DataType::Text);
        assert_eq!(
            mapping.first_issue(),
            Some(ConfigurationError::DuplicateProperty {
                entity: "Person".into(),
                property: "name".into(),
            })
        );
    }

    #[test]
    fn test_override_column_needs_a_mapped_property() {
        let mapping = person().override_column("name", "full_name");
        assert!(mapping.first_issue().is_none());
        assert_eq!(mapping.properties[0].column.as_deref(), Some("full_name"));

        let mapping = person().override_column("age", "years");
        assert!(matches!(
            mapping.first_issue(),
            Some(ConfigurationError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_identifier_defined_twice() {
        let mapping = person()
            .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::AutoIncrement));
        assert!(matches!(
            mapping.first_issue(),
            Some(ConfigurationError::IdentifierRedefinition { .. })
        ));
    }

    #[test]
    fn test_issues_of_sub_entities_surface() {
        let mapping = person().polymorphism(
            PolymorphismPolicy::single_table().subclass(
                EntityMapping::new("Employee")
                    .with_property("salary", DataType::Float)
                    .with_property("salary", DataType::Float),
            ),
        );
        assert!(matches!(
            mapping.first_issue(),
            Some(ConfigurationError::DuplicateProperty { entity, .. }) if entity == "Employee"
        ));
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(PolymorphismKind::SingleTable.to_string(), "single-table");
        assert_eq!(PolymorphismKind::JoinedTables.to_string(), "joined-tables");
        assert_eq!(PolymorphismKind::TablePerClass.to_string(), "table-per-class");
    }
}
