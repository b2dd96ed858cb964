use crate::core::{ConfigurationError, DataType, Value};
use crate::naming::NamingScope;
use crate::persister::identifier::IdentifierPolicy;
use chrono::{Duration, Utc};
use std::fmt;
use std::sync::Arc;

/// One simple property persisted in a column of its owner's table.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMapping {
    pub(crate) name: String,
    pub(crate) data_type: DataType,
    pub(crate) column: Option<String>,
    pub(crate) mandatory: bool,
    pub(crate) nullable: bool,
    pub(crate) unique: bool,
}

impl PropertyMapping {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            column: None,
            mandatory: false,
            nullable: true,
            unique: false,
        }
    }

    /// Explicit column name, bypassing the column naming strategy.
    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    /// NOT NULL column plus a null check before insert and update.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// Named set of properties persisted inside the owner's table. Used for
/// embedded value objects and for mapped super classes.
#[derive(Debug, Clone, Default)]
pub struct EmbeddableMapping {
    pub(crate) name: String,
    pub(crate) properties: Vec<PropertyMapping>,
    pub(crate) naming: NamingScope,
    pub(crate) issues: Vec<ConfigurationError>,
}

impl EmbeddableMapping {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn property(mut self, property: PropertyMapping) -> Self {
        if self.properties.iter().any(|p| p.name == property.name) {
            self.issues.push(ConfigurationError::DuplicateProperty {
                entity: self.name.clone(),
                property: property.name.clone(),
            });
            return self;
        }
        self.properties.push(property);
        self
    }

    pub fn with_property(self, name: &str, data_type: DataType) -> Self {
        self.property(PropertyMapping::new(name, data_type))
    }

    /// Naming strategies of this embeddable, layered over the owner's.
    pub fn naming(mut self, naming: NamingScope) -> Self {
        self.naming = naming;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyMapping] {
        &self.properties
    }
}

/// An embeddable used by one entity property, with per-sub-property column
/// renames and exclusions.
#[derive(Debug, Clone)]
pub struct EmbeddedMapping {
    pub(crate) property: String,
    pub(crate) embeddable: EmbeddableMapping,
    pub(crate) column_overrides: Vec<(String, String)>,
    pub(crate) excluded: Vec<String>,
}

impl EmbeddedMapping {
    pub fn new(property: &str, embeddable: EmbeddableMapping) -> Self {
        Self {
            property: property.to_string(),
            embeddable,
            column_overrides: Vec::new(),
            excluded: Vec::new(),
        }
    }

    pub fn override_column(mut self, sub_property: &str, column: &str) -> Self {
        self.column_overrides
            .push((sub_property.to_string(), column.to_string()));
        self
    }

    pub fn exclude(mut self, sub_property: &str) -> Self {
        self.excluded.push(sub_property.to_string());
        self
    }

    pub(crate) fn column_override(&self, sub_property: &str) -> Option<&str> {
        self.column_overrides
            .iter()
            .find(|(p, _)| p == sub_property)
            .map(|(_, c)| c.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct IdentifierMapping {
    pub(crate) property: String,
    pub(crate) data_type: DataType,
    pub(crate) column: Option<String>,
    pub(crate) policy: IdentifierPolicy,
}

impl IdentifierMapping {
    /// Identifier named `id`.
    pub fn new(data_type: DataType, policy: IdentifierPolicy) -> Self {
        Self::named("id", data_type, policy)
    }

    pub fn named(property: &str, data_type: DataType, policy: IdentifierPolicy) -> Self {
        Self {
            property: property.to_string(),
            data_type,
            column: None,
            policy,
        }
    }

    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn policy(&self) -> &IdentifierPolicy {
        &self.policy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    Counter,
    Timestamp,
}

type VersionGenerator = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Optimistic lock property.
#[derive(Clone)]
pub struct VersionMapping {
    pub(crate) property: String,
    pub(crate) kind: VersionKind,
    pub(crate) column: Option<String>,
    pub(crate) generator: Option<VersionGenerator>,
}

impl VersionMapping {
    /// Integer counter starting at 1.
    pub fn counter(property: &str) -> Self {
        Self {
            property: property.to_string(),
            kind: VersionKind::Counter,
            column: None,
            generator: None,
        }
    }

    pub fn timestamp(property: &str) -> Self {
        Self {
            property: property.to_string(),
            kind: VersionKind::Timestamp,
            column: None,
            generator: None,
        }
    }

    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    /// Replaces the default `old -> new` generator.
    pub fn next(mut self, generator: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub(crate) fn data_type(&self) -> DataType {
        match self.kind {
            VersionKind::Counter => DataType::Integer,
            VersionKind::Timestamp => DataType::Timestamp,
        }
    }

    pub(crate) fn initial(&self) -> Value {
        match self.kind {
            VersionKind::Counter => Value::Integer(1),
            VersionKind::Timestamp => Value::Timestamp(Utc::now()),
        }
    }

    pub(crate) fn next_value(&self, current: &Value) -> Value {
        if let Some(generator) = &self.generator {
            return generator(current);
        }
        match self.kind {
            VersionKind::Counter => Value::Integer(current.as_i64().unwrap_or(0) + 1),
            VersionKind::Timestamp => {
                let now = Utc::now();
                match current.as_timestamp() {
                    // Strictly increasing even when the clock did not move
                    Some(previous) if now <= previous => {
                        Value::Timestamp(previous + Duration::microseconds(1))
                    }
                    _ => Value::Timestamp(now),
                }
            }
        }
    }
}

impl fmt::Debug for VersionMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionMapping")
            .field("property", &self.property)
            .field("kind", &self.kind)
            .field("column", &self.column)
            .field("custom_generator", &self.generator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddable_rejects_duplicates() {
        let embeddable = EmbeddableMapping::new("Address")
            .with_property("city", DataType::Text)
            .with_property("city", DataType::Text);
        assert_eq!(embeddable.properties().len(), 1);
        assert!(matches!(
            embeddable.issues[0],
            ConfigurationError::DuplicateProperty { .. }
        ));
    }

    #[test]
    fn test_version_generators() {
        let counter = VersionMapping::counter("version");
        assert_eq!(counter.initial(), Value::Integer(1));
        assert_eq!(counter.next_value(&Value::Integer(4)), Value::Integer(5));

        let timestamp = VersionMapping::timestamp("modified");
        let first = timestamp.initial();
        let second = timestamp.next_value(&first);
        assert!(second > first);

        let custom = VersionMapping::counter("v").next(|v| Value::Integer(v.as_i64().unwrap_or(0) + 10));
        assert_eq!(custom.next_value(&Value::Integer(1)), Value::Integer(11));
    }

    #[test]
    fn test_mandatory_implies_not_null() {
        let property = PropertyMapping::new("name", DataType::Text).mandatory();
        assert!(property.mandatory);
        assert!(!property.nullable);
    }
}
