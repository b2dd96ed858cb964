use crate::config::PersistenceConfig;
use crate::connection::Connection;
use crate::core::{ConfigResult, ConfigurationError, Result};
use crate::mapping::EntityMapping;
use crate::persister::{EntityPersister, PersisterBuilder, Registry};
use crate::schema::ddl::Dialect;
use crate::schema::Schema;
use crate::statement::Statement;
use log::info;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Compiled mappings: the derived schema plus one persister per root entity.
///
/// Immutable once built; share it through an `Arc` across threads.
pub struct PersistenceContext {
    config: PersistenceConfig,
    schema: Schema,
    persisters: BTreeMap<String, EntityPersister>,
}

/// Collects mappings until [`PersistenceContextBuilder::build`] compiles them.
pub struct PersistenceContextBuilder {
    config: PersistenceConfig,
    mappings: Vec<EntityMapping>,
}

impl PersistenceContextBuilder {
    /// Adds the mapping of one root entity, its sub-entities included.
    pub fn map(mut self, mapping: EntityMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn map_all(mut self, mappings: impl IntoIterator<Item = EntityMapping>) -> Self {
        self.mappings.extend(mappings);
        self
    }

    /// Validates every mapping, derives the schema and compiles the
    /// persisters. Forward references between mappings are resolved here.
    pub fn build(self) -> ConfigResult<PersistenceContext> {
        let (schema, registry) = PersisterBuilder::new(&self.config).build(&self.mappings)?;
        let registry = Arc::new(registry);
        let persisters = registry
            .hierarchies
            .keys()
            .map(|root| (root.clone(), EntityPersister::new(Arc::clone(&registry), root)))
            .collect::<BTreeMap<_, _>>();
        info!(
            "Persistence context ready: {} persister(s), {} table(s)",
            persisters.len(),
            schema.tables().len()
        );
        Ok(PersistenceContext {
            config: self.config,
            schema,
            persisters,
        })
    }
}

impl PersistenceContext {
    pub fn builder(config: PersistenceConfig) -> PersistenceContextBuilder {
        PersistenceContextBuilder {
            config,
            mappings: Vec::new(),
        }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Persister of a root entity. Sub-entities are reached through their
    /// root's persister.
    pub fn persister(&self, entity: &str) -> ConfigResult<&EntityPersister> {
        self.persisters
            .get(entity)
            .ok_or_else(|| ConfigurationError::UnknownEntity(entity.to_string()))
    }

    pub fn persisters(&self) -> impl Iterator<Item = &EntityPersister> {
        self.persisters.values()
    }

    /// Creation script: tables in foreign key dependency order, then
    /// sequences.
    pub fn ddl(&self, dialect: &dyn Dialect) -> Vec<String> {
        let mut script: Vec<String> = self
            .schema
            .creation_order()
            .into_iter()
            .map(|table| dialect.create_table(table))
            .collect();
        script.extend(self.schema.sequences().iter().map(|s| dialect.create_sequence(s)));
        script
    }

    /// Creates the schema's sequences and tables through `connection`.
    pub fn deploy_schema(&self, connection: &mut dyn Connection) -> Result<()> {
        let mut statements: Vec<Statement> = self
            .schema
            .sequences()
            .iter()
            .map(|s| Statement::CreateSequence {
                name: s.name.clone(),
                start: s.start,
                increment: s.increment,
            })
            .collect();
        statements.extend(
            self.schema
                .creation_order()
                .into_iter()
                .map(|table| Statement::CreateTable(table.clone())),
        );
        connection.execute_batch(&statements)?;
        Ok(())
    }
}

impl fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("persisters", &self.persisters.keys().collect::<Vec<_>>())
            .field("tables", &self.schema.tables().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::mapping::{IdentifierMapping, PolymorphismPolicy};
    use crate::persister::IdentifierPolicy;
    use crate::schema::ddl::AnsiDialect;
    use crate::storage::InMemoryDatabase;

    fn vehicles() -> EntityMapping {
        EntityMapping::new("Vehicle")
            .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::AutoIncrement))
            .with_property("color", DataType::Text)
            .polymorphism(
                PolymorphismPolicy::single_table()
                    .subclass(EntityMapping::new("Car").with_property("doors", DataType::Integer)),
            )
    }

    #[test]
    fn test_only_roots_have_persisters() {
        let context = PersistenceContext::builder(PersistenceConfig::default())
            .map(vehicles())
            .build()
            .unwrap();

        assert_eq!(context.persister("Vehicle").unwrap().entity(), "Vehicle");
        assert_eq!(
            context.persister("Car").unwrap_err(),
            ConfigurationError::UnknownEntity("Car".into())
        );
    }

    #[test]
    fn test_deploy_creates_every_table() {
        let context = PersistenceContext::builder(PersistenceConfig::default())
            .map(vehicles())
            .build()
            .unwrap();
        let database = InMemoryDatabase::new();
        let mut connection = database.connect();

        context.deploy_schema(&mut connection).unwrap();

        assert_eq!(database.table_names().unwrap(), vec!["Vehicle".to_string()]);
    }

    #[test]
    fn test_ddl_lists_one_statement_per_table() {
        let context = PersistenceContext::builder(PersistenceConfig::default())
            .map(vehicles())
            .build()
            .unwrap();

        let script = context.ddl(&AnsiDialect::new());

        assert_eq!(script.len(), 1);
        assert!(script[0].starts_with("CREATE TABLE Vehicle"));
    }
}
