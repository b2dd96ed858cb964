// ============================================================================
// Relation configurers
// ============================================================================
//
// Each relation shape decides which side holds the key, whether an
// association table is needed and where the index column goes, then creates
// the columns, tables and foreign keys it needs in the schema.
//
// ============================================================================

use crate::core::{ConfigResult, ConfigurationError, DataType};
use crate::mapping::{
    CollectionKind, ElementCollectionMapping, ElementKind, MapMapping, RelationKind,
    RelationMapping, RelationMode,
};
use crate::naming::Naming;
use crate::schema::{Column, Schema, Table, UniqueConstraint};
use log::debug;

/// Physical placement of a relation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RelationStorage {
    /// Join column in the owner's table, referencing the target.
    SourceColumn { column: String },
    /// Reverse column in the target's main tables, referencing the owner.
    TargetColumn {
        column: String,
        index: Option<String>,
    },
    Association(AssociationTable),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AssociationTable {
    pub table: String,
    pub owner_column: String,
    pub target_column: String,
    pub index: Option<String>,
    /// Rows are keyed by (owner, index) instead of (owner, target).
    pub keyed_by_index: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledRelation {
    pub owner_node: usize,
    pub property: String,
    pub kind: RelationKind,
    pub mode: RelationMode,
    pub list: bool,
    pub mapped_by: Option<String>,
    pub mandatory: bool,
    pub target_root: String,
    pub target_node: usize,
    pub storage: RelationStorage,
}

impl CompiledRelation {
    pub fn is_to_many(&self) -> bool {
        self.kind.is_to_many()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ElementColumns {
    Value(String),
    /// (sub-property, column)
    Record(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledCollection {
    pub owner_node: usize,
    pub property: String,
    pub table: String,
    pub owner_column: String,
    pub element: ElementColumns,
    pub index: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledMap {
    pub owner_node: usize,
    pub property: String,
    pub table: String,
    pub owner_column: String,
    pub key_column: String,
    pub value_column: String,
}

/// One side of a relation as seen by the configurers.
#[derive(Debug, Clone)]
pub(crate) struct Side<'a> {
    pub entity: &'a str,
    /// Table name used to derive relation names.
    pub table_name: &'a str,
    /// Tables receiving this side's key columns.
    pub tables: &'a [String],
    /// Table referenced by foreign keys pointing at this side.
    pub reference_table: Option<&'a str>,
    pub id_column: &'a str,
    pub id_type: DataType,
}

pub(crate) struct SchemaWriter<'a> {
    pub schema: &'a mut Schema,
    pub naming: &'a Naming,
    pub max_identifier_length: usize,
}

impl SchemaWriter<'_> {
    pub fn add_column(&mut self, table: &str, column: Column, origin: &str) -> ConfigResult<()> {
        let target = self
            .schema
            .table_mut(table)
            .ok_or_else(|| ConfigurationError::InvalidMapping {
                entity: origin.to_string(),
                reason: format!("table '{}' does not exist", table),
            })?;
        target.add_column(column, origin)
    }

    pub fn reference(&mut self, table: &str, column: &str, target: &Side) -> ConfigResult<()> {
        let Some(target_table) = target.reference_table else {
            // Table-per-class ids are spread over several tables
            return Ok(());
        };
        self.schema.add_foreign_key(
            table,
            &[column.to_string()],
            target_table,
            &[target.id_column.to_string()],
            self.naming.foreign_key.as_ref(),
            self.max_identifier_length,
        )?;
        Ok(())
    }

    /// Registers `table` for `owner`, reusing it when the same owner already
    /// created it.
    pub fn ensure_table(&mut self, table: Table, owner: &str) -> ConfigResult<bool> {
        if self.schema.table_owner(table.name()) == Some(owner) {
            return Ok(false);
        }
        self.schema.add_table(table, owner)?;
        Ok(true)
    }

    pub fn unique(&mut self, table: &str, columns: Vec<String>) -> ConfigResult<()> {
        let name = self.naming.unique_key.unique_key_name(table, &columns);
        if let Some(target) = self.schema.table_mut(table) {
            target.add_unique_constraint(UniqueConstraint { name, columns })?;
        }
        Ok(())
    }
}

fn invalid(entity: &str, reason: String) -> ConfigurationError {
    ConfigurationError::InvalidMapping {
        entity: entity.to_string(),
        reason,
    }
}

/// Checks a relation declaration on its own.
pub(crate) fn validate(owner: &str, mapping: &RelationMapping) -> ConfigResult<()> {
    if mapping.mapped_by.is_some()
        && !matches!(mapping.kind, RelationKind::OneToOne | RelationKind::OneToMany)
    {
        return Err(invalid(
            owner,
            format!(
                "'{}' is {} and cannot be mapped by the target",
                mapping.property, mapping.kind
            ),
        ));
    }
    if mapping.target_owned() && mapping.kind == RelationKind::ManyToMany {
        return Err(invalid(
            owner,
            format!("many-to-many '{}' needs an association table", mapping.property),
        ));
    }
    if mapping.collection == CollectionKind::List && !mapping.kind.is_to_many() {
        return Err(invalid(
            owner,
            format!("'{}' is {} and cannot be a list", mapping.property, mapping.kind),
        ));
    }
    if mapping.mode == RelationMode::AssociationOnly && !uses_association_table(mapping) {
        return Err(ConfigurationError::AssociationOnlyNotSupported {
            entity: owner.to_string(),
            property: mapping.property.clone(),
        });
    }
    Ok(())
}

fn uses_association_table(mapping: &RelationMapping) -> bool {
    match mapping.kind {
        RelationKind::ManyToMany => true,
        RelationKind::OneToMany => !mapping.target_owned(),
        RelationKind::OneToOne | RelationKind::ManyToOne => false,
    }
}

/// Creates the storage of `mapping` from `owner` to `target`.
pub(crate) fn configure_relation(
    writer: &mut SchemaWriter<'_>,
    owner: &Side,
    target: &Side,
    mapping: &RelationMapping,
) -> ConfigResult<RelationStorage> {
    validate(owner.entity, mapping)?;
    let origin = format!("{}::{}", owner.entity, mapping.property);
    let list = mapping.collection == CollectionKind::List;

    if uses_association_table(mapping) {
        return configure_association(writer, owner, target, mapping, &origin, list);
    }

    if mapping.target_owned() {
        let column = mapping.reverse_column.clone().unwrap_or_else(|| {
            writer
                .naming
                .join_column
                .reverse_column_name(owner.table_name, owner.id_column)
        });
        let index = list.then(|| {
            mapping
                .index_column
                .clone()
                .unwrap_or_else(|| writer.naming.index_column.index_column_name(&mapping.property))
        });
        for table in target.tables {
            writer.add_column(table, Column::new(&column, owner.id_type), &origin)?;
            writer.reference(table, &column, owner)?;
            if let Some(index) = &index {
                writer.add_column(table, Column::new(index, DataType::Integer), &origin)?;
            }
            if mapping.kind == RelationKind::OneToOne {
                writer.unique(table, vec![column.clone()])?;
            }
        }
        debug!("{} stored by the target in column '{}'", origin, column);
        return Ok(RelationStorage::TargetColumn { column, index });
    }

    let column = mapping
        .join_column
        .clone()
        .unwrap_or_else(|| writer.naming.join_column.join_column_name(&mapping.property));
    for table in owner.tables {
        writer.add_column(table, Column::new(&column, target.id_type), &origin)?;
        writer.reference(table, &column, target)?;
    }
    debug!("{} stored by the owner in column '{}'", origin, column);
    Ok(RelationStorage::SourceColumn { column })
}

fn configure_association(
    writer: &mut SchemaWriter<'_>,
    owner: &Side,
    target: &Side,
    mapping: &RelationMapping,
    origin: &str,
    list: bool,
) -> ConfigResult<RelationStorage> {
    let naming = writer.naming.association_table.clone();
    let table_name = mapping
        .association_table
        .clone()
        .unwrap_or_else(|| naming.table_name(owner.table_name, &mapping.property));
    let owner_column = naming.owner_column_name(owner.table_name, owner.id_column);
    let mut target_column =
        naming.target_column_name(target.table_name, target.id_column, &mapping.property);
    if target_column == owner_column {
        target_column = format!("{}_{}", mapping.property, target.id_column);
    }
    let index = list.then(|| {
        mapping
            .index_column
            .clone()
            .unwrap_or_else(|| writer.naming.index_column.index_column_name(&mapping.property))
    });

    let mut table = Table::new(&table_name);
    table.add_column(Column::new(&owner_column, owner.id_type).not_null(), origin)?;
    table.add_column(Column::new(&target_column, target.id_type).not_null(), origin)?;
    if let Some(index) = &index {
        table.add_column(Column::new(index, DataType::Integer).not_null(), origin)?;
    }
    let keyed_by_index = mapping.allow_duplicates && index.is_some();
    let primary_key = match (&index, keyed_by_index) {
        (Some(index), true) => vec![owner_column.clone(), index.clone()],
        _ => vec![owner_column.clone(), target_column.clone()],
    };
    table.set_primary_key(primary_key)?;

    if writer.ensure_table(table, origin)? {
        writer.reference(&table_name, &owner_column, owner)?;
        writer.reference(&table_name, &target_column, target)?;
        if mapping.kind == RelationKind::OneToMany && !keyed_by_index {
            writer.unique(&table_name, vec![target_column.clone()])?;
        }
        debug!("{} stored in association table '{}'", origin, table_name);
    }
    Ok(RelationStorage::Association(AssociationTable {
        table: table_name,
        owner_column,
        target_column,
        index,
        keyed_by_index,
    }))
}

/// Creates the table of an element collection.
pub(crate) fn configure_collection(
    writer: &mut SchemaWriter<'_>,
    owner: &Side,
    owner_node: usize,
    mapping: &ElementCollectionMapping,
) -> ConfigResult<CompiledCollection> {
    let origin = format!("{}::{}", owner.entity, mapping.property);
    let naming = writer.naming.clone();
    let table_name = mapping.table.clone().unwrap_or_else(|| {
        naming
            .association_table
            .table_name(owner.table_name, &mapping.property)
    });
    let owner_column = mapping.owner_column.clone().unwrap_or_else(|| {
        naming
            .association_table
            .owner_column_name(owner.table_name, owner.id_column)
    });
    let index = (mapping.collection == CollectionKind::List).then(|| {
        mapping
            .index_column
            .clone()
            .unwrap_or_else(|| naming.index_column.index_column_name(&mapping.property))
    });

    let mut table = Table::new(&table_name);
    table.add_column(Column::new(&owner_column, owner.id_type).not_null(), &origin)?;
    let element = match &mapping.element {
        ElementKind::Value { data_type, column } => {
            let column = column
                .clone()
                .unwrap_or_else(|| naming.column.column_name(&mapping.property));
            table.add_column(Column::new(&column, *data_type).not_null(), &origin)?;
            ElementColumns::Value(column)
        }
        ElementKind::Record(embeddable) => {
            let column_naming = embeddable.naming.column.clone().unwrap_or_else(|| naming.column.clone());
            let mut columns = Vec::with_capacity(embeddable.properties.len());
            for property in &embeddable.properties {
                let column = property
                    .column
                    .clone()
                    .unwrap_or_else(|| column_naming.column_name(&property.name));
                table.add_column(
                    Column::new(&column, property.data_type),
                    &format!("{}.{}", origin, property.name),
                )?;
                columns.push((property.name.clone(), column));
            }
            ElementColumns::Record(columns)
        }
    };
    if let Some(index) = &index {
        table.add_column(Column::new(index, DataType::Integer).not_null(), &origin)?;
        table.set_primary_key(vec![owner_column.clone(), index.clone()])?;
    } else if let ElementColumns::Value(column) = &element {
        table.set_primary_key(vec![owner_column.clone(), column.clone()])?;
    }

    if writer.ensure_table(table, &origin)? {
        writer.reference(&table_name, &owner_column, owner)?;
    }
    Ok(CompiledCollection {
        owner_node,
        property: mapping.property.clone(),
        table: table_name,
        owner_column,
        element,
        index,
    })
}

/// Creates the table of a map, keyed by (owner, key).
pub(crate) fn configure_map(
    writer: &mut SchemaWriter<'_>,
    owner: &Side,
    owner_node: usize,
    mapping: &MapMapping,
) -> ConfigResult<CompiledMap> {
    let origin = format!("{}::{}", owner.entity, mapping.property);
    let naming = writer.naming.association_table.clone();
    let table_name = mapping
        .table
        .clone()
        .unwrap_or_else(|| naming.table_name(owner.table_name, &mapping.property));
    let owner_column = mapping
        .owner_column
        .clone()
        .unwrap_or_else(|| naming.owner_column_name(owner.table_name, owner.id_column));

    let mut table = Table::new(&table_name);
    table.add_column(Column::new(&owner_column, owner.id_type).not_null(), &origin)?;
    table.add_column(
        Column::new(&mapping.key_column, mapping.key_type).not_null(),
        &origin,
    )?;
    table.add_column(Column::new(&mapping.value_column, mapping.value_type), &origin)?;
    table.set_primary_key(vec![owner_column.clone(), mapping.key_column.clone()])?;

    if writer.ensure_table(table, &origin)? {
        writer.reference(&table_name, &owner_column, owner)?;
    }
    Ok(CompiledMap {
        owner_node,
        property: mapping.property.clone(),
        table: table_name,
        owner_column,
        key_column: mapping.key_column.clone(),
        value_column: mapping.value_column.clone(),
    })
}
