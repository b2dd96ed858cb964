use relmap::prelude::*;
use relmap::{PersistError, Result};
use std::collections::BTreeSet;

fn deploy(mappings: Vec<EntityMapping>) -> Result<(PersistenceContext, InMemoryDatabase)> {
    let context = PersistenceContext::builder(PersistenceConfig::default())
        .map_all(mappings)
        .build()?;
    let database = InMemoryDatabase::new();
    context.deploy_schema(&mut database.connect())?;
    Ok((context, database))
}

fn type_names(entities: &[Entity]) -> BTreeSet<String> {
    entities.iter().map(Entity::type_name).collect()
}

fn vehicles() -> EntityMapping {
    EntityMapping::new("Vehicle")
        .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::AutoIncrement))
        .with_property("color", DataType::Text)
        .polymorphism(
            PolymorphismPolicy::single_table()
                .discriminated(EntityMapping::new("Car").with_property("doors", DataType::Integer), "CAR")
                .subclass(EntityMapping::new("Bike").with_property("gears", DataType::Integer)),
        )
}

fn animals() -> EntityMapping {
    EntityMapping::new("Animal")
        .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::AutoIncrement))
        .with_property("name", DataType::Text)
        .polymorphism(
            PolymorphismPolicy::joined_tables()
                .subclass(
                    EntityMapping::new("Dog")
                        .with_property("breed", DataType::Text)
                        .relation(RelationMapping::many_to_one("owner", "Person")),
                )
                .subclass(EntityMapping::new("Cat").with_property("indoor", DataType::Boolean)),
        )
}

fn person() -> EntityMapping {
    EntityMapping::new("Person")
        .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::already_assigned()))
        .with_property("name", DataType::Text)
}

#[test]
fn test_single_table_round_trip() -> Result<()> {
    let (context, database) = deploy(vec![vehicles()])?;
    let vehicles = context.persister("Vehicle")?;
    let mut conn = database.connect();

    let car = Entity::new("Car").with("color", "red").with("doors", 4);
    let bike = Entity::new("Bike").with("color", "blue").with("gears", 21);
    vehicles.insert_all(&mut conn, &[car.clone(), bike.clone()])?;

    // 1. One table, told apart by the discriminator
    let mut discriminators: Vec<Value> = database
        .scan("Vehicle")?
        .iter()
        .map(|r| r.get("DTYPE"))
        .collect();
    discriminators.sort();
    assert_eq!(discriminators, vec![Value::from("Bike"), Value::from("CAR")]);

    // 2. Loading resolves the concrete type
    let loaded = vehicles.select(&mut conn, car.id().expect("generated"))?.expect("stored");
    assert_eq!(loaded.type_name(), "Car");
    assert_eq!(loaded.get("doors"), Value::Integer(4));
    assert_eq!(loaded.get("color"), Value::from("red"));
    assert_eq!(type_names(&vehicles.select_all(&mut conn)?), BTreeSet::from(["Bike".to_string(), "Car".to_string()]));
    Ok(())
}

#[test]
fn test_single_table_root_is_abstract() -> Result<()> {
    let (context, database) = deploy(vec![vehicles()])?;
    let vehicles = context.persister("Vehicle")?;

    let result = vehicles.insert(&mut database.connect(), &Entity::new("Vehicle"));
    assert!(matches!(result, Err(PersistError::AbstractEntity { .. })));

    let result = vehicles.insert(&mut database.connect(), &Entity::new("Boat"));
    assert!(matches!(result, Err(PersistError::UnknownSubtype { .. })));
    Ok(())
}

#[test]
fn test_joined_tables_round_trip() -> Result<()> {
    let (context, database) = deploy(vec![animals(), person()])?;
    let animals = context.persister("Animal")?;
    let mut conn = database.connect();

    let alice = Entity::with_id("Person", 1).with("name", "Alice");
    let dog = Entity::new("Dog").with("name", "Rex").with("breed", "collie");
    dog.set_one("owner", Some(alice));
    let cat = Entity::new("Cat").with("name", "Tom").with("indoor", true);
    let generic = Entity::new("Animal").with("name", "Blob");
    animals.insert_all(&mut conn, &[dog.clone(), cat.clone(), generic.clone()])?;

    // 1. Parent rows for everyone, child rows per type
    assert_eq!(database.row_count("Animal")?, 3);
    assert_eq!(database.row_count("Dog")?, 1);
    assert_eq!(database.row_count("Cat")?, 1);
    assert_eq!(database.row_count("Person")?, 1);

    // 2. Every row comes back with its concrete type
    let all = animals.select_all(&mut conn)?;
    assert_eq!(
        type_names(&all),
        BTreeSet::from(["Animal".to_string(), "Cat".to_string(), "Dog".to_string()])
    );
    let loaded = animals.select(&mut conn, dog.id().expect("generated"))?.expect("stored");
    assert_eq!(loaded.get("breed"), Value::from("collie"));
    assert_eq!(loaded.get("name"), Value::from("Rex"));
    assert_eq!(loaded.one("owner").and_then(|o| o.id()), Some(Value::Integer(1)));

    // 3. Updating a sub-entity touches the table of the changed column only
    let previous = loaded.deep_copy();
    loaded.set("breed", "border collie");
    conn.clear_history();
    animals.update(&mut conn, &loaded, &previous, false)?;
    let tables: Vec<&str> = conn
        .executed_statements()
        .iter()
        .filter_map(|s| s.table())
        .collect();
    assert_eq!(tables, vec!["Dog"]);

    // 4. Deleting removes child rows before the parent row
    animals.delete(&mut conn, &loaded)?;
    assert_eq!(database.row_count("Dog")?, 0);
    assert_eq!(database.row_count("Animal")?, 2);
    Ok(())
}

#[test]
fn test_relation_to_polymorphic_root() -> Result<()> {
    let owner = EntityMapping::new("Owner")
        .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::already_assigned()))
        .relation(RelationMapping::one_to_many("pets", "Animal").list());
    let (context, database) = deploy(vec![owner, animals(), person()])?;
    let owners = context.persister("Owner")?;
    let mut conn = database.connect();

    let bob = Entity::with_id("Owner", 1);
    bob.set_many(
        "pets",
        vec![
            Entity::new("Cat").with("name", "Tom"),
            Entity::new("Dog").with("name", "Rex"),
        ],
    );
    owners.insert(&mut conn, &bob)?;

    let loaded = owners.select(&mut conn, Value::Integer(1))?.expect("stored");
    let pets: Vec<String> = loaded.many("pets").iter().map(Entity::type_name).collect();
    assert_eq!(pets, vec!["Cat", "Dog"]);
    Ok(())
}

#[test]
fn test_table_per_class_round_trip() -> Result<()> {
    let shapes = EntityMapping::new("Shape")
        .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::sequence("shape_seq")))
        .with_property("label", DataType::Text)
        .polymorphism(
            PolymorphismPolicy::table_per_class()
                .subclass(EntityMapping::new("Circle").with_property("radius", DataType::Float))
                .subclass(EntityMapping::new("Square").with_property("side", DataType::Float)),
        );
    let (context, database) = deploy(vec![shapes])?;
    let shapes = context.persister("Shape")?;
    let mut conn = database.connect();

    let circle = Entity::new("Circle").with("label", "c").with("radius", 1.5);
    let square = Entity::new("Square").with("label", "s").with("side", 2.0);
    shapes.insert_all(&mut conn, &[circle.clone(), square.clone()])?;

    assert_eq!(circle.id(), Some(Value::Integer(1)));
    assert_eq!(square.id(), Some(Value::Integer(2)));
    assert_eq!(database.row_count("Circle")?, 1);
    assert_eq!(database.row_count("Square")?, 1);

    let loaded = shapes.select(&mut conn, Value::Integer(2))?.expect("stored");
    assert_eq!(loaded.type_name(), "Square");
    assert_eq!(loaded.get("label"), Value::from("s"));
    assert_eq!(loaded.get("side"), Value::Float(2.0));
    assert_eq!(shapes.join_tree()?.branches().len(), 2);
    assert_eq!(shapes.select_all(&mut conn)?.len(), 2);
    Ok(())
}

#[test]
fn test_joined_over_single_table() -> Result<()> {
    let animals = EntityMapping::new("Animal")
        .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::AutoIncrement))
        .with_property("name", DataType::Text)
        .polymorphism(
            PolymorphismPolicy::joined_tables().subclass(
                EntityMapping::new("Bird")
                    .with_property("wingspan", DataType::Float)
                    .polymorphism(
                        PolymorphismPolicy::single_table()
                            .discriminator("KIND")
                            .subclass(EntityMapping::new("Parrot").with_property("words", DataType::Integer))
                            .subclass(EntityMapping::new("Eagle")),
                    ),
            ),
        );
    let (context, database) = deploy(vec![animals])?;
    let persister = context.persister("Animal")?;
    let mut conn = database.connect();

    let parrot = Entity::new("Parrot")
        .with("name", "Polly")
        .with("wingspan", 0.5)
        .with("words", 12);
    persister.insert(&mut conn, &parrot)?;

    let bird_rows = database.scan("Bird")?;
    assert_eq!(bird_rows.len(), 1);
    assert_eq!(bird_rows[0].get("KIND"), Value::from("Parrot"));
    assert_eq!(bird_rows[0].get("words"), Value::Integer(12));

    let loaded = persister.select(&mut conn, parrot.id().expect("generated"))?.expect("stored");
    assert_eq!(loaded.type_name(), "Parrot");
    assert_eq!(loaded.get("words"), Value::Integer(12));
    assert_eq!(loaded.get("name"), Value::from("Polly"));

    let result = persister.insert(&mut conn, &Entity::new("Bird"));
    assert!(matches!(result, Err(PersistError::AbstractEntity { .. })));
    Ok(())
}

#[test]
fn test_illegal_compositions_are_rejected() {
    let nested = |outer: PolymorphismPolicy, inner: PolymorphismPolicy| {
        EntityMapping::new("Root")
            .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::sequence("s")))
            .polymorphism(outer.subclass(
                EntityMapping::new("Middle").polymorphism(inner.subclass(EntityMapping::new("Leaf"))),
            ))
    };
    let illegal = [
        nested(PolymorphismPolicy::single_table(), PolymorphismPolicy::single_table()),
        nested(PolymorphismPolicy::single_table(), PolymorphismPolicy::table_per_class()),
        nested(PolymorphismPolicy::joined_tables(), PolymorphismPolicy::table_per_class()),
        nested(PolymorphismPolicy::table_per_class(), PolymorphismPolicy::joined_tables()),
    ];
    for mapping in illegal {
        let result = PersistenceContext::builder(PersistenceConfig::default())
            .map(mapping)
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::UnsupportedPolymorphismComposition { .. })
        ));
    }
}

#[test]
fn test_sub_entities_have_no_persister() -> Result<()> {
    let (context, _) = deploy(vec![animals(), person()])?;
    assert!(context.persister("Animal").is_ok());
    assert_eq!(
        context.persister("Dog").unwrap_err(),
        ConfigurationError::UnknownEntity("Dog".into())
    );
    Ok(())
}
