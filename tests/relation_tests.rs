use relmap::prelude::*;
use relmap::statement::{Condition, Statement, Update};
use relmap::{DbError, PersistError, Result};
use std::collections::BTreeMap;

fn entity(name: &str) -> EntityMapping {
    EntityMapping::new(name)
        .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::already_assigned()))
        .with_property("name", DataType::Text)
}

fn deploy(mappings: Vec<EntityMapping>) -> Result<(PersistenceContext, InMemoryDatabase)> {
    let context = PersistenceContext::builder(PersistenceConfig::default())
        .map_all(mappings)
        .build()?;
    let database = InMemoryDatabase::new();
    context.deploy_schema(&mut database.connect())?;
    Ok((context, database))
}

/// `(id, column)` of every row of `table`, by id.
fn column_by_id(database: &InMemoryDatabase, table: &str, column: &str) -> Result<Vec<(Value, Value)>> {
    let mut rows: Vec<(Value, Value)> = database
        .scan(table)?
        .iter()
        .map(|r| (r.get("id"), r.get(column)))
        .collect();
    rows.sort();
    Ok(rows)
}

fn touched_tables(conn: &InMemoryConnection) -> Vec<String> {
    conn.executed_statements()
        .iter()
        .filter_map(Statement::table)
        .map(str::to_string)
        .collect()
}

fn garage(mode: RelationMode) -> Vec<EntityMapping> {
    vec![
        entity("Person").relation(
            RelationMapping::one_to_many("cars", "Car")
                .mapped_by("owner")
                .list()
                .mode(mode),
        ),
        entity("Car"),
    ]
}

fn person_with_cars(ids: &[i64]) -> Entity {
    let person = Entity::with_id("Person", 1).with("name", "Alice");
    for id in ids {
        person.push_many("cars", Entity::with_id("Car", *id).with("name", format!("car{}", id)));
    }
    person
}

#[test]
fn test_many_to_one_cascades_insert() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Car").relation(RelationMapping::many_to_one("owner", "Person")),
        entity("Person"),
    ])?;
    let mut conn = database.connect();
    let cars = context.persister("Car")?;

    let owner = Entity::with_id("Person", 1).with("name", "Alice");
    let car = Entity::with_id("Car", 10).with("name", "Roadster");
    car.set_one("owner", Some(owner.clone()));
    cars.insert(&mut conn, &car)?;

    // 1. The owner row went in first
    assert_eq!(touched_tables(&conn), vec!["Person", "Car"]);
    assert!(owner.is_persisted());

    // 2. The join column holds the owner's key
    assert_eq!(
        column_by_id(&database, "Car", "ownerId")?,
        vec![(Value::Integer(10), Value::Integer(1))]
    );

    // 3. Loading brings the owner back
    let loaded = cars.select(&mut conn, Value::Integer(10))?.expect("stored");
    let loaded_owner = loaded.one("owner").expect("owner");
    assert_eq!(loaded_owner.get("name"), Value::Text("Alice".into()));
    Ok(())
}

#[test]
fn test_list_insert_writes_positions() -> Result<()> {
    let (context, database) = deploy(garage(RelationMode::All))?;
    let persons = context.persister("Person")?;

    persons.insert(&mut database.connect(), &person_with_cars(&[10, 20, 30]))?;

    assert_eq!(
        column_by_id(&database, "Car", "carsIdx")?,
        vec![
            (Value::Integer(10), Value::Integer(1)),
            (Value::Integer(20), Value::Integer(2)),
            (Value::Integer(30), Value::Integer(3)),
        ]
    );
    assert_eq!(
        column_by_id(&database, "Car", "personId")?
            .into_iter()
            .map(|(_, owner)| owner)
            .collect::<Vec<_>>(),
        vec![Value::Integer(1); 3]
    );
    Ok(())
}

#[test]
fn test_list_reorder_rewrites_moved_indices_only() -> Result<()> {
    let (context, database) = deploy(garage(RelationMode::All))?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();
    persons.insert(&mut conn, &person_with_cars(&[10, 20, 30]))?;

    let loaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    let ids: Vec<Option<Value>> = loaded.many("cars").iter().map(Entity::id).collect();
    assert_eq!(ids, vec![Some(10.into()), Some(20.into()), Some(30.into())]);

    let previous = loaded.deep_copy();
    let mut cars = loaded.many("cars");
    cars.swap(0, 1);
    loaded.set_many("cars", cars);
    conn.clear_history();
    persons.update(&mut conn, &loaded, &previous, false)?;

    assert_eq!(conn.executed_statements().len(), 2);
    assert_eq!(
        column_by_id(&database, "Car", "carsIdx")?,
        vec![
            (Value::Integer(10), Value::Integer(2)),
            (Value::Integer(20), Value::Integer(1)),
            (Value::Integer(30), Value::Integer(3)),
        ]
    );
    let reloaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    let ids: Vec<Option<Value>> = reloaded.many("cars").iter().map(Entity::id).collect();
    assert_eq!(ids, vec![Some(20.into()), Some(10.into()), Some(30.into())]);
    Ok(())
}

#[test]
fn test_removed_target_is_unlinked_under_all() -> Result<()> {
    let (context, database) = deploy(garage(RelationMode::All))?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();
    persons.insert(&mut conn, &person_with_cars(&[10, 20]))?;

    let loaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    let previous = loaded.deep_copy();
    loaded.set_many("cars", vec![loaded.many("cars")[0].clone()]);
    persons.update(&mut conn, &loaded, &previous, false)?;

    assert_eq!(
        column_by_id(&database, "Car", "personId")?,
        vec![
            (Value::Integer(10), Value::Integer(1)),
            (Value::Integer(20), Value::Null),
        ]
    );
    Ok(())
}

#[test]
fn test_removed_target_is_deleted_under_orphan_removal() -> Result<()> {
    let (context, database) = deploy(garage(RelationMode::AllOrphanRemoval))?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();
    persons.insert(&mut conn, &person_with_cars(&[10, 20]))?;

    let loaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    let previous = loaded.deep_copy();
    loaded.set_many("cars", vec![loaded.many("cars")[0].clone()]);
    persons.update(&mut conn, &loaded, &previous, false)?;

    assert_eq!(
        column_by_id(&database, "Car", "personId")?,
        vec![(Value::Integer(10), Value::Integer(1))]
    );
    Ok(())
}

#[test]
fn test_child_moves_between_owners() -> Result<()> {
    for mode in [RelationMode::All, RelationMode::AllOrphanRemoval] {
        for bob_first in [true, false] {
            let (context, database) = deploy(garage(mode))?;
            let persons = context.persister("Person")?;
            let mut conn = database.connect();
            let bob = Entity::with_id("Person", 2).with("name", "Bob");
            persons.insert_all(&mut conn, &[person_with_cars(&[10]), bob])?;

            // 1. Car 10 leaves Alice for Bob in a single update
            let alice = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
            let bob = persons.select(&mut conn, Value::Integer(2))?.expect("stored");
            let alice_before = alice.deep_copy();
            let bob_before = bob.deep_copy();
            bob.set_many("cars", alice.many("cars"));
            alice.set_many("cars", Vec::new());
            let mut pairs = vec![(bob.clone(), bob_before), (alice.clone(), alice_before)];
            if !bob_first {
                pairs.reverse();
            }
            persons.update_all(&mut conn, &pairs, false)?;

            // 2. Bob holds it, whatever the mode and the order
            assert_eq!(
                column_by_id(&database, "Car", "personId")?,
                vec![(Value::Integer(10), Value::Integer(2))],
                "{} with Bob first: {}",
                mode,
                bob_first
            );
            let reloaded = persons.select(&mut conn, Value::Integer(2))?.expect("stored");
            assert_eq!(reloaded.many("cars").len(), 1);
        }
    }
    Ok(())
}

#[test]
fn test_target_owned_one_to_one_replacement() -> Result<()> {
    for mode in [RelationMode::All, RelationMode::AllOrphanRemoval] {
        let (context, database) = deploy(vec![
            entity("Person").relation(
                RelationMapping::one_to_one("passport", "Passport")
                    .mapped_by("holder")
                    .mode(mode),
            ),
            entity("Passport"),
        ])?;
        let persons = context.persister("Person")?;
        let mut conn = database.connect();

        // 1. Round trip: the passport row holds the key
        let person = Entity::with_id("Person", 1).with("name", "Alice");
        person.set_one("passport", Some(Entity::with_id("Passport", 10).with("name", "old")));
        persons.insert(&mut conn, &person)?;
        assert_eq!(
            column_by_id(&database, "Passport", "personId")?,
            vec![(Value::Integer(10), Value::Integer(1))]
        );
        let loaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
        assert_eq!(loaded.one("passport").and_then(|p| p.id()), Some(Value::Integer(10)));

        // 2. A new passport takes the unique reverse column over
        let previous = loaded.deep_copy();
        loaded.set_one("passport", Some(Entity::with_id("Passport", 11).with("name", "new")));
        persons.update(&mut conn, &loaded, &previous, false)?;

        let expected = match mode {
            RelationMode::AllOrphanRemoval => vec![(Value::Integer(11), Value::Integer(1))],
            _ => vec![
                (Value::Integer(10), Value::Null),
                (Value::Integer(11), Value::Integer(1)),
            ],
        };
        assert_eq!(column_by_id(&database, "Passport", "personId")?, expected, "{}", mode);
        let reloaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
        assert_eq!(reloaded.one("passport").and_then(|p| p.id()), Some(Value::Integer(11)));
    }
    Ok(())
}

#[test]
fn test_duplicate_index_fails_the_select() -> Result<()> {
    // 1. Reverse column list
    let (context, database) = deploy(garage(RelationMode::All))?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();
    persons.insert(&mut conn, &person_with_cars(&[10, 20]))?;
    conn.execute(&Statement::from(
        Update::new("Car")
            .set("carsIdx", 1)
            .filter(Condition::eq("id", 20)),
    ))?;
    let result = persons.select(&mut conn, Value::Integer(1));
    assert!(matches!(
        result,
        Err(PersistError::CorruptedIndex { ref property, index: 1, .. }) if property == "cars"
    ));

    // 2. Association table list
    let (context, database) = deploy(vec![
        entity("Person").relation(RelationMapping::many_to_many("tags", "Tag").list()),
        entity("Tag"),
    ])?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();
    let person = Entity::with_id("Person", 1);
    person.set_many("tags", vec![Entity::with_id("Tag", 5), Entity::with_id("Tag", 6)]);
    persons.insert(&mut conn, &person)?;
    conn.execute(&Statement::from(
        Update::new("Person_tags")
            .set("tagsIdx", 1)
            .filter(Condition::eq("Tag_id", 6)),
    ))?;
    let result = persons.select(&mut conn, Value::Integer(1));
    assert!(matches!(
        result,
        Err(PersistError::CorruptedIndex { ref property, index: 1, .. }) if property == "tags"
    ));
    Ok(())
}

#[test]
fn test_new_target_added_on_update() -> Result<()> {
    let (context, database) = deploy(garage(RelationMode::All))?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();
    persons.insert(&mut conn, &person_with_cars(&[10]))?;

    let loaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    let previous = loaded.deep_copy();
    loaded.push_many("cars", Entity::with_id("Car", 11).with("name", "new"));
    persons.update(&mut conn, &loaded, &previous, false)?;

    assert_eq!(
        column_by_id(&database, "Car", "carsIdx")?,
        vec![
            (Value::Integer(10), Value::Integer(1)),
            (Value::Integer(11), Value::Integer(2)),
        ]
    );
    Ok(())
}

#[test]
fn test_unchanged_aggregate_issues_no_statement() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Person")
            .relation(RelationMapping::one_to_many("cars", "Car").mapped_by("owner").list())
            .relation(RelationMapping::many_to_many("tags", "Tag").list())
            .element_collection(ElementCollectionMapping::values("nicknames", DataType::Text).list())
            .map_collection(MapMapping::new("scores", DataType::Text, DataType::Integer)),
        entity("Car"),
        entity("Tag"),
    ])?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();

    let person = person_with_cars(&[10, 20]);
    person.set_many(
        "tags",
        vec![Entity::with_id("Tag", 5).with("name", "vip"), Entity::with_id("Tag", 6)],
    );
    person.set_elements("nicknames", vec![Element::Value("Al".into()), Element::Value("Ali".into())]);
    person.set_map("scores", BTreeMap::from([(Value::from("chess"), Value::Integer(3))]));
    for car in person.many("cars") {
        car.set_one("owner", Some(person.clone()));
    }
    persons.insert(&mut conn, &person)?;

    let loaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    assert_eq!(loaded.snapshot(), person.snapshot());

    conn.clear_history();
    persons.update(&mut conn, &loaded, &loaded.deep_copy(), false)?;
    assert!(conn.executed_statements().is_empty());
    Ok(())
}

#[test]
fn test_association_only_writes_link_rows_only() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Person").relation(
            RelationMapping::many_to_many("tags", "Tag").mode(RelationMode::AssociationOnly),
        ),
        entity("Tag"),
    ])?;
    let persons = context.persister("Person")?;
    let tags = context.persister("Tag")?;
    let mut conn = database.connect();

    let vip = Entity::with_id("Tag", 5).with("name", "vip");
    let new = Entity::with_id("Tag", 6).with("name", "new");
    tags.insert_all(&mut conn, &[vip.clone(), new.clone()])?;

    // 1. Insert: the tags are only linked
    let person = Entity::with_id("Person", 1).with("name", "Alice");
    person.set_many("tags", vec![vip.clone(), new.clone()]);
    vip.set("name", "changed in memory");
    conn.clear_history();
    persons.insert(&mut conn, &person)?;
    assert_eq!(touched_tables(&conn), vec!["Person", "Person_tags", "Person_tags"]);

    // 2. Update: dropping a tag removes its link row, never the tag
    let previous = person.deep_copy();
    person.set_many("tags", vec![vip.clone()]);
    conn.clear_history();
    persons.update(&mut conn, &person, &previous, false)?;
    assert_eq!(touched_tables(&conn), vec!["Person_tags"]);

    assert_eq!(database.row_count("Tag")?, 2);
    assert_eq!(database.row_count("Person_tags")?, 1);
    let stored = tags.select(&mut conn, Value::Integer(5))?.expect("stored");
    assert_eq!(stored.get("name"), Value::Text("vip".into()));
    Ok(())
}

#[test]
fn test_read_only_target_must_exist() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Car").relation(
            RelationMapping::many_to_one("owner", "Person").mode(RelationMode::ReadOnly),
        ),
        entity("Person"),
    ])?;
    let cars = context.persister("Car")?;
    let mut conn = database.connect();

    let owner = Entity::with_id("Person", 1).with("name", "Alice");
    let car = Entity::with_id("Car", 10);
    car.set_one("owner", Some(owner.clone()));

    // 1. Nothing cascades, the foreign key check fails
    let result = cars.insert(&mut conn, &car);
    assert!(matches!(
        result,
        Err(PersistError::Database(DbError::ConstraintViolation(_)))
    ));
    assert_eq!(database.row_count("Car")?, 0);

    // 2. With the owner stored separately the insert goes through untouched
    context.persister("Person")?.insert(&mut conn, &owner)?;
    let car = Entity::with_id("Car", 11);
    car.set_one("owner", Some(owner.clone()));
    conn.clear_history();
    cars.insert(&mut conn, &car)?;
    assert_eq!(touched_tables(&conn), vec!["Car"]);
    Ok(())
}

#[test]
fn test_duplicate_tolerant_list_keeps_both_rows() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Playlist").relation(
            RelationMapping::many_to_many("songs", "Song")
                .list()
                .allow_duplicates(),
        ),
        entity("Song"),
    ])?;
    let playlists = context.persister("Playlist")?;
    let mut conn = database.connect();

    let song = Entity::with_id("Song", 7).with("name", "Refrain");
    let other = Entity::with_id("Song", 8).with("name", "Bridge");
    let playlist = Entity::with_id("Playlist", 1).with("name", "loop");
    playlist.set_many("songs", vec![song.clone(), other.clone(), song.clone()]);
    playlists.insert(&mut conn, &playlist)?;

    assert_eq!(database.row_count("Song")?, 2);
    assert_eq!(database.row_count("Playlist_songs")?, 3);

    let loaded = playlists.select(&mut conn, Value::Integer(1))?.expect("stored");
    let ids: Vec<Option<Value>> = loaded.many("songs").iter().map(Entity::id).collect();
    assert_eq!(ids, vec![Some(7.into()), Some(8.into()), Some(7.into())]);
    assert!(loaded.many("songs")[0].same_instance(&loaded.many("songs")[2]));

    // Dropping the last entry removes the last indexed row only
    let previous = loaded.deep_copy();
    let mut songs = loaded.many("songs");
    songs.pop();
    loaded.set_many("songs", songs);
    playlists.update(&mut conn, &loaded, &previous, false)?;
    assert_eq!(database.row_count("Playlist_songs")?, 2);
    Ok(())
}

#[test]
fn test_many_to_many_set_diff() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Person").relation(RelationMapping::many_to_many("tags", "Tag")),
        entity("Tag"),
    ])?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();

    let person = Entity::with_id("Person", 1);
    person.set_many("tags", vec![Entity::with_id("Tag", 5), Entity::with_id("Tag", 6)]);
    persons.insert(&mut conn, &person)?;

    let loaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    let previous = loaded.deep_copy();
    let kept = loaded
        .many("tags")
        .into_iter()
        .find(|t| t.id() == Some(Value::Integer(6)))
        .expect("tag 6");
    loaded.set_many("tags", vec![kept, Entity::with_id("Tag", 9)]);
    persons.update(&mut conn, &loaded, &previous, false)?;

    // The dropped tag loses its link and stays stored
    assert_eq!(database.row_count("Tag")?, 3);
    let mut linked: Vec<Value> = database
        .scan("Person_tags")?
        .iter()
        .map(|r| r.get("Tag_id"))
        .collect();
    linked.sort();
    assert_eq!(linked, vec![Value::Integer(6), Value::Integer(9)]);
    Ok(())
}

#[test]
fn test_element_collections_and_maps_follow_owner() -> Result<()> {
    let address = EmbeddableMapping::new("Address")
        .with_property("street", DataType::Text)
        .with_property("city", DataType::Text);
    let (context, database) = deploy(vec![
        entity("Person")
            .element_collection(ElementCollectionMapping::values("nicknames", DataType::Text).list())
            .element_collection(ElementCollectionMapping::records("addresses", address))
            .map_collection(MapMapping::new("scores", DataType::Text, DataType::Integer)),
    ])?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();

    let home = Record::new().with("street", "1 Main St").with("city", "Springfield");
    let work = Record::new().with("street", "2 Side St").with("city", "Shelbyville");
    let person = Entity::with_id("Person", 1).with("name", "Alice");
    person.set_elements("nicknames", vec![Element::Value("Al".into()), Element::Value("Ali".into())]);
    person.set_elements("addresses", vec![Element::Record(home.clone()), Element::Record(work)]);
    person.set_map(
        "scores",
        BTreeMap::from([
            (Value::from("chess"), Value::Integer(3)),
            (Value::from("go"), Value::Integer(5)),
        ]),
    );
    persons.insert(&mut conn, &person)?;

    // 1. Round trip
    let loaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    assert_eq!(loaded.elements("nicknames"), person.elements("nicknames"));
    assert_eq!(loaded.elements("addresses").len(), 2);
    assert_eq!(loaded.map("scores"), person.map("scores"));

    // 2. Diffed update
    let previous = loaded.deep_copy();
    loaded.set_elements("nicknames", vec![Element::Value("Al".into()), Element::Value("Lis".into())]);
    loaded.set_elements("addresses", vec![Element::Record(home)]);
    loaded.set_map("scores", BTreeMap::from([(Value::from("chess"), Value::Integer(4))]));
    conn.clear_history();
    persons.update(&mut conn, &loaded, &previous, false)?;
    // one nickname rewritten, one address removed, one score changed, one removed
    assert_eq!(conn.executed_statements().len(), 4);

    let reloaded = persons.select(&mut conn, Value::Integer(1))?.expect("stored");
    assert_eq!(reloaded.elements("nicknames"), loaded.elements("nicknames"));
    assert_eq!(reloaded.elements("addresses"), loaded.elements("addresses"));
    assert_eq!(reloaded.map("scores"), loaded.map("scores"));

    // 3. Deleting the owner clears its element rows
    persons.delete(&mut conn, &reloaded)?;
    assert_eq!(database.row_count("Person_nicknames")?, 0);
    assert_eq!(database.row_count("Person_addresses")?, 0);
    assert_eq!(database.row_count("Person_scores")?, 0);
    assert_eq!(database.row_count("Person")?, 0);
    Ok(())
}

#[test]
fn test_delete_cascades_through_relations() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Person")
            .relation(RelationMapping::one_to_many("cars", "Car").mapped_by("owner"))
            .relation(RelationMapping::many_to_many("tags", "Tag").mode(RelationMode::ReadOnly)),
        entity("Car"),
        entity("Tag"),
    ])?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();
    let tag = Entity::with_id("Tag", 5);
    context.persister("Tag")?.insert(&mut conn, &tag)?;

    let person = person_with_cars(&[10, 20]);
    person.set_many("tags", vec![tag]);
    persons.insert(&mut conn, &person)?;
    assert_eq!(database.row_count("Person_tags")?, 0);

    persons.delete_by_id(&mut conn, Value::Integer(1))?;

    assert_eq!(database.row_count("Person")?, 0);
    assert_eq!(database.row_count("Car")?, 0);
    assert_eq!(database.row_count("Tag")?, 1);
    Ok(())
}

#[test]
fn test_mandatory_relation_and_property() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Car")
            .property(PropertyMapping::new("plate", DataType::Text).mandatory())
            .relation(RelationMapping::many_to_one("owner", "Person").mandatory()),
        entity("Person"),
    ])?;
    let cars = context.persister("Car")?;
    let mut conn = database.connect();

    let car = Entity::with_id("Car", 10).with("plate", "AB-123");
    let result = cars.insert(&mut conn, &car);
    assert!(matches!(
        result,
        Err(PersistError::MandatoryRelationMissing { ref property, .. }) if property == "owner"
    ));

    let car = Entity::with_id("Car", 11);
    car.set_one("owner", Some(Entity::with_id("Person", 1)));
    let result = cars.insert(&mut conn, &car);
    assert!(matches!(
        result,
        Err(PersistError::MandatoryPropertyMissing { ref property, .. }) if property == "plate"
    ));
    assert_eq!(database.row_count("Car")?, 0);
    Ok(())
}

#[test]
fn test_reference_cycle_is_fixed_after_insert() -> Result<()> {
    let (context, database) = deploy(vec![
        entity("Person").relation(RelationMapping::one_to_one("car", "Car")),
        entity("Car").relation(RelationMapping::many_to_one("driver", "Person")),
    ])?;
    let persons = context.persister("Person")?;
    let mut conn = database.connect();

    let person = Entity::with_id("Person", 1).with("name", "Alice");
    let car = Entity::with_id("Car", 10).with("name", "Roadster");
    person.set_one("car", Some(car.clone()));
    car.set_one("driver", Some(person.clone()));
    persons.insert(&mut conn, &person)?;

    assert_eq!(
        column_by_id(&database, "Car", "driverId")?,
        vec![(Value::Integer(10), Value::Integer(1))]
    );
    assert_eq!(
        column_by_id(&database, "Person", "carId")?,
        vec![(Value::Integer(1), Value::Integer(10))]
    );

    let loaded = context
        .persister("Car")?
        .select(&mut conn, Value::Integer(10))?
        .expect("stored");
    let driver = loaded.one("driver").expect("driver");
    let own_car = driver.one("car").expect("car");
    assert!(own_car.same_instance(&loaded));
    Ok(())
}
