use relmap::prelude::*;
use relmap::{PersistError, Result};
use std::sync::{Arc, Mutex};

fn account(version: VersionMapping) -> EntityMapping {
    EntityMapping::new("Account")
        .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::already_assigned()))
        .with_property("balance", DataType::Integer)
        .version(version)
}

fn deploy(mappings: Vec<EntityMapping>) -> Result<(PersistenceContext, InMemoryDatabase)> {
    let context = PersistenceContext::builder(PersistenceConfig::default())
        .map_all(mappings)
        .build()?;
    let database = InMemoryDatabase::new();
    context.deploy_schema(&mut database.connect())?;
    Ok((context, database))
}

type Calls = Arc<Mutex<Vec<String>>>;

fn record(calls: &Calls, entry: String) {
    calls.lock().expect("calls lock").push(entry);
}

#[test]
fn test_version_starts_and_moves_forward() -> Result<()> {
    let (context, database) = deploy(vec![account(VersionMapping::counter("version"))])?;
    let accounts = context.persister("Account")?;
    let mut conn = database.connect();

    let acc = Entity::with_id("Account", 1).with("balance", 100);
    accounts.insert(&mut conn, &acc)?;
    assert_eq!(acc.get("version"), Value::Integer(1));

    let previous = acc.deep_copy();
    acc.set("balance", 150);
    accounts.update(&mut conn, &acc, &previous, false)?;
    assert_eq!(acc.get("version"), Value::Integer(2));
    assert_eq!(database.scan("Account")?[0].get("version"), Value::Integer(2));

    // Nothing changed: no statement and no new version
    conn.clear_history();
    let previous = acc.deep_copy();
    accounts.update(&mut conn, &acc, &previous, false)?;
    assert!(conn.executed_statements().is_empty());
    assert_eq!(acc.get("version"), Value::Integer(2));
    Ok(())
}

#[test]
fn test_stale_update_is_rejected_and_rolled_back() -> Result<()> {
    let (context, database) = deploy(vec![account(VersionMapping::counter("version"))])?;
    let accounts = context.persister("Account")?;
    let mut conn = database.connect();
    accounts.insert(&mut conn, &Entity::with_id("Account", 1).with("balance", 100))?;

    // 1. Two readers of the same row
    let first = accounts.select(&mut conn, Value::Integer(1))?.expect("stored");
    let second = accounts.select(&mut conn, Value::Integer(1))?.expect("stored");

    // 2. The first writer wins
    let previous = first.deep_copy();
    first.set("balance", 200);
    accounts.update(&mut conn, &first, &previous, false)?;

    // 3. The second one read version 1, which is gone
    conn.begin()?;
    let previous = second.deep_copy();
    second.set("balance", 300);
    let result = accounts.update(&mut conn, &second, &previous, false);
    assert!(matches!(
        result,
        Err(PersistError::StaleState { expected: 1, actual: 0, .. })
    ));
    assert_eq!(second.get("version"), Value::Integer(2));

    // 4. Rolling back restores the in-memory version
    conn.rollback()?;
    assert_eq!(second.get("version"), Value::Integer(1));
    let stored = accounts.select(&mut conn, Value::Integer(1))?.expect("stored");
    assert_eq!(stored.get("balance"), Value::Integer(200));
    assert_eq!(stored.get("version"), Value::Integer(2));
    Ok(())
}

#[test]
fn test_versioned_delete() -> Result<()> {
    let (context, database) = deploy(vec![account(VersionMapping::counter("version"))])?;
    let accounts = context.persister("Account")?;
    let mut conn = database.connect();
    let acc = Entity::with_id("Account", 1).with("balance", 100);
    accounts.insert(&mut conn, &acc)?;

    let stale = accounts.select(&mut conn, Value::Integer(1))?.expect("stored");
    let previous = acc.deep_copy();
    acc.set("balance", 50);
    accounts.update(&mut conn, &acc, &previous, false)?;

    let result = accounts.delete(&mut conn, &stale);
    assert!(matches!(result, Err(PersistError::StaleState { .. })));
    assert_eq!(database.row_count("Account")?, 1);

    accounts.delete(&mut conn, &acc)?;
    assert_eq!(database.row_count("Account")?, 0);
    Ok(())
}

#[test]
fn test_custom_version_generator() -> Result<()> {
    let version = VersionMapping::counter("revision")
        .column("rev")
        .next(|current| Value::Integer(current.as_i64().unwrap_or(0) + 10));
    let (context, database) = deploy(vec![account(version)])?;
    let accounts = context.persister("Account")?;
    let mut conn = database.connect();

    let acc = Entity::with_id("Account", 1).with("balance", 1);
    accounts.insert(&mut conn, &acc)?;
    let previous = acc.deep_copy();
    acc.set("balance", 2);
    accounts.update(&mut conn, &acc, &previous, false)?;

    assert_eq!(acc.get("revision"), Value::Integer(11));
    assert_eq!(database.scan("Account")?[0].get("rev"), Value::Integer(11));
    Ok(())
}

#[test]
fn test_listeners_see_each_batch_once() -> Result<()> {
    let (context, database) = deploy(vec![
        EntityMapping::new("Person")
            .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::already_assigned()))
            .relation(RelationMapping::one_to_many("cars", "Car").mapped_by("owner")),
        EntityMapping::new("Car")
            .identifier(IdentifierMapping::new(DataType::Integer, IdentifierPolicy::already_assigned())),
    ])?;
    let persons = context.persister("Person")?;
    let cars = context.persister("Car")?;
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));

    for (name, persister) in [("person", persons), ("car", cars)] {
        let before = Arc::clone(&calls);
        persister
            .listeners()?
            .insert
            .before(move |batch| record(&before, format!("{} before {}", name, batch.len())));
        let after = Arc::clone(&calls);
        persister
            .listeners()?
            .insert
            .after(move |batch, _| record(&after, format!("{} after {}", name, batch.len())));
    }

    let people: Vec<Entity> = (1..=2)
        .map(|n| {
            let person = Entity::with_id("Person", n);
            person.set_many("cars", vec![Entity::with_id("Car", n * 10), Entity::with_id("Car", n * 10 + 1)]);
            person
        })
        .collect();
    let mut conn = database.connect();
    persons.insert_all(&mut conn, &people)?;

    // 1. The cars of both people go in as one nested batch
    assert_eq!(
        *calls.lock().expect("calls lock"),
        vec![
            "person before 2".to_string(),
            "car before 4".to_string(),
            "car after 4".to_string(),
            "person after 2".to_string(),
        ]
    );

    // 2. Same for the cascaded delete
    let deleted: Calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&deleted);
    cars.listeners()?
        .delete
        .before(move |batch| record(&seen, format!("car delete {}", batch.len())));
    persons.delete_all(&mut conn, &people)?;
    assert_eq!(*deleted.lock().expect("calls lock"), vec!["car delete 4".to_string()]);
    assert_eq!(database.row_count("Car")?, 0);
    Ok(())
}

#[test]
fn test_error_and_select_listeners() -> Result<()> {
    let (context, database) = deploy(vec![account(VersionMapping::counter("version"))])?;
    let accounts = context.persister("Account")?;
    let mut conn = database.connect();
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));

    let failed = Arc::clone(&calls);
    accounts
        .listeners()?
        .insert
        .on_error(move |batch, error| {
            let missing_id = matches!(error, PersistError::NotPersisted { .. });
            record(&failed, format!("insert failed {} {}", batch.len(), missing_id))
        });
    let asked = Arc::clone(&calls);
    accounts
        .listeners()?
        .select
        .before(move |ids| record(&asked, format!("select {}", ids.len())));
    let found = Arc::clone(&calls);
    accounts
        .listeners()?
        .select
        .after(move |ids, entities| record(&found, format!("found {}/{}", entities.len(), ids.len())));
    let removed = Arc::clone(&calls);
    accounts
        .listeners()?
        .delete_by_id
        .after(move |ids, _| record(&removed, format!("deleted by id {}", ids.len())));

    // 1. No identifier: the insert fails and the error listener hears of it
    let result = accounts.insert(&mut conn, &Entity::new("Account"));
    assert!(result.is_err());

    // 2. One of two identifiers exists
    accounts.insert(&mut conn, &Entity::with_id("Account", 1).with("balance", 5))?;
    let loaded = accounts.select_by_ids(&mut conn, &[Value::Integer(1), Value::Integer(2)])?;
    assert_eq!(loaded.len(), 1);

    // 3. Delete by identifier
    accounts.delete_by_id(&mut conn, Value::Integer(1))?;
    assert_eq!(database.row_count("Account")?, 0);

    assert_eq!(
        *calls.lock().expect("calls lock"),
        vec![
            "insert failed 1 true".to_string(),
            "select 2".to_string(),
            "found 1/2".to_string(),
            "deleted by id 1".to_string(),
        ]
    );
    Ok(())
}
