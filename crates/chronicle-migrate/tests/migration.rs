//! Migration tooling run end to end against the in-memory backend.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;

use chronicle_db::{DocumentCollection, MemoryCollection};
use chronicle_events::{
    DocumentConfig, DocumentEventStore, EventStore, StreamConfig, StreamEventStore,
};
use chronicle_migrate::{
    EventStoreMigrator, EventUpgrader, MigrationConfig, MigrationStatus, SchemaMigrationConfig,
    SchemaMigrator, UpcastingEventStore,
};
use chronicle_state::{DocumentStateStore, StateStore, StateStoreConfig};
use chronicle_types::{AggregateId, AggregateState, Event};

async fn stream_store(collection: Arc<MemoryCollection>) -> Arc<dyn EventStore> {
    Arc::new(
        StreamEventStore::new(collection, StreamConfig::default())
            .await
            .expect("stream store"),
    )
}

async fn document_store(collection: Arc<MemoryCollection>) -> Arc<dyn EventStore> {
    Arc::new(
        DocumentEventStore::new(collection, DocumentConfig::default())
            .await
            .expect("document store"),
    )
}

fn events(id: AggregateId, from: u64, types: &[&str]) -> Vec<Event> {
    types
        .iter()
        .zip(from..)
        .map(|(t, v)| {
            Event::new(id, "guild", *t, v, format!("{t}-{v}").into_bytes())
                .with_metadata("correlationId", format!("c{v}"))
        })
        .collect()
}

async fn seed(store: &Arc<dyn EventStore>, streams: usize, per_stream: usize) -> Vec<AggregateId> {
    let mut ids = Vec::new();
    for _ in 0..streams {
        let id = AggregateId::new();
        let types: Vec<&str> = (0..per_stream)
            .map(|i| if i % 2 == 0 { "MemberJoined" } else { "MemberLeft" })
            .collect();
        store.save(&events(id, 1, &types), 0).await.unwrap();
        ids.push(id);
    }
    ids
}

fn config() -> MigrationConfig {
    MigrationConfig {
        concurrency: 3,
        batch_size: 2,
        verify: true,
        continue_on_error: false,
    }
}

#[tokio::test]
async fn stream_to_document_copies_every_event_faithfully() {
    let source = stream_store(Arc::new(MemoryCollection::new("streams"))).await;
    let target = document_store(Arc::new(MemoryCollection::new("events"))).await;
    let ids = seed(&source, 5, 7).await;

    let migrator = EventStoreMigrator::new(Arc::clone(&source), Arc::clone(&target), config()).unwrap();
    let result = migrator.migrate_all().await.unwrap();

    assert_eq!(result.status, MigrationStatus::Completed);
    assert_eq!(result.streams_total, 5);
    assert_eq!(result.streams_migrated, 5);
    assert_eq!(result.events_copied, 35);
    assert_eq!(result.events_skipped, 0);
    for id in &ids {
        assert_eq!(source.load(id).await.unwrap(), target.load(id).await.unwrap());
    }

    let progress = migrator.progress().snapshot();
    assert_eq!(progress.total_events, 35);
    assert_eq!(progress.processed_events, 35);
    assert_eq!(progress.processed_streams, 5);
    assert!((progress.percent() - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn document_to_stream_round_trips_too() {
    let source = document_store(Arc::new(MemoryCollection::new("events"))).await;
    let target = stream_store(Arc::new(MemoryCollection::new("streams"))).await;
    let ids = seed(&source, 2, 3).await;

    let result = EventStoreMigrator::new(Arc::clone(&source), Arc::clone(&target), config())
        .unwrap()
        .migrate(ids.clone())
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::Completed);
    for id in &ids {
        assert_eq!(target.current_version(id).await.unwrap(), 3);
        assert_eq!(source.load(id).await.unwrap(), target.load(id).await.unwrap());
    }
}

#[tokio::test]
async fn rerun_resumes_from_the_target_version() {
    let source = stream_store(Arc::new(MemoryCollection::new("streams"))).await;
    let target = document_store(Arc::new(MemoryCollection::new("events"))).await;
    let id = AggregateId::new();
    let all = events(id, 1, &["A", "B", "C", "D", "E"]);
    source.save(&all, 0).await.unwrap();
    // An interrupted earlier run got as far as version 2.
    let copied = source.load(&id).await.unwrap();
    target.save(&copied[..2], 0).await.unwrap();

    let migrator = EventStoreMigrator::new(Arc::clone(&source), Arc::clone(&target), config()).unwrap();
    let result = migrator.migrate(vec![id]).await.unwrap();
    assert_eq!(result.status, MigrationStatus::Completed);
    assert_eq!(result.events_skipped, 2);
    assert_eq!(result.events_copied, 3);
    assert_eq!(target.load(&id).await.unwrap(), source.load(&id).await.unwrap());

    let again = migrator.migrate(vec![id]).await.unwrap();
    assert_eq!(again.events_copied, 0);
    assert_eq!(again.events_skipped, 5);
}

#[tokio::test]
async fn verification_reports_diverged_streams() {
    let source = stream_store(Arc::new(MemoryCollection::new("streams"))).await;
    let target = document_store(Arc::new(MemoryCollection::new("events"))).await;
    let good = seed(&source, 1, 2).await[0];
    let bad = AggregateId::new();
    source.save(&events(bad, 1, &["Created", "Renamed"]), 0).await.unwrap();
    target.save(&events(bad, 1, &["Created", "Deleted"]), 0).await.unwrap();

    let result = EventStoreMigrator::new(
        source,
        Arc::clone(&target),
        MigrationConfig {
            continue_on_error: true,
            ..config()
        },
    )
    .unwrap()
    .migrate(vec![good, bad])
    .await
    .unwrap();

    assert_eq!(result.status, MigrationStatus::CompletedWithErrors);
    assert_eq!(result.streams_migrated, 1);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].aggregate_id, bad);
    assert!(result.failures[0].error.contains("differs"), "{}", result.failures[0].error);
}

#[tokio::test]
async fn first_failure_aborts_unless_told_to_continue() {
    let source = stream_store(Arc::new(MemoryCollection::new("streams"))).await;
    let target_collection = Arc::new(MemoryCollection::new("events"));
    let target = document_store(Arc::clone(&target_collection)).await;
    let ids = seed(&source, 3, 2).await;
    target_collection.set_available(false);

    let strict = MigrationConfig {
        concurrency: 1,
        ..config()
    };
    let result = EventStoreMigrator::new(Arc::clone(&source), Arc::clone(&target), strict)
        .unwrap()
        .migrate(ids.clone())
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::Aborted);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.streams_migrated, 0);

    let lenient = MigrationConfig {
        continue_on_error: true,
        ..strict
    };
    let result = EventStoreMigrator::new(source, target, lenient)
        .unwrap()
        .migrate(ids)
        .await
        .unwrap();
    assert_eq!(result.status, MigrationStatus::CompletedWithErrors);
    assert_eq!(result.failures.len(), 3);
}

fn add_members_field() -> EventUpgrader {
    EventUpgrader::builder()
        .register_json("GuildCreated", 1, |mut v| {
            if let Some(obj) = v.as_object_mut() {
                obj.insert("members".to_owned(), serde_json::json!([]));
            }
            Ok(v)
        })
        .register_json("guild", 1, |mut v| {
            if let Some(obj) = v.as_object_mut() {
                obj.insert("rank".to_owned(), serde_json::json!(0));
            }
            Ok(v)
        })
        .build()
}

#[tokio::test]
async fn schema_migration_upgrades_streams_in_place() {
    let collection = Arc::new(MemoryCollection::new("streams"));
    let store = stream_store(Arc::clone(&collection)).await;
    let id = AggregateId::new();
    store
        .save(
            &[
                Event::new(id, "guild", "GuildCreated", 1, br#"{"name":"Order"}"#.to_vec()),
                Event::new(id, "guild", "GuildRenamed", 2, br#"{"name":"Chaos"}"#.to_vec()),
            ],
            0,
        )
        .await
        .unwrap();

    let migrator = SchemaMigrator::new(
        Arc::clone(&collection) as Arc<dyn DocumentCollection>,
        add_members_field(),
        SchemaMigrationConfig::default(),
    )
    .unwrap();
    let report = migrator.run().await.unwrap();
    assert_eq!(report.upgraded, 1);
    assert_eq!(report.payloads_upgraded, 1);

    let loaded = store.load(&id).await.unwrap();
    let created: serde_json::Value = serde_json::from_slice(&loaded[0].data).unwrap();
    assert_eq!(created, serde_json::json!({"name": "Order", "members": []}));
    assert_eq!(loaded[0].schema_version, 2);
    assert_eq!(loaded[1].schema_version, 1);

    // The stream's version counter is untouched, so appends continue.
    store
        .save(&[Event::new(id, "guild", "GuildRenamed", 3, b"{}".to_vec())], 2)
        .await
        .unwrap();
}

#[tokio::test]
async fn schema_migration_upgrades_plain_snapshots() {
    let collection = Arc::new(MemoryCollection::new("states"));
    let states = DocumentStateStore::new(
        Arc::clone(&collection) as Arc<dyn DocumentCollection>,
        StateStoreConfig {
            sweep_on_save: false,
            ..StateStoreConfig::default()
        },
    )
    .await
    .unwrap();
    let id = AggregateId::new();
    states
        .save(&AggregateState::new(id, "guild", 4, br#"{"name":"Order"}"#.to_vec()))
        .await
        .unwrap();

    let dry = SchemaMigrator::new(
        Arc::clone(&collection) as Arc<dyn DocumentCollection>,
        add_members_field(),
        SchemaMigrationConfig {
            dry_run: true,
            ..SchemaMigrationConfig::default()
        },
    )
    .unwrap()
    .run()
    .await
    .unwrap();
    assert_eq!(dry.upgraded, 1);
    assert_eq!(states.load(&id).await.unwrap().schema_version, 1);

    SchemaMigrator::new(
        Arc::clone(&collection) as Arc<dyn DocumentCollection>,
        add_members_field(),
        SchemaMigrationConfig::default(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();
    let loaded = states.load(&id).await.unwrap();
    assert_eq!(loaded.schema_version, 2);
    assert_eq!(loaded.version, 4);
    let value: serde_json::Value = serde_json::from_slice(&loaded.data).unwrap();
    assert_eq!(value, serde_json::json!({"name": "Order", "rank": 0}));
}

#[tokio::test]
async fn upcasting_wrapper_and_bulk_migration_agree() {
    let collection = Arc::new(MemoryCollection::new("events"));
    let raw = document_store(Arc::clone(&collection)).await;
    let id = AggregateId::new();
    raw.save(
        &[Event::new(id, "guild", "GuildCreated", 1, br#"{"name":"Order"}"#.to_vec())],
        0,
    )
    .await
    .unwrap();

    let lazy = UpcastingEventStore::new(Arc::clone(&raw), add_members_field())
        .load(&id)
        .await
        .unwrap();

    SchemaMigrator::new(
        collection as Arc<dyn DocumentCollection>,
        add_members_field(),
        SchemaMigrationConfig::default(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();
    let bulk = raw.load(&id).await.unwrap();

    assert_eq!(lazy, bulk);
}
