//! Behaviour every event store strategy must share, run against the
//! in-memory backend.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;

use chronicle_db::{DocumentCollection, MemoryCollection};
use chronicle_events::{
    ArchiveConfig, DocumentConfig, DocumentEventStore, EventStore, HybridEventStore, StreamConfig,
    StreamEventStore,
};
use chronicle_types::{AggregateId, ErrorKind, Event, StorageStrategy};

fn collection(name: &str) -> Arc<dyn DocumentCollection> {
    Arc::new(MemoryCollection::new(name))
}

async fn stores() -> Vec<Arc<dyn EventStore>> {
    let stream = StreamEventStore::new(collection("streams"), StreamConfig::default())
        .await
        .expect("stream store");
    let document = DocumentEventStore::new(collection("events"), DocumentConfig::default())
        .await
        .expect("document store");
    let hot = StreamEventStore::new(collection("hot"), StreamConfig::default())
        .await
        .expect("hot store");
    let cold = DocumentEventStore::new(collection("cold"), DocumentConfig::default())
        .await
        .expect("cold store");
    let hybrid = HybridEventStore::new(hot, Arc::new(cold), ArchiveConfig::default());
    vec![Arc::new(stream), Arc::new(document), Arc::new(hybrid)]
}

fn batch(id: AggregateId, from: u64, data: &[&str]) -> Vec<Event> {
    data.iter()
        .zip(from..)
        .map(|(d, v)| Event::new(id, "guild", "Changed", v, d.as_bytes().to_vec()))
        .collect()
}

#[tokio::test]
async fn saves_load_back_in_order() {
    for store in stores().await {
        let id = AggregateId::new();
        store.save(&batch(id, 1, &["A"]), 0).await.unwrap();
        store.save(&batch(id, 2, &["B", "C"]), 1).await.unwrap();

        let events = store.load(&id).await.unwrap();
        let data: Vec<String> = events
            .iter()
            .map(|e| String::from_utf8_lossy(&e.data).into_owned())
            .collect();
        assert_eq!(data, vec!["A", "B", "C"], "{}", store.strategy());
        assert_eq!(store.load_from(&id, 3).await.unwrap().len(), 1);
        assert!(store.load_from(&id, 4).await.unwrap().is_empty());
        assert_eq!(store.current_version(&id).await.unwrap(), 3);
        assert_eq!(store.aggregate_ids().await.unwrap(), vec![id]);
    }
}

#[tokio::test]
async fn stale_expected_version_is_rejected_without_writing() {
    for store in stores().await {
        let id = AggregateId::new();
        store.save(&batch(id, 1, &["A", "B"]), 0).await.unwrap();

        let err = store
            .save(&batch(id, 6, &["X", "Y"]), 5)
            .await
            .expect_err("stale version must conflict");
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict, "{}", store.strategy());
        assert_eq!(store.current_version(&id).await.unwrap(), 2);
        assert_eq!(store.load(&id).await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn concurrent_writers_with_same_version_race_to_one_winner() {
    for store in stores().await {
        let id = AggregateId::new();
        store.save(&batch(id, 1, &["A"]), 0).await.unwrap();

        let first = batch(id, 2, &["from-first"]);
        let second = batch(id, 2, &["from-second"]);
        let (a, b) = tokio::join!(store.save(&first, 1), store.save(&second, 1));
        assert!(a.is_ok() != b.is_ok(), "{}", store.strategy());
        assert_eq!(store.load(&id).await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn malformed_batches_fail_before_io() {
    for store in stores().await {
        let id = AggregateId::new();
        let gap = batch(id, 2, &["A"]);
        assert_eq!(
            store.save(&gap, 0).await.unwrap_err().kind(),
            ErrorKind::InvalidVersion
        );

        let mut mixed = batch(id, 1, &["A", "B"]);
        mixed[1].aggregate_id = AggregateId::new();
        assert_eq!(store.save(&mixed, 0).await.unwrap_err().kind(), ErrorKind::Validation);

        assert!(store.save(&[], 0).await.is_ok());
        assert!(store.load(&id).await.unwrap_err().is_not_found());
    }
}

#[tokio::test]
async fn strategies_report_themselves() {
    let kinds: Vec<StorageStrategy> = stores().await.iter().map(|s| s.strategy()).collect();
    assert_eq!(
        kinds,
        vec![
            StorageStrategy::Stream,
            StorageStrategy::Document,
            StorageStrategy::Hybrid
        ]
    );
}

#[tokio::test]
async fn unavailable_backend_is_classified() {
    let backing = Arc::new(MemoryCollection::new("streams"));
    let store = StreamEventStore::new(backing.clone(), StreamConfig::default())
        .await
        .unwrap();
    backing.set_available(false);
    let err = store
        .save(&batch(AggregateId::new(), 1, &["A"]), 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
}
