//! State store behaviour under every transform combination, run against the
//! in-memory backend.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chronicle_db::MemoryCollection;
use chronicle_state::{
    CompressionConfig, DocumentStateStore, KeyProvider, RetentionConfig, StateStore,
    StateStoreConfig, StaticKeyProvider,
};
use chronicle_types::{AggregateId, AggregateState, ErrorKind};

fn key() -> Arc<dyn KeyProvider> {
    Arc::new(StaticKeyProvider::new(vec![0x42; 32]).expect("key"))
}

fn base() -> StateStoreConfig {
    StateStoreConfig {
        sweep_on_save: false,
        ..StateStoreConfig::default()
    }
}

async fn open(config: StateStoreConfig) -> DocumentStateStore {
    DocumentStateStore::new(Arc::new(MemoryCollection::new("states")), config)
        .await
        .expect("state store")
}

async fn every_pipeline() -> Vec<(&'static str, DocumentStateStore)> {
    let gzip = || Some(CompressionConfig::gzip(6).with_min_size(16));
    vec![
        ("plain", open(base()).await),
        (
            "gzip",
            open(StateStoreConfig {
                compression: gzip(),
                ..base()
            })
            .await,
        ),
        (
            "lz4",
            open(StateStoreConfig {
                compression: Some(CompressionConfig::lz4().with_min_size(16)),
                ..base()
            })
            .await,
        ),
        (
            "aes",
            open(StateStoreConfig {
                key_provider: Some(key()),
                ..base()
            })
            .await,
        ),
        (
            "gzip+aes",
            open(StateStoreConfig {
                compression: gzip(),
                key_provider: Some(key()),
                ..base()
            })
            .await,
        ),
    ]
}

fn state(id: AggregateId, version: u64, data: &[u8]) -> AggregateState {
    AggregateState::new(id, "guild", version, data.to_vec())
}

#[tokio::test]
async fn payloads_round_trip_through_every_pipeline() {
    let payloads: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"A".to_vec(),
        b"{\"members\":[\"ana\",\"bo\"]}".repeat(40),
        (0..4096u32).map(|i| u8::try_from(i * 7919 % 251).unwrap()).collect(),
    ];
    for (name, store) in every_pipeline().await {
        let id = AggregateId::new();
        for (version, payload) in (1u64..).zip(&payloads) {
            store.save(&state(id, version, payload)).await.unwrap();
        }
        for (version, payload) in (1u64..).zip(&payloads) {
            let loaded = store.load_version(&id, version).await.unwrap();
            assert_eq!(&loaded.data, payload, "{name} v{version}");
            assert_eq!(loaded.aggregate_type, "guild");
        }
    }
}

#[tokio::test]
async fn latest_and_exact_versions_are_isolated() {
    for (name, store) in every_pipeline().await {
        let id = AggregateId::new();
        store.save(&state(id, 1, b"A")).await.unwrap();
        store.save(&state(id, 2, b"B")).await.unwrap();

        let latest = store.load(&id).await.unwrap();
        assert_eq!((latest.version, latest.data.as_slice()), (2, &b"B"[..]), "{name}");
        assert_eq!(store.load_version(&id, 1).await.unwrap().data, b"A", "{name}");
        assert_eq!(store.count(&id).await.unwrap(), 2, "{name}");
    }
}

#[tokio::test]
async fn keep_last_three_leaves_the_newest_three() {
    let store = open(StateStoreConfig {
        retention: RetentionConfig::KeepLast { count: 3 },
        ..base()
    })
    .await;
    let id = AggregateId::new();
    for v in 1..=5 {
        store.save(&state(id, v, b"snapshot")).await.unwrap();
    }
    assert_eq!(store.apply_retention(&id).await.unwrap(), 2);
    assert_eq!(store.count(&id).await.unwrap(), 3);
    for v in 1..=5 {
        assert_eq!(store.exists(&id, v).await.unwrap(), v >= 3, "v{v}");
    }
}

#[tokio::test]
async fn time_based_keeps_only_recent_snapshots() {
    let store = open(StateStoreConfig {
        retention: RetentionConfig::TimeBased { max_age_secs: 600 },
        ..base()
    })
    .await;
    let id = AggregateId::new();
    let now = Utc::now();
    // v1..v3 are an hour old, v4 and v5 are fresh.
    for v in 1..=5 {
        let age = if v <= 3 { chrono::Duration::hours(1) } else { chrono::Duration::zero() };
        store
            .save(&state(id, v, b"s").with_timestamp(now - age))
            .await
            .unwrap();
    }
    store.apply_retention(&id).await.unwrap();
    let left: Vec<u64> = store.list(&id).await.unwrap().iter().map(|s| s.version).collect();
    assert_eq!(left, vec![5, 4]);
}

#[tokio::test]
async fn detached_sweep_runs_without_a_sweeper() {
    let store = open(StateStoreConfig {
        retention: RetentionConfig::KeepLast { count: 1 },
        ..StateStoreConfig::default()
    })
    .await;
    let id = AggregateId::new();
    for v in 1..=3 {
        store.save(&state(id, v, b"s")).await.unwrap();
    }
    // Give the spawned sweeps a chance to run.
    for _ in 0..50 {
        if store.count(&id).await.unwrap() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.count(&id).await.unwrap(), 1);
    assert!(store.exists(&id, 3).await.unwrap());
}

#[tokio::test]
async fn encrypted_rows_need_the_right_key() {
    let collection = Arc::new(MemoryCollection::new("states"));
    let writer = DocumentStateStore::new(
        collection.clone(),
        StateStoreConfig {
            key_provider: Some(key()),
            ..base()
        },
    )
    .await
    .unwrap();
    let id = AggregateId::new();
    writer.save(&state(id, 1, b"secret")).await.unwrap();

    let other_key: Arc<dyn KeyProvider> = Arc::new(StaticKeyProvider::new(vec![0x24; 32]).unwrap());
    let reader = DocumentStateStore::new(
        collection.clone(),
        StateStoreConfig {
            key_provider: Some(other_key),
            ..base()
        },
    )
    .await
    .unwrap();
    assert_eq!(reader.load(&id).await.unwrap_err().kind(), ErrorKind::EncryptionFailed);

    let keyless = DocumentStateStore::new(collection, base()).await.unwrap();
    assert_eq!(keyless.load(&id).await.unwrap_err().kind(), ErrorKind::EncryptionFailed);
    // Payload-free operations still work without the key.
    assert_eq!(keyless.list(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_transform_settings_fail_before_io() {
    let bad_level = StateStoreConfig {
        compression: Some(CompressionConfig::gzip(42)),
        ..base()
    };
    let err = DocumentStateStore::new(Arc::new(MemoryCollection::new("s")), bad_level)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        StaticKeyProvider::new(vec![0; 20]).unwrap_err().kind(),
        ErrorKind::Validation
    );
}
