//! Opening stores from configuration files.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::time::Duration;

use chronicle_core::config::LogFormat;
use chronicle_core::{ChronicleConfig, ChronicleStores, ConfigError};
use chronicle_state::StateStore;
use chronicle_types::{AggregateId, AggregateState, Event, StorageStrategy};

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(yaml.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_a_config_file_from_disk() {
    let file = write_config(
        "events:\n  strategy: document\n  collection: guild_events\nlogging:\n  format: json\n",
    );
    let config = ChronicleConfig::from_file(file.path()).unwrap();
    assert_eq!(config.events.strategy, StorageStrategy::Document);
    assert_eq!(config.events.collection, "guild_events");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert!(config.validate().is_ok());
}

#[test]
fn shipped_example_config_is_valid() {
    let config = ChronicleConfig::parse_raw(include_str!("../../../chronicle.yaml")).unwrap();
    assert!(config.validate().is_ok());
    assert!(config.state.compression.is_some());
    assert!(!config.state.encryption.enabled);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ChronicleConfig::from_file(&dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[tokio::test]
async fn every_strategy_opens_on_the_memory_backend() {
    for strategy in ["stream", "document", "hybrid"] {
        let yaml = format!("events:\n  strategy: {strategy}\n  start_archiver: false\n");
        let config = ChronicleConfig::parse_raw(&yaml).unwrap();
        let stores = ChronicleStores::open(&config).await.unwrap();
        assert_eq!(stores.events().strategy().as_str(), strategy);
        assert_eq!(stores.archiver().is_some(), strategy == "hybrid");

        let id = AggregateId::new();
        stores
            .events()
            .save(&[Event::new(id, "guild", "GuildCreated", 1, b"{}".to_vec())], 0)
            .await
            .unwrap();
        assert_eq!(stores.events().current_version(&id).await.unwrap(), 1);
        stores.close().await.unwrap();
    }
}

#[tokio::test]
async fn hybrid_archiver_starts_when_configured() {
    let config = ChronicleConfig::parse_raw("events:\n  strategy: hybrid\n").unwrap();
    let stores = ChronicleStores::open(&config).await.unwrap();
    let archiver = stores.archiver().unwrap().clone();
    assert!(archiver.is_running());
    stores.close().await.unwrap();
    assert!(!archiver.is_running());
}

#[tokio::test]
async fn retention_runs_through_the_sweeper() {
    let yaml = "state:\n  retention:\n    policy: keep_last\n    count: 2\n";
    let config = ChronicleConfig::parse_raw(yaml).unwrap();
    let stores = ChronicleStores::open(&config).await.unwrap();
    let sweeper = stores.sweeper().unwrap().clone();
    assert!(sweeper.is_running());

    let id = AggregateId::new();
    for version in 1..=5 {
        stores
            .states()
            .save(&AggregateState::new(id, "guild", version, b"{}".to_vec()))
            .await
            .unwrap();
    }
    for _ in 0..100 {
        if stores.states().count(&id).await.unwrap() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stores.states().count(&id).await.unwrap(), 2);
    assert_eq!(stores.states().load(&id).await.unwrap().version, 5);
    stores.close().await.unwrap();
    assert!(!sweeper.is_running());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_opening() {
    let config = ChronicleConfig::parse_raw("state:\n  batch_size: 0\n").unwrap();
    let err = ChronicleStores::open(&config).await.unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
}
