//! Operator CLI for Chronicle stores.
//!
//! Every command loads the YAML configuration, opens the configured
//! backend, performs one unit of work, prints a JSON report to stdout, and
//! exits. Background tasks (archiver, retention sweeper) are never started
//! here; `archive` runs exactly one pass.
//!
//! # Commands
//!
//! - `migrate-events` -- Copy every stream from one storage strategy to
//!   another, resuming where an earlier run stopped
//! - `archive` -- One hybrid archive pass
//! - `purge-expired` -- Delete state rows whose TTL has passed
//! - `apply-retention` -- Run the retention policy for one aggregate
//! - `metrics` -- Storage metrics for the state collection

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail, ensure};
use chronicle_core::config::EventsConfig;
use chronicle_core::{ChronicleConfig, ChronicleStores, build_event_store, init_tracing, open_provider};
use chronicle_db::CollectionProvider;
use chronicle_events::EventStore;
use chronicle_migrate::{EventStoreMigrator, MigrationResult};
use chronicle_state::StateMetricsStore;
use chronicle_types::{AggregateId, StorageStrategy};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

/// Chronicle store administration.
#[derive(Debug, Parser)]
#[command(name = "chronicle-admin", version, about)]
struct Cli {
    /// Path to the YAML configuration.
    #[arg(long, short, default_value = "chronicle.yaml")]
    config: PathBuf,

    /// Override `logging.level`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Copy events between storage strategies.
    MigrateEvents(MigrateArgs),
    /// Run one archive pass of the hybrid strategy.
    Archive,
    /// Delete expired state rows.
    PurgeExpired,
    /// Apply the retention policy to one aggregate.
    ApplyRetention {
        /// Aggregate to prune.
        #[arg(long)]
        aggregate: AggregateId,
    },
    /// Print storage metrics for the state collection.
    Metrics {
        /// Restrict to one aggregate.
        #[arg(long)]
        aggregate: Option<AggregateId>,
    },
}

#[derive(Debug, Args)]
struct MigrateArgs {
    /// Source strategy.
    #[arg(long)]
    from: StorageStrategy,

    /// Target strategy.
    #[arg(long)]
    to: StorageStrategy,

    /// Source collection (stream and document strategies only).
    #[arg(long)]
    source_collection: Option<String>,

    /// Target collection (stream and document strategies only).
    #[arg(long)]
    target_collection: Option<String>,

    /// Verify each stream after copying it.
    #[arg(long)]
    verify: bool,

    /// Keep going after a stream fails.
    #[arg(long)]
    continue_on_error: bool,

    /// Streams copied concurrently.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Events per target write.
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ChronicleConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging)?;

    config.events.start_archiver = false;
    config.state.run_sweeper = false;
    config.state.sweep_on_save = false;

    match cli.command {
        Command::MigrateEvents(args) => {
            config.validate()?;
            let provider = open_provider(&config.database).await?;
            let result = migrate_events(&provider, &config, &args).await;
            provider.close().await;
            let result = result?;
            print_json(&result)?;
            ensure!(
                result.failures.is_empty(),
                "{} stream(s) failed to migrate",
                result.failures.len()
            );
        }
        Command::Archive => {
            let stores = ChronicleStores::open(&config).await?;
            let Some(archiver) = stores.archiver().cloned() else {
                stores.close().await?;
                bail!("archive needs events.strategy: hybrid");
            };
            let report = archiver.run_once().await;
            stores.close().await?;
            print_json(&report)?;
        }
        Command::PurgeExpired => {
            let stores = ChronicleStores::open(&config).await?;
            let removed = stores.states().purge_expired().await;
            stores.close().await?;
            let removed = removed?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::ApplyRetention { aggregate } => {
            let stores = ChronicleStores::open(&config).await?;
            let removed = stores.states().apply_retention(&aggregate).await;
            stores.close().await?;
            let removed = removed?;
            print_json(&serde_json::json!({ "aggregateId": aggregate, "removed": removed }))?;
        }
        Command::Metrics { aggregate } => {
            let stores = ChronicleStores::open(&config).await?;
            let metrics = stores.states().storage_metrics(aggregate.as_ref()).await;
            stores.close().await?;
            print_json(&metrics?)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Events settings for one side of a migration.
fn side_config(
    base: &EventsConfig,
    strategy: StorageStrategy,
    collection: Option<&str>,
) -> anyhow::Result<EventsConfig> {
    let mut config = EventsConfig {
        strategy,
        start_archiver: false,
        ..base.clone()
    };
    if let Some(collection) = collection {
        ensure!(
            strategy != StorageStrategy::Hybrid,
            "hybrid collections come from events.hot_collection and events.cold_collection"
        );
        config.collection = collection.to_owned();
    }
    Ok(config)
}

fn collections(config: &EventsConfig) -> Vec<&str> {
    match config.strategy {
        StorageStrategy::Hybrid => vec![config.hot_collection.as_str(), config.cold_collection.as_str()],
        StorageStrategy::Stream | StorageStrategy::Document => vec![config.collection.as_str()],
    }
}

async fn migrate_events(
    provider: &CollectionProvider,
    config: &ChronicleConfig,
    args: &MigrateArgs,
) -> anyhow::Result<MigrationResult> {
    let source_config = side_config(&config.events, args.from, args.source_collection.as_deref())?;
    let target_config = side_config(&config.events, args.to, args.target_collection.as_deref())?;
    let source_collections = collections(&source_config);
    if let Some(shared) = collections(&target_config)
        .into_iter()
        .find(|c| source_collections.contains(c))
    {
        bail!("source and target both use collection {shared}");
    }

    let mut migration = config.migration.migration_config();
    migration.verify |= args.verify;
    migration.continue_on_error |= args.continue_on_error;
    if let Some(concurrency) = args.concurrency {
        migration.concurrency = concurrency;
    }
    if let Some(batch_size) = args.batch_size {
        migration.batch_size = batch_size;
    }

    let source = build_event_store(&source_config, provider).await?;
    let target = build_event_store(&target_config, provider).await?;
    tracing::info!(
        from = %args.from,
        to = %args.to,
        source = ?collections(&source_config),
        target = ?collections(&target_config),
        "Migrating events"
    );

    let migrator = EventStoreMigrator::new(Arc::clone(&source), Arc::clone(&target), migration)?;
    let result = migrator.migrate_all().await;
    source.close().await?;
    target.close().await?;
    Ok(result?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use chronicle_migrate::MigrationStatus;
    use chronicle_types::Event;
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_migrate_flags() {
        let cli = Cli::try_parse_from([
            "chronicle-admin",
            "--config",
            "prod.yaml",
            "migrate-events",
            "--from",
            "stream",
            "--to",
            "document",
            "--target-collection",
            "events_flat",
            "--verify",
            "--concurrency",
            "8",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("prod.yaml"));
        let Command::MigrateEvents(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.from, StorageStrategy::Stream);
        assert_eq!(args.to, StorageStrategy::Document);
        assert_eq!(args.target_collection.as_deref(), Some("events_flat"));
        assert!(args.verify);
        assert!(!args.continue_on_error);
        assert_eq!(args.concurrency, Some(8));
    }

    #[test]
    fn rejects_unknown_strategies_and_ids() {
        assert!(Cli::try_parse_from(["chronicle-admin", "migrate-events", "--from", "tape", "--to", "stream"]).is_err());
        assert!(Cli::try_parse_from(["chronicle-admin", "apply-retention", "--aggregate", "nope"]).is_err());
    }

    fn migrate_args(from: StorageStrategy, to: StorageStrategy) -> MigrateArgs {
        MigrateArgs {
            from,
            to,
            source_collection: None,
            target_collection: Some("events_flat".to_owned()),
            verify: true,
            continue_on_error: false,
            concurrency: Some(2),
            batch_size: None,
        }
    }

    #[tokio::test]
    async fn migrates_stream_collection_into_document_collection() {
        let provider = CollectionProvider::memory();
        let config = ChronicleConfig::default();
        let source = build_event_store(&config.events, &provider).await.unwrap();
        let ids: Vec<AggregateId> = (0..3).map(|_| AggregateId::new()).collect();
        for id in &ids {
            let events: Vec<Event> = (1..=4)
                .map(|v| Event::new(*id, "guild", "MemberJoined", v, b"{}".to_vec()))
                .collect();
            source.save(&events, 0).await.unwrap();
        }

        let args = migrate_args(StorageStrategy::Stream, StorageStrategy::Document);
        let result = migrate_events(&provider, &config, &args).await.unwrap();
        assert_eq!(result.status, MigrationStatus::Completed);
        assert_eq!(result.streams_migrated, 3);
        assert_eq!(result.events_copied, 12);

        let target_config = side_config(&config.events, StorageStrategy::Document, Some("events_flat")).unwrap();
        let target = build_event_store(&target_config, &provider).await.unwrap();
        for id in &ids {
            assert_eq!(target.load(id).await.unwrap(), source.load(id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn refuses_to_migrate_a_collection_onto_itself() {
        let provider = CollectionProvider::memory();
        let config = ChronicleConfig::default();
        let mut args = migrate_args(StorageStrategy::Stream, StorageStrategy::Document);
        args.target_collection = None;
        let err = migrate_events(&provider, &config, &args).await.unwrap_err();
        assert!(err.to_string().contains("events"), "{err}");
    }

    #[test]
    fn hybrid_sides_reject_a_collection_override() {
        let base = EventsConfig::default();
        assert!(side_config(&base, StorageStrategy::Hybrid, Some("x")).is_err());
        let hybrid = side_config(&base, StorageStrategy::Hybrid, None).unwrap();
        assert_eq!(collections(&hybrid), vec!["events_hot", "events_cold"]);
        assert!(!hybrid.start_archiver);
    }
}
