//! Migration and versioning tooling for Chronicle.
//!
//! - [`upgrader`] -- [`EventUpgrader`], chains of payload upgrades keyed by
//!   `(event type, schema version)`
//! - [`upcasting`] -- [`UpcastingEventStore`], which upgrades on read
//! - [`schema`] -- [`SchemaMigrator`], which upgrades stored documents in
//!   place, in batches
//! - [`migrator`] -- [`EventStoreMigrator`], which copies streams between
//!   stores of any strategy with a bounded worker pool

pub mod migrator;
pub mod schema;
pub mod upcasting;
pub mod upgrader;

pub use migrator::{
    EventStoreMigrator, MigrationConfig, MigrationProgress, MigrationResult, MigrationStatus,
    ProgressSnapshot, StreamFailure,
};
pub use schema::{SchemaMigrationConfig, SchemaMigrationReport, SchemaMigrator};
pub use upcasting::UpcastingEventStore;
pub use upgrader::{EventUpgrader, EventUpgraderBuilder, MAX_UPGRADE_STEPS};
