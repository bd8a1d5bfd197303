//! Wiring for Chronicle services.
//!
//! This crate turns a YAML file into opened stores. It owns the typed
//! configuration, the store factories and presets, tracing setup, and a
//! small retry helper for callers that hit optimistic concurrency
//! conflicts.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `chronicle.yaml` into
//!   strongly-typed structs, with environment overrides.
//! - [`factory`] -- [`StateStoreBuilder`] presets, [`build_event_store`],
//!   and [`ChronicleStores`].
//! - [`retry`] -- [`RetryPolicy`] and exponential backoff helpers.
//! - [`telemetry`] -- Tracing subscriber installation.

pub mod config;
pub mod factory;
pub mod retry;
pub mod telemetry;

pub use config::{ChronicleConfig, ConfigError};
pub use factory::{ChronicleStores, StateStoreBuilder, build_event_store, open_provider};
pub use retry::{RetryPolicy, retry, retry_on_conflict, retry_transient};
pub use telemetry::init_tracing;
