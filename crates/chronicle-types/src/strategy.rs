//! Storage strategy selector for event stores.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which physical layout backs an event collection.
///
/// Selected by configuration when a store is built; never persisted per
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    /// One growing document per aggregate holding an append-only event array.
    #[default]
    Stream,
    /// One row per event, unique on `(aggregateId, version)`.
    Document,
    /// Stream-shaped hot store for recent events, archived into a cold store.
    Hybrid,
}

impl StorageStrategy {
    /// Lowercase name used in configuration and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Document => "document",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "document" => Ok(Self::Document),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown storage strategy: {other}")),
        }
    }
}
