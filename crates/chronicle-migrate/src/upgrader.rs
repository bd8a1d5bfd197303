//! Payload upgrade chains keyed by event type and schema version.
//!
//! A step registered for `(event_type, n)` turns a version-`n` payload into
//! a version-`n + 1` payload. [`EventUpgrader::upgrade`] applies steps until
//! no step is registered for the current version, so a payload written at
//! any historical version reaches the newest shape in one call.

use std::collections::HashMap;
use std::sync::Arc;

use chronicle_types::{Event, StoreError, StoreResult};
use serde_json::Value;

/// Longest chain [`EventUpgrader::upgrade`] will follow.
pub const MAX_UPGRADE_STEPS: u32 = 64;

type UpgradeFn = Arc<dyn Fn(&[u8]) -> StoreResult<Vec<u8>> + Send + Sync>;

/// Collects upgrade steps before freezing them into an [`EventUpgrader`].
#[derive(Default)]
pub struct EventUpgraderBuilder {
    steps: HashMap<(String, u32), UpgradeFn>,
}

impl EventUpgraderBuilder {
    /// Register the step from `from_version` to `from_version + 1`,
    /// replacing any earlier one.
    #[must_use]
    pub fn register<F>(mut self, event_type: impl Into<String>, from_version: u32, step: F) -> Self
    where
        F: Fn(&[u8]) -> StoreResult<Vec<u8>> + Send + Sync + 'static,
    {
        self.steps
            .insert((event_type.into(), from_version), Arc::new(step));
        self
    }

    /// Register a step over JSON payloads.
    #[must_use]
    pub fn register_json<F>(self, event_type: impl Into<String>, from_version: u32, step: F) -> Self
    where
        F: Fn(Value) -> StoreResult<Value> + Send + Sync + 'static,
    {
        self.register(event_type, from_version, move |data: &[u8]| {
            let value: Value = serde_json::from_slice(data)?;
            Ok(serde_json::to_vec(&step(value)?)?)
        })
    }

    /// Freeze the table.
    pub fn build(self) -> EventUpgrader {
        EventUpgrader {
            steps: Arc::new(self.steps),
        }
    }
}

/// Read-only table of upgrade steps. Cheap to clone.
#[derive(Clone, Default)]
pub struct EventUpgrader {
    steps: Arc<HashMap<(String, u32), UpgradeFn>>,
}

impl EventUpgrader {
    /// Start registering steps.
    pub fn builder() -> EventUpgraderBuilder {
        EventUpgraderBuilder::default()
    }

    /// Whether no step is registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether a step starts at `(event_type, version)`.
    pub fn has_upgrade(&self, event_type: &str, version: u32) -> bool {
        self.steps.contains_key(&(event_type.to_owned(), version))
    }

    /// Run the chain for a payload currently at `version`.
    ///
    /// Returns the final payload and its version; both are unchanged when no
    /// step applies. `subject` only names the owner in errors.
    ///
    /// # Errors
    ///
    /// Returns whatever a step returns, and [`StoreError::InvalidVersion`]
    /// when the chain exceeds [`MAX_UPGRADE_STEPS`].
    pub fn upgrade(
        &self,
        subject: &str,
        event_type: &str,
        version: u32,
        data: &[u8],
    ) -> StoreResult<(Vec<u8>, u32)> {
        let mut key = (event_type.to_owned(), version);
        let mut current = data.to_vec();
        let mut steps: u32 = 0;

        while let Some(step) = self.steps.get(&key) {
            if steps == MAX_UPGRADE_STEPS {
                return Err(StoreError::InvalidVersion {
                    aggregate_id: subject.to_owned(),
                    version: u64::from(key.1),
                    reason: format!(
                        "upgrade chain for {event_type} exceeds {MAX_UPGRADE_STEPS} steps"
                    ),
                });
            }
            current = step(&current)?;
            key.1 = key.1.checked_add(1).ok_or_else(|| StoreError::InvalidVersion {
                aggregate_id: subject.to_owned(),
                version: u64::from(key.1),
                reason: "schema version overflow".to_owned(),
            })?;
            steps = steps.saturating_add(1);
        }

        if steps > 0 {
            tracing::trace!(
                subject,
                event_type,
                from = version,
                to = key.1,
                "Payload upgraded"
            );
        }
        Ok((current, key.1))
    }

    /// Upgrade one event in place of its payload and schema version.
    pub fn upgrade_event(&self, mut event: Event) -> StoreResult<Event> {
        if !self.has_upgrade(&event.event_type, event.schema_version) {
            return Ok(event);
        }
        let (data, version) = self.upgrade(
            &event.aggregate_id.to_string(),
            &event.event_type,
            event.schema_version,
            &event.data,
        )?;
        event.data = data;
        event.schema_version = version;
        Ok(event)
    }
}

impl std::fmt::Debug for EventUpgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.steps.keys().collect();
        keys.sort_unstable();
        f.debug_struct("EventUpgrader").field("steps", &keys).finish()
    }
}
