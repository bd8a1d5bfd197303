//! Dispatch from event type tags to concrete payload types.
//!
//! Callers describe their payloads as one enum `P` and register a decoder
//! per event type tag. The table is filled through [`PayloadRegistryBuilder`]
//! at startup and is immutable once built, so it can be shared freely.

use std::collections::HashMap;
use std::sync::Arc;

use chronicle_types::{Event, StoreError, StoreResult};
use serde::de::DeserializeOwned;

type Decoder<P> = Arc<dyn Fn(&[u8]) -> StoreResult<P> + Send + Sync>;

/// Collects decoders before freezing them into a [`PayloadRegistry`].
pub struct PayloadRegistryBuilder<P> {
    decoders: HashMap<String, Decoder<P>>,
}

impl<P> PayloadRegistryBuilder<P> {
    /// Register a decoder for `event_type`, replacing any earlier one.
    #[must_use]
    pub fn register<F>(mut self, event_type: impl Into<String>, decode: F) -> Self
    where
        F: Fn(&[u8]) -> StoreResult<P> + Send + Sync + 'static,
    {
        self.decoders.insert(event_type.into(), Arc::new(decode));
        self
    }

    /// Register a JSON payload type `T`, wrapped into `P` by `wrap`.
    #[must_use]
    pub fn register_json<T, W>(self, event_type: impl Into<String>, wrap: W) -> Self
    where
        T: DeserializeOwned,
        W: Fn(T) -> P + Send + Sync + 'static,
    {
        self.register(event_type, move |data: &[u8]| {
            let payload: T = serde_json::from_slice(data)?;
            Ok(wrap(payload))
        })
    }

    /// Freeze the table.
    pub fn build(self) -> PayloadRegistry<P> {
        PayloadRegistry {
            decoders: Arc::new(self.decoders),
        }
    }
}

/// Read-only table of payload decoders keyed by event type.
///
/// Cheap to clone; clones share the table.
pub struct PayloadRegistry<P> {
    decoders: Arc<HashMap<String, Decoder<P>>>,
}

impl<P> Clone for PayloadRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            decoders: Arc::clone(&self.decoders),
        }
    }
}

impl<P> PayloadRegistry<P> {
    /// Start registering decoders.
    pub fn builder() -> PayloadRegistryBuilder<P> {
        PayloadRegistryBuilder {
            decoders: HashMap::new(),
        }
    }

    /// Decode an event's payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an unregistered event type and
    /// whatever the decoder returns for a malformed payload.
    pub fn decode(&self, event: &Event) -> StoreResult<P> {
        let decoder = self.decoders.get(&event.event_type).ok_or_else(|| {
            StoreError::validation(
                "event_type",
                format!("no payload decoder registered for {}", event.event_type),
            )
        })?;
        decoder(&event.data)
    }

    /// Whether `event_type` has a decoder.
    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl<P> std::fmt::Debug for PayloadRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chronicle_types::{AggregateId, ErrorKind};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Deserialize)]
    struct MemberJoined {
        name: String,
    }

    #[derive(Debug, PartialEq)]
    enum GuildEvent {
        MemberJoined(MemberJoined),
        Disbanded,
    }

    fn registry() -> PayloadRegistry<GuildEvent> {
        PayloadRegistry::builder()
            .register_json("MemberJoined", GuildEvent::MemberJoined)
            .register("Disbanded", |_| Ok(GuildEvent::Disbanded))
            .build()
    }

    #[test]
    fn dispatches_on_event_type() {
        let registry = registry();
        let id = AggregateId::new();
        let joined = Event::new(id, "guild", "MemberJoined", 1, br#"{"name":"ada"}"#.to_vec());
        assert_eq!(
            registry.decode(&joined).unwrap(),
            GuildEvent::MemberJoined(MemberJoined {
                name: "ada".to_owned()
            })
        );
        let gone = Event::new(id, "guild", "Disbanded", 2, Vec::new());
        assert_eq!(registry.decode(&gone).unwrap(), GuildEvent::Disbanded);
        assert_eq!(registry.event_types(), vec!["Disbanded", "MemberJoined"]);
    }

    #[test]
    fn unknown_types_and_bad_payloads_fail() {
        let registry = registry();
        let id = AggregateId::new();
        let unknown = Event::new(id, "guild", "Renamed", 1, Vec::new());
        assert_eq!(registry.decode(&unknown).unwrap_err().kind(), ErrorKind::Validation);

        let garbled = Event::new(id, "guild", "MemberJoined", 1, b"not json".to_vec());
        assert_eq!(registry.decode(&garbled).unwrap_err().kind(), ErrorKind::Serialization);
    }
}
