//! Message registry
//!
//! Maps a message id to a zero-argument constructor. Parsers never build
//! messages themselves; they look the decoded id up here.

use std::collections::HashMap;
use std::fmt;

use super::error::RegistryError;
use super::message::ProtocolMessage;

/// Zero-argument message constructor
pub type Factory<M> = fn() -> M;

/// Per-parser id to constructor map
pub struct MessageRegistry<M: ProtocolMessage> {
    factories: HashMap<M::Id, Factory<M>>,
}

impl<M: ProtocolMessage> MessageRegistry<M> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a constructor, indexed by the id of the message it builds
    ///
    /// # Panics
    ///
    /// Panics if another constructor already produces the same id. Registration
    /// happens while wiring parsers, so a duplicate is a programming error.
    pub fn register(&mut self, factory: Factory<M>) -> &mut Self {
        if let Err(e) = self.try_register(factory) {
            panic!("{e}");
        }
        self
    }

    /// Register a constructor, reporting a duplicate id instead of panicking
    pub fn try_register(&mut self, factory: Factory<M>) -> Result<(), RegistryError> {
        let id = factory().message_id();
        if self.factories.contains_key(&id) {
            return Err(RegistryError::Duplicate {
                protocol: M::PROTOCOL,
                id: id.to_string(),
            });
        }
        self.factories.insert(id, factory);
        Ok(())
    }

    /// Fresh message for `id`
    pub fn create(&self, id: &M::Id) -> Option<M> {
        self.factories.get(id).map(|factory| factory())
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &M::Id) -> bool {
        self.factories.contains_key(id)
    }

    /// Number of registered ids
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered ids in no particular order
    pub fn ids(&self) -> impl Iterator<Item = &M::Id> {
        self.factories.keys()
    }
}

impl<M: ProtocolMessage> Default for MessageRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ProtocolMessage> fmt::Debug for MessageRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("protocol", &M::PROTOCOL)
            .field("ids", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::asv::{AsvMessage, AsvPayload, Heartbeat, Text};

    fn heartbeat() -> AsvMessage {
        AsvMessage::new(AsvPayload::Heartbeat(Heartbeat))
    }

    fn text() -> AsvMessage {
        AsvMessage::new(AsvPayload::Text(Text::default()))
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = MessageRegistry::new();
        registry.register(heartbeat).register(text);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&0x0110));
        let msg = registry.create(&0x0120).unwrap();
        assert_eq!(msg.name(), "TEXT");
        assert!(registry.create(&0x0999).is_none());
    }

    #[test]
    fn test_duplicate_is_reported() {
        let mut registry = MessageRegistry::new();
        registry.register(heartbeat);
        let err = registry.try_register(heartbeat).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
    }

    #[test]
    #[should_panic(expected = "duplicate message id")]
    fn test_duplicate_register_panics() {
        let mut registry = MessageRegistry::new();
        registry.register(heartbeat).register(heartbeat);
    }
}
