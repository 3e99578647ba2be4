//! Active overlay errors.

use std::collections::HashMap;

/// Overlay errors reported by the build, keyed by error identity.
///
/// An id is active while it maps to a message. Clearing removes it.
#[derive(Debug, Clone, Default)]
pub struct OverlayErrors {
    active: HashMap<String, String>,
}

impl OverlayErrors {
    /// Create an empty error map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the error `id` with `message`, or clear it when `message` is `None`.
    ///
    /// Returns `true` if the map changed.
    pub fn set(&mut self, id: impl Into<String>, message: Option<String>) -> bool {
        let id = id.into();
        match message {
            Some(message) => self.active.insert(id, message.clone()).as_ref() != Some(&message),
            None => self.active.remove(&id).is_some(),
        }
    }

    /// Message of the active error `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&str> {
        self.active.get(id).map(String::as_str)
    }

    /// Check if the error `id` is active.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// All active errors as `(id, message)` pairs.
    #[must_use]
    pub fn active(&self) -> Vec<(String, String)> {
        self.active
            .iter()
            .map(|(id, message)| (id.clone(), message.clone()))
            .collect()
    }

    /// Number of active errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Check if no error is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
