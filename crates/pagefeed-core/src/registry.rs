//! Subscription registry for page paths.
//!
//! Connections join the room of the page path they are watching. A path is
//! active while its room has at least one occupant.

use crate::connection::ConnectionId;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use tracing::debug;

/// Prefix of every room key.
pub const ROOM_PREFIX: &str = "path-";

/// Room key for a page path.
#[must_use]
pub fn room_key(path: &str) -> String {
    format!("{ROOM_PREFIX}{path}")
}

/// Room membership and the set of active paths.
///
/// A room's membership change and the matching update of the active path
/// set happen under the room's shard lock, so concurrent joins and leaves
/// for the same path cannot leave the set out of step with the room.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Rooms indexed by room key.
    rooms: DashMap<String, HashSet<ConnectionId>>,
    /// Paths with at least one occupant.
    active_paths: DashSet<String>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the room for `path`.
    ///
    /// Returns `true` if the connection was not already in the room.
    pub fn join(&self, connection_id: &ConnectionId, path: &str) -> bool {
        let mut room = self.rooms.entry(room_key(path)).or_default();
        let added = room.insert(connection_id.clone());
        self.active_paths.insert(path.to_string());

        debug!(
            path = %path,
            connection = %connection_id,
            occupants = room.len(),
            "Joined room"
        );
        added
    }

    /// Remove a connection from the room for `path`.
    ///
    /// The path stops being active when its room empties. Returns `true` if
    /// the connection was in the room.
    pub fn leave(&self, connection_id: &ConnectionId, path: &str) -> bool {
        let Entry::Occupied(mut room) = self.rooms.entry(room_key(path)) else {
            return false;
        };

        let removed = room.get_mut().remove(connection_id);
        let occupants = room.get().len();
        if occupants == 0 {
            // Still holding the room entry here.
            self.active_paths.remove(path);
            room.remove();
            debug!(path = %path, "Path no longer active");
        }

        if removed {
            debug!(path = %path, connection = %connection_id, occupants, "Left room");
        }
        removed
    }

    /// Number of connections in the room for `path`.
    #[must_use]
    pub fn occupancy(&self, path: &str) -> usize {
        self.rooms
            .get(&room_key(path))
            .map(|room| room.len())
            .unwrap_or(0)
    }

    /// Check if a connection is in the room for `path`.
    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId, path: &str) -> bool {
        self.rooms
            .get(&room_key(path))
            .map(|room| room.contains(connection_id))
            .unwrap_or(false)
    }

    /// Check if `path` has at least one interested connection.
    #[must_use]
    pub fn is_active(&self, path: &str) -> bool {
        self.active_paths.contains(path)
    }

    /// All active paths, in no particular order.
    #[must_use]
    pub fn active_paths(&self) -> Vec<String> {
        self.active_paths.iter().map(|p| p.key().clone()).collect()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.rooms.len(),
            memberships: self.rooms.iter().map(|room| room.len()).sum(),
            active_paths: self.active_paths.len(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of non-empty rooms.
    pub rooms: usize,
    /// Total room memberships.
    pub memberships: usize,
    /// Number of active paths.
    pub active_paths: usize,
}
