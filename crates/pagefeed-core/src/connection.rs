//! Per-connection state machine.
//!
//! Each client connection moves through
//! `Connecting -> Connected -> Disconnected`. Transitions only touch the
//! connection's own state and return the [`Effect`]s the channel manager
//! has to carry out, so they can be tested without a transport.

use pagefeed_protocol::ClientEvent;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepted by the transport, not yet announced.
    Connecting,
    /// Receiving updates and sending requests.
    Connected,
    /// Gone. Further events are ignored.
    Disconnected,
}

/// Work the channel manager performs on behalf of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send every cached static query result and active error to this client.
    ReplayState,
    /// Send the page result for a path to this client.
    SendPageData(String),
    /// Join the room of a path.
    Join(String),
    /// Leave the room of a path.
    Leave(String),
    /// Stop delivering to this client.
    Detach,
}

/// State of one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    id: ConnectionId,
    phase: Phase,
    active_path: Option<String>,
}

impl ConnectionState {
    /// A freshly accepted connection.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            phase: Phase::Connecting,
            active_path: None,
        }
    }

    /// Connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Last recorded active path.
    #[must_use]
    pub fn active_path(&self) -> Option<&str> {
        self.active_path.as_deref()
    }

    /// Check if the connection is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Complete the connection.
    ///
    /// The initial active path comes from the referring page, if any. The
    /// connection does not join that path's room.
    pub fn connect(&mut self, referer: Option<&str>) -> Vec<Effect> {
        if self.phase != Phase::Connecting {
            return Vec::new();
        }
        self.phase = Phase::Connected;
        self.active_path = referer.and_then(active_path_from_referer);
        vec![Effect::ReplayState]
    }

    /// Apply a client event.
    pub fn apply(&mut self, event: &ClientEvent) -> Vec<Effect> {
        if self.phase != Phase::Connected {
            return Vec::new();
        }

        match event {
            ClientEvent::GetDataForPath(path) => vec![Effect::SendPageData(path.clone())],
            ClientEvent::RegisterPath(path) => {
                // The previous room is not left.
                self.active_path = Some(path.clone());
                vec![Effect::Join(path.clone())]
            }
            ClientEvent::UnregisterPath(path) => vec![Effect::Leave(path.clone())],
            ClientEvent::Disconnect => self.disconnect(),
        }
    }

    /// Close the connection.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        match self.phase {
            Phase::Disconnected => Vec::new(),
            Phase::Connecting => {
                self.phase = Phase::Disconnected;
                Vec::new()
            }
            Phase::Connected => {
                self.phase = Phase::Disconnected;
                let mut effects = Vec::with_capacity(2);
                if let Some(path) = &self.active_path {
                    effects.push(Effect::Leave(path.clone()));
                }
                effects.push(Effect::Detach);
                effects
            }
        }
    }
}

/// Extract the page path from a referring URL.
///
/// Returns `None` for anything that is not an absolute URL.
#[must_use]
pub fn active_path_from_referer(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }
    Some(url.path().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(referer: Option<&str>) -> ConnectionState {
        let mut conn = ConnectionState::new(ConnectionId::new("conn-1"));
        assert_eq!(conn.connect(referer), vec![Effect::ReplayState]);
        conn
    }

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_referer_path() {
        assert_eq!(
            active_path_from_referer("http://localhost:8000/blog/hello/?q=1#top"),
            Some("/blog/hello/".to_string())
        );
        assert_eq!(
            active_path_from_referer("http://localhost:8000"),
            Some("/".to_string())
        );
        assert_eq!(active_path_from_referer("/relative/path"), None);
        assert_eq!(active_path_from_referer("mailto:dev@example.com"), None);
    }

    #[test]
    fn test_connect_records_referer_path() {
        let conn = connected(Some("http://localhost:8000/about/"));
        assert!(conn.is_connected());
        assert_eq!(conn.active_path(), Some("/about/"));

        let conn = connected(None);
        assert_eq!(conn.active_path(), None);
    }

    #[test]
    fn test_events_before_connect_are_ignored() {
        let mut conn = ConnectionState::new(ConnectionId::new("conn-1"));
        assert!(conn
            .apply(&ClientEvent::RegisterPath("/".into()))
            .is_empty());
        assert_eq!(conn.phase(), Phase::Connecting);
    }

    #[test]
    fn test_register_updates_active_path() {
        let mut conn = connected(Some("http://localhost:8000/"));

        let effects = conn.apply(&ClientEvent::RegisterPath("/docs/".into()));
        assert_eq!(effects, vec![Effect::Join("/docs/".into())]);
        assert_eq!(conn.active_path(), Some("/docs/"));

        // Registering again does not leave the previous room
        let effects = conn.apply(&ClientEvent::RegisterPath("/blog/".into()));
        assert_eq!(effects, vec![Effect::Join("/blog/".into())]);
    }

    #[test]
    fn test_unregister_keeps_active_path() {
        let mut conn = connected(None);
        conn.apply(&ClientEvent::RegisterPath("/docs/".into()));

        let effects = conn.apply(&ClientEvent::UnregisterPath("/docs/".into()));
        assert_eq!(effects, vec![Effect::Leave("/docs/".into())]);
        assert_eq!(conn.active_path(), Some("/docs/"));
    }

    #[test]
    fn test_request_data() {
        let mut conn = connected(None);
        assert_eq!(
            conn.apply(&ClientEvent::GetDataForPath("/".into())),
            vec![Effect::SendPageData("/".into())]
        );
    }

    #[test]
    fn test_disconnect_leaves_active_path_once() {
        let mut conn = connected(None);
        conn.apply(&ClientEvent::RegisterPath("/docs/".into()));

        assert_eq!(
            conn.apply(&ClientEvent::Disconnect),
            vec![Effect::Leave("/docs/".into()), Effect::Detach]
        );
        assert_eq!(conn.phase(), Phase::Disconnected);

        assert!(conn.disconnect().is_empty());
        assert!(conn
            .apply(&ClientEvent::GetDataForPath("/".into()))
            .is_empty());
    }

    #[test]
    fn test_disconnect_without_path() {
        let mut conn = connected(None);
        assert_eq!(conn.disconnect(), vec![Effect::Detach]);
    }
}
