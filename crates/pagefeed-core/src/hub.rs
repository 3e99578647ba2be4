//! Outbound delivery to connected clients.
//!
//! Every client owns one unbounded queue, drained by its socket writer.
//! Messages pushed onto a queue are delivered in push order.

use crate::connection::ConnectionId;
use dashmap::DashMap;
use pagefeed_protocol::ServerMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Sending half of a client's outbound queue.
pub type Outbound = mpsc::UnboundedSender<Arc<ServerMessage>>;

/// Receiving half of a client's outbound queue.
pub type Inbox = mpsc::UnboundedReceiver<Arc<ServerMessage>>;

/// Handle to the live channel, shared with whoever needs to send.
pub type ChannelHandle = Arc<ClientHub>;

/// Create an outbound queue for one client.
#[must_use]
pub fn outbound_queue() -> (Outbound, Inbox) {
    mpsc::unbounded_channel()
}

/// The set of connected clients and their outbound queues.
#[derive(Debug, Default)]
pub struct ClientHub {
    clients: DashMap<ConnectionId, Outbound>,
}

impl ClientHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. Replaces any queue registered under the same id.
    pub fn register(&self, connection_id: ConnectionId, outbound: Outbound) {
        debug!(connection = %connection_id, "Client attached");
        self.clients.insert(connection_id, outbound);
    }

    /// Remove a client.
    ///
    /// Returns `true` if the client was attached.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.clients.remove(connection_id).is_some();
        if removed {
            debug!(connection = %connection_id, "Client detached");
        }
        removed
    }

    /// Send a message to one client.
    ///
    /// Returns `false` if the client is unknown or its queue is closed.
    pub fn send_to(&self, connection_id: &ConnectionId, message: Arc<ServerMessage>) -> bool {
        let Some(outbound) = self.clients.get(connection_id) else {
            trace!(connection = %connection_id, "Send to unknown client");
            return false;
        };

        if outbound.send(message).is_err() {
            drop(outbound);
            self.clients.remove(connection_id);
            debug!(connection = %connection_id, "Dropped closed client");
            return false;
        }
        true
    }

    /// Send a message to every client.
    ///
    /// Returns the number of clients the message was queued for. Clients
    /// whose queue has closed are dropped.
    pub fn broadcast(&self, message: Arc<ServerMessage>) -> usize {
        let mut delivered = 0;
        self.clients.retain(|connection_id, outbound| {
            if outbound.send(Arc::clone(&message)).is_ok() {
                delivered += 1;
                true
            } else {
                debug!(connection = %connection_id, "Dropped closed client");
                false
            }
        });

        trace!(
            kind = message.message_type().as_str(),
            recipients = delivered,
            "Broadcast"
        );
        delivered
    }

    /// Check if a client is attached.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.clients.contains_key(connection_id)
    }

    /// Number of attached clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if no client is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
