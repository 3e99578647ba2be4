//! Message types for the pagefeed protocol.
//!
//! Server messages share one envelope, `{ type, payload, why? }`. Client
//! events are named, with the argument carried under `data`.

use serde::{Deserialize, Serialize};

/// Diagnostic tag attached to replies for a page-data request.
pub const WHY_GET_DATA_FOR_PATH: &str = "getDataForPath";

/// Diagnostic tag attached to page results pushed by the build.
pub const WHY_EMIT_PAGE_DATA: &str = "emitPageData";

/// The computed result of a page query or a static query.
///
/// `id` is the page path for page queries and the component content hash
/// for static queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Page path or static query hash.
    pub id: String,
    /// Query result data.
    pub result: serde_json::Value,
}

impl QueryResult {
    /// Create a new query result.
    #[must_use]
    pub fn new(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result,
        }
    }
}

/// Overlay error payload.
///
/// A `None` message means the error with this id has been cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayError {
    /// Error identity.
    pub id: String,
    /// Error message, absent when cleared.
    pub message: Option<String>,
}

/// Server message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    StaticQueryResult,
    PageQueryResult,
    OverlayError,
}

impl MessageType {
    /// Wire name of this message type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::StaticQueryResult => "staticQueryResult",
            MessageType::PageQueryResult => "pageQueryResult",
            MessageType::OverlayError => "overlayError",
        }
    }
}

/// A message sent from the server to a browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Envelope", try_from = "Envelope")]
pub enum ServerMessage {
    /// A static query result.
    StaticQueryResult(QueryResult),

    /// A page query result.
    PageQueryResult {
        /// The result.
        result: QueryResult,
        /// Optional diagnostic tag.
        why: Option<String>,
    },

    /// An overlay error was raised or cleared.
    OverlayError(OverlayError),
}

impl ServerMessage {
    /// Get the message type.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::StaticQueryResult(_) => MessageType::StaticQueryResult,
            ServerMessage::PageQueryResult { .. } => MessageType::PageQueryResult,
            ServerMessage::OverlayError(_) => MessageType::OverlayError,
        }
    }

    /// Create a static query result message.
    #[must_use]
    pub fn static_query_result(result: QueryResult) -> Self {
        ServerMessage::StaticQueryResult(result)
    }

    /// Create a page query result message with a diagnostic tag.
    #[must_use]
    pub fn page_query_result(result: QueryResult, why: impl Into<String>) -> Self {
        ServerMessage::PageQueryResult {
            result,
            why: Some(why.into()),
        }
    }

    /// Create an overlay error message. Pass `None` to clear the error.
    #[must_use]
    pub fn overlay_error(id: impl Into<String>, message: Option<String>) -> Self {
        ServerMessage::OverlayError(OverlayError {
            id: id.into(),
            message,
        })
    }

    /// The diagnostic tag, if any.
    #[must_use]
    pub fn why(&self) -> Option<&str> {
        match self {
            ServerMessage::PageQueryResult { why, .. } => why.as_deref(),
            _ => None,
        }
    }
}

/// Serialized shape shared by every server message.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageType,
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    why: Option<String>,
}

impl From<ServerMessage> for Envelope {
    fn from(message: ServerMessage) -> Self {
        let kind = message.message_type();
        // Serializing these plain structs into a Value cannot fail.
        let (payload, why) = match message {
            ServerMessage::StaticQueryResult(result) => (to_value(&result), None),
            ServerMessage::PageQueryResult { result, why } => (to_value(&result), why),
            ServerMessage::OverlayError(error) => (to_value(&error), None),
        };
        Envelope { kind, payload, why }
    }
}

impl TryFrom<Envelope> for ServerMessage {
    type Error = String;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope { kind, payload, why } = envelope;
        let invalid = |e: serde_json::Error| format!("invalid {} payload: {e}", kind.as_str());
        match kind {
            MessageType::StaticQueryResult => serde_json::from_value(payload)
                .map(ServerMessage::StaticQueryResult)
                .map_err(invalid),
            MessageType::PageQueryResult => serde_json::from_value(payload)
                .map(|result| ServerMessage::PageQueryResult { result, why })
                .map_err(invalid),
            MessageType::OverlayError => serde_json::from_value(payload)
                .map(ServerMessage::OverlayError)
                .map_err(invalid),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// An event sent from a browser client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Ask for the result of the page query at this path.
    GetDataForPath(String),
    /// Register interest in a page path.
    RegisterPath(String),
    /// Withdraw interest in a page path.
    UnregisterPath(String),
    /// The client is going away.
    Disconnect,
}

impl ClientEvent {
    /// Wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::GetDataForPath(_) => "getDataForPath",
            ClientEvent::RegisterPath(_) => "registerPath",
            ClientEvent::UnregisterPath(_) => "unregisterPath",
            ClientEvent::Disconnect => "disconnect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_query_result_envelope() {
        let msg = ServerMessage::page_query_result(
            QueryResult::new("/blog/", json!({"data": {"title": "Hi"}})),
            WHY_GET_DATA_FOR_PATH,
        );

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "pageQueryResult",
                "why": "getDataForPath",
                "payload": {"id": "/blog/", "result": {"data": {"title": "Hi"}}}
            })
        );
    }

    #[test]
    fn test_static_query_result_has_no_why() {
        let msg = ServerMessage::static_query_result(QueryResult::new("abc123", json!({})));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "staticQueryResult");
        assert!(value.get("why").is_none());
    }

    #[test]
    fn test_cleared_overlay_error_serializes_null_message() {
        let msg = ServerMessage::overlay_error("graphql-1", None);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({"type": "overlayError", "payload": {"id": "graphql-1", "message": null}})
        );
    }

    #[test]
    fn test_server_message_from_json() {
        let raw = r#"{"type":"overlayError","payload":{"id":"e1","message":"boom"}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, ServerMessage::overlay_error("e1", Some("boom".into())));

        let bad = r#"{"type":"pageQueryResult","payload":{"id":"/"}}"#;
        assert!(serde_json::from_str::<ServerMessage>(bad).is_err());
    }

    #[test]
    fn test_client_events_from_json() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"getDataForPath","data":"/about/"}"#).unwrap();
        assert_eq!(event, ClientEvent::GetDataForPath("/about/".into()));

        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"registerPath","data":"/"}"#).unwrap();
        assert_eq!(event.name(), "registerPath");

        let event: ClientEvent = serde_json::from_str(r#"{"event":"disconnect"}"#).unwrap();
        assert_eq!(event, ClientEvent::Disconnect);

        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"publish","data":"x"}"#).is_err());
    }
}
