//! # pagefeed-protocol
//!
//! Wire protocol definitions for the pagefeed development channel.
//!
//! This crate defines the messages exchanged between the development server
//! and browser clients, and the codecs used to put them on a WebSocket.
//!
//! ## Server messages
//!
//! - `staticQueryResult` - A static (shared) query result
//! - `pageQueryResult` - A page query result, with an optional `why` tag
//! - `overlayError` - A build error raised or cleared
//!
//! ## Client events
//!
//! - `getDataForPath` / `registerPath` / `unregisterPath` / `disconnect`
//!
//! ## Example
//!
//! ```rust
//! use pagefeed_protocol::{codec, Encoding, QueryResult, ServerMessage};
//!
//! let msg = ServerMessage::static_query_result(QueryResult::new(
//!     "2419964214",
//!     serde_json::json!({"data": {"site": {"title": "Hello"}}}),
//! ));
//!
//! let encoded = codec::encode(&msg, Encoding::Json).unwrap();
//! assert!(!encoded.is_empty());
//! ```

pub mod codec;
pub mod messages;

pub use codec::{decode_event, encode, Encoded, Encoding, ProtocolError};
pub use messages::{
    ClientEvent, MessageType, OverlayError, QueryResult, ServerMessage, WHY_EMIT_PAGE_DATA,
    WHY_GET_DATA_FOR_PATH,
};
