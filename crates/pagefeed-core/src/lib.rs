//! # pagefeed-core
//!
//! Result caching and delivery for the pagefeed development channel.
//!
//! This crate provides the building blocks between a running build and the
//! browsers watching it:
//!
//! - **ResultCache** - Latest page and static query results
//! - **Loader** - Recovery of results from the build's on-disk cache
//! - **SubscriptionRegistry** - Rooms of connections per page path
//! - **ConnectionState** - Per-connection state machine
//! - **ChannelManager** - Replay, requests and fan-out
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────────┐     ┌─────────────┐
//! │    Build    │────▶│ ChannelManager │────▶│  ClientHub  │
//! └─────────────┘     └────────────────┘     └─────────────┘
//!                        │           │
//!                        ▼           ▼
//!                 ┌─────────────┐ ┌──────────────┐
//!                 │ ResultCache │ │   Registry   │
//!                 └─────────────┘ └──────────────┘
//!                        │
//!                        ▼
//!                 ┌─────────────┐
//!                 │   Loader    │
//!                 └─────────────┘
//! ```

pub mod cache;
pub mod connection;
pub mod hub;
pub mod loader;
pub mod manager;
pub mod overlay;
pub mod registry;
pub mod telemetry;

pub use cache::ResultCache;
pub use connection::{ConnectionId, ConnectionState, Effect, Phase};
pub use hub::{outbound_queue, ChannelHandle, ClientHub, Inbox, Outbound};
pub use loader::{
    BuildState, ComponentRegistry, FsPageDataReader, LoaderError, PageData, PageDataContext,
    PageDataReader, StaticQueryComponent,
};
pub use manager::{ChannelError, ChannelManager, ChannelStats, PageDataOutcome};
pub use overlay::OverlayErrors;
pub use registry::{RegistryStats, SubscriptionRegistry};
pub use telemetry::{Debouncer, NoopTelemetry, TelemetrySink, TrackOptions};
