//! Pagefeed development server.
//!
//! Serves the dev channel over WebSocket and accepts build updates over a
//! small HTTP producer API.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod telemetry;

pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};
