//! The channel manager.
//!
//! Owns the result caches, the overlay errors and the client hub, accepts
//! connections, answers client requests and fans out producer updates.

use crate::cache::ResultCache;
use crate::connection::{ConnectionId, ConnectionState, Effect};
use crate::hub::{ChannelHandle, ClientHub, Outbound};
use crate::loader::{load_static_query_results, BuildState, PageDataContext, PageDataReader};
use crate::overlay::OverlayErrors;
use crate::registry::SubscriptionRegistry;
use crate::telemetry::{self, TelemetrySink, TrackOptions};
use pagefeed_protocol::{
    ClientEvent, QueryResult, ServerMessage, WHY_EMIT_PAGE_DATA, WHY_GET_DATA_FOR_PATH,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Channel manager errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel has not been initialized.
    #[error("Channel is not initialized")]
    NotReady,

    /// `init` was already called.
    #[error("Channel is already initialized")]
    AlreadyInitialized,

    /// The client limit is reached.
    #[error("Channel is at capacity ({limit} clients)")]
    AtCapacity {
        /// Configured client limit.
        limit: usize,
    },
}

/// How a page-data request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDataOutcome {
    /// Answered from the cache.
    Hit,
    /// Recovered from disk and answered.
    Recovered,
    /// Nothing to answer with.
    Missing,
}

impl PageDataOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PageDataOutcome::Hit => "hit",
            PageDataOutcome::Recovered => "recovered",
            PageDataOutcome::Missing => "missing",
        }
    }
}

/// State mutated only under the manager lock.
#[derive(Debug, Default)]
struct ManagerState {
    page_results: ResultCache,
    static_results: ResultCache,
    errors: OverlayErrors,
    connected_clients: usize,
}

/// Coordinates clients, caches and producers for one project.
///
/// Construct one per process and share it by reference (usually in an
/// `Arc`) with the transport and the build.
pub struct ChannelManager {
    state: Mutex<ManagerState>,
    registry: SubscriptionRegistry,
    hub: ChannelHandle,
    root_dir: OnceLock<PathBuf>,
    reader: Arc<dyn PageDataReader>,
    build_state: Arc<dyn BuildState>,
    telemetry: Arc<dyn TelemetrySink>,
    max_clients: Option<usize>,
}

impl ChannelManager {
    /// Create an uninitialized manager.
    #[must_use]
    pub fn new(
        reader: Arc<dyn PageDataReader>,
        build_state: Arc<dyn BuildState>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            registry: SubscriptionRegistry::new(),
            hub: Arc::new(ClientHub::new()),
            root_dir: OnceLock::new(),
            reader,
            build_state,
            telemetry,
            max_clients: None,
        }
    }

    /// Refuse connections beyond `limit` clients.
    #[must_use]
    pub fn with_max_clients(mut self, limit: usize) -> Self {
        self.max_clients = Some(limit);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the channel for the project rooted at `root_dir`.
    ///
    /// Loads static query results from disk, keeping any already emitted,
    /// then opens the channel to clients. Reads files synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::AlreadyInitialized`] on a second call.
    pub fn init(&self, root_dir: impl Into<PathBuf>) -> Result<ChannelHandle, ChannelError> {
        if self.is_initialized() {
            return Err(ChannelError::AlreadyInitialized);
        }
        let root_dir = root_dir.into();

        let known = self.lock().static_results.clone();
        let components = self.build_state.static_query_components();
        let loaded = load_static_query_results(
            &self.build_state.program_directory(),
            &components,
            &known,
        );

        let root = root_dir.display().to_string();
        let mut state = self.lock();
        self.root_dir
            .set(root_dir)
            .map_err(|_| ChannelError::AlreadyInitialized)?;
        let added = state.static_results.merge(loaded);

        info!(
            root = %root,
            static_queries = state.static_results.len(),
            loaded = added,
            "Channel initialized"
        );
        Ok(Arc::clone(&self.hub))
    }

    /// Check if `init` has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.root_dir.get().is_some()
    }

    /// The live channel, or `None` before `init`.
    #[must_use]
    pub fn channel(&self) -> Option<ChannelHandle> {
        self.is_initialized().then(|| Arc::clone(&self.hub))
    }

    /// Project root given to `init`.
    #[must_use]
    pub fn root_dir(&self) -> Option<&Path> {
        self.root_dir.get().map(PathBuf::as_path)
    }

    /// Accept a client.
    ///
    /// The client immediately receives every cached static query result and
    /// every active overlay error, ahead of any later update.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotReady`] before `init` and
    /// [`ChannelError::AtCapacity`] when the client limit is reached.
    pub fn connect(
        &self,
        connection_id: ConnectionId,
        referer: Option<&str>,
        outbound: Outbound,
    ) -> Result<ConnectionState, ChannelError> {
        if !self.is_initialized() {
            return Err(ChannelError::NotReady);
        }

        let mut state = self.lock();
        if let Some(limit) = self.max_clients {
            if state.connected_clients >= limit {
                return Err(ChannelError::AtCapacity { limit });
            }
        }

        let mut conn = ConnectionState::new(connection_id);
        let effects = conn.connect(referer);
        self.hub.register(conn.id().clone(), outbound);
        state.connected_clients += 1;
        for effect in effects {
            if effect == Effect::ReplayState {
                self.replay(&state, conn.id());
            }
        }

        debug!(
            connection = %conn.id(),
            active_path = conn.active_path().unwrap_or("-"),
            clients = state.connected_clients,
            "Client connected"
        );
        Ok(conn)
    }

    fn replay(&self, state: &ManagerState, connection_id: &ConnectionId) {
        let mut sent = 0;
        for result in state.static_results.snapshot() {
            let message = ServerMessage::static_query_result(QueryResult::clone(&result));
            sent += usize::from(self.hub.send_to(connection_id, Arc::new(message)));
        }
        for (id, message) in state.errors.active() {
            let message = ServerMessage::overlay_error(id, Some(message));
            sent += usize::from(self.hub.send_to(connection_id, Arc::new(message)));
        }
        trace!(connection = %connection_id, messages = sent, "Replayed state");
    }

    /// Handle an event sent by a client.
    ///
    /// Returns how a page-data request was answered, if the event was one.
    pub async fn handle_event(
        &self,
        conn: &mut ConnectionState,
        event: ClientEvent,
    ) -> Option<PageDataOutcome> {
        trace!(connection = %conn.id(), event = event.name(), "Client event");

        let mut outcome = None;
        for effect in conn.apply(&event) {
            match effect {
                Effect::SendPageData(path) => {
                    outcome = Some(self.send_page_data(conn.id(), &path).await);
                }
                other => self.perform(conn.id(), other),
            }
        }
        outcome
    }

    /// Close a client connection. Safe to call more than once.
    pub fn disconnect(&self, conn: &mut ConnectionState) {
        for effect in conn.disconnect() {
            self.perform(conn.id(), effect);
        }
    }

    fn perform(&self, connection_id: &ConnectionId, effect: Effect) {
        match effect {
            Effect::Join(path) => {
                self.registry.join(connection_id, &path);
            }
            Effect::Leave(path) => {
                self.registry.leave(connection_id, &path);
            }
            Effect::Detach => {
                let mut state = self.lock();
                self.hub.unregister(connection_id);
                state.connected_clients = state.connected_clients.saturating_sub(1);
                debug!(
                    connection = %connection_id,
                    clients = state.connected_clients,
                    "Client disconnected"
                );
            }
            Effect::ReplayState | Effect::SendPageData(_) => {
                warn!(connection = %connection_id, effect = ?effect, "Unexpected effect");
            }
        }
    }

    /// Reply to a page-data request, recovering the result from disk when
    /// it is not cached. Unrecoverable results get no reply.
    ///
    /// The reply is queued under the same lock that reads or writes the
    /// cache, so it never trails a newer broadcast for the same path.
    async fn send_page_data(&self, connection_id: &ConnectionId, path: &str) -> PageDataOutcome {
        let hit = {
            let state = self.lock();
            state.page_results.get(path).map(|result| {
                self.reply_page_data(connection_id, &result);
                state.connected_clients
            })
        };
        if let Some(clients) = hit {
            self.report_usage(telemetry::PAGE_DATA_UPDATE, clients);
            return PageDataOutcome::Hit;
        }

        let Some(result) = self.read_page_data(path).await else {
            return PageDataOutcome::Missing;
        };
        let clients = {
            let mut state = self.lock();
            state.page_results.set(path, Arc::clone(&result));
            self.reply_page_data(connection_id, &result);
            state.connected_clients
        };

        self.report_usage(telemetry::PAGE_DATA_UPDATE, clients);
        PageDataOutcome::Recovered
    }

    fn reply_page_data(&self, connection_id: &ConnectionId, result: &QueryResult) {
        let message =
            ServerMessage::page_query_result(QueryResult::clone(result), WHY_GET_DATA_FOR_PATH);
        self.hub.send_to(connection_id, Arc::new(message));
    }

    /// Read the page result for `path` from disk and cache it.
    ///
    /// Failures are logged and yield `None`. The write is unconditional, so an
    /// `emit_page_data` that lands while the read is in flight is overwritten.
    pub async fn recover_page_data(&self, path: &str) -> Option<Arc<QueryResult>> {
        let result = self.read_page_data(path).await?;
        self.lock().page_results.set(path, Arc::clone(&result));
        Some(result)
    }

    async fn read_page_data(&self, path: &str) -> Option<Arc<QueryResult>> {
        let Some(root) = self.root_dir() else {
            warn!(path = %path, "Page data requested before init");
            return None;
        };
        let ctx = PageDataContext::for_root(root);

        match self.reader.read(&ctx, path).await {
            Ok(page_data) => {
                debug!(path = %path, "Recovered page data from disk");
                Some(Arc::new(QueryResult::new(path, page_data.result)))
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Page data not available");
                None
            }
        }
    }

    /// Store a page query result and send it to every client.
    pub fn emit_page_data(&self, result: QueryResult) {
        let result = Arc::new(result);
        let clients = {
            let mut state = self.lock();
            state.page_results.set(result.id.clone(), Arc::clone(&result));
            if !self.is_initialized() {
                return;
            }

            let message = ServerMessage::page_query_result(
                QueryResult::clone(&result),
                WHY_EMIT_PAGE_DATA,
            );
            self.hub.broadcast(Arc::new(message));
            state.connected_clients
        };

        self.report_usage(telemetry::EMIT_PAGE_DATA_UPDATE, clients);
    }

    /// Store a static query result and send it to every client.
    pub fn emit_static_query_data(&self, result: QueryResult) {
        let result = Arc::new(result);
        let clients = {
            let mut state = self.lock();
            state
                .static_results
                .set(result.id.clone(), Arc::clone(&result));
            if !self.is_initialized() {
                return;
            }

            let message = ServerMessage::static_query_result(QueryResult::clone(&result));
            self.hub.broadcast(Arc::new(message));
            state.connected_clients
        };

        self.report_usage(telemetry::EMIT_STATIC_PAGE_DATA_UPDATE, clients);
    }

    /// Raise an overlay error, or clear it when `message` is `None` or
    /// empty, and tell every client.
    pub fn emit_error(&self, id: impl Into<String>, message: Option<String>) {
        let id = id.into();
        let message = message.filter(|m| !m.is_empty());
        let mut state = self.lock();
        state.errors.set(id.clone(), message.clone());
        if !self.is_initialized() {
            return;
        }

        let cleared = message.is_none();
        let recipients = self
            .hub
            .broadcast(Arc::new(ServerMessage::overlay_error(id.clone(), message)));
        debug!(id = %id, cleared, recipients, "Overlay error");
    }

    fn report_usage(&self, event: &str, clients: usize) {
        if clients == 0 {
            return;
        }
        let payload = telemetry::site_measurements(clients, &self.registry.active_paths());
        self.telemetry.track(event, payload, TrackOptions::debounced());
    }

    /// Cached page result for `path`.
    #[must_use]
    pub fn page_result(&self, path: &str) -> Option<Arc<QueryResult>> {
        self.lock().page_results.get(path)
    }

    /// Cached static query result for `hash`.
    #[must_use]
    pub fn static_query_result(&self, hash: &str) -> Option<Arc<QueryResult>> {
        self.lock().static_results.get(hash)
    }

    /// Message of the active overlay error `id`.
    #[must_use]
    pub fn active_error(&self, id: &str) -> Option<String> {
        self.lock().errors.get(id).map(str::to_string)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn connected_clients(&self) -> usize {
        self.lock().connected_clients
    }

    /// Paths with at least one interested client.
    #[must_use]
    pub fn active_paths(&self) -> Vec<String> {
        self.registry.active_paths()
    }

    /// The subscription registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Channel statistics.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        let state = self.lock();
        let registry = self.registry.stats();
        ChannelStats {
            initialized: self.is_initialized(),
            connected_clients: state.connected_clients,
            page_results: state.page_results.len(),
            static_results: state.static_results.len(),
            active_errors: state.errors.len(),
            active_paths: registry.active_paths,
            rooms: registry.rooms,
        }
    }
}

/// Channel statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    /// Whether `init` has completed.
    pub initialized: bool,
    /// Number of connected clients.
    pub connected_clients: usize,
    /// Number of cached page results.
    pub page_results: usize,
    /// Number of cached static query results.
    pub static_results: usize,
    /// Number of active overlay errors.
    pub active_errors: usize,
    /// Number of active paths.
    pub active_paths: usize,
    /// Number of non-empty rooms.
    pub rooms: usize,
}
