//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. The
//! hub is kept concretely for broadcast and membership queries, while
//! boundaries drive it through the `SyncService` trait object so tests can
//! substitute a different service.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::report::{DiagnosticsLog, ErrorReporter};
use crate::sync::{SyncHub, SyncService};

/// Clone is required by Axum; all inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub hub: SyncHub,
    /// Service handed to every mount boundary. Normally the hub itself.
    pub sync: Arc<dyn SyncService>,
    pub diagnostics: Arc<DiagnosticsLog>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let hub = SyncHub::new(config.max_subscribers);
        let sync: Arc<dyn SyncService> = Arc::new(hub.clone());
        Self::with_service(config, hub, sync)
    }

    #[must_use]
    pub fn with_service(config: ServerConfig, hub: SyncHub, sync: Arc<dyn SyncService>) -> Self {
        let diagnostics = Arc::new(DiagnosticsLog::new(config.diagnostics_capacity));
        Self { config, hub, sync, diagnostics }
    }

    /// Reporter handed to every mount boundary.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn ErrorReporter> {
        self.diagnostics.clone()
    }
}
