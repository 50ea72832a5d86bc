//! Application state shared by the HTTP handlers.

use herakles_vm_collector::{CollectorStats, Host};
use prometheus::Registry;
use std::sync::Arc;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub registry: Registry,
    pub stats: Arc<CollectorStats>,
    pub host: Host,
}
