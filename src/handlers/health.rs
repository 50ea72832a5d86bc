//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

// Time conversion constants
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let (status, message) = if state.stats.is_healthy() {
        (StatusCode::OK, "OK")
    } else if state.stats.cycles_total.load(std::sync::atomic::Ordering::Relaxed) == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "Waiting for the first cycle")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Last collection cycle failed")
    };

    let uptime_hours = state.stats.get_uptime_hours();
    let uptime_str = if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    };

    let host = &state.host;
    let table = state.stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!(
            "{message}\n\nHost: {} ({} CPUs, {} MHz)\nUptime: {uptime_str}\n\n{table}",
            host.hostname,
            host.capacity.physical_cpus,
            host.capacity.total_capacity_mhz()
        ),
    )
}
