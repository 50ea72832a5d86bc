//! HTTP endpoint handlers for the collector.
//!
//! - `/metrics`: Prometheus self-telemetry
//! - `/health`: Cycle statistics, 503 while the last cycle failed

pub mod health;
pub mod metrics;

// Re-export handlers
pub use health::health_handler;
pub use metrics::metrics_handler;
