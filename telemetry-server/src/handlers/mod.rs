//! HTTP request handlers organized by gateway

/// Dashboard page
pub mod dashboard;
/// Liveness and health probes
pub mod health;
/// Agent submissions
pub mod ingest;
/// Live channel upgrade
pub mod live;
/// History queries and stats
pub mod query;

pub use dashboard::dashboard_handler;
pub use health::{health_handler, ping_handler};
pub use ingest::ingest_telemetry_handler;
pub use live::live_updates_handler;
pub use query::{query_telemetry_handler, telemetry_stats_handler};
