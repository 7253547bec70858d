//! # Telemetry Server
//!
//! HTTP and WebSocket front end for the telemetry service.
//!
//! - **Ingestion Gateway**: agents `POST /api/v1/telemetry`; records are
//!   validated, stored, then published to the broadcast hub
//! - **Dashboard Gateway**: admin-only history queries, stats, the
//!   dashboard page and the `/ws` live-update channel
//!
//! Admin routes are guarded by HTTP Basic credentials from configuration.

pub mod handlers;
pub mod infra;
/// Router assembly
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
