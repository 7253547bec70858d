//! Plumbing shared by the handlers: state, errors, auth, startup and the
//! live channel.

/// Shared handler state
pub mod app_state;
/// Error responses
pub mod errors;
/// Request guards
pub mod middleware;
/// Store and dashboard bootstrapping
pub mod startup;
/// The `/ws` live channel
pub mod websocket;
