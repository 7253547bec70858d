//! # Telemetry Core
//!
//! Core library for the telemetry service: the record model agents submit,
//! the whitelisted exact-match filter engine, the record stores and the live
//! broadcast hub that fans new records out to connected viewers.
//!
//! ## Feature Flags
//!
//! - `database`: Enables the PostgreSQL record store (SQLx)
//! - `pg-tests`: Runs the PostgreSQL store tests against `DATABASE_URL`
//!
//! ## Architecture
//!
//! - [`model`]: submissions, validation and stored records
//! - [`filter`]: attribute whitelist, criteria building and matching
//! - [`store`]: the [`store::RecordStore`] trait with in-memory and PostgreSQL backends
//! - [`hub`]: the session registry and broadcast coordination loop

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Error types shared by every telemetry component
pub mod error;

/// Exact-match filtering over a whitelisted attribute set
pub mod filter;

/// Live fan-out of stored records to viewer sessions
pub mod hub;

/// Telemetry records and agent submissions
pub mod model;

/// Record persistence
pub mod store;

/// Embedded migrations for the `telemetry_records` schema.
#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{Result, TelemetryError};
pub use filter::{Attribute, AttributeWhitelist, FilterCriteria, build_criteria};
pub use hub::{BroadcastHub, HubConfig, HubHandle, HubStats, PublishPolicy, SessionId, Subscription};
pub use model::{BroadcastEvent, NewTelemetryRecord, TelemetryRecord, TelemetrySubmission};
pub use store::{InMemoryRecordStore, RecordStore};

#[cfg(feature = "database")]
pub use store::PostgresRecordStore;
