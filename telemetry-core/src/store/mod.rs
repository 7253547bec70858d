//! Durable append-only storage for telemetry records.

/// In-memory backend
pub mod memory;
/// PostgreSQL backend
#[cfg(feature = "database")]
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    error::Result,
    filter::FilterCriteria,
    model::{NewTelemetryRecord, TelemetryRecord},
};

pub use memory::InMemoryRecordStore;
#[cfg(feature = "database")]
pub use postgres::PostgresRecordStore;

/// Append-only record persistence with filtered, ordered reads.
#[async_trait]
pub trait RecordStore: Send + Sync + fmt::Debug {
    /// Durably append a record and return it with its assigned id. A failed
    /// write surfaces as [`crate::TelemetryError::StoreUnavailable`].
    async fn insert(&self, record: NewTelemetryRecord) -> Result<TelemetryRecord>;

    /// Stream the records matching `criteria` in insertion order. The
    /// stream is finite and reads the store afresh on every call.
    fn scan(&self, criteria: FilterCriteria) -> BoxStream<'_, Result<TelemetryRecord>>;

    /// Number of stored records.
    async fn count(&self) -> Result<u64>;

    /// Cheap reachability check used by health reporting.
    async fn ping(&self) -> Result<()>;

    /// Short backend name reported by health checks, e.g. `memory`.
    fn backend(&self) -> &'static str;
}
