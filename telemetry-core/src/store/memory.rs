use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;

use crate::{
    error::Result,
    filter::FilterCriteria,
    model::{NewTelemetryRecord, TelemetryRecord},
    store::RecordStore,
};

/// Process-local record store. Used when no database is configured and as
/// the default backend in tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<Arc<TelemetryRecord>>>,
}

impl fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("records", &self.records.read().len())
            .finish()
    }
}

impl InMemoryRecordStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: NewTelemetryRecord) -> Result<TelemetryRecord> {
        let mut records = self.records.write();
        let id = records.len() as i64 + 1;
        let stored = record.into_record(id);
        records.push(Arc::new(stored.clone()));
        Ok(stored)
    }

    fn scan(&self, criteria: FilterCriteria) -> BoxStream<'_, Result<TelemetryRecord>> {
        // Copy the Arc handles out so no lock is held while the caller polls.
        let snapshot: Vec<Arc<TelemetryRecord>> = self.records.read().clone();
        stream::iter(snapshot)
            .filter(move |record| futures::future::ready(criteria.matches(record)))
            .map(|record| Ok(TelemetryRecord::clone(&record)))
            .boxed()
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AttributeWhitelist, apply, build_criteria};
    use chrono::Utc;
    use futures::TryStreamExt;
    use std::collections::BTreeMap;

    fn new_record(value: &str, arch: &str) -> NewTelemetryRecord {
        NewTelemetryRecord {
            value: value.into(),
            arch: arch.into(),
            captured_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn assigns_increasing_ids() {
        let store = InMemoryRecordStore::new();
        let first = store.insert(new_record("a", "arm64")).await.unwrap();
        let second = store.insert(new_record("b", "arm64")).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn scan_returns_matches_in_insertion_order() {
        let store = InMemoryRecordStore::new();
        for (value, arch) in [
            ("temp=42", "arm64"),
            ("temp=99", "arm64"),
            ("temp=42", "x86_64"),
            ("temp=42", "arm64"),
        ] {
            store.insert(new_record(value, arch)).await.unwrap();
        }

        let all: Vec<TelemetryRecord> = apply(&store, FilterCriteria::match_all())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let criteria = build_criteria(
            &AttributeWhitelist::new(),
            [("value", "temp=42"), ("arch", "arm64")],
        )
        .unwrap();
        let matched: Vec<TelemetryRecord> = apply(&store, criteria).try_collect().await.unwrap();
        assert_eq!(matched.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 4]);
    }

    #[tokio::test]
    async fn scan_is_a_point_in_time_read() {
        let store = InMemoryRecordStore::new();
        store.insert(new_record("a", "arm64")).await.unwrap();

        let stream = store.scan(FilterCriteria::match_all());
        store.insert(new_record("b", "arm64")).await.unwrap();

        let seen: Vec<TelemetryRecord> = stream.try_collect().await.unwrap();
        assert_eq!(seen.len(), 1);

        let again: Vec<TelemetryRecord> = store
            .scan(FilterCriteria::match_all())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(again.len(), 2, "a fresh scan re-reads the store");
    }
}
