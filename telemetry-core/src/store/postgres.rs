use std::{collections::BTreeMap, fmt, time::Duration};

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt, stream::BoxStream};
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgPoolOptions, types::Json};
use tracing::info;

use crate::{
    error::{Result, TelemetryError},
    filter::{FilterCriteria, sql::push_predicate},
    model::{NewTelemetryRecord, RecordId, TelemetryRecord},
    store::RecordStore,
};

const SELECT_RECORDS: &str =
    "SELECT id, value, arch, captured_at, metadata FROM telemetry_records WHERE 1=1";

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: RecordId,
    value: String,
    arch: String,
    captured_at: DateTime<Utc>,
    metadata: Json<BTreeMap<String, String>>,
}

impl RecordRow {
    fn into_record(self) -> TelemetryRecord {
        TelemetryRecord {
            id: self.id,
            value: self.value,
            arch: self.arch,
            captured_at: self.captured_at,
            metadata: self.metadata.0,
        }
    }
}

/// Record store backed by the `telemetry_records` table.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
    max_connections: u32,
}

impl fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresRecordStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl PostgresRecordStore {
    /// Open a connection pool. Fails with
    /// [`TelemetryError::StoreUnavailable`] when the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await
            .map_err(|e| {
                TelemetryError::StoreUnavailable(format!("Database connection failed: {e}"))
            })?;

        info!(max_connections, "Database pool initialized");

        Ok(Self {
            pool,
            max_connections,
        })
    }

    /// Wrap an existing pool, e.g. one provisioned by `sqlx::test`.
    pub fn from_pool(pool: PgPool) -> Self {
        let max_connections = pool.options().get_max_connections();
        Self {
            pool,
            max_connections,
        }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await?;
        info!("telemetry_records schema is up to date");
        Ok(())
    }
}

/// Rows matching `criteria` in id order, fetched lazily from the pool.
fn stream_records(
    pool: &PgPool,
    criteria: FilterCriteria,
) -> impl Stream<Item = Result<TelemetryRecord>> + Send + '_ {
    try_stream! {
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_RECORDS);
        push_predicate(&mut builder, &criteria);
        builder.push(" ORDER BY id ASC");

        let mut rows = builder.build_query_as::<RecordRow>().fetch(pool);
        while let Some(row) = rows.try_next().await? {
            yield row.into_record();
        }
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn insert(&self, record: NewTelemetryRecord) -> Result<TelemetryRecord> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            INSERT INTO telemetry_records (value, arch, captured_at, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING id, value, arch, captured_at, metadata
            "#,
        )
        .bind(&record.value)
        .bind(&record.arch)
        .bind(record.captured_at)
        .bind(Json(&record.metadata))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_record())
    }

    fn scan(&self, criteria: FilterCriteria) -> BoxStream<'_, Result<TelemetryRecord>> {
        Box::pin(stream_records(&self.pool, criteria))
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM telemetry_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
