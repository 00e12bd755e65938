use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::{EventStore, StoreError};
use crate::config::LedgerConfig;
use crate::id::EventRecordId;
use crate::model::{Event, EventKey, EventRecord};

/// Ledger stored in the `events` table (see `migrations/`).
///
/// The event itself is kept as JSONB; the key columns are duplicated so
/// conflict lookups can use the index.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `DATABASE_URL` from the config.
    pub async fn connect(config: &LedgerConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(config.require_database_url()?)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn record_from_row(row: PgRow) -> Result<EventRecord, sqlx::Error> {
        let sqlx::types::Json(mut event): sqlx::types::Json<Event> = row.try_get("data")?;
        let record_date: DateTime<Utc> = row.try_get("record_date")?;
        event.record_date = Some(record_date);

        Ok(EventRecord {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            timestamp: row.try_get("timestamp")?,
            instance_id: row.try_get("instance_id")?,
            record_date: Some(record_date),
            event,
        })
    }
}

impl StoreError for sqlx::Error {
    fn is_transient(&self) -> bool {
        match self {
            sqlx::Error::Database(db) => matches!(db.kind(), ErrorKind::Other),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            _ => false,
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    type Error = sqlx::Error;

    async fn find_conflicting_events(
        &self,
        keys: &HashSet<EventKey>,
    ) -> Result<Vec<EventRecord>, Self::Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut org_ids = Vec::with_capacity(keys.len());
        let mut timestamps = Vec::with_capacity(keys.len());
        let mut instance_ids = Vec::with_capacity(keys.len());
        for key in keys {
            org_ids.push(key.org_id.clone());
            timestamps.push(key.timestamp);
            instance_ids.push(key.instance_id.clone());
        }

        let rows = sqlx::query(
            r#"
            SELECT e.id, e.org_id, e.timestamp, e.instance_id, e.record_date, e.data
            FROM events e
            JOIN UNNEST($1::text[], $2::timestamptz[], $3::text[])
                AS k(org_id, timestamp, instance_id)
              ON e.org_id = k.org_id
             AND e.timestamp = k.timestamp
             AND e.instance_id IS NOT DISTINCT FROM k.instance_id
            ORDER BY e.timestamp, e.record_date, e.id
            "#,
        )
        .bind(&org_ids)
        .bind(&timestamps)
        .bind(&instance_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::record_from_row).collect()
    }

    async fn save_all(&self, records: Vec<EventRecord>) -> Result<Vec<EventRecord>, Self::Error> {
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(records.len());

        for mut record in records {
            // clock_timestamp() advances within a transaction, unlike NOW().
            let row = sqlx::query(
                r#"
                INSERT INTO events (id, org_id, timestamp, instance_id, record_date, data)
                VALUES ($1, $2, $3, $4, clock_timestamp(), $5)
                RETURNING record_date
                "#,
            )
            .bind(record.id)
            .bind(&record.org_id)
            .bind(record.timestamp)
            .bind(record.instance_id.as_ref())
            .bind(sqlx::types::Json(&record.event))
            .fetch_one(&mut *tx)
            .await?;

            let record_date: DateTime<Utc> = row.try_get("record_date")?;
            record.mark_persisted(record_date);
            saved.push(record);
        }

        tx.commit().await?;
        tracing::debug!(count = saved.len(), "saved event records");
        Ok(saved)
    }
}

impl PostgresEventStore {
    /// Remove a record by id. Used by retention jobs and tests.
    pub async fn delete(&self, id: EventRecordId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
