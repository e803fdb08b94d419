use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventQuery, EventRecord, EventStoreError, Result,
    Snapshot, Version,
    store::{ALL_STREAM, EventStore, EventStream, validate_events_for_append},
};

/// Advisory lock key held by every append transaction.
const APPEND_LOCK_KEY: i64 = 0x5155_4f54_4c4f_47;

/// Rows fetched per round trip by [`EventStore::get_event_stream`].
const STREAM_PAGE_SIZE: i64 = 500;

const RECORD_COLUMNS: &str = "position, stored_at, id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata";

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and runs the migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: &PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }

    fn row_to_record(row: &PgRow) -> Result<EventRecord> {
        Ok(EventRecord {
            position: row.try_get::<i64, _>("position")? as u64,
            stored_at: row.try_get::<DateTime<Utc>, _>("stored_at")?,
            event: Self::row_to_event(row)?,
        })
    }

    async fn fetch_stream_page(
        pool: &PgPool,
        stream_name: &str,
        from_position: i64,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM events \
             WHERE position >= $1 AND ($2 = $3 OR aggregate_type = $2) \
             ORDER BY position ASC LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(from_position)
            .bind(stream_name)
            .bind(ALL_STREAM)
            .bind(STREAM_PAGE_SIZE)
            .fetch_all(pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

struct StreamCursor {
    pool: PgPool,
    stream_name: String,
    next_position: i64,
    buffered: VecDeque<EventRecord>,
    exhausted: bool,
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(&self, events: Vec<EventEnvelope>) -> Result<Vec<EventRecord>> {
        let batches = validate_events_for_append(&events)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        for batch in &batches {
            let head: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                    .bind(batch.aggregate_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;

            let actual = Version::new(head.unwrap_or(0));
            let expected = batch.expected_head();
            if actual != expected {
                metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
                tracing::warn!(
                    aggregate_id = %batch.aggregate_id,
                    %expected,
                    %actual,
                    "append rejected: concurrency conflict"
                );
                // Dropping the transaction rolls it back.
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: batch.aggregate_id,
                    expected,
                    actual,
                });
            }
        }

        let mut position: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) FROM events")
            .fetch_one(&mut *tx)
            .await?;

        let mut appended = Vec::with_capacity(events.len());
        for event in events {
            position += 1;
            let metadata_json = serde_json::to_value(&event.metadata)?;

            let stored_at: DateTime<Utc> = sqlx::query_scalar(
                r#"
                INSERT INTO events (position, id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING stored_at
                "#,
            )
            .bind(position)
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
                    return EventStoreError::ConcurrencyConflict {
                        aggregate_id: event.aggregate_id,
                        expected: Version::new(event.version.as_i64() - 1),
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            appended.push(EventRecord {
                position: position as u64,
                stored_at,
                event,
            });
        }

        tx.commit().await?;

        metrics::counter!("event_store_events_appended_total").increment(appended.len() as u64);
        tracing::debug!(
            aggregates = batches.len(),
            last_position = position,
            "events appended"
        );
        Ok(appended)
    }

    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM events \
             WHERE aggregate_id = $1 AND version >= $2 \
             ORDER BY version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id.as_uuid())
            .bind(from_version.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn get_events_by_type(
        &self,
        event_type: &str,
        limit: Option<usize>,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM events \
             WHERE event_type = $1 \
             ORDER BY position ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(event_type)
            .bind(limit.map(|l| l as i64))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn get_event_stream(
        &self,
        stream_name: &str,
        from_position: u64,
    ) -> Result<EventStream> {
        let cursor = StreamCursor {
            pool: self.pool.clone(),
            stream_name: stream_name.to_string(),
            next_position: from_position.max(1) as i64,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        let stream = stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(record) = cursor.buffered.pop_front() {
                    return Some((Ok(record), cursor));
                }
                if cursor.exhausted {
                    return None;
                }
                match Self::fetch_stream_page(
                    &cursor.pool,
                    &cursor.stream_name,
                    cursor.next_position,
                )
                .await
                {
                    Ok(page) => {
                        cursor.exhausted = (page.len() as i64) < STREAM_PAGE_SIZE;
                        if let Some(last) = page.last() {
                            cursor.next_position = last.position as i64 + 1;
                        }
                        cursor.buffered.extend(page);
                    }
                    Err(e) => {
                        cursor.exhausted = true;
                        return Some((Err(e), cursor));
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM events WHERE 1=1");
        let mut param_count = 0;

        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.aggregate_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_type = ${param_count}"));
        }
        if query.event_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ANY(${param_count})"));
        }
        if query.from_version.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND version >= ${param_count}"));
        }
        if query.to_version.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND version <= ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp <= ${param_count}"));
        }

        sql.push_str(" ORDER BY position ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(aggregate_type) = query.aggregate_type {
            sqlx_query = sqlx_query.bind(aggregate_type);
        }
        if let Some(event_types) = query.event_types {
            sqlx_query = sqlx_query.bind(event_types);
        }
        if let Some(from_version) = query.from_version {
            sqlx_query = sqlx_query.bind(from_version.as_i64());
        }
        if let Some(to_version) = query.to_version {
            sqlx_query = sqlx_query.bind(to_version.as_i64());
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, taken_at, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                taken_at = EXCLUDED.taken_at,
                state = EXCLUDED.state
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version.as_i64())
        .bind(snapshot.taken_at)
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, taken_at, state
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Snapshot {
                aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                version: Version::new(row.try_get("version")?),
                taken_at: row.try_get::<DateTime<Utc>, _>("taken_at")?,
                state: row.try_get("state")?,
            })),
            None => Ok(None),
        }
    }
}
