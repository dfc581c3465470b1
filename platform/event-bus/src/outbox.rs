//! # Transactional outbox
//!
//! A service that changes its own state and announces the change stages
//! the event in its `events_outbox` table inside the same database
//! transaction. The [`OutboxRelay`] later publishes pending rows in
//! insertion order and marks them published. A crash between commit and
//! publish therefore delays the event instead of losing it.
//!
//! Each row is published at least once; consumers deduplicate by state.
//! A row whose publish fails stays pending and blocks the rows behind it;
//! the relay retries it with exponential backoff for as long as the broker
//! is unavailable.
//!
//! ```sql
//! CREATE TABLE events_outbox (
//!     id            BIGSERIAL PRIMARY KEY,
//!     event_id      TEXT NOT NULL UNIQUE,
//!     event_type    TEXT NOT NULL,
//!     subject       TEXT NOT NULL,
//!     payload       JSONB NOT NULL,
//!     status        TEXT NOT NULL DEFAULT 'pending',
//!     retry_count   INT NOT NULL DEFAULT 0,
//!     error_message TEXT,
//!     created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     published_at  TIMESTAMPTZ
//! );
//! ```

use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::watch;

use crate::retry::RetryConfig;
use crate::{event_subject, Event, Publisher};

pub const DEFAULT_BATCH_SIZE: i64 = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Longest wait between retries of a failing publish
pub const MAX_RELAY_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("outbox unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Published,
}

/// A staged event: the full serialized envelope plus its routing data
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OutboxRecord {
    pub event_id: String,
    pub event_type: String,
    pub subject: String,
    pub payload: serde_json::Value,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Wrap the event in a fresh envelope and serialize it for staging
    pub fn from_event(event: Event) -> Result<Self, OutboxError> {
        let envelope = event.into_envelope();
        let payload = serde_json::to_value(&envelope)?;

        Ok(Self {
            event_id: envelope.event_id.clone(),
            subject: event_subject(&envelope.event_type),
            event_type: envelope.event_type,
            payload,
            retry_count: 0,
            created_at: envelope.timestamp,
        })
    }
}

/// Stage a record inside the caller's transaction
pub async fn enqueue_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    record: &OutboxRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO events_outbox (event_id, event_type, subject, payload, status, created_at)
        VALUES ($1, $2, $3, $4, 'pending', $5)
        "#,
    )
    .bind(&record.event_id)
    .bind(&record.event_type)
    .bind(&record.subject)
    .bind(&record.payload)
    .bind(record.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Storage side of the relay
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest pending rows first
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, OutboxError>;

    async fn mark_published(&self, event_id: &str) -> Result<(), OutboxError>;

    /// Count a failed publish on a row that stays pending; returns its retry count
    async fn record_failure(&self, event_id: &str, error: &str) -> Result<i32, OutboxError>;
}

/// Outbox backed by the service's `events_outbox` table
#[derive(Clone)]
pub struct PgOutbox {
    pool: PgPool,
}

impl PgOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutbox {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, OutboxError> {
        let records = sqlx::query_as::<_, OutboxRecord>(
            r#"
            SELECT event_id, event_type, subject, payload, retry_count, created_at
            FROM events_outbox
            WHERE status = 'pending'
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn mark_published(&self, event_id: &str) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE events_outbox
            SET status = 'published', published_at = NOW(), error_message = NULL
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_failure(&self, event_id: &str, error: &str) -> Result<i32, OutboxError> {
        let retry_count: i32 = sqlx::query_scalar(
            r#"
            UPDATE events_outbox
            SET retry_count = retry_count + 1, error_message = $2
            WHERE event_id = $1
            RETURNING retry_count
            "#,
        )
        .bind(event_id)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;

        Ok(retry_count)
    }
}

#[derive(Debug, Clone)]
struct StagedRow {
    record: OutboxRecord,
    status: OutboxStatus,
    error: Option<String>,
}

#[derive(Default)]
struct OutboxRows {
    order: Vec<String>,
    rows: HashMap<String, StagedRow>,
}

/// Outbox kept in memory, for tests and the in-memory stores
#[derive(Clone, Default)]
pub struct InMemoryOutbox {
    inner: Arc<Mutex<OutboxRows>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OutboxRows> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, record: OutboxRecord) {
        let mut rows = self.lock();
        rows.order.push(record.event_id.clone());
        rows.rows.insert(
            record.event_id.clone(),
            StagedRow {
                record,
                status: OutboxStatus::Pending,
                error: None,
            },
        );
    }

    pub fn pending_count(&self) -> usize {
        self.lock()
            .rows
            .values()
            .filter(|r| r.status == OutboxStatus::Pending)
            .count()
    }

    pub fn status_of(&self, event_id: &str) -> Option<OutboxStatus> {
        self.lock().rows.get(event_id).map(|r| r.status)
    }

    /// All staged records in insertion order, whatever their status
    pub fn records(&self) -> Vec<OutboxRecord> {
        let rows = self.lock();
        rows.order
            .iter()
            .filter_map(|id| rows.rows.get(id))
            .map(|r| r.record.clone())
            .collect()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutbox {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, OutboxError> {
        let rows = self.lock();
        Ok(rows
            .order
            .iter()
            .filter_map(|id| rows.rows.get(id))
            .filter(|r| r.status == OutboxStatus::Pending)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|r| r.record.clone())
            .collect())
    }

    async fn mark_published(&self, event_id: &str) -> Result<(), OutboxError> {
        if let Some(row) = self.lock().rows.get_mut(event_id) {
            row.status = OutboxStatus::Published;
            row.error = None;
        }
        Ok(())
    }

    async fn record_failure(&self, event_id: &str, error: &str) -> Result<i32, OutboxError> {
        let mut rows = self.lock();
        let row = rows
            .rows
            .get_mut(event_id)
            .ok_or_else(|| OutboxError::Unavailable(format!("no outbox row {event_id}")))?;

        row.record.retry_count += 1;
        row.error = Some(error.to_string());
        Ok(row.record.retry_count)
    }
}

/// Publishes staged events and records the result
///
/// After a failed publish the relay waits `poll_interval * 2^(n - 1)` before
/// the next batch, where `n` counts consecutive failed batches, capped at
/// the max backoff. The first successful batch resets the schedule.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Publisher,
    batch_size: i64,
    poll_interval: Duration,
    backoff: RetryConfig,
    consecutive_failures: AtomicU32,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OutboxStore>, publisher: Publisher) -> Self {
        Self {
            store,
            publisher,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: RetryConfig {
                initial_backoff: DEFAULT_POLL_INTERVAL,
                max_backoff: MAX_RELAY_BACKOFF,
                ..RetryConfig::default()
            },
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.backoff.initial_backoff = poll_interval;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.backoff.max_backoff = max_backoff;
        self
    }

    /// Delay before the next batch: the poll interval while healthy,
    /// growing exponentially while publishes keep failing
    pub fn next_delay(&self) -> Duration {
        match self.consecutive_failures.load(Ordering::SeqCst) {
            0 => self.poll_interval,
            failures => self.backoff.delay_after(failures),
        }
    }

    /// Publish one batch of pending rows, oldest first
    ///
    /// Stops at the first failed publish so later rows never overtake it;
    /// the failed row stays pending. Returns how many rows were published.
    pub async fn relay_batch(&self) -> Result<usize, OutboxError> {
        let records = self.store.fetch_pending(self.batch_size).await?;
        let mut published = 0;

        for record in records {
            let body = serde_json::to_vec(&record.payload)?;

            match self.publisher.publish_raw(&record.event_type, body).await {
                Ok(()) => {
                    self.store.mark_published(&record.event_id).await?;
                    published += 1;
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    let retry_count = self.store.record_failure(&record.event_id, &e.to_string()).await?;
                    tracing::warn!(
                        event_id = %record.event_id,
                        event_type = %record.event_type,
                        retry_count = retry_count,
                        backoff_ms = self.backoff.delay_after(failures).as_millis() as u64,
                        error = %e,
                        "Failed to publish outbox event, will retry"
                    );
                    return Ok(published);
                }
            }
        }

        if self.consecutive_failures.swap(0, Ordering::SeqCst) > 0 {
            tracing::info!("Outbox relay recovered");
        }
        Ok(published)
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_backoff_ms = self.backoff.max_backoff.as_millis() as u64,
            "Starting outbox relay"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.next_delay()) => {
                    match self.relay_batch().await {
                        Ok(count) if count > 0 => {
                            tracing::info!(count = count, "Published events from outbox");
                        }
                        Err(e) => {
                            self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                            tracing::error!(error = %e, "Error relaying outbox");
                        }
                        _ => {}
                    }
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }
}

/// Read `OUTBOX_POLL_INTERVAL_MS`
pub fn poll_interval_from_env() -> Result<Duration, String> {
    match env::var("OUTBOX_POLL_INTERVAL_MS") {
        Ok(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| format!("OUTBOX_POLL_INTERVAL_MS must be a positive integer, got {raw:?}")),
        Err(_) => Ok(DEFAULT_POLL_INTERVAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusMessage, BusResult, CompanyDeleted, Delivery, EventBus, InMemoryBus};
    use futures::stream::BoxStream;
    use std::sync::atomic::AtomicUsize;

    fn deleted(user_id: i64) -> OutboxRecord {
        OutboxRecord::from_event(Event::CompanyDeleted(CompanyDeleted { user_id })).unwrap()
    }

    /// Bus that rejects the first `failures` publishes
    struct FlakyBus {
        inner: InMemoryBus,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl EventBus for FlakyBus {
        async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(crate::BusError::PublishError("broker unavailable".into()));
            }
            self.inner.publish(subject, payload).await
        }

        async fn subscribe(
            &self,
            queue: &str,
            subjects: &[String],
        ) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
            self.inner.subscribe(queue, subjects).await
        }

        async fn close(&self) -> BusResult<()> {
            self.inner.close().await
        }
    }

    fn subjects(bus: &InMemoryBus) -> Vec<String> {
        bus.published("jobfair.events.>")
            .into_iter()
            .map(|m: BusMessage| m.subject)
            .collect()
    }

    #[test]
    fn test_record_from_event() {
        let record = deleted(42);
        assert_eq!(record.event_type, "company.deleted");
        assert_eq!(record.subject, "jobfair.events.company.deleted");
        assert_eq!(record.payload["event_id"], record.event_id.as_str());
        assert_eq!(record.payload["data"]["user_id"], 42);
    }

    #[tokio::test]
    async fn test_relay_publishes_in_order_and_marks_published() {
        let bus = Arc::new(InMemoryBus::new());
        let outbox = InMemoryOutbox::new();
        let first = deleted(1);
        let second = deleted(2);
        outbox.enqueue(first.clone());
        outbox.enqueue(second.clone());

        let relay = OutboxRelay::new(Arc::new(outbox.clone()), Publisher::new(bus.clone()));
        assert_eq!(relay.relay_batch().await.unwrap(), 2);
        assert_eq!(relay.relay_batch().await.unwrap(), 0);

        let published = bus.published("jobfair.events.>");
        let ids: Vec<serde_json::Value> = published
            .iter()
            .map(|m| serde_json::from_slice::<serde_json::Value>(&m.payload).unwrap()["event_id"].clone())
            .collect();
        assert_eq!(ids, vec![first.payload["event_id"].clone(), second.payload["event_id"].clone()]);
        assert_eq!(outbox.status_of(&first.event_id), Some(OutboxStatus::Published));
        assert_eq!(outbox.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_row_pending_and_stops_batch() {
        let inner = InMemoryBus::new();
        let bus = Arc::new(FlakyBus {
            inner: inner.clone(),
            failures: AtomicUsize::new(1),
        });
        let outbox = InMemoryOutbox::new();
        let first = deleted(1);
        outbox.enqueue(first.clone());
        outbox.enqueue(deleted(2));

        let relay = OutboxRelay::new(Arc::new(outbox.clone()), Publisher::new(bus));
        assert_eq!(relay.relay_batch().await.unwrap(), 0);
        assert_eq!(outbox.pending_count(), 2);
        assert!(subjects(&inner).is_empty());

        assert_eq!(relay.relay_batch().await.unwrap(), 2);
        assert_eq!(subjects(&inner).len(), 2);
        assert_eq!(outbox.records()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_outage_then_recovery_publishes_every_row_in_order() {
        let inner = InMemoryBus::new();
        let bus = Arc::new(FlakyBus {
            inner: inner.clone(),
            failures: AtomicUsize::new(5),
        });
        let outbox = InMemoryOutbox::new();
        let first = deleted(1);
        let second = deleted(2);
        outbox.enqueue(first.clone());
        outbox.enqueue(second.clone());

        let relay = OutboxRelay::new(Arc::new(outbox.clone()), Publisher::new(bus));
        for _ in 0..10 {
            relay.relay_batch().await.unwrap();
        }

        let user_ids: Vec<i64> = inner
            .published("jobfair.events.>")
            .iter()
            .map(|m| {
                let body: serde_json::Value = serde_json::from_slice(&m.payload).unwrap();
                body["data"]["user_id"].as_i64().unwrap()
            })
            .collect();
        assert_eq!(user_ids, vec![1, 2]);
        assert_eq!(outbox.status_of(&first.event_id), Some(OutboxStatus::Published));
        assert_eq!(outbox.status_of(&second.event_id), Some(OutboxStatus::Published));
        assert_eq!(outbox.records()[0].retry_count, 5);
        assert_eq!(outbox.records()[1].retry_count, 0);
    }

    #[tokio::test]
    async fn test_long_outage_keeps_head_row_pending() {
        let inner = InMemoryBus::new();
        let bus = Arc::new(FlakyBus {
            inner: inner.clone(),
            failures: AtomicUsize::new(usize::MAX),
        });
        let outbox = InMemoryOutbox::new();
        let record = deleted(1);
        outbox.enqueue(record.clone());
        outbox.enqueue(deleted(2));

        let relay = OutboxRelay::new(Arc::new(outbox.clone()), Publisher::new(bus));
        for _ in 0..50 {
            assert_eq!(relay.relay_batch().await.unwrap(), 0);
        }

        assert_eq!(outbox.status_of(&record.event_id), Some(OutboxStatus::Pending));
        assert_eq!(outbox.pending_count(), 2);
        assert_eq!(outbox.records()[0].retry_count, 50);
        assert!(subjects(&inner).is_empty());
    }

    #[tokio::test]
    async fn test_backoff_grows_while_failing_and_resets_on_recovery() {
        let inner = InMemoryBus::new();
        let bus = Arc::new(FlakyBus {
            inner: inner.clone(),
            failures: AtomicUsize::new(usize::MAX),
        });
        let outbox = InMemoryOutbox::new();
        outbox.enqueue(deleted(1));

        let relay = OutboxRelay::new(Arc::new(outbox.clone()), Publisher::new(bus.clone()))
            .with_poll_interval(Duration::from_millis(10))
            .with_max_backoff(Duration::from_millis(50));
        assert_eq!(relay.next_delay(), Duration::from_millis(10));

        let mut delays = Vec::new();
        for _ in 0..4 {
            relay.relay_batch().await.unwrap();
            delays.push(relay.next_delay());
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(50),
            ]
        );

        bus.failures.store(0, Ordering::SeqCst);
        assert_eq!(relay.relay_batch().await.unwrap(), 1);
        assert_eq!(relay.next_delay(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let bus = Arc::new(InMemoryBus::new());
        let outbox = InMemoryOutbox::new();
        outbox.enqueue(deleted(1));

        let relay = OutboxRelay::new(Arc::new(outbox.clone()), Publisher::new(bus.clone()))
            .with_poll_interval(Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(relay.run(rx));

        tokio::time::timeout(Duration::from_secs(2), async {
            while outbox.pending_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay should drain the outbox");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay should stop")
            .unwrap();
        assert_eq!(bus.published("jobfair.events.company.deleted").len(), 1);
    }
}
