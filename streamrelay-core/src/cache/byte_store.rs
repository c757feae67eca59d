//! Durable key/value cache, per spec §4.1.
//!
//! Backed by SQLite. Writes go through a bounded queue consumed by a
//! background worker under a `failsafe` circuit breaker so a degraded
//! store never blocks the request path — reads keep working, writes
//! silently drop.

use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::models::{now_unix_secs, CacheRecord};
use crate::resilience::circuit_breaker::{self, CircuitBreaker};

#[derive(Debug, Clone, Default)]
pub struct ReleaseCounts {
    pub by_category: HashMap<String, u64>,
    pub by_category_resolution: HashMap<(String, String), u64>,
    pub total: u64,
}

enum WriteJob {
    Upsert(CacheRecord),
    UpsertBulk(Vec<CacheRecord>),
    Delete { service: String, hash: String },
    DeleteByPrefix { service: String, hash_prefix: String },
}

pub struct ByteStoreConfig {
    pub upsert_concurrency: usize,
    pub upsert_queue_max: usize,
    pub max_consecutive_failures: u32,
    pub circuit_min_backoff: Duration,
    pub circuit_max_backoff: Duration,
}

impl From<&crate::config::CacheConfig> for ByteStoreConfig {
    fn from(cfg: &crate::config::CacheConfig) -> Self {
        Self {
            upsert_concurrency: cfg.upsert_concurrency,
            upsert_queue_max: cfg.upsert_queue_max,
            max_consecutive_failures: cfg.max_consecutive_failures,
            circuit_min_backoff: cfg.circuit_min_backoff(),
            circuit_max_backoff: cfg.circuit_max_backoff(),
        }
    }
}

type Breaker = failsafe::StateMachine<
    failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
    (),
>;

pub struct ByteStore {
    pool: SqlitePool,
    queue: Arc<Mutex<VecDeque<WriteJob>>>,
    notify: Arc<Notify>,
    permits: Arc<Semaphore>,
    breaker: Arc<Breaker>,
    queue_max: usize,
}

impl ByteStore {
    #[must_use]
    pub fn new(pool: SqlitePool, config: &ByteStoreConfig) -> Arc<Self> {
        let store = Arc::new(Self {
            pool,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            permits: Arc::new(Semaphore::new(config.upsert_concurrency)),
            breaker: Arc::new(circuit_breaker::create(
                config.max_consecutive_failures,
                config.circuit_min_backoff,
                config.circuit_max_backoff,
            )),
            queue_max: config.upsert_queue_max,
        });
        store.clone().spawn_writer();
        store
    }

    fn spawn_writer(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut queue = self.queue.lock().await;
                    queue.pop_front()
                };
                let Some(job) = job else {
                    self.notify.notified().await;
                    continue;
                };

                if !self.breaker.is_call_permitted() {
                    debug!("byte store circuit open, dropping write");
                    continue;
                }

                let permit = self.permits.clone().acquire_owned().await.expect("semaphore not closed");
                let pool = self.pool.clone();
                let breaker = self.breaker.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    match apply_job(&pool, job).await {
                        Ok(()) => breaker.on_success(),
                        Err(e) => {
                            warn!("byte store write failed: {e}");
                            breaker.on_error();
                        }
                    }
                });
            }
        });
    }

    async fn enqueue(&self, job: WriteJob) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.queue_max {
            queue.pop_front();
        }
        queue.push_back(job);
        drop(queue);
        self.notify.notify_one();
    }

    /// Non-blocking: the write is enqueued and applied asynchronously.
    pub async fn upsert(&self, record: CacheRecord) {
        self.enqueue(WriteJob::Upsert(record)).await;
    }

    pub async fn upsert_bulk(&self, records: Vec<CacheRecord>) {
        if records.is_empty() {
            return;
        }
        self.enqueue(WriteJob::UpsertBulk(records)).await;
    }

    pub async fn delete(&self, service: &str, hash: &str) {
        self.enqueue(WriteJob::Delete {
            service: service.to_string(),
            hash: hash.to_string(),
        })
        .await;
    }

    pub async fn delete_by_prefix(&self, service: &str, hash_prefix: &str) {
        self.enqueue(WriteJob::DeleteByPrefix {
            service: service.to_string(),
            hash_prefix: hash_prefix.to_string(),
        })
        .await;
    }

    pub async fn get(&self, service: &str, hash: &str) -> Result<Option<CacheRecord>, CacheError> {
        let now = now_unix_secs();
        let row = sqlx::query(
            "SELECT service, hash, file_name, size_bytes, data, release_key, category, resolution, created_at, updated_at, expires_at
             FROM byte_store WHERE service = ?1 AND hash = ?2 AND expires_at > ?3",
        )
        .bind(service)
        .bind(hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(CacheError::from)?;

        row.map(row_to_record).transpose()
    }

    pub async fn get_many(&self, service: &str, hashes: &[String]) -> Result<Vec<CacheRecord>, CacheError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let now = now_unix_secs();
        let placeholders = hashes.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT service, hash, file_name, size_bytes, data, release_key, category, resolution, created_at, updated_at, expires_at
             FROM byte_store WHERE service = ? AND expires_at > ? AND hash IN ({placeholders})"
        );
        let mut q = sqlx::query(&query).bind(service).bind(now);
        for hash in hashes {
            q = q.bind(hash);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(CacheError::from)?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Every non-expired row under `service` — the whole cached result set
    /// for one cache key, used by the read side of the write-through gate.
    pub async fn get_by_service(&self, service: &str) -> Result<Vec<CacheRecord>, CacheError> {
        let now = now_unix_secs();
        let rows = sqlx::query(
            "SELECT service, hash, file_name, size_bytes, data, release_key, category, resolution, created_at, updated_at, expires_at
             FROM byte_store WHERE service = ?1 AND expires_at > ?2",
        )
        .bind(service)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(CacheError::from)?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn counts_by_release(&self, service: &str, release_key: &str) -> Result<ReleaseCounts, CacheError> {
        let now = now_unix_secs();
        let rows = sqlx::query(
            "SELECT category, resolution FROM byte_store
             WHERE service = ?1 AND release_key = ?2 AND expires_at > ?3",
        )
        .bind(service)
        .bind(release_key)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(CacheError::from)?;

        let mut counts = ReleaseCounts::default();
        for row in rows {
            let category: Option<String> = row.try_get("category").ok();
            let resolution: Option<String> = row.try_get("resolution").ok();
            counts.total += 1;
            if let Some(category) = category.clone() {
                *counts.by_category.entry(category.clone()).or_insert(0) += 1;
                if let Some(resolution) = resolution {
                    *counts
                        .by_category_resolution
                        .entry((category, resolution))
                        .or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Deletes all rows whose `expires_at` has passed. Intended to be
    /// invoked by the caller on a schedule (e.g. a minutely tick).
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = now_unix_secs();
        let result = sqlx::query("DELETE FROM byte_store WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(CacheError::from)?;
        Ok(result.rows_affected())
    }
}

async fn apply_job(pool: &SqlitePool, job: WriteJob) -> Result<(), CacheError> {
    match job {
        WriteJob::Upsert(record) => upsert_one(pool, &record).await,
        WriteJob::UpsertBulk(records) => {
            let mut seen = HashSet::new();
            let mut deduped = Vec::with_capacity(records.len());
            for record in records.into_iter().rev() {
                if seen.insert((record.service.clone(), record.hash.clone())) {
                    deduped.push(record);
                }
            }
            for chunk in deduped.chunks(50) {
                let mut tx = pool.begin().await.map_err(CacheError::from)?;
                for record in chunk {
                    upsert_one_tx(&mut tx, record).await?;
                }
                tx.commit().await.map_err(CacheError::from)?;
            }
            Ok(())
        }
        WriteJob::Delete { service, hash } => {
            sqlx::query("DELETE FROM byte_store WHERE service = ?1 AND hash = ?2")
                .bind(service)
                .bind(hash)
                .execute(pool)
                .await
                .map_err(CacheError::from)?;
            Ok(())
        }
        WriteJob::DeleteByPrefix { service, hash_prefix } => {
            sqlx::query("DELETE FROM byte_store WHERE service = ?1 AND hash LIKE ?2")
                .bind(service)
                .bind(format!("{hash_prefix}%"))
                .execute(pool)
                .await
                .map_err(CacheError::from)?;
            Ok(())
        }
    }
}

async fn upsert_one(pool: &SqlitePool, record: &CacheRecord) -> Result<(), CacheError> {
    let mut tx = pool.begin().await.map_err(CacheError::from)?;
    upsert_one_tx(&mut tx, record).await?;
    tx.commit().await.map_err(CacheError::from)?;
    Ok(())
}

async fn upsert_one_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &CacheRecord,
) -> Result<(), CacheError> {
    let data = serde_json::to_string(&record.data)?;
    sqlx::query(
        "INSERT INTO byte_store (service, hash, file_name, size_bytes, data, release_key, category, resolution, created_at, updated_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(service, hash) DO UPDATE SET
            file_name = excluded.file_name,
            size_bytes = excluded.size_bytes,
            data = excluded.data,
            release_key = excluded.release_key,
            category = excluded.category,
            resolution = excluded.resolution,
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at",
    )
    .bind(&record.service)
    .bind(&record.hash)
    .bind(&record.file_name)
    .bind(record.size_bytes.map(|v| v as i64))
    .bind(data)
    .bind(&record.release_key)
    .bind(&record.category)
    .bind(&record.resolution)
    .bind(record.created_at)
    .bind(record.updated_at)
    .bind(record.expires_at)
    .execute(&mut **tx)
    .await
    .map_err(CacheError::from)?;
    Ok(())
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<CacheRecord, CacheError> {
    let data_raw: String = row.try_get("data").map_err(CacheError::from)?;
    let data: serde_json::Value = serde_json::from_str(&data_raw)?;
    Ok(CacheRecord {
        service: row.try_get("service").map_err(CacheError::from)?,
        hash: row.try_get("hash").map_err(CacheError::from)?,
        file_name: row.try_get("file_name").map_err(CacheError::from)?,
        size_bytes: row
            .try_get::<Option<i64>, _>("size_bytes")
            .map_err(CacheError::from)?
            .map(|v| v as u64),
        data,
        release_key: row.try_get("release_key").map_err(CacheError::from)?,
        category: row.try_get("category").map_err(CacheError::from)?,
        resolution: row.try_get("resolution").map_err(CacheError::from)?,
        created_at: row.try_get("created_at").map_err(CacheError::from)?,
        updated_at: row.try_get("updated_at").map_err(CacheError::from)?,
        expires_at: row.try_get("expires_at").map_err(CacheError::from)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(include_str!("../../../migrations/20260101000000_byte_store.sql"))
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    fn record(service: &str, hash: &str, expires_at: i64) -> CacheRecord {
        CacheRecord {
            service: service.to_string(),
            hash: hash.to_string(),
            file_name: Some("file.mkv".to_string()),
            size_bytes: Some(1000),
            data: serde_json::json!({"ok": true}),
            release_key: Some("movie:tt1".to_string()),
            category: Some("movie".to_string()),
            resolution: Some("1080p".to_string()),
            created_at: 0,
            updated_at: 0,
            expires_at,
        }
    }

    fn config() -> ByteStoreConfig {
        ByteStoreConfig {
            upsert_concurrency: 2,
            upsert_queue_max: 10,
            max_consecutive_failures: 5,
            circuit_min_backoff: Duration::from_secs(1),
            circuit_max_backoff: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let store = ByteStore::new(test_pool().await, &config());
        store.upsert(record("realdebrid", "abc", now_unix_secs() + 1000)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let got = store.get("realdebrid", "abc").await.unwrap();
        assert!(got.is_some());
        assert_eq!(got.unwrap().file_name.as_deref(), Some("file.mkv"));
    }

    #[tokio::test]
    async fn expired_rows_are_invisible() {
        let store = ByteStore::new(test_pool().await, &config());
        store.upsert(record("realdebrid", "exp", now_unix_secs() - 10)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get("realdebrid", "exp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bulk_upsert_dedups_within_batch() {
        let store = ByteStore::new(test_pool().await, &config());
        let ttl = now_unix_secs() + 1000;
        store
            .upsert_bulk(vec![
                record("svc", "h1", ttl),
                record("svc", "h1", ttl),
                record("svc", "h2", ttl),
            ])
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let many = store.get_many("svc", &["h1".to_string(), "h2".to_string()]).await.unwrap();
        assert_eq!(many.len(), 2);
    }

    #[tokio::test]
    async fn counts_by_release_aggregates_category_and_resolution() {
        let store = ByteStore::new(test_pool().await, &config());
        let ttl = now_unix_secs() + 1000;
        store.upsert(record("svc", "h1", ttl)).await;
        store.upsert(record("svc", "h2", ttl)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let counts = store.counts_by_release("svc", "movie:tt1").await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.by_category.get("movie"), Some(&2));
    }

    #[tokio::test]
    async fn purge_expired_removes_stale_rows() {
        let store = ByteStore::new(test_pool().await, &config());
        store.upsert(record("svc", "stale", now_unix_secs() - 5)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let removed = store.purge_expired().await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn get_by_service_returns_all_non_expired_rows() {
        let store = ByteStore::new(test_pool().await, &config());
        let ttl = now_unix_secs() + 1000;
        store.upsert(record("bucket", "h1", ttl)).await;
        store.upsert(record("bucket", "h2", ttl)).await;
        store.upsert(record("bucket", "stale", now_unix_secs() - 5)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rows = store.get_by_service("bucket").await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn backlog_overflow_drops_oldest() {
        let max = 2;
        let mut queue: VecDeque<&str> = VecDeque::new();
        for id in ["a", "b", "c"] {
            if queue.len() >= max {
                queue.pop_front();
            }
            queue.push_back(id);
        }
        assert_eq!(queue, VecDeque::from(["b", "c"]));
    }
}
