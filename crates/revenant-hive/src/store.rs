//! Persistent shared memory of hive experiments.
//!
//! Four operation families, all keyed by experiment id: the shared message
//! log, per-instance private buffers, per-cycle belief snapshots, and
//! consensus reports. Two backends sit behind [`HiveStore`]:
//!
//! - [`MemoryHiveStore`] -- in-process, for tests and single-process runs
//! - [`PostgresHiveStore`] -- `PostgreSQL` via [`sqlx`], one transaction per
//!   write, serialization failures retried
//!
//! Reads may observe a state at most one write behind a concurrent writer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use revenant_types::{ConsensusReport, InstanceSnapshot, Message, SharedMessage};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::RwLock;

use crate::error::HiveError;

/// Retries of a write after a serialization failure.
pub const MAX_WRITE_RETRIES: u32 = 3;

/// SQLSTATE of a serialization failure.
const SERIALIZATION_FAILURE: &str = "40001";

/// Default maximum number of connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn limit_i64(limit: Option<usize>) -> Option<i64> {
    limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX))
}

/// The last `limit` entries of `items`, in order.
fn tail<T: Clone>(items: &[T], limit: Option<usize>) -> Vec<T> {
    let skip = limit.map_or(0, |l| items.len().saturating_sub(l));
    items.iter().skip(skip).cloned().collect()
}

// ---------------------------------------------------------------------------
// Unified store enum
// ---------------------------------------------------------------------------

/// A hive store backend.
#[derive(Debug, Clone)]
pub enum HiveStore {
    /// In-process store.
    Memory(MemoryHiveStore),
    /// `PostgreSQL` store.
    Postgres(PostgresHiveStore),
}

impl HiveStore {
    /// A fresh, empty in-process store.
    pub fn memory() -> Self {
        Self::Memory(MemoryHiveStore::default())
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }

    /// Append `message` to the shared log.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the write fails.
    pub async fn append_message(&self, message: &SharedMessage) -> Result<(), HiveError> {
        match self {
            Self::Memory(store) => {
                store.append_message(message).await;
                Ok(())
            }
            Self::Postgres(store) => store.append_message(message).await,
        }
    }

    /// Shared log of `experiment_id`, oldest first, at most the newest
    /// `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the read fails.
    pub async fn shared_history(
        &self,
        experiment_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SharedMessage>, HiveError> {
        match self {
            Self::Memory(store) => Ok(store.shared_history(experiment_id, limit).await),
            Self::Postgres(store) => store.shared_history(experiment_id, limit).await,
        }
    }

    /// Append `message` to the private buffer of one instance.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the write fails.
    pub async fn append_private(
        &self,
        experiment_id: &str,
        instance_id: &str,
        message: &Message,
    ) -> Result<(), HiveError> {
        match self {
            Self::Memory(store) => {
                store.append_private(experiment_id, instance_id, message).await;
                Ok(())
            }
            Self::Postgres(store) => store.append_private(experiment_id, instance_id, message).await,
        }
    }

    /// Private buffer of one instance, oldest first, at most `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the read fails.
    pub async fn private_buffer(
        &self,
        experiment_id: &str,
        instance_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, HiveError> {
        match self {
            Self::Memory(store) => Ok(store.private_buffer(experiment_id, instance_id, limit).await),
            Self::Postgres(store) => store.private_buffer(experiment_id, instance_id, limit).await,
        }
    }

    /// Insert or replace the snapshot of one instance at one cycle.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the write fails.
    pub async fn upsert_snapshot(&self, snapshot: &InstanceSnapshot) -> Result<(), HiveError> {
        match self {
            Self::Memory(store) => {
                store.upsert_snapshot(snapshot).await;
                Ok(())
            }
            Self::Postgres(store) => store.upsert_snapshot(snapshot).await,
        }
    }

    /// Snapshots of every instance that reported `cycle`, by instance id.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the read fails.
    pub async fn snapshots_for_cycle(
        &self,
        experiment_id: &str,
        cycle: u64,
    ) -> Result<Vec<InstanceSnapshot>, HiveError> {
        match self {
            Self::Memory(store) => Ok(store.snapshots_for_cycle(experiment_id, cycle).await),
            Self::Postgres(store) => store.snapshots_for_cycle(experiment_id, cycle).await,
        }
    }

    /// Newest snapshot of every instance of `experiment_id`, by instance id.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the read fails.
    pub async fn latest_snapshots(
        &self,
        experiment_id: &str,
    ) -> Result<Vec<InstanceSnapshot>, HiveError> {
        match self {
            Self::Memory(store) => Ok(store.latest_snapshots(experiment_id).await),
            Self::Postgres(store) => store.latest_snapshots(experiment_id).await,
        }
    }

    /// Append a consensus report unless one already exists for its
    /// experiment and cycle. Returns whether it was stored.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the write fails.
    pub async fn append_report(&self, report: &ConsensusReport) -> Result<bool, HiveError> {
        match self {
            Self::Memory(store) => Ok(store.append_report(report).await),
            Self::Postgres(store) => store.append_report(report).await,
        }
    }

    /// The report of `experiment_id` for `cycle`, if one was stored.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the read fails.
    pub async fn report_for_cycle(
        &self,
        experiment_id: &str,
        cycle: u64,
    ) -> Result<Option<ConsensusReport>, HiveError> {
        match self {
            Self::Memory(store) => Ok(store.report_for_cycle(experiment_id, cycle).await),
            Self::Postgres(store) => store.report_for_cycle(experiment_id, cycle).await,
        }
    }

    /// Every report of `experiment_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the read fails.
    pub async fn reports(&self, experiment_id: &str) -> Result<Vec<ConsensusReport>, HiveError> {
        match self {
            Self::Memory(store) => Ok(store.reports(experiment_id).await),
            Self::Postgres(store) => store.reports(experiment_id).await,
        }
    }

    /// The newest report of `experiment_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError`] if the read fails.
    pub async fn latest_report(
        &self,
        experiment_id: &str,
    ) -> Result<Option<ConsensusReport>, HiveError> {
        match self {
            Self::Memory(store) => Ok(store.reports(experiment_id).await.pop()),
            Self::Postgres(store) => store.latest_report(experiment_id).await,
        }
    }
}

// ---------------------------------------------------------------------------
// In-process backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Experiment {
    messages: Vec<SharedMessage>,
    private: BTreeMap<String, Vec<Message>>,
    /// Keyed by (cycle, instance).
    snapshots: BTreeMap<(u64, String), InstanceSnapshot>,
    reports: Vec<ConsensusReport>,
}

/// In-process store. Clones share the same data.
///
/// Each write takes the lock once, so writes are serialized.
#[derive(Debug, Clone, Default)]
pub struct MemoryHiveStore {
    inner: Arc<RwLock<BTreeMap<String, Experiment>>>,
}

impl MemoryHiveStore {
    async fn append_message(&self, message: &SharedMessage) {
        let mut guard = self.inner.write().await;
        guard
            .entry(message.experiment_id.clone())
            .or_default()
            .messages
            .push(message.clone());
    }

    async fn shared_history(&self, experiment_id: &str, limit: Option<usize>) -> Vec<SharedMessage> {
        let guard = self.inner.read().await;
        guard
            .get(experiment_id)
            .map(|e| tail(&e.messages, limit))
            .unwrap_or_default()
    }

    async fn append_private(&self, experiment_id: &str, instance_id: &str, message: &Message) {
        let mut guard = self.inner.write().await;
        guard
            .entry(experiment_id.to_owned())
            .or_default()
            .private
            .entry(instance_id.to_owned())
            .or_default()
            .push(message.clone());
    }

    async fn private_buffer(
        &self,
        experiment_id: &str,
        instance_id: &str,
        limit: Option<usize>,
    ) -> Vec<Message> {
        let guard = self.inner.read().await;
        guard
            .get(experiment_id)
            .and_then(|e| e.private.get(instance_id))
            .map(|buffer| tail(buffer, limit))
            .unwrap_or_default()
    }

    async fn upsert_snapshot(&self, snapshot: &InstanceSnapshot) {
        let mut guard = self.inner.write().await;
        guard
            .entry(snapshot.experiment_id.clone())
            .or_default()
            .snapshots
            .insert(
                (snapshot.cycle_number, snapshot.instance_id.clone()),
                snapshot.clone(),
            );
    }

    async fn snapshots_for_cycle(&self, experiment_id: &str, cycle: u64) -> Vec<InstanceSnapshot> {
        let guard = self.inner.read().await;
        guard
            .get(experiment_id)
            .map(|e| {
                e.snapshots
                    .iter()
                    .filter(|((c, _), _)| *c == cycle)
                    .map(|(_, s)| s.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn latest_snapshots(&self, experiment_id: &str) -> Vec<InstanceSnapshot> {
        let guard = self.inner.read().await;
        let mut latest: BTreeMap<&str, &InstanceSnapshot> = BTreeMap::new();
        if let Some(e) = guard.get(experiment_id) {
            // Keys are ordered by cycle, so later inserts are newer.
            for ((_, instance), snapshot) in &e.snapshots {
                latest.insert(instance.as_str(), snapshot);
            }
        }
        latest.into_values().cloned().collect()
    }

    async fn append_report(&self, report: &ConsensusReport) -> bool {
        let mut guard = self.inner.write().await;
        let reports = &mut guard.entry(report.experiment_id.clone()).or_default().reports;
        if reports.iter().any(|r| r.cycle_number == report.cycle_number) {
            return false;
        }
        reports.push(report.clone());
        true
    }

    async fn report_for_cycle(&self, experiment_id: &str, cycle: u64) -> Option<ConsensusReport> {
        let guard = self.inner.read().await;
        guard
            .get(experiment_id)?
            .reports
            .iter()
            .find(|r| r.cycle_number == cycle)
            .cloned()
    }

    async fn reports(&self, experiment_id: &str) -> Vec<ConsensusReport> {
        let guard = self.inner.read().await;
        guard
            .get(experiment_id)
            .map(|e| e.reports.clone())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL backend
// ---------------------------------------------------------------------------

/// `PostgreSQL` store.
///
/// Uses runtime query construction (not compile-time checked) so no live
/// database is needed at build time. Every write runs in its own
/// serializable transaction.
#[derive(Debug, Clone)]
pub struct PostgresHiveStore {
    pool: PgPool,
}

fn is_serialization_failure(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(SERIALIZATION_FAILURE))
}

async fn serializable(pool: &PgPool) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

impl PostgresHiveStore {
    /// Wrap an existing pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using a database URL with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError::Config`] if the URL cannot be parsed and
    /// [`HiveError::Postgres`] if the connection fails.
    pub async fn connect_url(url: &str) -> Result<Self, HiveError> {
        let options: PgConnectOptions = url
            .parse()
            .map_err(|e: sqlx::Error| HiveError::Config(format!("Invalid database URL: {e}")))?;
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .connect_with(options)
            .await?;
        tracing::info!(
            max_connections = DEFAULT_MAX_CONNECTIONS,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Run all pending migrations from the `migrations/` directory.
    ///
    /// # Errors
    ///
    /// Returns [`HiveError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), HiveError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Hive migrations completed");
        Ok(())
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `write` until it commits, retrying serialization failures.
    async fn with_retry<T, F, Fut>(&self, table: &'static str, mut write: F) -> Result<T, HiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match write().await {
                Ok(value) => return Ok(value),
                Err(err) if is_serialization_failure(&err) => {
                    if attempt > MAX_WRITE_RETRIES {
                        return Err(HiveError::Conflict {
                            table,
                            attempts: attempt,
                        });
                    }
                    tracing::warn!(table, attempt, "serialization failure, retrying write");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn append_message(&self, message: &SharedMessage) -> Result<(), HiveError> {
        self.with_retry("hive_messages", move || async move {
            let mut tx = serializable(&self.pool).await?;
            sqlx::query(
                r"INSERT INTO hive_messages (experiment_id, instance_id, role, payload, created_at)
                  VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&message.experiment_id)
            .bind(&message.instance_id)
            .bind(message.role.as_deref())
            .bind(Json(message))
            .bind(message.message.timestamp)
            .execute(&mut *tx)
            .await?;
            tx.commit().await
        })
        .await
    }

    async fn shared_history(
        &self,
        experiment_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SharedMessage>, HiveError> {
        let rows = sqlx::query_scalar::<_, Json<SharedMessage>>(
            r"SELECT payload FROM (
                  SELECT id, payload FROM hive_messages
                  WHERE experiment_id = $1
                  ORDER BY id DESC
                  LIMIT $2
              ) recent
              ORDER BY id ASC",
        )
        .bind(experiment_id)
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(m)| m).collect())
    }

    async fn append_private(
        &self,
        experiment_id: &str,
        instance_id: &str,
        message: &Message,
    ) -> Result<(), HiveError> {
        self.with_retry("hive_private_messages", move || async move {
            let mut tx = serializable(&self.pool).await?;
            sqlx::query(
                r"INSERT INTO hive_private_messages (experiment_id, instance_id, payload, created_at)
                  VALUES ($1, $2, $3, $4)",
            )
            .bind(experiment_id)
            .bind(instance_id)
            .bind(Json(message))
            .bind(message.timestamp)
            .execute(&mut *tx)
            .await?;
            tx.commit().await
        })
        .await
    }

    async fn private_buffer(
        &self,
        experiment_id: &str,
        instance_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, HiveError> {
        let rows = sqlx::query_scalar::<_, Json<Message>>(
            r"SELECT payload FROM (
                  SELECT id, payload FROM hive_private_messages
                  WHERE experiment_id = $1 AND instance_id = $2
                  ORDER BY id DESC
                  LIMIT $3
              ) recent
              ORDER BY id ASC",
        )
        .bind(experiment_id)
        .bind(instance_id)
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(m)| m).collect())
    }

    async fn upsert_snapshot(&self, snapshot: &InstanceSnapshot) -> Result<(), HiveError> {
        self.with_retry("hive_snapshots", move || async move {
            let mut tx = serializable(&self.pool).await?;
            sqlx::query(
                r"INSERT INTO hive_snapshots (experiment_id, instance_id, cycle_number, payload, recorded_at)
                  VALUES ($1, $2, $3, $4, $5)
                  ON CONFLICT (experiment_id, instance_id, cycle_number) DO UPDATE SET
                    payload = EXCLUDED.payload,
                    recorded_at = EXCLUDED.recorded_at",
            )
            .bind(&snapshot.experiment_id)
            .bind(&snapshot.instance_id)
            .bind(to_i64(snapshot.cycle_number))
            .bind(Json(snapshot))
            .bind(snapshot.recorded_at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await
        })
        .await
    }

    async fn snapshots_for_cycle(
        &self,
        experiment_id: &str,
        cycle: u64,
    ) -> Result<Vec<InstanceSnapshot>, HiveError> {
        let rows = sqlx::query_scalar::<_, Json<InstanceSnapshot>>(
            r"SELECT payload FROM hive_snapshots
              WHERE experiment_id = $1 AND cycle_number = $2
              ORDER BY instance_id",
        )
        .bind(experiment_id)
        .bind(to_i64(cycle))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(s)| s).collect())
    }

    async fn latest_snapshots(
        &self,
        experiment_id: &str,
    ) -> Result<Vec<InstanceSnapshot>, HiveError> {
        let rows = sqlx::query_scalar::<_, Json<InstanceSnapshot>>(
            r"SELECT DISTINCT ON (instance_id) payload FROM hive_snapshots
              WHERE experiment_id = $1
              ORDER BY instance_id, cycle_number DESC",
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(s)| s).collect())
    }

    async fn append_report(&self, report: &ConsensusReport) -> Result<bool, HiveError> {
        self.with_retry("hive_reports", move || async move {
            let mut tx = serializable(&self.pool).await?;
            let inserted = sqlx::query(
                r"INSERT INTO hive_reports (experiment_id, cycle_number, payload, created_at)
                  VALUES ($1, $2, $3, $4)
                  ON CONFLICT (experiment_id, cycle_number) DO NOTHING",
            )
            .bind(&report.experiment_id)
            .bind(to_i64(report.cycle_number))
            .bind(Json(report))
            .bind(report.created_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            tx.commit().await?;
            Ok::<_, sqlx::Error>(inserted > 0)
        })
        .await
    }

    async fn report_for_cycle(
        &self,
        experiment_id: &str,
        cycle: u64,
    ) -> Result<Option<ConsensusReport>, HiveError> {
        let row = sqlx::query_scalar::<_, Json<ConsensusReport>>(
            r"SELECT payload FROM hive_reports WHERE experiment_id = $1 AND cycle_number = $2",
        )
        .bind(experiment_id)
        .bind(to_i64(cycle))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(r)| r))
    }

    async fn reports(&self, experiment_id: &str) -> Result<Vec<ConsensusReport>, HiveError> {
        let rows = sqlx::query_scalar::<_, Json<ConsensusReport>>(
            r"SELECT payload FROM hive_reports WHERE experiment_id = $1 ORDER BY id ASC",
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(r)| r).collect())
    }

    async fn latest_report(&self, experiment_id: &str) -> Result<Option<ConsensusReport>, HiveError> {
        let row = sqlx::query_scalar::<_, Json<ConsensusReport>>(
            r"SELECT payload FROM hive_reports WHERE experiment_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(experiment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(r)| r))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use revenant_types::Message;

    use super::*;

    fn shared(instance: &str, text: &str) -> SharedMessage {
        SharedMessage::new("exp", instance, None, Message::assistant(text))
    }

    #[tokio::test]
    async fn shared_history_keeps_order_and_limit() {
        let store = HiveStore::memory();
        for n in 0..5 {
            store
                .append_message(&shared("a", &format!("m{n}")))
                .await
                .unwrap();
        }
        let all = store.shared_history("exp", None).await.unwrap();
        assert_eq!(all.len(), 5);
        let last = store.shared_history("exp", Some(2)).await.unwrap();
        let texts: Vec<&str> = last.iter().map(|s| s.message.content.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);
        assert!(store.shared_history("other", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_one_store() {
        let store = HiveStore::memory();
        let twin = store.clone();
        store.append_message(&shared("a", "hello")).await.unwrap();
        assert_eq!(twin.shared_history("exp", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn private_buffers_are_per_instance() {
        let store = HiveStore::memory();
        store
            .append_private("exp", "a", &Message::assistant("mine"))
            .await
            .unwrap();
        assert_eq!(store.private_buffer("exp", "a", None).await.unwrap().len(), 1);
        assert!(store.private_buffer("exp", "b", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_upsert_replaces_same_cycle() {
        let store = HiveStore::memory();
        let mut snap = InstanceSnapshot {
            experiment_id: "exp".into(),
            instance_id: "a".into(),
            role: None,
            cycle_number: 2,
            crash_count: 1,
            beliefs: BTreeMap::new(),
            recorded_at: chrono::Utc::now(),
        };
        store.upsert_snapshot(&snap).await.unwrap();
        snap.crash_count = 2;
        store.upsert_snapshot(&snap).await.unwrap();
        let found = store.snapshots_for_cycle("exp", 2).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.first().map(|s| s.crash_count), Some(2));
        assert!(store.snapshots_for_cycle("exp", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_snapshot_per_instance() {
        let store = HiveStore::memory();
        let snap = |instance: &str, cycle: u64, crashes: u64| InstanceSnapshot {
            experiment_id: "exp".into(),
            instance_id: instance.into(),
            role: None,
            cycle_number: cycle,
            crash_count: crashes,
            beliefs: BTreeMap::new(),
            recorded_at: chrono::Utc::now(),
        };
        store.upsert_snapshot(&snap("b", 4, 4)).await.unwrap();
        store.upsert_snapshot(&snap("a", 1, 1)).await.unwrap();
        store.upsert_snapshot(&snap("b", 2, 2)).await.unwrap();
        store.upsert_snapshot(&snap("a", 3, 3)).await.unwrap();

        let latest = store.latest_snapshots("exp").await.unwrap();
        let seen: Vec<(&str, u64)> = latest
            .iter()
            .map(|s| (s.instance_id.as_str(), s.cycle_number))
            .collect();
        assert_eq!(seen, vec![("a", 3), ("b", 4)]);
    }

    #[tokio::test]
    async fn one_report_per_cycle() {
        let store = HiveStore::memory();
        let report = |cycle: u64, strength: f64| ConsensusReport {
            experiment_id: "exp".into(),
            cycle_number: cycle,
            participants: vec!["a".into()],
            aggregated_beliefs: BTreeMap::new(),
            consensus_strength: strength,
            divergence: BTreeMap::new(),
            emergent_narratives: Vec::new(),
            created_at: chrono::Utc::now(),
        };
        assert!(store.append_report(&report(3, 0.9)).await.unwrap());
        assert!(!store.append_report(&report(3, 0.1)).await.unwrap());
        assert!(store.append_report(&report(6, 0.5)).await.unwrap());

        assert_eq!(store.reports("exp").await.unwrap().len(), 2);
        let stored = store.report_for_cycle("exp", 3).await.unwrap().unwrap();
        assert!((stored.consensus_strength - 0.9).abs() < f64::EPSILON);
        assert!(store.report_for_cycle("exp", 4).await.unwrap().is_none());
    }
}
