//! Event and cluster storage, plus the run's persistence gateway.
//!
//! The summarization pipeline only reads events and appends clusters; rows are
//! never updated. [`SqliteStore`] backs both traits with one SQLite database.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::types::{
    ClusterId, ClusterSummary, EventId, EventRecord, LogEntry, NewClusterSummary, Severity,
};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("task join error: {0}")]
    Join(String),
    #[error("store closed")]
    Closed,
}

/// The bulk insert of a run's clusters failed. Nothing from the run was written.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist {attempted} clusters: {source}")]
pub struct PersistenceError {
    pub attempted: usize,
    #[source]
    pub source: StoreError,
}

// =============================================================================
// Traits
// =============================================================================

/// Listing row for stored events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: EventId,
    pub created_at: i64,
    pub owner_id: String,
    pub entry_count: usize,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError>;
    async fn insert_event(
        &self,
        events: Vec<LogEntry>,
        owner_id: &str,
    ) -> Result<EventId, StoreError>;
    /// Most recent first.
    async fn list_events(&self, limit: usize) -> Result<Vec<EventSummary>, StoreError>;
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Insert all records atomically, returning their new ids in input order.
    async fn insert_clusters(
        &self,
        records: Vec<NewClusterSummary>,
    ) -> Result<Vec<ClusterId>, StoreError>;
    /// Clusters of one event in insertion order.
    async fn list_clusters(&self, event_id: EventId) -> Result<Vec<ClusterSummary>, StoreError>;
    async fn get_cluster(&self, id: ClusterId) -> Result<Option<ClusterSummary>, StoreError>;
}

/// Write a run's clusters in one bulk insert. Empty input performs no write.
pub async fn persist_clusters(
    store: &dyn ClusterStore,
    records: Vec<NewClusterSummary>,
) -> Result<usize, PersistenceError> {
    if records.is_empty() {
        return Ok(0);
    }
    let attempted = records.len();
    store
        .insert_clusters(records)
        .await
        .map(|ids| ids.len())
        .map_err(|source| PersistenceError { attempted, source })
}

// =============================================================================
// SQLite
// =============================================================================

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    /// Gate concurrent spawn_blocking calls so only one blocking thread waits
    /// on the connection mutex at a time.
    sem: Arc<Semaphore>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA busy_timeout=5000;",
        )?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            sem: Arc::new(Semaphore::new(1)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("WATCHDOG_DB") {
            return PathBuf::from(path);
        }
        PathBuf::from(".watchdog.sqlite")
    }

    /// Lock the connection. A poisoned mutex is recovered: the connection
    /// itself is still usable.
    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    /// Run `f` on the blocking pool behind the semaphore.
    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let _permit = self.sem.acquire().await.map_err(|_| StoreError::Closed)?;
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    fn create_tables(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events_raw (\
               id TEXT PRIMARY KEY,\
               owner_id TEXT NOT NULL,\
               events TEXT NOT NULL,\
               entry_count INTEGER NOT NULL,\
               created_at INTEGER NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS summaries (\
               id TEXT PRIMARY KEY,\
               event_id TEXT NOT NULL REFERENCES events_raw(id) ON DELETE CASCADE,\
               owner_id TEXT NOT NULL,\
               cluster_label TEXT NOT NULL CHECK (length(cluster_label) > 0),\
               root_cause TEXT NOT NULL CHECK (length(root_cause) > 0),\
               sample TEXT NOT NULL DEFAULT '[]',\
               severity TEXT NOT NULL CHECK (severity IN ('critical', 'warning', 'info')),\
               count INTEGER NOT NULL CHECK (count >= 0),\
               created_at INTEGER NOT NULL\
             );\
             CREATE INDEX IF NOT EXISTS idx_summaries_event ON summaries(event_id);",
        )?;
        Ok(())
    }
}

const CLUSTER_COLUMNS: &str = "id, event_id, owner_id, created_at, cluster_label, root_cause, \
                               sample, severity, count";

fn row_to_cluster(row: &rusqlite::Row<'_>) -> Result<ClusterSummary, StoreError> {
    let id: String = row.get(0)?;
    let event_id: String = row.get(1)?;
    let sample: String = row.get(6)?;
    let severity: String = row.get(7)?;
    let count: i64 = row.get(8)?;
    Ok(ClusterSummary {
        id: id
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("cluster id {id}")))?,
        event_id: event_id
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("event id {event_id}")))?,
        owner_id: row.get(2)?,
        created_at: row.get(3)?,
        cluster_label: row.get(4)?,
        root_cause: row.get(5)?,
        sample: serde_json::from_str(&sample)?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| StoreError::Corrupt(format!("severity {severity}")))?,
        count: u64::try_from(count)
            .map_err(|_| StoreError::Corrupt(format!("count {count}")))?,
    })
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn get_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT owner_id, events, created_at FROM events_raw WHERE id = ?1",
                    params![id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                Some((owner_id, events, created_at)) => Ok(Some(EventRecord {
                    id,
                    created_at,
                    owner_id,
                    events: serde_json::from_str(&events)?,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    async fn insert_event(
        &self,
        events: Vec<LogEntry>,
        owner_id: &str,
    ) -> Result<EventId, StoreError> {
        let owner_id = owner_id.to_string();
        self.blocking(move |conn| {
            let id = EventId::new();
            let json = serde_json::to_string(&events)?;
            conn.execute(
                "INSERT INTO events_raw (id, owner_id, events, entry_count, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    owner_id,
                    json,
                    events.len() as i64,
                    now_epoch()
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<EventSummary>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, created_at, owner_id, entry_count FROM events_raw \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                out.push(EventSummary {
                    id: id
                        .parse()
                        .map_err(|_| StoreError::Corrupt(format!("event id {id}")))?,
                    created_at: row.get(1)?,
                    owner_id: row.get(2)?,
                    entry_count: row.get::<_, i64>(3)?.max(0) as usize,
                });
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl ClusterStore for SqliteStore {
    async fn insert_clusters(
        &self,
        records: Vec<NewClusterSummary>,
    ) -> Result<Vec<ClusterId>, StoreError> {
        self.blocking(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let now = now_epoch();
            let mut ids = Vec::with_capacity(records.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO summaries (id, event_id, owner_id, cluster_label, root_cause, \
                     sample, severity, count, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for record in &records {
                    let id = ClusterId::new();
                    let c = &record.cluster;
                    let count = i64::try_from(c.count).map_err(|_| {
                        StoreError::Corrupt(format!("count {} does not fit in i64", c.count))
                    })?;
                    stmt.execute(params![
                        id.to_string(),
                        record.event_id.to_string(),
                        record.owner_id,
                        c.cluster_label,
                        c.root_cause,
                        serde_json::to_string(&c.sample)?,
                        c.severity.as_str(),
                        count,
                        now,
                    ])?;
                    ids.push(id);
                }
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn list_clusters(&self, event_id: EventId) -> Result<Vec<ClusterSummary>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CLUSTER_COLUMNS} FROM summaries WHERE event_id = ?1 ORDER BY rowid"
            ))?;
            let mut rows = stmt.query(params![event_id.to_string()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_cluster(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_cluster(&self, id: ClusterId) -> Result<Option<ClusterSummary>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CLUSTER_COLUMNS} FROM summaries WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_cluster(row)?)),
                None => Ok(None),
            }
        })
        .await
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
