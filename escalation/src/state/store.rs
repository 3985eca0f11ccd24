//! Persistence collaborator contract and local adapters.
//!
//! The engine never talks to a database. It reads and writes task records
//! through [`TaskStore`], which is the durability boundary: a mutation is
//! only committed in memory after `save` returns `Ok`.
//!
//! Adapters:
//! - [`MemoryTaskStore`]: process-local map, for tests and demos
//! - [`JsonFileTaskStore`]: single JSON file, atomic write-then-rename
//! - [`super::http_store::HttpTaskStore`]: remote data API

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use super::types::{TaskId, TaskSnapshot};
use crate::policy::{validate_multiplier, Priority};

/// Error type for persistence collaborator operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Data API rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable backing store for task snapshots.
///
/// `save` must be idempotent for the same snapshot state: the tracker retries
/// a failed flush with an identical record.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All non-terminal task records.
    async fn load_active_tasks(&self) -> StoreResult<Vec<TaskSnapshot>>;

    /// Insert or replace the record for `snapshot.id`.
    async fn save(&self, snapshot: &TaskSnapshot) -> StoreResult<()>;
}

/// Decode raw records, dropping (and logging) the ones that cannot be
/// tracked. An unknown priority is a configuration bug and is rejected here,
/// at load time, so it never reaches a tick.
pub fn decode_records(records: Vec<Value>) -> Vec<TaskSnapshot> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("<missing id>")
                .to_string();

            if let Some(raw) = record.get("priority").and_then(Value::as_str) {
                if let Err(e) = raw.parse::<Priority>() {
                    error!(task_id = %id, error = %e, "Rejecting task record");
                    return None;
                }
            }

            let snapshot: TaskSnapshot = match serde_json::from_value(record) {
                Ok(s) => s,
                Err(e) => {
                    error!(task_id = %id, error = %e, "Rejecting malformed task record");
                    return None;
                }
            };

            if let Err(e) = validate_multiplier(snapshot.escalation_speed_multiplier) {
                error!(task_id = %id, error = %e, "Rejecting task record");
                return None;
            }

            Some(snapshot)
        })
        .collect()
}

// =============================================================================
// In-memory adapter
// =============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<HashMap<TaskId, TaskSnapshot>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing records (e.g. to simulate a restart).
    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskSnapshot>) -> Self {
        let records = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self {
            records: Mutex::new(records),
        }
    }

    /// Stored record for `id`, terminal or not.
    pub fn get(&self, id: &str) -> Option<TaskSnapshot> {
        self.records.lock().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn load_active_tasks(&self) -> StoreResult<Vec<TaskSnapshot>> {
        let records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect())
    }

    async fn save(&self, snapshot: &TaskSnapshot) -> StoreResult<()> {
        let mut records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        records.insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }
}

// =============================================================================
// JSON file adapter
// =============================================================================

/// Stores every record as one pretty-printed JSON array.
///
/// Records are kept as raw JSON so that rows this engine cannot decode are
/// preserved on rewrite rather than silently dropped.
pub struct JsonFileTaskStore {
    path: PathBuf,
    records: tokio::sync::Mutex<BTreeMap<TaskId, Value>>,
}

impl JsonFileTaskStore {
    /// Open (or lazily create) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let records = read_records(&path).await?;
        debug!(path = %path.display(), records = records.len(), "Opened task file");
        Ok(Self {
            path,
            records: tokio::sync::Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_all(&self, records: &BTreeMap<TaskId, Value>) -> StoreResult<()> {
        let rows: Vec<&Value> = records.values().collect();
        let json = serde_json::to_vec_pretty(&rows)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

async fn read_records(path: &Path) -> StoreResult<BTreeMap<TaskId, Value>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }

    let rows: Vec<Value> =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.get("id")?.as_str()?.to_string();
            Some((id, row))
        })
        .collect())
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn load_active_tasks(&self) -> StoreResult<Vec<TaskSnapshot>> {
        let records = self.records.lock().await;
        let decoded = decode_records(records.values().cloned().collect());
        Ok(decoded.into_iter().filter(|t| !t.is_terminal()).collect())
    }

    async fn save(&self, snapshot: &TaskSnapshot) -> StoreResult<()> {
        let value =
            serde_json::to_value(snapshot).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut records = self.records.lock().await;
        let previous = records.insert(snapshot.id.clone(), value);
        if let Err(e) = self.write_all(&records).await {
            match previous {
                Some(old) => records.insert(snapshot.id.clone(), old),
                None => records.remove(&snapshot.id),
            };
            return Err(e);
        }
        Ok(())
    }
}
