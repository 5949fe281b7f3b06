use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use plangraph_core::error::{PlanGraphError, Result};
use plangraph_core::types::RunId;

use crate::graph::RunState;

/// Everything needed to resume a run: which nodes finished and the state
/// they produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    /// Name of the most recently merged node.
    pub last_node: String,
    /// All completed node names, in merge order.
    pub completed: Vec<String>,
    pub state: RunState,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run_id: RunId, last_node: impl Into<String>, completed: Vec<String>, state: RunState) -> Self {
        Self {
            run_id,
            last_node: last_node.into(),
            completed,
            state,
            updated_at: Utc::now(),
        }
    }
}

/// Durable map from run id to its latest checkpoint.
///
/// `save` replaces the previous checkpoint for the run atomically: readers
/// observe either the old or the new one.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// `Ok(None)` when the run has no checkpoint.
    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>>;

    /// Returns whether a checkpoint existed.
    fn delete(&self, run_id: &RunId) -> Result<bool>;

    /// All checkpoints, most recently updated first.
    fn list(&self) -> Result<Vec<Checkpoint>>;
}

fn storage_err(context: &str, e: impl std::fmt::Display) -> PlanGraphError {
    PlanGraphError::Checkpoint(format!("{}: {}", context, e))
}

/// Checkpoint store backed by SQLite.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| storage_err("Failed to create checkpoint directory", e))?;
            }
        }

        let conn = Connection::open(path).map_err(|e| storage_err("Failed to open checkpoint store", e))?;
        Self::init(conn)
    }

    /// A private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage_err("Failed to open checkpoint store", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS checkpoints (
                 run_id TEXT PRIMARY KEY,
                 last_node TEXT NOT NULL,
                 completed_json TEXT NOT NULL,
                 state_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )
        .map_err(|e| storage_err("Failed to initialize checkpoint schema", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

type Row = (String, String, String, String, String);

fn from_row((run_id, last_node, completed_json, state_json, updated_at): Row) -> Result<Checkpoint> {
    Ok(Checkpoint {
        run_id: RunId(run_id),
        last_node,
        completed: serde_json::from_str(&completed_json)?,
        state: serde_json::from_str(&state_json)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, cp: &Checkpoint) -> Result<()> {
        let completed_json = serde_json::to_string(&cp.completed)?;
        let state_json = serde_json::to_string(&cp.state)?;

        let mut conn = self.conn.lock().map_err(|e| storage_err("Lock poisoned", e))?;
        let tx = conn
            .transaction()
            .map_err(|e| storage_err("Failed to begin transaction", e))?;
        tx.execute(
            "INSERT INTO checkpoints (run_id, last_node, completed_json, state_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id) DO UPDATE SET
                 last_node = excluded.last_node,
                 completed_json = excluded.completed_json,
                 state_json = excluded.state_json,
                 updated_at = excluded.updated_at",
            params![
                cp.run_id.as_str(),
                cp.last_node,
                completed_json,
                state_json,
                cp.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| storage_err("Failed to save checkpoint", e))?;
        tx.commit().map_err(|e| storage_err("Failed to commit checkpoint", e))?;
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock().map_err(|e| storage_err("Lock poisoned", e))?;
        let row: Option<Row> = conn
            .query_row(
                "SELECT run_id, last_node, completed_json, state_json, updated_at
                 FROM checkpoints WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(|e| storage_err("Failed to load checkpoint", e))?;

        row.map(from_row).transpose()
    }

    fn delete(&self, run_id: &RunId) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| storage_err("Lock poisoned", e))?;
        let deleted = conn
            .execute("DELETE FROM checkpoints WHERE run_id = ?1", params![run_id.as_str()])
            .map_err(|e| storage_err("Failed to delete checkpoint", e))?;
        Ok(deleted > 0)
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let conn = self.conn.lock().map_err(|e| storage_err("Lock poisoned", e))?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, last_node, completed_json, state_json, updated_at
                 FROM checkpoints ORDER BY updated_at DESC",
            )
            .map_err(|e| storage_err("Failed to prepare query", e))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)))
            .map_err(|e| storage_err("Failed to list checkpoints", e))?;

        let mut out = Vec::new();
        for row in rows {
            let row: Row = row.map_err(|e| storage_err("Failed to read checkpoint row", e))?;
            out.push(from_row(row)?);
        }
        Ok(out)
    }
}

/// Process-local checkpoint store. Used when on-disk checkpointing is disabled.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, cp: &Checkpoint) -> Result<()> {
        let mut map = self.checkpoints.write().map_err(|e| storage_err("Lock poisoned", e))?;
        map.insert(cp.run_id.as_str().to_string(), cp.clone());
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        let map = self.checkpoints.read().map_err(|e| storage_err("Lock poisoned", e))?;
        Ok(map.get(run_id.as_str()).cloned())
    }

    fn delete(&self, run_id: &RunId) -> Result<bool> {
        let mut map = self.checkpoints.write().map_err(|e| storage_err("Lock poisoned", e))?;
        Ok(map.remove(run_id.as_str()).is_some())
    }

    fn list(&self) -> Result<Vec<Checkpoint>> {
        let map = self.checkpoints.read().map_err(|e| storage_err("Lock poisoned", e))?;
        let mut out: Vec<Checkpoint> = map.values().cloned().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}
