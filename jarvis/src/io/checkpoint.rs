//! Single-slot checkpoint for resuming the control loop (`.jarvis/checkpoint.db`).
//!
//! The table holds at most one row (`id = 1`); every save overwrites it.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument};

use crate::error::JarvisError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoint (
    id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
    goal TEXT NOT NULL,
    hint_state TEXT NOT NULL,
    raw_response TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
"#;

/// State of the last completed iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub goal: String,
    pub hint_state: String,
    pub raw_response: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

pub struct CheckpointStore {
    conn: Connection,
}

fn store_err(action: &str, err: rusqlite::Error) -> JarvisError {
    JarvisError::Checkpoint(format!("{action}: {err}"))
}

impl CheckpointStore {
    /// Open (creating if needed) the database at `path` and ensure the table exists.
    pub fn open(path: &Path) -> Result<Self, JarvisError> {
        let conn = Connection::open(path)
            .map_err(|e| store_err(&format!("open {}", path.display()), e))?;
        let store = Self { conn };
        store.create_table()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, JarvisError> {
        let conn = Connection::open_in_memory().map_err(|e| store_err("open in-memory", e))?;
        let store = Self { conn };
        store.create_table()?;
        Ok(store)
    }

    /// Idempotent.
    pub fn create_table(&self) -> Result<(), JarvisError> {
        self.conn
            .execute_batch(SCHEMA)
            .map_err(|e| store_err("create checkpoint table", e))
    }

    /// Durably replace the single row.
    #[instrument(skip_all, fields(goal_bytes = goal.len(), hint_bytes = hint_state.len()))]
    pub fn save(&self, hint_state: &str, goal: &str, raw_response: &str) -> Result<(), JarvisError> {
        let timestamp = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO checkpoint (id, goal, hint_state, raw_response, timestamp)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    goal = excluded.goal,
                    hint_state = excluded.hint_state,
                    raw_response = excluded.raw_response,
                    timestamp = excluded.timestamp",
                params![goal, hint_state, raw_response, timestamp],
            )
            .map_err(|e| store_err("save checkpoint", e))?;
        debug!(%timestamp, "checkpoint saved");
        Ok(())
    }

    /// The last saved row, or `None` on a fresh store.
    pub fn load(&self) -> Result<Option<Checkpoint>, JarvisError> {
        self.conn
            .query_row(
                "SELECT goal, hint_state, raw_response, timestamp FROM checkpoint WHERE id = 1",
                [],
                |row| {
                    Ok(Checkpoint {
                        goal: row.get(0)?,
                        hint_state: row.get(1)?,
                        raw_response: row.get(2)?,
                        timestamp: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| store_err("load checkpoint", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_loads_none() {
        let store = CheckpointStore::open_in_memory().expect("open");
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn save_overwrites_single_row() {
        let store = CheckpointStore::open_in_memory().expect("open");
        store.save("hints one", "goal one", "raw one").expect("save");
        store.save("hints two", "goal two", "raw two").expect("save");

        let cp = store.load().expect("load").expect("row");
        assert_eq!(cp.goal, "goal two");
        assert_eq!(cp.hint_state, "hints two");
        assert_eq!(cp.raw_response, "raw two");
        assert!(chrono::DateTime::parse_from_rfc3339(&cp.timestamp).is_ok());

        let rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM checkpoint", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 1);
    }

    #[test]
    fn survives_reopen_from_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("checkpoint.db");
        {
            let store = CheckpointStore::open(&path).expect("open");
            store.save("h", "g", "r").expect("save");
        }
        let reopened = CheckpointStore::open(&path).expect("reopen");
        let cp = reopened.load().expect("load").expect("row");
        assert_eq!((cp.goal.as_str(), cp.hint_state.as_str()), ("g", "h"));
    }

    #[test]
    fn unopenable_path_is_checkpoint_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = match CheckpointStore::open(&temp.path().join("missing/dir/checkpoint.db")) {
            Ok(_) => panic!("expected open failure"),
            Err(err) => err,
        };
        assert!(matches!(err, JarvisError::Checkpoint(_)));
    }
}
