use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::model::state::SymbolState;

/// Durable per-symbol state. Reads must never observe a half-written record.
///
/// A write only lands if `state.version` is above the stored version.
/// Re-sending the record already stored succeeds; any other write that does
/// not advance the version fails with `StoreError::Conflict`.
pub trait StateStore: Send + Sync {
    fn read(&self, symbol: &str) -> Result<Option<SymbolState>, StoreError>;
    fn write(&self, symbol: &str, state: &SymbolState) -> Result<(), StoreError>;
}

/// Keeps state in process memory. Failures can be switched on to exercise
/// the recovery paths.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<String, SymbolState>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self, symbol: &str) -> Option<SymbolState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(symbol).cloned())
    }
}

impl StateStore for InMemoryStateStore {
    fn read(&self, symbol: &str) -> Result<Option<SymbolState>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read refused".to_string()));
        }
        let states = self
            .states
            .lock()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".to_string()))?;
        Ok(states.get(symbol).cloned())
    }

    fn write(&self, symbol: &str, state: &SymbolState) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write refused".to_string()));
        }
        let mut states = self
            .states
            .lock()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".to_string()))?;
        if let Some(stored) = states.get(symbol) {
            if stored.version >= state.version {
                if stored == state {
                    return Ok(());
                }
                return Err(StoreError::Conflict {
                    symbol: symbol.to_string(),
                    attempted: state.version,
                    stored: stored.version,
                });
            }
        }
        states.insert(symbol.to_string(), state.clone());
        Ok(())
    }
}

/// One row per symbol holding the whole state as JSON.
pub struct SqliteStateStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS symbol_state (
                symbol TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                state_json TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

impl StateStore for SqliteStateStore {
    fn read(&self, symbol: &str) -> Result<Option<SymbolState>, StoreError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM symbol_state WHERE symbol = ?1",
                [symbol],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn write(&self, symbol: &str, state: &SymbolState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            r#"
            INSERT INTO symbol_state (symbol, version, state_json, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(symbol) DO UPDATE SET
                version = excluded.version,
                state_json = excluded.state_json,
                updated_at_ms = excluded.updated_at_ms
            WHERE excluded.version > symbol_state.version
            "#,
            params![symbol, state.version as i64, json, now_ms],
        )?;
        if changed == 0 {
            let (stored, stored_json): (i64, String) = tx.query_row(
                "SELECT version, state_json FROM symbol_state WHERE symbol = ?1",
                [symbol],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if stored_json != json {
                return Err(StoreError::Conflict {
                    symbol: symbol.to_string(),
                    attempted: state.version,
                    stored: stored as u64,
                });
            }
        }
        tx.commit()?;
        Ok(())
    }
}
