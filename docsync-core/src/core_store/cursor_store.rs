/*
    cursor_store.rs - Durable, monotonic sync cursors

    A cursor records how far delivery to (outbound) or application from
    (inbound) a remote has progressed, as a store ordinal. Cursors only
    move forward: an upsert with a lower ordinal is ignored.
*/

use super::commit_log::CommitLog;
use super::errors::{handle_poison, StoreError, StoreResult};
use crate::core_oplog::now_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

/// Direction a cursor tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorType {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub remote_name: String,
    pub cursor_type: CursorType,
    pub ordinal: u64,
    pub updated_at_utc_ms: u64,
}

/// Cursor persistence
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Current ordinal, 0 when the cursor was never written
    async fn get(&self, remote_name: &str, cursor_type: CursorType) -> StoreResult<u64>;

    /// Move the cursor forward and return the effective ordinal
    async fn upsert(&self, remote_name: &str, cursor_type: CursorType, ordinal: u64)
        -> StoreResult<u64>;

    /// Forget both cursors of a remote
    async fn remove(&self, remote_name: &str) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<SyncCursor>>;
}

type CursorKey = (String, CursorType);

fn advance(cursors: &mut HashMap<CursorKey, SyncCursor>, remote_name: &str, cursor_type: CursorType, ordinal: u64) -> Option<SyncCursor> {
    let key = (remote_name.to_string(), cursor_type);
    match cursors.get(&key) {
        Some(existing) if existing.ordinal >= ordinal => None,
        _ => {
            let cursor = SyncCursor {
                remote_name: remote_name.to_string(),
                cursor_type,
                ordinal,
                updated_at_utc_ms: now_millis(),
            };
            cursors.insert(key, cursor.clone());
            Some(cursor)
        }
    }
}

fn sorted(cursors: &HashMap<CursorKey, SyncCursor>) -> Vec<SyncCursor> {
    let mut list: Vec<SyncCursor> = cursors.values().cloned().collect();
    list.sort_by(|a, b| {
        a.remote_name.cmp(&b.remote_name).then((a.cursor_type as u8).cmp(&(b.cursor_type as u8)))
    });
    list
}

/// Volatile cursor store
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<CursorKey, SyncCursor>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, remote_name: &str, cursor_type: CursorType) -> StoreResult<u64> {
        let cursors = self.cursors.read().map_err(handle_poison)?;
        Ok(cursors
            .get(&(remote_name.to_string(), cursor_type))
            .map(|cursor| cursor.ordinal)
            .unwrap_or(0))
    }

    async fn upsert(&self, remote_name: &str, cursor_type: CursorType, ordinal: u64) -> StoreResult<u64> {
        let mut cursors = self.cursors.write().map_err(handle_poison)?;
        advance(&mut cursors, remote_name, cursor_type, ordinal);
        Ok(cursors.get(&(remote_name.to_string(), cursor_type)).map(|c| c.ordinal).unwrap_or(0))
    }

    async fn remove(&self, remote_name: &str) -> StoreResult<()> {
        let mut cursors = self.cursors.write().map_err(handle_poison)?;
        cursors.retain(|(remote, _), _| remote != remote_name);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<SyncCursor>> {
        Ok(sorted(&*self.cursors.read().map_err(handle_poison)?))
    }
}

/// Records appended to the cursor log
#[derive(Debug, Clone, Serialize, Deserialize)]
enum CursorRecord {
    Upsert(SyncCursor),
    Remove { remote_name: String },
}

struct FileCursorState {
    log: CommitLog,
    cursors: HashMap<CursorKey, SyncCursor>,
}

/// Cursor store backed by a checksummed append-only log
pub struct FileCursorStore {
    state: Mutex<FileCursorState>,
}

impl FileCursorStore {
    /// Open (or create) the log at `path` and replay it
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut log = CommitLog::open(path)?;
        let mut cursors = HashMap::new();

        for entry in log.read_all()? {
            match bincode::deserialize::<CursorRecord>(&entry.data)? {
                CursorRecord::Upsert(cursor) => {
                    cursors.insert((cursor.remote_name.clone(), cursor.cursor_type), cursor);
                }
                CursorRecord::Remove { remote_name } => {
                    cursors.retain(|(remote, _), _| *remote != remote_name);
                }
            }
        }

        tracing::debug!(path = %log.path().display(), cursors = cursors.len(), "Cursor log replayed");

        Ok(FileCursorStore { state: Mutex::new(FileCursorState { log, cursors }) })
    }

    /// Rewrite the log so it holds one record per live cursor
    pub fn compact(&self) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(handle_poison)?;
        let live = sorted(&state.cursors);

        state.log.truncate()?;
        for cursor in live {
            let bytes = bincode::serialize(&CursorRecord::Upsert(cursor))?;
            state.log.append(&bytes)?;
        }
        Ok(())
    }

    pub fn log_size(&self) -> StoreResult<usize> {
        Ok(self.state.lock().map_err(handle_poison)?.log.size())
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn get(&self, remote_name: &str, cursor_type: CursorType) -> StoreResult<u64> {
        let state = self.state.lock().map_err(handle_poison)?;
        Ok(state
            .cursors
            .get(&(remote_name.to_string(), cursor_type))
            .map(|cursor| cursor.ordinal)
            .unwrap_or(0))
    }

    async fn upsert(&self, remote_name: &str, cursor_type: CursorType, ordinal: u64) -> StoreResult<u64> {
        let mut state = self.state.lock().map_err(handle_poison)?;

        if let Some(cursor) = advance(&mut state.cursors, remote_name, cursor_type, ordinal) {
            let bytes = bincode::serialize(&CursorRecord::Upsert(cursor))?;
            state.log.append(&bytes)?;
        }

        state
            .cursors
            .get(&(remote_name.to_string(), cursor_type))
            .map(|cursor| cursor.ordinal)
            .ok_or_else(|| StoreError::NotFound(format!("cursor {}", remote_name)))
    }

    async fn remove(&self, remote_name: &str) -> StoreResult<()> {
        let mut state = self.state.lock().map_err(handle_poison)?;
        state.cursors.retain(|(remote, _), _| remote != remote_name);
        let bytes = bincode::serialize(&CursorRecord::Remove { remote_name: remote_name.to_string() })?;
        state.log.append(&bytes)?;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<SyncCursor>> {
        Ok(sorted(&self.state.lock().map_err(handle_poison)?.cursors))
    }
}
