//! Crash-safe transfer journal (component C9, spec §4.10). Shares its
//! connection and write mutex with [`crate::index::LiveIndex`] when both
//! are opened against the same database file (spec §5).

use crate::error::StoreError;
use crate::index::now_millis;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Active,
    Failed,
    Complete,
}

impl TransferState {
    fn as_str(self) -> &'static str {
        match self {
            TransferState::Active => "active",
            TransferState::Failed => "failed",
            TransferState::Complete => "complete",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "failed" => TransferState::Failed,
            "complete" => TransferState::Complete,
            _ => TransferState::Active,
        }
    }
}

/// `{size, mtime}` pair, compared to second precision (spec §3.8, GLOSSARY
/// "Etag").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Etag {
    pub size: Option<u64>,
    pub mtime: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: String,
    pub device_id: String,
    pub direction: DirectionRecord,
    pub name: String,
    pub size: Option<u64>,
    pub supports_partial: bool,
    pub temp_url: String,
    pub final_url: Option<String>,
    pub source_url: Option<String>,
    pub state: TransferStateRecord,
    pub committed_bytes: u64,
    pub etag: Etag,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

// Re-exported under friendlier names at the crate root; kept as type
// aliases here so `TransferRecord`'s field types read naturally above.
pub type DirectionRecord = Direction;
pub type TransferStateRecord = TransferState;

/// Shared handle into the journal's SQLite connection (spec §4.10).
#[derive(Clone)]
pub struct TransferJournal {
    conn: Arc<Mutex<Connection>>,
}

impl TransferJournal {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// A transfer id is derived deterministically from
    /// `(direction, device_id, handle-or-parent)` so a repeated
    /// `begin_read`/`begin_write` for the same logical object resumes the
    /// same row instead of creating a duplicate, which is what keeps spec
    /// Invariant 4 ("at most one in-flight record per (device, handle,
    /// direction)") trivially true: the primary key IS the uniqueness
    /// constraint.
    pub fn transfer_id(direction: Direction, device_id: &str, key: u32) -> String {
        format!("{}:{device_id}:{key:#010x}", direction.as_str())
    }

    #[allow(clippy::too_many_arguments)]
    async fn begin(
        &self,
        direction: Direction,
        device_id: &str,
        handle: Option<u32>,
        parent: Option<u32>,
        name: &str,
        size: Option<u64>,
        supports_partial: bool,
        temp_url: &str,
        source_url: Option<&str>,
    ) -> Result<String, StoreError> {
        let key = handle.or(parent).unwrap_or(0);
        let id = Self::transfer_id(direction, device_id, key);
        let now = now_millis();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO transfers(id, device_id, direction, handle, parent, name, size, supports_partial,
                temp_url, final_url, source_url, state, committed_bytes, etag_size, etag_mtime, last_error, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,NULL,?10,?11,0,NULL,NULL,NULL,?12)
             ON CONFLICT(id) DO UPDATE SET
                name=excluded.name, size=excluded.size, supports_partial=excluded.supports_partial,
                temp_url=excluded.temp_url, source_url=excluded.source_url, state=excluded.state, updated_at=excluded.updated_at",
            params![
                id,
                device_id,
                direction.as_str(),
                handle,
                parent,
                name,
                size.map(|v| v as i64),
                supports_partial,
                temp_url,
                source_url,
                TransferState::Active.as_str(),
                now,
            ],
        )?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn begin_read(
        &self,
        device_id: &str,
        handle: u32,
        name: &str,
        size: Option<u64>,
        supports_partial: bool,
        temp_url: &str,
    ) -> Result<String, StoreError> {
        self.begin(Direction::Read, device_id, Some(handle), None, name, size, supports_partial, temp_url, None).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn begin_write(
        &self,
        device_id: &str,
        parent: u32,
        name: &str,
        size: Option<u64>,
        supports_partial: bool,
        temp_url: &str,
        source_url: &str,
    ) -> Result<String, StoreError> {
        self.begin(Direction::Write, device_id, None, Some(parent), name, size, supports_partial, temp_url, Some(source_url)).await
    }

    /// Updates `committedBytes` before each chunk (spec §4.8 point 4).
    /// Atomic per call (spec §4.10).
    pub async fn update_progress(&self, id: &str, committed_bytes: u64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "UPDATE transfers SET committed_bytes = ?1, updated_at = ?2 WHERE id = ?3",
            params![committed_bytes as i64, now_millis(), id],
        )?;
        if n == 0 {
            return Err(StoreError::TransferNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn set_etag(&self, id: &str, etag: Etag) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE transfers SET etag_size = ?1, etag_mtime = ?2, updated_at = ?3 WHERE id = ?4",
            params![etag.size.map(|v| v as i64), etag.mtime, now_millis(), id],
        )?;
        Ok(())
    }

    /// Records the error string and keeps `state = failed`, per spec §4.10.
    pub async fn fail(&self, id: &str, err: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE transfers SET state = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
            params![TransferState::Failed.as_str(), err, now_millis(), id],
        )?;
        Ok(())
    }

    /// Moves to `state = complete` and clears `lastError` (spec §4.10).
    pub async fn complete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE transfers SET state = ?1, last_error = NULL, updated_at = ?2 WHERE id = ?3",
            params![TransferState::Complete.as_str(), now_millis(), id],
        )?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<TransferRecord>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM transfers WHERE id = ?1", params![id], row_to_record).optional().map_err(StoreError::from)
    }

    /// Active and failed records for `device_id` (resumable transfers,
    /// spec §4.10 `load_resumables`).
    pub async fn load_resumables(&self, device_id: &str) -> Result<Vec<TransferRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM transfers WHERE device_id = ?1 AND state IN ('active', 'failed') ORDER BY updated_at",
        )?;
        let rows = stmt.query_map(params![device_id], row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub async fn list_failed(&self) -> Result<Vec<TransferRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM transfers WHERE state = 'failed' ORDER BY updated_at")?;
        let rows = stmt.query_map([], row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Compaction: removes `complete` rows older than `older_than_millis`
    /// and returns their temp-file URLs for the caller to unlink (spec
    /// §3.10 "compaction removes complete rows older than a threshold").
    pub async fn clear_stale_temps(&self, older_than_millis: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().await;
        let urls: Vec<String> = {
            let mut stmt = conn.prepare("SELECT temp_url FROM transfers WHERE state = 'complete' AND updated_at < ?1")?;
            let rows = stmt.query_map(params![older_than_millis], |r| r.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        conn.execute("DELETE FROM transfers WHERE state = 'complete' AND updated_at < ?1", params![older_than_millis])?;
        Ok(urls)
    }
}

fn row_to_record(r: &rusqlite::Row<'_>) -> rusqlite::Result<TransferRecord> {
    let direction: String = r.get("direction")?;
    let state: String = r.get("state")?;
    Ok(TransferRecord {
        id: r.get("id")?,
        device_id: r.get("device_id")?,
        direction: if direction == "write" { Direction::Write } else { Direction::Read },
        name: r.get("name")?,
        size: r.get::<_, Option<i64>>("size")?.map(|v| v as u64),
        supports_partial: r.get("supports_partial")?,
        temp_url: r.get("temp_url")?,
        final_url: r.get("final_url")?,
        source_url: r.get("source_url")?,
        state: TransferState::parse(&state),
        committed_bytes: r.get::<_, i64>("committed_bytes")? as u64,
        etag: Etag { size: r.get::<_, Option<i64>>("etag_size")?.map(|v| v as u64), mtime: r.get("etag_mtime")? },
        last_error: r.get("last_error")?,
        updated_at: r.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn begin_read_then_fail_then_resume_keeps_failed_state_with_progress() {
        let store = Store::open(None).unwrap();
        let journal = store.journal();
        let id = journal.begin_read("dev", 7, "video.mp4", Some(100 * 1024 * 1024), true, "/tmp/video.mp4.part").await.unwrap();
        journal.update_progress(&id, 25 * 1024 * 1024).await.unwrap();
        journal.fail(&id, "transport timeout").await.unwrap();

        let resumables = journal.load_resumables("dev").await.unwrap();
        assert_eq!(resumables.len(), 1);
        assert_eq!(resumables[0].committed_bytes, 25 * 1024 * 1024);
        assert_eq!(resumables[0].state, TransferState::Failed);

        let resumed_id = journal.begin_read("dev", 7, "video.mp4", Some(100 * 1024 * 1024), true, "/tmp/video.mp4.part").await.unwrap();
        assert_eq!(resumed_id, id, "repeated begin_read for the same object reuses the same row");
        journal.complete(&id).await.unwrap();
        let record = journal.get(&id).await.unwrap().unwrap();
        assert_eq!(record.state, TransferState::Complete);
        assert!(record.last_error.is_none());
    }

    #[tokio::test]
    async fn clear_stale_temps_removes_old_complete_rows_only() {
        let store = Store::open(None).unwrap();
        let journal = store.journal();
        let id = journal.begin_write("dev", 3, "a.txt", Some(1), false, "/tmp/a.part", "/local/a.txt").await.unwrap();
        journal.complete(&id).await.unwrap();
        let urls = journal.clear_stale_temps(i64::MAX).await.unwrap();
        assert_eq!(urls, vec!["/tmp/a.part".to_string()]);
        assert!(journal.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_failed_only_returns_failed_rows() {
        let store = Store::open(None).unwrap();
        let journal = store.journal();
        let ok_id = journal.begin_write("dev", 1, "ok.txt", Some(1), false, "/tmp/ok.part", "/local/ok.txt").await.unwrap();
        journal.complete(&ok_id).await.unwrap();
        let bad_id = journal.begin_write("dev", 2, "bad.txt", Some(1), false, "/tmp/bad.part", "/local/bad.txt").await.unwrap();
        journal.fail(&bad_id, "storage full").await.unwrap();

        let failed = journal.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, bad_id);
    }
}
