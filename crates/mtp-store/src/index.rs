//! Per-device object/storage index with a monotonic change log (component
//! C8, spec §4.9). Grounded on the teacher's `rpkg/src/config.rs`
//! load/save-with-default idiom, adapted here to a `rusqlite` row store
//! instead of a single `toml` file, and on the Gladix manifest's
//! `rusqlite` (`bundled`) dependency choice.

use crate::error::StoreError;
use crate::identity::{derive_domain_id, display_name, Identity, Signals};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

/// One row of the per-device object index (spec §3.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedObject {
    pub device_id: String,
    pub storage_id: u32,
    pub handle: u32,
    pub parent_handle: Option<u32>,
    pub name: String,
    pub path_key: String,
    pub size_bytes: Option<u64>,
    pub mtime: Option<i64>,
    pub format_code: u16,
    pub is_directory: bool,
    pub change_counter: i64,
    pub crawled_at: i64,
    pub stale: bool,
}

/// Caller-supplied fields for [`LiveIndex::upsert_objects`]; the index
/// fills in `change_counter`, `crawled_at` and `stale` itself.
#[derive(Debug, Clone)]
pub struct NewObject {
    pub storage_id: u32,
    pub handle: u32,
    pub parent_handle: Option<u32>,
    pub name: String,
    pub path_key: String,
    pub size_bytes: Option<u64>,
    pub mtime: Option<i64>,
    pub format_code: u16,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

impl ChangeKind {
    fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Upserted => "upserted",
            ChangeKind::Deleted => "deleted",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "deleted" {
            ChangeKind::Deleted
        } else {
            ChangeKind::Upserted
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub counter: i64,
    pub row: IndexedObject,
}

/// Shared handle into the index's SQLite connection. Clones share the same
/// mutex-guarded connection (spec §4.9: "a single write lock"); readers
/// take the same lock briefly rather than running on a separate pool, a
/// deliberate simplification over a true reader/writer pool (see
/// `DESIGN.md`).
#[derive(Clone)]
pub struct LiveIndex {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl LiveIndex {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Derives or confirms a device's stable domain identity and records
    /// it as seen (spec §4.9 `resolve_identity`).
    pub async fn resolve_identity(&self, signals: &Signals) -> Result<Identity, StoreError> {
        let domain_id = derive_domain_id(signals);
        let name = display_name(signals);
        let now = now_millis();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO devices(domain_id, display_name, last_seen_at, ephemeral) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(domain_id) DO UPDATE SET display_name = excluded.display_name, last_seen_at = excluded.last_seen_at",
            params![domain_id, name, now],
        )?;
        Ok(Identity { domain_id, display_name: name, last_seen_at: now })
    }

    /// Re-resolves identity with a newly-learned MTP serial and migrates
    /// any rows still keyed by the prior ephemeral id (spec §3.1, §8.3).
    pub async fn update_mtp_serial(&self, prior_domain_id: &str, signals: &Signals) -> Result<Identity, StoreError> {
        let identity = self.resolve_identity(signals).await?;
        if identity.domain_id != prior_domain_id {
            self.migrate_ephemeral_device_id(prior_domain_id, &identity.domain_id).await?;
        }
        Ok(identity)
    }

    async fn next_counter(conn: &Connection, device_id: &str) -> Result<i64, StoreError> {
        let current: Option<i64> = conn
            .query_row("SELECT counter FROM device_counters WHERE device_id = ?1", params![device_id], |r| r.get(0))
            .optional()?;
        let next = current.unwrap_or(0) + 1;
        conn.execute(
            "INSERT INTO device_counters(device_id, counter) VALUES (?1, ?2)
             ON CONFLICT(device_id) DO UPDATE SET counter = excluded.counter",
            params![device_id, next],
        )?;
        Ok(next)
    }

    /// Writes `rows`, incrementing the device's change counter exactly
    /// once for the whole batch and appending one change-log entry per row
    /// (spec §4.9). Re-upserting identical rows is idempotent in final
    /// state (spec §8.2) via `INSERT OR REPLACE` on the `(device_id,
    /// storage_id, handle)` primary key.
    pub async fn upsert_objects(&self, device_id: &str, rows: Vec<NewObject>) -> Result<i64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().await;
        let counter = Self::next_counter(&conn, device_id).await?;
        let now = now_millis();
        let mut tx = conn.transaction()?;
        // Each row runs inside its own SAVEPOINT (spec §4.9/§9): a single
        // malformed row rolls back to the savepoint and is skipped rather
        // than aborting the whole batch's outer transaction.
        for row in &rows {
            let mut sp = tx.savepoint()?;
            let applied = (|| -> Result<(), StoreError> {
                sp.execute(
                    "INSERT INTO objects(device_id, storage_id, handle, parent_handle, name, path_key, size_bytes, mtime,
                        format_code, is_directory, change_counter, crawled_at, stale)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,0)
                     ON CONFLICT(device_id, storage_id, handle) DO UPDATE SET
                        parent_handle=excluded.parent_handle, name=excluded.name, path_key=excluded.path_key,
                        size_bytes=excluded.size_bytes, mtime=excluded.mtime, format_code=excluded.format_code,
                        is_directory=excluded.is_directory, change_counter=excluded.change_counter,
                        crawled_at=excluded.crawled_at, stale=0",
                    params![
                        device_id,
                        row.storage_id,
                        row.handle,
                        row.parent_handle,
                        row.name,
                        row.path_key,
                        row.size_bytes.map(|v| v as i64),
                        row.mtime,
                        row.format_code,
                        row.is_directory,
                        counter,
                        now,
                    ],
                )?;
                let indexed = IndexedObject {
                    device_id: device_id.to_string(),
                    storage_id: row.storage_id,
                    handle: row.handle,
                    parent_handle: row.parent_handle,
                    name: row.name.clone(),
                    path_key: row.path_key.clone(),
                    size_bytes: row.size_bytes,
                    mtime: row.mtime,
                    format_code: row.format_code,
                    is_directory: row.is_directory,
                    change_counter: counter,
                    crawled_at: now,
                    stale: false,
                };
                append_change_log(&sp, device_id, counter, ChangeKind::Upserted, &indexed, now)
            })();
            match applied {
                Ok(()) => sp.commit()?,
                Err(e) => {
                    debug!(device_id, handle = row.handle, error = %e, "dropping malformed crawl row at its savepoint");
                    sp.rollback()?;
                }
            }
        }
        tx.commit()?;
        Ok(counter)
    }

    pub async fn insert_object(&self, device_id: &str, row: NewObject) -> Result<i64, StoreError> {
        self.upsert_objects(device_id, vec![row]).await
    }

    /// Appends a `deleted` change-log entry before physically removing the
    /// row (spec Invariant 5).
    pub async fn remove_object(&self, device_id: &str, storage_id: u32, handle: u32) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock().await;
        let counter = Self::next_counter(&conn, device_id).await?;
        let now = now_millis();
        let tx = conn.transaction()?;
        let existing = fetch_object(&tx, device_id, storage_id, handle)?;
        let row = existing.unwrap_or(IndexedObject {
            device_id: device_id.to_string(),
            storage_id,
            handle,
            parent_handle: None,
            name: String::new(),
            path_key: String::new(),
            size_bytes: None,
            mtime: None,
            format_code: 0,
            is_directory: false,
            change_counter: counter,
            crawled_at: now,
            stale: false,
        });
        append_change_log(&tx, device_id, counter, ChangeKind::Deleted, &row, now)?;
        tx.execute(
            "DELETE FROM objects WHERE device_id = ?1 AND storage_id = ?2 AND handle = ?3",
            params![device_id, storage_id, handle],
        )?;
        tx.commit()?;
        Ok(counter)
    }

    pub async fn object(&self, device_id: &str, storage_id: u32, handle: u32) -> Result<Option<IndexedObject>, StoreError> {
        let conn = self.conn.lock().await;
        fetch_object(&conn, device_id, storage_id, handle)
    }

    /// Lists non-stale children of `parent` (spec §4.9 `children`). `None`
    /// means top-level objects (`parent_handle IS NULL`); orphans under a
    /// missing parent handle are only visible by querying that handle
    /// explicitly (spec §8.3).
    pub async fn children(&self, device_id: &str, storage_id: u32, parent: Option<u32>) -> Result<Vec<IndexedObject>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT device_id, storage_id, handle, parent_handle, name, path_key, size_bytes, mtime,
                    format_code, is_directory, change_counter, crawled_at, stale
             FROM objects
             WHERE device_id = ?1 AND storage_id = ?2 AND parent_handle IS ?3 AND stale = 0
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![device_id, storage_id, parent], row_to_object)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub async fn storages(&self, device_id: &str) -> Result<Vec<u32>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT DISTINCT storage_id FROM objects WHERE device_id = ?1 ORDER BY storage_id")?;
        let rows = stmt.query_map(params![device_id], |r| r.get::<_, u32>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Phase 1 of a folder refresh: flags current rows stale so readers
    /// stop seeing them immediately (spec §4.9 two-phase refresh).
    pub async fn mark_stale_children(&self, device_id: &str, storage_id: u32, parent: Option<u32>) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE objects SET stale = 1 WHERE device_id = ?1 AND storage_id = ?2 AND parent_handle IS ?3",
            params![device_id, storage_id, parent],
        )?;
        Ok(())
    }

    /// Phase 2: deletes rows under `parent` that are still stale (not
    /// re-upserted by the refresh that called `mark_stale_children`),
    /// logging a `deleted` change entry per removed row.
    pub async fn purge_stale(&self, device_id: &str, storage_id: u32, parent: Option<u32>) -> Result<i64, StoreError> {
        let mut conn = self.conn.lock().await;
        let stale_rows: Vec<IndexedObject> = {
            let mut stmt = conn.prepare(
                "SELECT device_id, storage_id, handle, parent_handle, name, path_key, size_bytes, mtime,
                        format_code, is_directory, change_counter, crawled_at, stale
                 FROM objects WHERE device_id = ?1 AND storage_id = ?2 AND parent_handle IS ?3 AND stale = 1",
            )?;
            let rows = stmt.query_map(params![device_id, storage_id, parent], row_to_object)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        if stale_rows.is_empty() {
            return Ok(0);
        }
        let counter = Self::next_counter(&conn, device_id).await?;
        let now = now_millis();
        let tx = conn.transaction()?;
        for row in &stale_rows {
            append_change_log(&tx, device_id, counter, ChangeKind::Deleted, row, now)?;
            tx.execute(
                "DELETE FROM objects WHERE device_id = ?1 AND storage_id = ?2 AND handle = ?3",
                params![device_id, row.storage_id, row.handle],
            )?;
        }
        tx.commit()?;
        debug!(device_id, removed = stale_rows.len(), "purged stale rows after folder refresh");
        Ok(counter)
    }

    /// Returns entries with `counter > anchor`, in strict counter order
    /// (spec §5 ordering guarantee, §8.1).
    pub async fn changes_since(&self, device_id: &str, anchor: i64) -> Result<Vec<Change>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT kind, counter, row_json FROM change_log WHERE device_id = ?1 AND counter > ?2 ORDER BY counter ASC",
        )?;
        let rows = stmt.query_map(params![device_id, anchor], |r| {
            let kind: String = r.get(0)?;
            let counter: i64 = r.get(1)?;
            let row_json: String = r.get(2)?;
            Ok((kind, counter, row_json))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (kind, counter, row_json) = row?;
            let row: IndexedObject = serde_json::from_str(&row_json)?;
            out.push(Change { kind: ChangeKind::parse(&kind), counter, row });
        }
        Ok(out)
    }

    pub async fn prune_change_log(&self, device_id: &str, older_than_millis: i64) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let n = conn.execute(
            "DELETE FROM change_log WHERE device_id = ?1 AND created_at < ?2",
            params![device_id, older_than_millis],
        )?;
        Ok(n as u64)
    }

    /// Migrates every row keyed by `old_device_id` to `new_device_id`
    /// across every device-scoped table (spec §3.1 upgrade step). Rows
    /// that would collide with an existing `new_device_id` row are left
    /// under the old id rather than silently dropped.
    pub async fn migrate_ephemeral_device_id(&self, old_device_id: &str, new_device_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let mut migrated = 0u64;
        for table in ["objects", "change_log", "crawl_state", "snapshots", "transfers"] {
            migrated += conn.execute(
                &format!("UPDATE OR IGNORE {table} SET device_id = ?1 WHERE device_id = ?2"),
                params![new_device_id, old_device_id],
            )? as u64;
        }
        conn.execute("UPDATE OR IGNORE device_counters SET device_id = ?1 WHERE device_id = ?2", params![new_device_id, old_device_id])?;
        conn.execute("DELETE FROM devices WHERE domain_id = ?1", params![old_device_id])?;
        Ok(migrated)
    }

    pub async fn crawl_state(&self, device_id: &str, storage_id: u32, parent: Option<u32>) -> Result<Option<i64>, StoreError> {
        let conn = self.conn.lock().await;
        let at = conn
            .query_row(
                "SELECT crawled_at FROM crawl_state WHERE device_id = ?1 AND storage_id = ?2 AND parent_handle IS ?3",
                params![device_id, storage_id, parent],
                |r| r.get(0),
            )
            .optional()?;
        Ok(at)
    }

    pub async fn set_crawl_state(&self, device_id: &str, storage_id: u32, parent: Option<u32>, at: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO crawl_state(device_id, storage_id, parent_handle, crawled_at) VALUES (?1,?2,?3,?4)
             ON CONFLICT(device_id, storage_id, parent_handle) DO UPDATE SET crawled_at = excluded.crawled_at",
            params![device_id, storage_id, parent, at],
        )?;
        Ok(())
    }
}

fn row_to_object(r: &rusqlite::Row<'_>) -> rusqlite::Result<IndexedObject> {
    Ok(IndexedObject {
        device_id: r.get(0)?,
        storage_id: r.get(1)?,
        handle: r.get(2)?,
        parent_handle: r.get(3)?,
        name: r.get(4)?,
        path_key: r.get(5)?,
        size_bytes: r.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        mtime: r.get(7)?,
        format_code: r.get(8)?,
        is_directory: r.get(9)?,
        change_counter: r.get(10)?,
        crawled_at: r.get(11)?,
        stale: r.get(12)?,
    })
}

fn fetch_object(conn: &Connection, device_id: &str, storage_id: u32, handle: u32) -> Result<Option<IndexedObject>, StoreError> {
    conn.query_row(
        "SELECT device_id, storage_id, handle, parent_handle, name, path_key, size_bytes, mtime,
                format_code, is_directory, change_counter, crawled_at, stale
         FROM objects WHERE device_id = ?1 AND storage_id = ?2 AND handle = ?3",
        params![device_id, storage_id, handle],
        row_to_object,
    )
    .optional()
    .map_err(StoreError::from)
}

fn append_change_log(conn: &Connection, device_id: &str, counter: i64, kind: ChangeKind, row: &IndexedObject, now: i64) -> Result<(), StoreError> {
    let row_json = serde_json::to_string(row)?;
    conn.execute(
        "INSERT INTO change_log(device_id, counter, kind, storage_id, handle, row_json, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![device_id, counter, kind.as_str(), row.storage_id, row.handle, row_json, now],
    )?;
    Ok(())
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn new_row(handle: u32, parent: Option<u32>, name: &str) -> NewObject {
        NewObject {
            storage_id: 1,
            handle,
            parent_handle: parent,
            name: name.to_string(),
            path_key: crate::pathkey::join(&crate::pathkey::root(1), name),
            size_bytes: Some(10),
            mtime: Some(1000),
            format_code: 0x3000,
            is_directory: false,
        }
    }

    #[tokio::test]
    async fn change_counter_is_strictly_increasing_across_batches() {
        let store = Store::open(None).unwrap();
        let idx = store.live_index();
        let c1 = idx.upsert_objects("dev", vec![new_row(1, None, "a")]).await.unwrap();
        let c2 = idx.upsert_objects("dev", vec![new_row(2, None, "b"), new_row(3, None, "c")]).await.unwrap();
        assert!(c2 > c1);
        let changes = idx.changes_since("dev", 0).await.unwrap();
        assert!(changes.len() >= 3);
    }

    #[tokio::test]
    async fn upserting_the_same_row_twice_is_idempotent() {
        let store = Store::open(None).unwrap();
        let idx = store.live_index();
        idx.upsert_objects("dev", vec![new_row(1, None, "a")]).await.unwrap();
        idx.upsert_objects("dev", vec![new_row(1, None, "a")]).await.unwrap();
        let children = idx.children("dev", 1, None).await.unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn orphan_child_visible_only_by_explicit_missing_parent() {
        let store = Store::open(None).unwrap();
        let idx = store.live_index();
        idx.upsert_objects("dev", vec![new_row(5, Some(999), "orphan.txt")]).await.unwrap();
        assert!(idx.children("dev", 1, None).await.unwrap().is_empty());
        let under_missing_parent = idx.children("dev", 1, Some(999)).await.unwrap();
        assert_eq!(under_missing_parent.len(), 1);
    }

    #[tokio::test]
    async fn mark_stale_then_purge_removes_rows_not_re_upserted() {
        let store = Store::open(None).unwrap();
        let idx = store.live_index();
        idx.upsert_objects("dev", vec![new_row(1, None, "a"), new_row(2, None, "b")]).await.unwrap();
        idx.mark_stale_children("dev", 1, None).await.unwrap();
        assert!(idx.children("dev", 1, None).await.unwrap().is_empty());
        idx.upsert_objects("dev", vec![new_row(1, None, "a")]).await.unwrap();
        idx.purge_stale("dev", 1, None).await.unwrap();
        let children = idx.children("dev", 1, None).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].handle, 1);
    }

    #[tokio::test]
    async fn delete_produces_change_log_entry_before_removal() {
        let store = Store::open(None).unwrap();
        let idx = store.live_index();
        idx.upsert_objects("dev", vec![new_row(1, None, "a")]).await.unwrap();
        idx.remove_object("dev", 1, 1).await.unwrap();
        assert!(idx.object("dev", 1, 1).await.unwrap().is_none());
        let changes = idx.changes_since("dev", 0).await.unwrap();
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Deleted && c.row.handle == 1));
    }

    #[tokio::test]
    async fn migrate_ephemeral_device_id_moves_rows_to_new_key() {
        let store = Store::open(None).unwrap();
        let idx = store.live_index();
        idx.upsert_objects("type:18d1:4ee1:Acme:Widget", vec![new_row(1, None, "a")]).await.unwrap();
        idx.migrate_ephemeral_device_id("type:18d1:4ee1:Acme:Widget", "usb:SN123").await.unwrap();
        assert!(idx.object("type:18d1:4ee1:Acme:Widget", 1, 1).await.unwrap().is_none());
        assert!(idx.object("usb:SN123", 1, 1).await.unwrap().is_some());
    }
}
