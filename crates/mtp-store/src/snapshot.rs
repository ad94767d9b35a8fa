//! Generational snapshotting and cross-generation diffing (spec §4.9
//! "Generational snapshotting", §8.4 scenario 6).

use crate::error::StoreError;
use crate::index::LiveIndex;
use rusqlite::params;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub storage_id: u32,
    pub handle: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub storage_id: u32,
    pub handle: u32,
    pub name: String,
    pub size_bytes: Option<u64>,
    pub mtime: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<SnapshotRow>,
    pub removed: Vec<SnapshotRow>,
    pub modified: Vec<SnapshotRow>,
}

/// Captures the current non-stale object tree into a new generation (spec
/// §4.9 `Snapshotter`).
pub struct Snapshotter;

impl Snapshotter {
    pub async fn capture(index: &LiveIndex, device_id: &str) -> Result<u64, StoreError> {
        let conn = index.conn.lock().await;
        let next_generation: i64 =
            conn.query_row("SELECT COALESCE(MAX(generation), 0) + 1 FROM snapshots WHERE device_id = ?1", params![device_id], |r| r.get(0))?;
        conn.execute(
            "INSERT INTO snapshots(device_id, generation, storage_id, handle, name, size_bytes, mtime)
             SELECT device_id, ?2, storage_id, handle, name, size_bytes, mtime FROM objects
             WHERE device_id = ?1 AND stale = 0",
            params![device_id, next_generation],
        )?;
        Ok(next_generation as u64)
    }
}

/// Compares two captured generations and reports `added`/`removed`/
/// `modified` rows, where `modified` is triggered by a `size` or `mtime`
/// inequality (spec §4.9 `DiffEngine`).
pub struct DiffEngine;

impl DiffEngine {
    pub async fn diff(index: &LiveIndex, device_id: &str, gen_a: u64, gen_b: u64) -> Result<Diff, StoreError> {
        let rows_a = load_generation(index, device_id, gen_a).await?;
        let rows_b = load_generation(index, device_id, gen_b).await?;

        let mut diff = Diff::default();
        for row_b in &rows_b {
            match rows_a.iter().find(|r| r.storage_id == row_b.storage_id && r.handle == row_b.handle) {
                None => diff.added.push(row_b.clone()),
                Some(row_a) => {
                    if row_a.size_bytes != row_b.size_bytes || row_a.mtime != row_b.mtime {
                        diff.modified.push(row_b.clone());
                    }
                }
            }
        }
        for row_a in &rows_a {
            if !rows_b.iter().any(|r| r.storage_id == row_a.storage_id && r.handle == row_a.handle) {
                diff.removed.push(row_a.clone());
            }
        }
        Ok(diff)
    }
}

async fn load_generation(index: &LiveIndex, device_id: &str, generation: u64) -> Result<Vec<SnapshotRow>, StoreError> {
    let conn = index.conn.lock().await;
    let mut stmt = conn.prepare("SELECT storage_id, handle, name, size_bytes, mtime FROM snapshots WHERE device_id = ?1 AND generation = ?2")?;
    let rows = stmt.query_map(params![device_id, generation as i64], |r| {
        Ok(SnapshotRow {
            storage_id: r.get(0)?,
            handle: r.get(1)?,
            name: r.get(2)?,
            size_bytes: r.get::<_, Option<i64>>(3)?.map(|v| v as u64),
            mtime: r.get(4)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NewObject;
    use crate::Store;

    fn row(handle: u32, name: &str, size: u64, mtime: i64) -> NewObject {
        NewObject {
            storage_id: 1,
            handle,
            parent_handle: None,
            name: name.to_string(),
            path_key: crate::pathkey::join(&crate::pathkey::root(1), name),
            size_bytes: Some(size),
            mtime: Some(mtime),
            format_code: 0x3000,
            is_directory: false,
        }
    }

    #[tokio::test]
    async fn diff_reports_added_removed_and_modified() {
        let store = Store::open(None).unwrap();
        let idx = store.live_index();

        idx.upsert_objects("dev", vec![row(1, "A", 10, 100), row(2, "B", 20, 200), row(3, "C", 30, 300)]).await.unwrap();
        let gen1 = Snapshotter::capture(&idx, "dev").await.unwrap();

        idx.remove_object("dev", 1, 3).await.unwrap();
        idx.upsert_objects("dev", vec![row(2, "B", 25, 200), row(4, "D", 40, 400)]).await.unwrap();
        let gen2 = Snapshotter::capture(&idx, "dev").await.unwrap();

        let diff = DiffEngine::diff(&idx, "dev", gen1, gen2).await.unwrap();
        assert_eq!(diff.added.iter().map(|r| r.handle).collect::<Vec<_>>(), vec![4]);
        assert_eq!(diff.removed.iter().map(|r| r.handle).collect::<Vec<_>>(), vec![3]);
        assert_eq!(diff.modified.iter().map(|r| r.handle).collect::<Vec<_>>(), vec![2]);
    }
}
