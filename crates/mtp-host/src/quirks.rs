//! Loads the on-disk quirk database and applies `DENY_QUIRKS` filtering
//! (spec §6.1, §6.4) before handing entries to [`mtp_quirks::QuirkDatabase`].

use mtp_quirks::{load_quirk_file, DeviceQuirk, QuirkDatabase, QuirkFileError};
use std::path::Path;

pub fn load(db_path: Option<&Path>, deny: &[String]) -> Result<QuirkDatabase, QuirkFileError> {
    let entries: Vec<DeviceQuirk> = match db_path {
        Some(path) if path.exists() => load_quirk_file(path)?,
        _ => Vec::new(),
    };
    let filtered = entries.into_iter().filter(|e| !deny.iter().any(|id| id == &e.id)).collect();
    Ok(QuirkDatabase::new(filtered))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_an_empty_database() {
        let db = load(None, &[]).unwrap();
        assert!(db.entries().is_empty());
    }

    #[test]
    fn deny_quirks_filters_entries_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quirks.json");
        std::fs::write(
            &path,
            r#"{"schemaVersion":1,"entries":[
                {"id":"vendor-a","match":{"vid":"0x18d1","pid":"0x4ee1"},"status":"verified"},
                {"id":"vendor-b","match":{"vid":"0x1234","pid":"0x5678"},"status":"verified"}
            ]}"#,
        )
        .unwrap();
        let db = load(Some(&path), &["vendor-a".to_string()]).unwrap();
        assert_eq!(db.entries().len(), 1);
        assert_eq!(db.entries()[0].id, "vendor-b");
    }
}
