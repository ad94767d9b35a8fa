//! Schema setup (spec §4.9/§4.10 expansion). Every statement is
//! `IF NOT EXISTS` — schema evolution tolerates legacy tables (spec §4.9)
//! rather than dropping and recreating them.

use crate::error::StoreError;
use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    // WAL is unsupported on `:memory:` connections; sqlite just keeps its
    // default journal mode there, so the pragma failure is swallowed.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS devices (
            domain_id TEXT PRIMARY KEY,
            display_name TEXT,
            last_seen_at INTEGER,
            ephemeral INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS objects (
            device_id TEXT NOT NULL,
            storage_id INTEGER NOT NULL,
            handle INTEGER NOT NULL,
            parent_handle INTEGER,
            name TEXT NOT NULL,
            path_key TEXT NOT NULL,
            size_bytes INTEGER,
            mtime INTEGER,
            format_code INTEGER NOT NULL,
            is_directory INTEGER NOT NULL,
            change_counter INTEGER NOT NULL,
            crawled_at INTEGER NOT NULL,
            stale INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (device_id, storage_id, handle)
        );
        CREATE INDEX IF NOT EXISTS idx_objects_parent
            ON objects(device_id, storage_id, parent_handle);
        CREATE TABLE IF NOT EXISTS change_log (
            device_id TEXT NOT NULL,
            counter INTEGER NOT NULL,
            kind TEXT NOT NULL,
            storage_id INTEGER NOT NULL,
            handle INTEGER NOT NULL,
            row_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_change_log_device_counter
            ON change_log(device_id, counter);
        CREATE TABLE IF NOT EXISTS crawl_state (
            device_id TEXT NOT NULL,
            storage_id INTEGER NOT NULL,
            parent_handle INTEGER,
            crawled_at INTEGER NOT NULL,
            PRIMARY KEY (device_id, storage_id, parent_handle)
        );
        CREATE TABLE IF NOT EXISTS device_counters (
            device_id TEXT PRIMARY KEY,
            counter INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS snapshots (
            device_id TEXT NOT NULL,
            generation INTEGER NOT NULL,
            storage_id INTEGER NOT NULL,
            handle INTEGER NOT NULL,
            name TEXT NOT NULL,
            size_bytes INTEGER,
            mtime INTEGER,
            PRIMARY KEY (device_id, generation, storage_id, handle)
        );
        CREATE TABLE IF NOT EXISTS capability_cache (
            vid INTEGER NOT NULL,
            pid INTEGER NOT NULL,
            bcd_device INTEGER,
            iface_class INTEGER,
            iface_subclass INTEGER,
            iface_protocol INTEGER,
            partial_read INTEGER NOT NULL,
            partial_read64 INTEGER NOT NULL,
            partial_write INTEGER NOT NULL,
            supports_events INTEGER NOT NULL,
            prefer_prop_list INTEGER NOT NULL,
            probed_at INTEGER NOT NULL,
            PRIMARY KEY (vid, pid, bcd_device, iface_class, iface_subclass, iface_protocol)
        );
        CREATE TABLE IF NOT EXISTS transfers (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            direction TEXT NOT NULL,
            handle INTEGER,
            parent INTEGER,
            name TEXT NOT NULL,
            size INTEGER,
            supports_partial INTEGER NOT NULL,
            temp_url TEXT NOT NULL,
            final_url TEXT,
            source_url TEXT,
            state TEXT NOT NULL,
            committed_bytes INTEGER NOT NULL,
            etag_size INTEGER,
            etag_mtime INTEGER,
            last_error TEXT,
            updated_at INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}
