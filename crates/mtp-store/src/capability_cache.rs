//! Cross-connect capability cache (spec §3.11): remembers the result of a
//! device's one-time capability probe (component C5) keyed by its USB
//! identity, so a later connect can skip the probe and use the remembered
//! tuning as a starting point for `mtp-quirks::build_effective`'s `learned`
//! layer.

use crate::error::StoreError;
use crate::index::now_millis;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The USB identity a probe result is keyed on. Kept as plain fields here
/// rather than re-using `mtp_quirks::Fingerprint` — `mtp-store` has no
/// dependency on `mtp-quirks` and this crate stays that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey {
    pub vid: u16,
    pub pid: u16,
    pub bcd_device: Option<u16>,
    pub iface_class: Option<u8>,
    pub iface_subclass: Option<u8>,
    pub iface_protocol: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedCapabilities {
    pub partial_read: bool,
    pub partial_read64: bool,
    pub partial_write: bool,
    pub supports_events: bool,
    pub prefer_prop_list: bool,
    pub probed_at: i64,
}

/// Shared handle into the capability cache table (spec §3.11).
#[derive(Clone)]
pub struct CapabilityCache {
    conn: Arc<Mutex<Connection>>,
}

impl CapabilityCache {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn get(&self, key: CacheKey) -> Result<Option<CachedCapabilities>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT partial_read, partial_read64, partial_write, supports_events, prefer_prop_list, probed_at
             FROM capability_cache
             WHERE vid = ?1 AND pid = ?2 AND bcd_device IS ?3 AND iface_class IS ?4 AND iface_subclass IS ?5 AND iface_protocol IS ?6",
            params![key.vid, key.pid, key.bcd_device, key.iface_class, key.iface_subclass, key.iface_protocol],
            |r| {
                Ok(CachedCapabilities {
                    partial_read: r.get(0)?,
                    partial_read64: r.get(1)?,
                    partial_write: r.get(2)?,
                    supports_events: r.get(3)?,
                    prefer_prop_list: r.get(4)?,
                    probed_at: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub async fn put(&self, key: CacheKey, caps: CachedCapabilities) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO capability_cache(vid, pid, bcd_device, iface_class, iface_subclass, iface_protocol,
                partial_read, partial_read64, partial_write, supports_events, prefer_prop_list, probed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(vid, pid, bcd_device, iface_class, iface_subclass, iface_protocol) DO UPDATE SET
                partial_read=excluded.partial_read, partial_read64=excluded.partial_read64,
                partial_write=excluded.partial_write, supports_events=excluded.supports_events,
                prefer_prop_list=excluded.prefer_prop_list, probed_at=excluded.probed_at",
            params![
                key.vid,
                key.pid,
                key.bcd_device,
                key.iface_class,
                key.iface_subclass,
                key.iface_protocol,
                caps.partial_read,
                caps.partial_read64,
                caps.partial_write,
                caps.supports_events,
                caps.prefer_prop_list,
                caps.probed_at,
            ],
        )?;
        Ok(())
    }
}

/// Current time in milliseconds, for stamping `probed_at` (mirrors
/// [`crate::index::now_millis`]).
pub fn probed_now() -> i64 {
    now_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn key() -> CacheKey {
        CacheKey { vid: 0x04e8, pid: 0x6860, bcd_device: Some(0x0100), iface_class: Some(6), iface_subclass: Some(1), iface_protocol: Some(1) }
    }

    #[tokio::test]
    async fn miss_then_put_then_hit_roundtrips() {
        let store = Store::open(None).unwrap();
        let cache = store.capability_cache();
        assert!(cache.get(key()).await.unwrap().is_none());

        let caps = CachedCapabilities { partial_read: true, partial_read64: false, partial_write: true, supports_events: true, prefer_prop_list: false, probed_at: 1_000 };
        cache.put(key(), caps).await.unwrap();

        let fetched = cache.get(key()).await.unwrap().unwrap();
        assert_eq!(fetched, caps);
    }

    #[tokio::test]
    async fn put_twice_for_the_same_key_overwrites_rather_than_duplicating() {
        let store = Store::open(None).unwrap();
        let cache = store.capability_cache();
        let first = CachedCapabilities { partial_read: false, partial_read64: false, partial_write: false, supports_events: false, prefer_prop_list: false, probed_at: 1 };
        let second = CachedCapabilities { partial_read: true, partial_read64: true, partial_write: true, supports_events: true, prefer_prop_list: true, probed_at: 2 };
        cache.put(key(), first).await.unwrap();
        cache.put(key(), second).await.unwrap();

        assert_eq!(cache.get(key()).await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn distinct_interfaces_on_the_same_vid_pid_are_independent_rows() {
        let store = Store::open(None).unwrap();
        let cache = store.capability_cache();
        let mut other = key();
        other.iface_protocol = Some(2);
        let caps = CachedCapabilities { partial_read: true, partial_read64: true, partial_write: true, supports_events: true, prefer_prop_list: true, probed_at: 5 };
        cache.put(key(), caps).await.unwrap();

        assert!(cache.get(other).await.unwrap().is_none());
    }
}
