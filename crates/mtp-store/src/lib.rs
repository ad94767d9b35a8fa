//! Persistent per-device object index and crash-safe transfer journal
//! (components C8/C9, spec §4.9/§4.10). A single SQLite database backs
//! both; [`Store`] owns the connection and hands out cheap, cloneable
//! handles ([`LiveIndex`], [`TransferJournal`]) that share its write mutex
//! (spec §5: "their write paths serialize on the same mutex").

pub mod capability_cache;
pub mod error;
pub mod identity;
pub mod index;
pub mod journal;
pub mod pathkey;
mod schema;
pub mod snapshot;

pub use capability_cache::{CacheKey as CapabilityCacheKey, CachedCapabilities, CapabilityCache};
pub use error::StoreError;
pub use identity::{Identity, Signals};
pub use index::{Change, ChangeKind, IndexedObject, LiveIndex, NewObject};
pub use journal::{Direction, Etag, TransferJournal, TransferRecord, TransferState};
pub use snapshot::{Diff, DiffEngine, SnapshotRow, Snapshotter};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Opens (or creates) the backing database at `path`, or an in-memory
/// database when `path` is `None` (spec §4.9: "The in-memory path
/// `:memory:` is supported for tests").
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };
        schema::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn live_index(&self) -> LiveIndex {
        LiveIndex::new(self.conn.clone())
    }

    pub fn journal(&self) -> TransferJournal {
        TransferJournal::new(self.conn.clone())
    }

    pub fn capability_cache(&self) -> CapabilityCache {
        CapabilityCache::new(self.conn.clone())
    }
}
