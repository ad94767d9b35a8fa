//! Extension RPC surface (spec §6.3): a transport-agnostic trait so an IPC
//! layer (not part of this crate) can expose the same five operations over
//! whatever wire format it chooses.

use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub handle: u32,
    pub name: String,
    pub is_folder: bool,
    pub size: Option<u64>,
    pub mtime: Option<i64>,
}

#[async_trait]
pub trait ExtensionRpc: Send + Sync {
    /// Reads from the live index only; never blocks on the device (spec
    /// §6.3).
    async fn list(&self, domain_id: &str, parent_handle: Option<u32>) -> Result<Vec<ObjectInfo>, crate::Error>;

    /// Materializes an object's bytes locally, downloading through the
    /// content cache if not already present.
    async fn materialize(&self, domain_id: &str, storage_id: u32, handle: u32) -> Result<PathBuf, crate::Error>;

    async fn create_item(&self, domain_id: &str, parent_handle: u32, name: &str, size: u64, source_path: &std::path::Path) -> Result<u32, crate::Error>;

    async fn modify_item(&self, domain_id: &str, handle: u32, new_contents_path: &std::path::Path) -> Result<(), crate::Error>;

    async fn delete_item(&self, domain_id: &str, handle: u32) -> Result<(), crate::Error>;
}
