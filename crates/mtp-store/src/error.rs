//! `mtp-store` error type (component C8/C9, spec §7).

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("database file is malformed or unreadable: {0}")]
    Malformed(String),
    #[error("transfer record {0} not found")]
    TransferNotFound(String),
    #[error("object ({0}, {1}) not found")]
    ObjectNotFound(u32, u32),
}
