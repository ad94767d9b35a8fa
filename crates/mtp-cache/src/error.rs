//! `mtp-cache` error type (component C11, spec §7).

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download for this key was cancelled before it finished")]
    FetchCancelled,
    #[error("downloader returned an error: {0}")]
    Fetch(String),
}

impl Clone for CacheError {
    fn clone(&self) -> Self {
        match self {
            CacheError::Io(e) => CacheError::Fetch(format!("i/o error: {e}")),
            CacheError::FetchCancelled => CacheError::FetchCancelled,
            CacheError::Fetch(s) => CacheError::Fetch(s.clone()),
        }
    }
}
