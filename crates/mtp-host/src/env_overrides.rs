//! Environment overrides (spec §6.4): `IO_TIMEOUT_MS`, `MAX_CHUNK_BYTES`,
//! `DENY_QUIRKS`, `DEBUG`. All advisory — `QuirkDatabase::build_effective`
//! clamps whatever comes through, per spec §4.3.

use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub io_timeout_ms: Option<u64>,
    pub max_chunk_bytes: Option<u32>,
    pub deny_quirks: Vec<String>,
    pub debug: bool,
}

pub fn read() -> EnvOverrides {
    EnvOverrides {
        io_timeout_ms: env::var("IO_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()),
        max_chunk_bytes: env::var("MAX_CHUNK_BYTES").ok().and_then(|v| v.parse().ok()),
        deny_quirks: env::var("DENY_QUIRKS")
            .ok()
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default(),
        debug: env::var("DEBUG").map(|v| v == "1").unwrap_or(false),
    }
}

impl EnvOverrides {
    /// Converts to the camelCase string map `QuirkDatabase::build_effective`
    /// expects as its user-override layer (spec §4.3).
    pub fn as_tuning_overrides(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        if let Some(v) = self.io_timeout_ms {
            out.insert("ioTimeoutMs".to_string(), v.to_string());
        }
        if let Some(v) = self.max_chunk_bytes {
            out.insert("maxChunkBytes".to_string(), v.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_quirks_splits_and_trims_the_list() {
        let overrides = EnvOverrides { deny_quirks: vec!["a".into(), "b".into()], ..Default::default() };
        assert_eq!(overrides.deny_quirks, vec!["a", "b"]);
    }

    #[test]
    fn tuning_overrides_only_include_what_was_set() {
        let overrides = EnvOverrides { io_timeout_ms: Some(5_000), ..Default::default() };
        let map = overrides.as_tuning_overrides();
        assert_eq!(map.get("ioTimeoutMs"), Some(&"5000".to_string()));
        assert!(!map.contains_key("maxChunkBytes"));
    }
}
