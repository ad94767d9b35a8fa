//! On-disk configuration (spec §3.12), grounded directly on the teacher's
//! `rpkg` config module: nested structs, a hand-written `Default`, and a
//! `load`/`save` pair that falls back to defaults when the file is absent
//! rather than erroring.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub cache: CacheConfig,
    pub quirks: QuirkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub data_dir: String,
    pub log_level: String,
    pub detach_kernel_driver: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub dir: String,
    pub max_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuirkConfig {
    /// Path to the user-editable quirk database file (spec §6.1). `None`
    /// runs with built-in defaults only.
    pub db_path: Option<String>,
    pub deny_quirks: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let base = default_data_dir();
        Self {
            general: GeneralConfig {
                data_dir: base.join("mtp-host").to_string_lossy().into_owned(),
                log_level: String::from("info"),
                detach_kernel_driver: true,
            },
            cache: CacheConfig {
                dir: base.join("mtp-host").join("cache").to_string_lossy().into_owned(),
                max_size_bytes: 1024 * 1024 * 1024,
            },
            quirks: QuirkConfig { db_path: None, deny_quirks: Vec::new() },
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    pub fn store_path(&self) -> PathBuf {
        Path::new(&self.general.data_dir).join("index.sqlite3")
    }

    /// Loads from `path`, falling back to [`Config::default`] when the file
    /// doesn't exist (mirrors the teacher's `load_config`).
    pub fn load(path: Option<&Path>) -> Result<Config, crate::Error> {
        let default_path = default_config_path();
        let config_path = path.unwrap_or(&default_path);
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path).map_err(|e| crate::Error::Config(e.to_string()))?;
            toml::from_str(&contents).map_err(|e| crate::Error::Config(e.to_string()))
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<(), crate::Error> {
        let default_path = default_config_path();
        let config_path = path.unwrap_or(&default_path);
        let contents = toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::Error::Config(e.to_string()))?;
        }
        std::fs::write(config_path, contents).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("mtp-host").join("config.toml")
}
