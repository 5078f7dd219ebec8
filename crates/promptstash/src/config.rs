//! # Configuration
//!
//! Engine configuration is a [`confique`] struct loaded in priority order:
//! 1. **Environment variables**: `PROMPTSTASH_CACHE_DIR`, `PROMPTSTASH_API_URL`,
//!    `PROMPTSTASH_FORCE_REMOTE`.
//! 2. **Config file**: an optional TOML file passed to [`StashConfig::load`].
//! 3. **Compiled defaults**.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `cache_dir` | OS cache dir | Root of the local mirror |
//! | `api_url` | `https://api.github.com` | Document service base URL |
//! | `force_remote` | `false` | Never answer reads from the cache |
//! | `conflict_retries` | `3` | Attempts for a conditional index write |
//!
//! The request timeout is fixed (see [`REQUEST_TIMEOUT`]) and is not
//! part of this struct.

use crate::error::{Result, StashError};
use confique::Config;
use directories::ProjectDirs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CACHE_DIR_ENV: &str = "PROMPTSTASH_CACHE_DIR";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Config, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StashConfig {
    /// Root directory of the local cache. Falls back to the OS cache dir.
    #[config(env = "PROMPTSTASH_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Base URL of the hosted document service.
    #[config(env = "PROMPTSTASH_API_URL", default = "https://api.github.com")]
    pub api_url: String,

    /// Disable cache fallback for reads.
    #[config(env = "PROMPTSTASH_FORCE_REMOTE", default = false)]
    pub force_remote: bool,

    /// How many times a conflicting index write is attempted.
    #[config(default = 3)]
    pub conflict_retries: u32,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            api_url: DEFAULT_API_URL.to_string(),
            force_remote: false,
            conflict_retries: 3,
        }
    }
}

impl StashConfig {
    /// Load from the environment layered over an optional TOML file.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = StashConfig::builder().env();
        if let Some(path) = file {
            builder = builder.file(path);
        }
        builder
            .load()
            .map_err(|e| StashError::Config(e.to_string()))
    }

    /// Resolve the cache root: explicit setting, then the OS cache directory.
    pub fn cache_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        default_cache_root()
    }
}

/// Cache root from `PROMPTSTASH_CACHE_DIR`, else the OS-appropriate cache dir.
pub fn default_cache_root() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    ProjectDirs::from("com", "promptstash", "promptstash")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .ok_or_else(|| StashError::Config("could not determine a cache directory".to_string()))
}
