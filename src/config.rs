use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{Error, Result};

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "OPSMETRICS_CONFIG";

/// Engine settings. Every field is optional in the JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub cache: CacheConfig,
    /// TTL applied to computed metric values.
    pub metric_ttl_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            metric_ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl EngineConfig {
    pub fn metric_ttl(&self) -> Duration {
        Duration::from_millis(self.metric_ttl_ms)
    }

    /// Default config location (`~/.opsmetrics/config.json`).
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Ok(home.join(".opsmetrics").join("config.json"))
    }

    /// Load from `path`, else `$OPSMETRICS_CONFIG`, else the default location.
    ///
    /// An explicitly named file must exist. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Some(env_path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Self::from_file(Path::new(&env_path));
        }
        let default = Self::default_path()?;
        if default.exists() {
            Self::from_file(&default)
        } else {
            log::debug!("No config at {}, using defaults", default.display());
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(Error::Config("cache.maxSize must be at least 1".into()));
        }
        if self.cache.cleanup_interval_ms == 0 {
            return Err(Error::Config("cache.cleanupIntervalMs must be positive".into()));
        }
        Ok(())
    }
}
