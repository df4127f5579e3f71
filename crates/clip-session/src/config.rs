//! Registry configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use clip_core::{ClipError, ClipResult};

/// Default pause between two reaper sweeps while sessions are live
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 100;

/// Session registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Sleep between sweeps when the registry is not empty
    pub reap_interval_ms: u64,
    /// Spawn the reaper thread when the registry is constructed
    pub autostart_reaper: bool,
    /// Name given to the reaper thread
    pub reaper_thread_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
            autostart_reaper: true,
            reaper_thread_name: "clip-reaper".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Config with no background reaper; sweeps only happen through `reap_now`.
    pub fn manual() -> Self {
        Self {
            autostart_reaper: false,
            ..Self::default()
        }
    }

    #[inline]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn validate(&self) -> ClipResult<()> {
        if self.reap_interval_ms == 0 {
            return Err(ClipError::Config("reap_interval_ms must be > 0".into()));
        }
        if self.reaper_thread_name.trim().is_empty() {
            return Err(ClipError::Config("reaper_thread_name is empty".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> ClipResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ClipError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ClipResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
