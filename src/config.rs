//! Sync configuration, loaded from TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::exclude::ExclusionFilter;

/// Default number of transfer workers for this machine.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 8)
}

/// Sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Transfer workers. Removals always get an extra worker of their own.
    pub worker_count: usize,
    /// Targets per backend fetch request.
    pub batch_size: usize,
    /// How often the coordinator refreshes progress.
    pub poll_interval_ms: u64,
    /// Draw progress bars on stderr.
    pub show_progress: bool,
    /// Depot paths to sync.
    pub roots: Vec<String>,
    /// Depot wildcard patterns to keep out of the workspace.
    pub excludes: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_size: 64,
            poll_interval_ms: 300,
            show_progress: true,
            roots: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(content).context("Failed to parse sync configuration")?;
        Ok(config.clamped())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// `<config dir>/depot-sync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("depot-sync").join("config.toml"))
    }

    /// Load the default config file if there is one.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_if_exists(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load `path`, or fall back to defaults when it does not exist.
    pub fn load_if_exists(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize sync configuration")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Exclusion filter holding the configured patterns.
    pub fn exclusion_filter(&self) -> ExclusionFilter {
        let mut filter = ExclusionFilter::new();
        for pattern in &self.excludes {
            filter.add_exclude(pattern);
        }
        filter
    }

    fn clamped(mut self) -> Self {
        self.worker_count = self.worker_count.max(1);
        self.batch_size = self.batch_size.max(1);
        self.poll_interval_ms = self.poll_interval_ms.max(1);
        self
    }
}
