use crate::defaults;
use crate::error::{PowerlineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub line: LineConfig,
    pub replay: ReplayConfig,
}

/// Assembly line tuning shared by every stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LineConfig {
    /// Buffers each inter-stage stream holds before the writer blocks.
    pub stream_capacity: usize,
    /// Worker threads per parallel stage.
    pub workers: usize,
    /// Out-of-order buffers an ordered reader may hold.
    pub reorder_window: usize,
    /// How often blocked stages check for cancellation.
    pub poll_interval_ms: u64,
}

/// Recorded capture replay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Samples per buffer read from the capture file.
    pub chunk_size: usize,
    /// Whether the first CSV row is a header.
    pub has_headers: bool,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            stream_capacity: defaults::STREAM_CAPACITY,
            workers: defaults::PARALLEL_WORKERS,
            reorder_window: defaults::REORDER_WINDOW,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

impl LineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            has_headers: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - POWERLINE_WORKERS → line.workers
    /// - POWERLINE_STREAM_CAPACITY → line.stream_capacity
    /// - POWERLINE_CHUNK_SIZE → replay.chunk_size
    ///
    /// Empty or unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(workers) = env_usize("POWERLINE_WORKERS") {
            self.line.workers = workers;
        }

        if let Some(capacity) = env_usize("POWERLINE_STREAM_CAPACITY") {
            self.line.stream_capacity = capacity;
        }

        if let Some(chunk_size) = env_usize("POWERLINE_CHUNK_SIZE") {
            self.replay.chunk_size = chunk_size;
        }

        self
    }

    /// Rejects values the assembly line cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("line.stream_capacity", self.line.stream_capacity),
            ("line.workers", self.line.workers),
            ("line.reorder_window", self.line.reorder_window),
            ("replay.chunk_size", self.replay.chunk_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(PowerlineError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }
        if self.line.poll_interval_ms == 0 {
            return Err(PowerlineError::ConfigInvalidValue {
                key: "line.poll_interval_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/powerline/config.toml on Linux, or `None` when the
    /// platform has no config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("powerline").join("config.toml"))
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse().ok())
}
