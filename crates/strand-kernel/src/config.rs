//! Kernel configuration.
//!
//! Every field has a default, so an empty TOML document (or a missing file)
//! yields [`KernelConfig::default`].
//!
//! ```toml
//! read_chunk_size = 8192
//! retained_outcomes = 256
//! max_poll_wait_ms = 50
//! io_poll_interval_ms = 1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{KernelError, Result};

/// Tunables for a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Bytes requested by a terse stream read (a stream yielded under an
    /// index key).
    pub read_chunk_size: usize,
    /// How many exit outcomes to keep for strands awaited after they exited.
    pub retained_outcomes: usize,
    /// Upper bound on a single blocking reactor wait.  Unbounded if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_poll_wait_ms: Option<u64>,
    /// How often the default event queue re-polls watched streams.
    pub io_poll_interval_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 8192,
            retained_outcomes: 256,
            max_poll_wait_ms: None,
            io_poll_interval_ms: 1,
        }
    }
}

impl KernelConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.  A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = ?path, "configuration file does not exist, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = ?path, "configuration loaded from file");
        Ok(config)
    }

    /// Reject values the kernel cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            return Err(KernelError::Config {
                reason: "read_chunk_size must be at least 1".into(),
            });
        }
        if self.io_poll_interval_ms == 0 {
            return Err(KernelError::Config {
                reason: "io_poll_interval_ms must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn max_poll_wait(&self) -> Option<Duration> {
        self.max_poll_wait_ms.map(Duration::from_millis)
    }

    pub fn io_poll_interval(&self) -> Duration {
        Duration::from_millis(self.io_poll_interval_ms)
    }
}
