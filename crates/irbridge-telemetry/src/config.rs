//! Telemetry pipeline configuration.

use std::time::Duration;

use irbridge_core::config::{defaults, env_vars};
use serde::{Deserialize, Serialize};

/// Tunables for the buffer and the identity cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Samples buffered before a size-triggered flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Milliseconds after the first buffered sample before a timed flush
    #[serde(default = "default_flush_ms")]
    pub flush_interval_ms: u64,

    /// Controller identity cache lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_batch_size() -> usize {
    defaults::TELEMETRY_BATCH_SIZE
}

fn default_flush_ms() -> u64 {
    defaults::TELEMETRY_FLUSH_MS
}

fn default_cache_ttl() -> u64 {
    defaults::CONTROLLER_CACHE_TTL_SECS
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_ms(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl TelemetryConfig {
    /// Read the `IRBRIDGE_*` environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            batch_size: env_vars::telemetry_batch_size(),
            flush_interval_ms: env_vars::telemetry_flush_ms(),
            cache_ttl_secs: env_vars::controller_cache_ttl_secs(),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
