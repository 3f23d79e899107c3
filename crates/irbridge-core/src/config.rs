//! Shared configuration defaults and environment overrides.
//!
//! Every tunable of the pipeline has a default constant in [`defaults`] and
//! an environment variable in [`env_vars`] whose getter falls back to that
//! default when the variable is unset or unparseable.

use std::time::Duration;

/// Default values.
pub mod defaults {
    /// Samples buffered before a size-triggered flush.
    pub const TELEMETRY_BATCH_SIZE: usize = 200;
    /// Milliseconds after the first buffered sample before a timed flush.
    pub const TELEMETRY_FLUSH_MS: u64 = 1000;
    /// Controller identity cache lifetime in seconds.
    pub const CONTROLLER_CACHE_TTL_SECS: u64 = 5 * 60;
    /// Milliseconds a command publish may take before it counts as failed.
    pub const PUBLISH_TIMEOUT_MS: u64 = 10_000;
    /// Number of inbound worker lanes.
    pub const INBOUND_LANES: usize = 4;
    /// Per-lane inbound queue depth.
    pub const INBOUND_LANE_CAPACITY: usize = 1024;
    /// Realtime channel capacity per controller group.
    pub const REALTIME_GROUP_CAPACITY: usize = 256;
    /// Finished commands older than this many days are purged.
    pub const COMMAND_RETENTION_DAYS: i64 = 30;
    /// Telemetry older than this many days is purged.
    pub const TELEMETRY_RETENTION_DAYS: i64 = 90;

    pub const MQTT_HOST: &str = "localhost";
    pub const MQTT_PORT: u16 = 1883;
    pub const MQTT_TLS_PORT: u16 = 8883;
    pub const MQTT_KEEP_ALIVE_SECS: u64 = 60;
    pub const DB_PATH: &str = "data/irbridge.redb";
    /// Local address where a running gateway accepts dispatch requests.
    pub const CONTROL_ADDR: &str = "127.0.0.1:7878";
}

/// Environment variable names and getters.
pub mod env_vars {
    use super::defaults;

    pub const TELEMETRY_BATCH_SIZE: &str = "IRBRIDGE_TELEMETRY_BATCH_SIZE";
    pub const TELEMETRY_FLUSH_MS: &str = "IRBRIDGE_TELEMETRY_FLUSH_MS";
    pub const CONTROLLER_CACHE_TTL_SECS: &str = "IRBRIDGE_CONTROLLER_CACHE_TTL_SECS";
    pub const PUBLISH_TIMEOUT_MS: &str = "IRBRIDGE_PUBLISH_TIMEOUT_MS";
    pub const INBOUND_LANES: &str = "IRBRIDGE_INBOUND_LANES";
    pub const MQTT_HOST: &str = "IRBRIDGE_MQTT_HOST";
    pub const MQTT_PORT: &str = "IRBRIDGE_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "IRBRIDGE_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "IRBRIDGE_MQTT_PASSWORD";
    pub const MQTT_TLS: &str = "IRBRIDGE_MQTT_TLS";
    pub const MQTT_CLIENT_ID: &str = "IRBRIDGE_MQTT_CLIENT_ID";
    pub const DB_PATH: &str = "IRBRIDGE_DB_PATH";
    pub const CONTROL_ADDR: &str = "IRBRIDGE_CONTROL_ADDR";

    fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
    }

    /// Batch size threshold, never zero.
    pub fn telemetry_batch_size() -> usize {
        parsed(TELEMETRY_BATCH_SIZE)
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults::TELEMETRY_BATCH_SIZE)
    }

    pub fn telemetry_flush_ms() -> u64 {
        parsed(TELEMETRY_FLUSH_MS).unwrap_or(defaults::TELEMETRY_FLUSH_MS)
    }

    pub fn controller_cache_ttl_secs() -> u64 {
        parsed(CONTROLLER_CACHE_TTL_SECS).unwrap_or(defaults::CONTROLLER_CACHE_TTL_SECS)
    }

    pub fn publish_timeout_ms() -> u64 {
        parsed(PUBLISH_TIMEOUT_MS).unwrap_or(defaults::PUBLISH_TIMEOUT_MS)
    }

    /// Inbound lane count, never zero.
    pub fn inbound_lanes() -> usize {
        parsed(INBOUND_LANES)
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults::INBOUND_LANES)
    }

    pub fn mqtt_host() -> String {
        std::env::var(MQTT_HOST).unwrap_or_else(|_| defaults::MQTT_HOST.to_string())
    }

    /// `true` for `1`, `true`, `yes` or `on` (case-insensitive).
    pub fn mqtt_tls() -> bool {
        std::env::var(MQTT_TLS)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    /// Broker port; defaults to 8883 when TLS is on, 1883 otherwise.
    pub fn mqtt_port() -> u16 {
        parsed(MQTT_PORT).unwrap_or(if mqtt_tls() {
            defaults::MQTT_TLS_PORT
        } else {
            defaults::MQTT_PORT
        })
    }

    pub fn mqtt_username() -> Option<String> {
        std::env::var(MQTT_USERNAME).ok().filter(|s| !s.is_empty())
    }

    pub fn mqtt_password() -> Option<String> {
        std::env::var(MQTT_PASSWORD).ok().filter(|s| !s.is_empty())
    }

    pub fn mqtt_client_id() -> Option<String> {
        std::env::var(MQTT_CLIENT_ID).ok().filter(|s| !s.is_empty())
    }

    pub fn db_path() -> String {
        std::env::var(DB_PATH).unwrap_or_else(|_| defaults::DB_PATH.to_string())
    }

    pub fn control_addr() -> String {
        std::env::var(CONTROL_ADDR).unwrap_or_else(|_| defaults::CONTROL_ADDR.to_string())
    }
}

/// Flush interval as a [`Duration`].
pub fn telemetry_flush_interval() -> Duration {
    Duration::from_millis(env_vars::telemetry_flush_ms())
}

/// Identity cache TTL as a [`Duration`].
pub fn controller_cache_ttl() -> Duration {
    Duration::from_secs(env_vars::controller_cache_ttl_secs())
}

/// Publish timeout as a [`Duration`].
pub fn publish_timeout() -> Duration {
    Duration::from_millis(env_vars::publish_timeout_ms())
}
