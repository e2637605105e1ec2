// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-driven configuration (§6 Environment), all settings
//! documented with defaults. Values are read once at startup; nothing here
//! re-reads the environment at call time.

use std::time::Duration;

/// Persistence mode for plugin-declared freezable state (Design Notes:
/// "Checkpointing freezable attributes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPersistMode {
    Memory,
    Interval,
    Always,
}

impl CheckpointPersistMode {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "memory" => Self::Memory,
            "interval" => Self::Interval,
            "always" => Self::Always,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub event_queue_max: usize,
    pub lifecycle_queue_max: usize,
    pub message_queue_max: usize,

    pub plugin_execution_timeout: Duration,
    pub plugin_trigger_timeout: Duration,
    pub plugin_shutdown_timeout: Duration,
    pub plugin_shutdown_total_timeout: Duration,
    pub queue_get_timeout: Duration,

    pub communication_thread_pool_max_workers: usize,

    pub plugin_health_poll_interval: Duration,
    pub debounce_max_pending: usize,

    pub bus_dispatch_concurrency: usize,
    pub bus_dispatch_push_timeout: Duration,
    pub bus_dispatch_failure_threshold: u32,
    pub bus_dispatch_pause: Duration,

    pub message_plane_validation_mode: EnvelopeValidationMode,

    pub checkpoint_persist_mode: CheckpointPersistMode,
    pub checkpoint_persist_interval: Duration,

    pub run_token_secret: String,
    pub run_token_ttl: Duration,
    pub blob_upload_max_bytes: u64,

    /// `host:port` the fast-plane RPC listener binds to.
    pub fast_plane_bind: String,
    /// `host:port` the `/ws/run` listener binds to.
    pub ws_bind: String,
    /// Root directory for on-disk state: checkpoints, run records, blobs.
    pub state_dir: std::path::PathBuf,
    /// Directory scanned for plugin manifests (`*.toml`) at startup.
    pub plugins_dir: std::path::PathBuf,
    pub shutdown_timeout: Duration,
}

/// Validation strictness for the fast-plane RPC/push envelopes (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeValidationMode {
    Off,
    Warn,
    Strict,
}

impl EnvelopeValidationMode {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "off" => Self::Off,
            "warn" => Self::Warn,
            "strict" => Self::Strict,
            _ => return None,
        })
    }
}

/// Default root for on-disk state when `PLUGBOARD_STATE_DIR` isn't set.
/// Mirrors `pb_adapters::process::default_state_dir`, which plugin log
/// files use independently — both fall back to the same XDG state path.
pub fn default_state_dir() -> std::path::PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .unwrap_or_else(|| std::path::PathBuf::from("/tmp"))
        .join("plugboard")
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_secs_or(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_or(key, default_secs))
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            event_queue_max: env_or("EVENT_QUEUE_MAX", 10_000),
            lifecycle_queue_max: env_or("LIFECYCLE_QUEUE_MAX", 10_000),
            message_queue_max: env_or("MESSAGE_QUEUE_MAX", 10_000),

            plugin_execution_timeout: env_secs_or("PLUGIN_EXECUTION_TIMEOUT", 30),
            plugin_trigger_timeout: env_secs_or("PLUGIN_TRIGGER_TIMEOUT", 30),
            plugin_shutdown_timeout: env_secs_or("PLUGIN_SHUTDOWN_TIMEOUT", 10),
            plugin_shutdown_total_timeout: env_secs_or("PLUGIN_SHUTDOWN_TOTAL_TIMEOUT", 30),
            queue_get_timeout: Duration::from_millis(env_or("QUEUE_GET_TIMEOUT_MS", 200)),

            communication_thread_pool_max_workers: env_or(
                "COMMUNICATION_THREAD_POOL_MAX_WORKERS",
                32,
            ),

            plugin_health_poll_interval: env_secs_or("PLUGIN_HEALTH_POLL_INTERVAL", 5),
            debounce_max_pending: env_or("DEBOUNCE_MAX_PENDING", 256),

            bus_dispatch_concurrency: env_or("BUS_DISPATCH_CONCURRENCY", 64),
            bus_dispatch_push_timeout: Duration::from_millis(env_or("BUS_DISPATCH_PUSH_TIMEOUT_MS", 1_000)),
            bus_dispatch_failure_threshold: env_or("BUS_DISPATCH_FAILURE_THRESHOLD", 3),
            bus_dispatch_pause: env_secs_or("BUS_DISPATCH_PAUSE_SECONDS", 5),

            message_plane_validation_mode: std::env::var("MESSAGE_PLANE_VALIDATION_MODE")
                .ok()
                .and_then(|v| EnvelopeValidationMode::parse(&v))
                .unwrap_or(EnvelopeValidationMode::Warn),

            checkpoint_persist_mode: std::env::var("CHECKPOINT_PERSIST_MODE")
                .ok()
                .and_then(|v| CheckpointPersistMode::parse(&v))
                .unwrap_or(CheckpointPersistMode::Interval),
            checkpoint_persist_interval: env_secs_or("CHECKPOINT_PERSIST_INTERVAL", 60),

            run_token_secret: std::env::var("RUN_TOKEN_SECRET")
                .unwrap_or_else(|_| "dev-insecure-run-token-secret".to_string()),
            run_token_ttl: env_secs_or("RUN_TOKEN_TTL_SECONDS", 3600),
            blob_upload_max_bytes: env_or("BLOB_UPLOAD_MAX_BYTES", 64 * 1024 * 1024),

            fast_plane_bind: std::env::var("PLUGBOARD_FAST_PLANE_BIND")
                .unwrap_or_else(|_| "127.0.0.1:7420".to_string()),
            ws_bind: std::env::var("PLUGBOARD_WS_BIND")
                .unwrap_or_else(|_| "127.0.0.1:7421".to_string()),
            state_dir: std::env::var("PLUGBOARD_STATE_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| default_state_dir()),
            plugins_dir: std::env::var("PLUGBOARD_PLUGINS_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| default_state_dir().join("plugins")),
            shutdown_timeout: env_secs_or("PLUGBOARD_SHUTDOWN_TIMEOUT_SECONDS", 30),
        }
    }
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(env)]
    fn defaults_apply_when_unset() {
        std::env::remove_var("PLUGIN_EXECUTION_TIMEOUT");
        let cfg = HostConfig::from_env();
        assert_eq!(cfg.plugin_execution_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial(env)]
    fn env_override_is_honored() {
        std::env::set_var("PLUGIN_EXECUTION_TIMEOUT", "5");
        let cfg = HostConfig::from_env();
        assert_eq!(cfg.plugin_execution_timeout, Duration::from_secs(5));
        std::env::remove_var("PLUGIN_EXECUTION_TIMEOUT");
    }

    #[test]
    fn validation_mode_parses_known_values() {
        assert_eq!(EnvelopeValidationMode::parse("strict"), Some(EnvelopeValidationMode::Strict));
        assert_eq!(EnvelopeValidationMode::parse("bogus"), None);
    }
}
