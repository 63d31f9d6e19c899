//! Server configuration.

use serde::{Deserialize, Serialize};

use huddle_workflows::DEFAULT_STEP_TIMEOUT;

/// Configuration for the huddle server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server-initiated pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close the socket after this long without a pong, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Default timeout for workflow HTTP steps, in seconds.
    pub step_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024, // 1 MB
            step_timeout_secs: DEFAULT_STEP_TIMEOUT.as_secs(),
        }
    }
}

impl ServerConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Parsing is strict: out-of-range or malformed values are silently
    /// ignored and the default stands.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// Apply `HUDDLE_*` environment overrides to this config.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("HUDDLE_HOST") {
            self.host = v;
        }
        if let Some(v) = read_env_u16("HUDDLE_PORT", 0, 65535) {
            self.port = v;
        }
        if let Some(v) = read_env_usize("HUDDLE_MAX_CONNECTIONS", 1, 100_000) {
            self.max_connections = v;
        }
        if let Some(v) = read_env_u64("HUDDLE_HEARTBEAT_INTERVAL", 1, 600) {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = read_env_u64("HUDDLE_HEARTBEAT_TIMEOUT", 1, 3600) {
            self.heartbeat_timeout_secs = v;
        }
        if let Some(v) = read_env_usize("HUDDLE_MAX_MESSAGE_SIZE", 1024, 64 * 1024 * 1024) {
            self.max_message_size = v;
        }
        if let Some(v) = read_env_u64("HUDDLE_STEP_TIMEOUT", 1, 600) {
            self.step_timeout_secs = v;
        }
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    std::env::var(name)
        .ok()?
        .parse::<u16>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name)
        .ok()?
        .parse::<u64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    std::env::var(name)
        .ok()?
        .parse::<usize>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}
