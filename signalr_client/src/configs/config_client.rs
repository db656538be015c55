use std::path::Path;
use std::time::Duration;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "SIGNALR_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
}

/// # Client Configuration
///
/// Timing and sizing knobs for the transports. Every field has a default, so
/// a partial JSON file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Delay before the streaming transport reopens a dropped stream.
    pub sse_reconnect_delay_ms: u64,
    /// Window for the initial streaming connect to report `initialized`.
    pub sse_connection_timeout_ms: u64,
    /// Delay before long polling declares a reconnect while a poll is held open.
    pub long_polling_reconnect_delay_ms: u64,
    /// Pause after a steady-state long-polling fault.
    pub error_backoff_ms: u64,
    /// Bounded wait for the best-effort `abort` request on stop.
    pub abort_timeout_ms: u64,
    /// Group count above which the streaming connect moves groups into a form body.
    pub groups_post_threshold: usize,
    /// Transient retries applied by the reqwest binding.
    pub http_max_retries: u32,
    /// Overrides the default `SignalR.Client/<version> (<os>)` agent string.
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sse_reconnect_delay_ms: 2000,
            sse_connection_timeout_ms: 2000,
            long_polling_reconnect_delay_ms: 5000,
            error_backoff_ms: 2000,
            abort_timeout_ms: 2000,
            groups_post_threshold: 20,
            http_max_retries: 0,
            user_agent: None,
        }
    }
}

impl fmt::Display for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClientConfig
    SSE reconnect delay: {}ms,
    SSE connection timeout: {}ms,
    Long polling reconnect delay: {}ms,
    Error backoff: {}ms,
    Abort timeout: {}ms,
    Groups POST threshold: {},
    HTTP max retries: {},
    User agent: {}
",
            self.sse_reconnect_delay_ms,
            self.sse_connection_timeout_ms,
            self.long_polling_reconnect_delay_ms,
            self.error_backoff_ms,
            self.abort_timeout_ms,
            self.groups_post_threshold,
            self.http_max_retries,
            self.user_agent()
        )
    }
}

impl ClientConfig {
    /// Loads a JSON file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config = serde_json::from_str::<ClientConfig>(&raw)?;
        log::info!("Loaded client configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults, then the optional file, then `SIGNALR_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()
    }

    /// Overrides fields from `SIGNALR_<FIELD>` variables, e.g.
    /// `SIGNALR_SSE_RECONNECT_DELAY_MS=500`.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|name| env::var(name).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |field: &str| {
            let name = format!("{}{}", ENV_PREFIX, field);
            lookup(&name).map(|value| (name, value))
        };

        if let Some(v) = read("SSE_RECONNECT_DELAY_MS") {
            self.sse_reconnect_delay_ms = parse_var(v)?;
        }
        if let Some(v) = read("SSE_CONNECTION_TIMEOUT_MS") {
            self.sse_connection_timeout_ms = parse_var(v)?;
        }
        if let Some(v) = read("LONG_POLLING_RECONNECT_DELAY_MS") {
            self.long_polling_reconnect_delay_ms = parse_var(v)?;
        }
        if let Some(v) = read("ERROR_BACKOFF_MS") {
            self.error_backoff_ms = parse_var(v)?;
        }
        if let Some(v) = read("ABORT_TIMEOUT_MS") {
            self.abort_timeout_ms = parse_var(v)?;
        }
        if let Some(v) = read("GROUPS_POST_THRESHOLD") {
            self.groups_post_threshold = parse_var(v)?;
        }
        if let Some(v) = read("HTTP_MAX_RETRIES") {
            self.http_max_retries = parse_var(v)?;
        }
        if let Some((_, v)) = read("USER_AGENT") {
            self.user_agent = Some(v);
        }
        Ok(self)
    }

    pub fn sse_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.sse_reconnect_delay_ms)
    }

    pub fn sse_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.sse_connection_timeout_ms)
    }

    pub fn long_polling_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.long_polling_reconnect_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn abort_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_timeout_ms)
    }

    /// The configured agent, or `SignalR.Client/<crate version> (<os>)`.
    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!(
                "SignalR.Client/{} ({})",
                env!("CARGO_PKG_VERSION"),
                env::consts::OS
            )
        })
    }
}

fn parse_var<T: std::str::FromStr>((name, value): (String, String)) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidEnvVar { name, value })
}
