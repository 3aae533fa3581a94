use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the default connect timeout.
/// Per-peer config wins over it; the built-in default is 30s.
pub const CONNECT_TIMEOUT_ENV: &str = "MANIFOLD_CONNECT_TIMEOUT";

/// Built-in connect timeout when neither config nor env specifies one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default reconnect attempts when `max_reconnect_attempts` is 0.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}': expected forms like 30, 30s, 5m, 500ms")]
    BadDuration(String),

    #[error("peer '{name}': {reason}")]
    InvalidPeer { name: String, reason: String },
}

// ============================================================================
// Peer config
// ============================================================================

/// How a downstream peer is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawn a subprocess and speak the protocol over stdio.
    #[default]
    Stdio,
    /// Server-sent-events endpoint.
    Sse,
    /// Streamable HTTP endpoint.
    Http,
}

/// Where a peer's configuration came from. Provenance only; no behavior
/// hangs off this beyond status display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigScope {
    #[default]
    User,
    Project,
    Local,
    Runtime,
}

/// Configuration of one downstream peer. Immutable once installed in the
/// registry; replaced wholesale on re-registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Logical name, unique key in the registry.
    pub name: String,
    pub transport: TransportKind,
    /// Subprocess command (stdio transport).
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Endpoint URL (sse / http transports).
    pub url: String,
    /// Extra headers sent on every HTTP request.
    pub headers: HashMap<String, String>,
    /// Per-peer connect timeout; overrides MANIFOLD_CONNECT_TIMEOUT and the
    /// built-in 30s.
    pub connect_timeout: Option<String>,
    /// -1 disables reconnection, 0 means the default of 5.
    pub max_reconnect_attempts: i32,
    /// Empty or "0" disables health checks for this peer.
    pub health_check_interval: String,
    pub scope: ConfigScope,
    /// When set, the peer's tool catalog must not be cached across restarts.
    pub dynamic: bool,
}

impl PeerConfig {
    /// Resolve the effective connect timeout: per-peer config beats the
    /// environment variable, which beats the built-in default.
    pub fn effective_connect_timeout(&self) -> Result<Duration, ConfigError> {
        if let Some(raw) = &self.connect_timeout {
            return parse_duration(raw);
        }
        if let Ok(raw) = std::env::var(CONNECT_TIMEOUT_ENV) {
            if !raw.trim().is_empty() {
                return parse_duration(&raw);
            }
        }
        Ok(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Effective reconnect budget: `None` means reconnection is disabled.
    pub fn reconnect_budget(&self) -> Option<u32> {
        match self.max_reconnect_attempts {
            n if n < 0 => None,
            0 => Some(DEFAULT_RECONNECT_ATTEMPTS),
            n => Some(n as u32),
        }
    }

    /// Validate transport-specific requirements before any connect attempt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidPeer {
                name: self.name.clone(),
                reason: "peer name must not be empty".into(),
            });
        }
        match self.transport {
            TransportKind::Stdio if self.command.trim().is_empty() => {
                Err(ConfigError::InvalidPeer {
                    name: self.name.clone(),
                    reason: "stdio transport requires a command".into(),
                })
            }
            TransportKind::Sse | TransportKind::Http if self.url.trim().is_empty() => {
                Err(ConfigError::InvalidPeer {
                    name: self.name.clone(),
                    reason: format!("{:?} transport requires a url", self.transport),
                })
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Top-level config
// ============================================================================

/// Top-level gateway configuration, loaded from TOML with defaults for
/// every missing field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Global health-check interval; empty or "0" disables the monitor.
    pub health_check_interval: String,
    /// Override for the tool-catalog cache file location.
    pub cache_path: Option<String>,
    /// Override for the token file location.
    pub auth_path: Option<String>,
    pub peers: Vec<PeerConfig>,
}

impl GatewayConfig {
    /// Load config from a TOML file, then apply env overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: GatewayConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file doesn't exist, return defaults
    /// with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MANIFOLD_HEALTH_INTERVAL") {
            self.health_check_interval = v;
        }
        if let Ok(v) = std::env::var("MANIFOLD_CACHE_PATH") {
            self.cache_path = Some(v);
        }
        if let Ok(v) = std::env::var("MANIFOLD_AUTH_PATH") {
            self.auth_path = Some(v);
        }
    }
}

// ============================================================================
// Duration / interval parsing
// ============================================================================

/// Parse a duration string. Bare numbers are seconds; `ms`, `s` and `m`
/// suffixes are accepted.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(ConfigError::BadDuration(raw.to_string()));
    }
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| ConfigError::BadDuration(raw.to_string()))?;
    match unit {
        "" | "s" => Ok(Duration::from_secs(n)),
        "ms" => Ok(Duration::from_millis(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        _ => Err(ConfigError::BadDuration(raw.to_string())),
    }
}

/// Parse a health-check interval. Empty and "0" disable the check and
/// yield `None`.
pub fn parse_interval(raw: &str) -> Result<Option<Duration>, ConfigError> {
    let s = raw.trim();
    if s.is_empty() || s == "0" {
        return Ok(None);
    }
    parse_duration(s).map(Some)
}
