//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_HOST, PARLEY_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use parley_core::RateLimitRule;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Authentication endpoint rate limits.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Password hashing.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message text length in characters.
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval advertised to clients, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// One fixed window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per window.
    pub max: u32,
}

impl WindowConfig {
    /// Get the window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limits for the authentication endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Signup attempts per IP.
    #[serde(default = "default_signup_window")]
    pub signup: WindowConfig,

    /// Login attempts per IP.
    #[serde(default = "default_login_ip_window")]
    pub login_ip: WindowConfig,

    /// Failed login attempts per account.
    #[serde(default = "default_login_account_window")]
    pub login_account: WindowConfig,

    /// How often expired windows are swept, in seconds.
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,

    /// Key clients by the first `x-forwarded-for` entry instead of the
    /// socket peer. Only enable behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    /// Rule for the signup stage.
    #[must_use]
    pub fn signup_rule(&self) -> RateLimitRule {
        RateLimitRule::per_ip(self.signup.window(), self.signup.max)
    }

    /// Rule for the login IP stage.
    #[must_use]
    pub fn login_ip_rule(&self) -> RateLimitRule {
        RateLimitRule::per_ip(self.login_ip.window(), self.login_ip.max)
    }

    /// Rule for the login account stage.
    #[must_use]
    pub fn login_account_rule(&self) -> RateLimitRule {
        RateLimitRule::failed_attempts_per_account(
            self.login_account.window(),
            self.login_account.max,
        )
    }
}

/// Password hashing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Argon2 memory cost in KiB.
    #[serde(default = "default_hash_memory_kib")]
    pub hash_memory_kib: u32,

    /// Argon2 iteration count.
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,

    /// Minimum password length.
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5001)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_text_len() -> usize {
    parley_core::pipeline::DEFAULT_MAX_TEXT_LEN
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024 // 10 MB
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_window_secs() -> u64 {
    15 * 60
}

fn default_signup_window() -> WindowConfig {
    WindowConfig {
        window_secs: default_window_secs(),
        max: 10,
    }
}

fn default_login_ip_window() -> WindowConfig {
    WindowConfig {
        window_secs: default_window_secs(),
        max: 50,
    }
}

fn default_login_account_window() -> WindowConfig {
    WindowConfig {
        window_secs: default_window_secs(),
        max: 5,
    }
}

fn default_prune_interval() -> u64 {
    60
}

fn default_hash_memory_kib() -> u32 {
    19 * 1024
}

fn default_hash_iterations() -> u32 {
    2
}

fn default_min_password_len() -> usize {
    6
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_len: default_max_text_len(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            signup: default_signup_window(),
            login_ip: default_login_ip_window(),
            login_account: default_login_account_window(),
            prune_interval_secs: default_prune_interval(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hash_memory_kib: default_hash_memory_kib(),
            hash_iterations: default_hash_iterations(),
            min_password_len: default_min_password_len(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}
