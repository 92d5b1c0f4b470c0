//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`tapline.toml`, `/etc/tapline/tapline.toml`,
//!   `~/.config/tapline/tapline.toml`, first match wins)
//! - An explicit TOML file named by `TAPLINE_CONFIG`
//! - Environment variables (`TAPLINE_*`, nested keys joined with `__`,
//!   e.g. `TAPLINE_PUSH__ENABLED=false`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tapline_core::{NotificationTemplate, RelayConfig};
use tapline_push::EXPO_PUSH_ENDPOINT;

/// Environment variable naming an explicit config file.
///
/// When set, only that file is read and `TAPLINE_*` overrides are skipped.
pub const CONFIG_PATH_ENV: &str = "TAPLINE_CONFIG";

/// Config file search paths.
const CONFIG_PATHS: [&str; 3] = [
    "tapline.toml",
    "/etc/tapline/tapline.toml",
    "~/.config/tapline/tapline.toml",
];

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

    /// Relay policy.
    #[serde(default)]
    pub relay: RelaySettings,

    /// Push gateway configuration.
    #[serde(default)]
    pub push: PushConfig,

    /// Pairs registered at startup.
    #[serde(default = "default_pairs")]
    pub pairs: Vec<PairConfig>,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket endpoint path.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound realtime message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Relay policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Send a push when the recipient's live connection turns out closed.
    #[serde(default = "default_true")]
    pub push_on_realtime_failure: bool,
}

/// Push gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Send push notifications through Expo.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Expo push endpoint.
    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,

    /// Push request timeout in milliseconds.
    #[serde(default = "default_push_timeout")]
    pub timeout_ms: u64,

    /// Notification title.
    #[serde(default = "default_push_title")]
    pub title: String,

    /// Notification body; `{from}` is replaced by the sender's name.
    #[serde(default = "default_push_body")]
    pub body: String,

    /// Display names by participant id.
    #[serde(default)]
    pub display_names: HashMap<String, String>,
}

/// A pair registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairConfig {
    /// Pair identifier.
    pub id: String,
    /// The two members.
    pub members: [String; 2],
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

// Default value functions
fn default_host() -> String {
    std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    4 * 1024 // 4 KB
}

fn default_push_endpoint() -> String {
    EXPO_PUSH_ENDPOINT.to_string()
}

fn default_push_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_push_title() -> String {
    NotificationTemplate::default().title
}

fn default_push_body() -> String {
    NotificationTemplate::default().body
}

fn default_pairs() -> Vec<PairConfig> {
    vec![PairConfig {
        id: "default".to_string(),
        members: ["me".to_string(), "gf".to_string()],
    }]
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            relay: RelaySettings::default(),
            push: PushConfig::default(),
            pairs: default_pairs(),
            metrics: MetricsConfig::default(),
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
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            push_on_realtime_failure: true,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_push_endpoint(),
            timeout_ms: default_push_timeout(),
            title: default_push_title(),
            body: default_push_body(),
            display_names: HashMap::new(),
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

impl PushConfig {
    /// Push request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from the first config file found, then apply
    /// `TAPLINE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(::config::File::with_name(expanded.as_ref()));
                break;
            }
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("TAPLINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
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
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Build the relay configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            push_on_realtime_failure: self.relay.push_on_realtime_failure,
            push_timeout: self.push.timeout(),
            notification: NotificationTemplate {
                title: self.push.title.clone(),
                body: self.push.body.clone(),
                display_names: self.push.display_names.clone(),
            },
        }
    }
}
