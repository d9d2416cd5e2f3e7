//! Gateway configuration loading from file and environment variables.

use fedgate_negotiation::{NegotiationSettings, PollBudget, DATASPACE_PROTOCOL};
use fedgate_types::{NodeRegistry, RegistryError, RemoteNode};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// The local backend every non-federated request is proxied to.
    #[serde(default)]
    pub backend: BackendConfig,

    /// The consumer connector's management API.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Federation peers merged into the gateway's namespace.
    #[serde(default)]
    pub nodes: Vec<RemoteNode>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix of the client-facing API; stripped before forwarding.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

/// Local backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL the resource path is appended to.
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Control-plane (management API) settings.
#[derive(Clone, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_management_url")]
    pub management_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default = "default_transfer_type")]
    pub transfer_type: String,

    /// Asset id used by nodes that do not name their own.
    #[serde(default)]
    pub default_asset_id: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Replaces the data-plane endpoint of every issued credential, for
    /// deployments where the advertised endpoint is not routable from here.
    #[serde(default)]
    pub dataplane_endpoint_override: Option<String>,

    /// Timeout for every control-plane and data-plane request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "fedgate_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_api_prefix() -> String {
    "/WebAPI".to_string()
}

fn default_backend_url() -> String {
    "http://localhost:8080/WebAPI".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_management_url() -> String {
    "http://localhost:19193/management/v3".to_string()
}

fn default_protocol() -> String {
    DATASPACE_PROTOCOL.to_string()
}

fn default_transfer_type() -> String {
    "pull".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: default_api_prefix(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            management_url: default_management_url(),
            api_key: String::new(),
            protocol: default_protocol(),
            transfer_type: default_transfer_type(),
            default_asset_id: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
            dataplane_endpoint_override: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for ControlPlaneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneConfig")
            .field("management_url", &self.management_url)
            .field("api_key", &"[REDACTED]")
            .field("protocol", &self.protocol)
            .field("transfer_type", &self.transfer_type)
            .field("default_asset_id", &self.default_asset_id)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("poll_attempts", &self.poll_attempts)
            .field("dataplane_endpoint_override", &self.dataplane_endpoint_override)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ControlPlaneConfig {
    pub fn negotiation_settings(&self) -> NegotiationSettings {
        NegotiationSettings {
            protocol: self.protocol.clone(),
            transfer_type: self.transfer_type.clone(),
            endpoint_override: self.dataplane_endpoint_override.clone(),
            budget: PollBudget {
                interval: Duration::from_millis(self.poll_interval_ms),
                max_attempts: self.poll_attempts,
            },
        }
    }
}

impl Config {
    /// Builds the node registry, filling in the default asset id where a
    /// node does not name its own.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the nodes would make the namespace ambiguous.
    pub fn node_registry(&self) -> Result<NodeRegistry, RegistryError> {
        let nodes = self
            .nodes
            .iter()
            .cloned()
            .map(|mut node| {
                if node.asset_id.trim().is_empty() {
                    node.asset_id = self.control_plane.default_asset_id.clone();
                }
                node
            })
            .collect();
        NodeRegistry::new(nodes)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `FEDGATE_HOST` overrides `server.host`
/// - `FEDGATE_PORT` overrides `server.port`
/// - `FEDGATE_BACKEND_URL` overrides `backend.base_url`
/// - `FEDGATE_MANAGEMENT_URL` overrides `control_plane.management_url`
/// - `FEDGATE_API_KEY` overrides `control_plane.api_key`
/// - `FEDGATE_ASSET_ID` overrides `control_plane.default_asset_id`
/// - `FEDGATE_DATAPLANE_OVERRIDE` overrides `control_plane.dataplane_endpoint_override`
/// - `FEDGATE_LOG_LEVEL` overrides `logging.level`
/// - `FEDGATE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("FEDGATE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("FEDGATE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = var("FEDGATE_BACKEND_URL") {
        config.backend.base_url = url;
    }
    if let Some(url) = var("FEDGATE_MANAGEMENT_URL") {
        config.control_plane.management_url = url;
    }
    if let Some(key) = var("FEDGATE_API_KEY") {
        config.control_plane.api_key = key;
    }
    if let Some(asset_id) = var("FEDGATE_ASSET_ID") {
        config.control_plane.default_asset_id = asset_id;
    }
    if let Some(endpoint) = var("FEDGATE_DATAPLANE_OVERRIDE") {
        config.control_plane.dataplane_endpoint_override =
            Some(endpoint).filter(|e| !e.trim().is_empty());
    }
    if let Some(level) = var("FEDGATE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("FEDGATE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
