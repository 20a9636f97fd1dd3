//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `DOCGATE_`, nested keys separated by `__`)
//! 2. An explicit config file, or `./docgate.toml` when present
//! 3. Default values
//!
//! Example: `DOCGATE_STORE__COLLECTION=people` overrides `store.collection`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DOCGATE_";

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "docgate.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Document store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Gateway behavior
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Request body size limit in MB
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable output for local development
    Pretty,
}

/// Which document store implementation backs the gateway
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// MongoDB via the official driver
    #[default]
    Mongodb,
    /// In-process store, contents are lost on exit
    Memory,
}

/// Document store configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Store host address
    #[serde(default = "default_store_address")]
    pub address: String,

    /// Store port
    #[serde(default = "default_store_port")]
    pub port: u16,

    /// Database name
    #[serde(default = "default_database")]
    pub database: String,

    /// Collection exposed by the gateway
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Username; empty means no credentials are sent
    #[serde(default)]
    pub username: String,

    /// Password
    #[serde(default)]
    pub password: String,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Timeout for establishing one connection, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long a request waits for a free pooled connection, in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Deadline for each store round-trip, in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Maximum retry attempts when verifying connectivity at startup
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between startup retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Skip the startup connectivity check and connect on first request
    #[serde(default = "default_true")]
    pub lazy_init: bool,
}

/// Gateway behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Route the collection resource is served on
    #[serde(default = "default_gateway_path")]
    pub path: String,

    /// Answer 304 to any request carrying `If-Modified-Since`
    ///
    /// No last-modified tracking exists, so the answer ignores document
    /// timestamps entirely. Off unless a deployment depends on it.
    #[serde(default)]
    pub honor_if_modified_since: bool,

    /// Largest serialized response body in MB
    #[serde(default = "default_max_response_mb")]
    pub max_response_mb: usize,
}

impl StoreConfig {
    /// Whether credentials should be presented to the store
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }

    /// Connection URI with the password masked, safe for logs
    pub fn redacted_uri(&self) -> String {
        if self.has_credentials() {
            format!(
                "mongodb://{}:***@{}:{}/{}",
                self.username, self.address, self.port, self.database
            )
        } else {
            format!("mongodb://{}:{}/{}", self.address, self.port, self.database)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// A copy with the password masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "***".to_string();
        }
        copy
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("uri", &self.redacted_uri())
            .field("collection", &self.collection)
            .field("max_connections", &self.max_connections)
            .field("op_timeout_ms", &self.op_timeout_ms)
            .field("lazy_init", &self.lazy_init)
            .finish()
    }
}

impl GatewayConfig {
    pub fn max_response_bytes(&self) -> usize {
        self.max_response_mb.saturating_mul(1024 * 1024)
    }
}

impl ServiceConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Default value functions
fn default_service_name() -> String {
    "docgate".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_body_limit_mb() -> usize {
    10
}

fn default_store_address() -> String {
    "127.0.0.1".to_string()
}

fn default_store_port() -> u16 {
    27017
}

fn default_database() -> String {
    "test".to_string()
}

fn default_collection() -> String {
    "test".to_string()
}

fn default_max_connections() -> usize {
    16
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_op_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_gateway_path() -> String {
    "/".to_string()
}

fn default_max_response_mb() -> usize {
    16
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            timeout_secs: default_timeout(),
            body_limit_mb: default_body_limit_mb(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            address: default_store_address(),
            port: default_store_port(),
            database: default_database(),
            collection: default_collection(),
            username: String::new(),
            password: String::new(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            lazy_init: true,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            path: default_gateway_path(),
            honor_if_modified_since: false,
            max_response_mb: default_max_response_mb(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, `./docgate.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            tracing::info!("Loading configuration from: {}", local.display());
            Self::load_from(&local)
        } else {
            Self::from_figment(Self::base_figment())
        }
    }

    /// Load configuration from a specific file
    ///
    /// Environment variables still override values from the file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(figment::Error::from(format!(
                "Config file not found: {}",
                path.display()
            ))
            .into());
        }
        let figment = Self::base_figment().merge(Toml::file(path));
        Self::from_figment(figment)
    }

    /// Load from an explicit path when given, otherwise fall back to [`Config::load`]
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    fn base_figment() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        // Environment variables have highest priority
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }
}
