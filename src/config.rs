//! # Configuration Management
//!
//! Centralized configuration for the identity directory service.
//!
//! ## Configuration Sources
//! - TOML files via [`DirectoryConfig::from_file`]
//! - Direct instantiation with defaults
//! - `LORAWAN_STORAGE_*` environment variables via [`DirectoryConfig::from_env`]
//!
//! ## Sections
//! - `server`: listen addresses, listener mode, response capacity
//! - `auth`: the code / access code pair every request must carry
//! - `storage`: backend selection and the optional NetID range policy
//! - `logging`: subscriber setup

use crate::core::types::NetId;
use crate::core::wire::OPERATION_RESPONSE_SIZE;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Default UDP/TCP listen port
pub const DEFAULT_PORT: u16 = 4244;

/// Default JSON listener port
pub const DEFAULT_JSON_PORT: u16 = 4246;

/// Default authorization code
pub const DEFAULT_CODE: i32 = 42;

/// Default access code
pub const DEFAULT_ACCESS_CODE: u64 = 0x2A;

/// Default response buffer capacity in bytes
pub const DEFAULT_RESPONSE_CAPACITY: usize = 4096;

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DirectoryConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `LORAWAN_STORAGE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `LORAWAN_STORAGE_*` environment variables on top of `self`
    pub fn apply_env(&mut self) -> Result<()> {
        let var = |name: &str| std::env::var(format!("LORAWAN_STORAGE_{name}")).ok();

        if let Some(addr) = var("ADDRESS") {
            self.server.address = addr;
        }
        if let Some(mode) = var("MODE") {
            self.server.mode = mode.parse()?;
        }
        if let Some(addr) = var("JSON_ADDRESS") {
            self.server.json_address = Some(addr);
        }
        if let Some(capacity) = var("RESPONSE_CAPACITY") {
            self.server.response_capacity = capacity.parse().map_err(|e| {
                ProtocolError::ConfigError(format!("LORAWAN_STORAGE_RESPONSE_CAPACITY: {e}"))
            })?;
        }
        if let Some(code) = var("CODE") {
            self.auth.code = code
                .parse()
                .map_err(|e| ProtocolError::ConfigError(format!("LORAWAN_STORAGE_CODE: {e}")))?;
        }
        if let Some(access) = var("ACCESS_CODE") {
            self.auth.access_code = parse_access_code(&access)?;
        }
        if let Some(backend) = var("BACKEND") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(path) = var("DB") {
            self.storage.identity_path = PathBuf::from(path);
        }
        if let Some(path) = var("GATEWAY_DB") {
            self.storage.gateway_path = PathBuf::from(path);
        }
        if let Some(net_id) = var("NET_ID") {
            self.storage.net_id = Some(net_id.parse()?);
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.log_level = level
                .parse()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }
        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Parse an access code written in hexadecimal, with or without `0x`
pub fn parse_access_code(value: &str) -> Result<u64> {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(digits, 16)
        .map_err(|e| ProtocolError::ConfigError(format!("Invalid access code '{value}': {e}")))
}

/// How the binary protocol is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerMode {
    /// One thread per socket, one request at a time
    Blocking,
    /// Single-threaded reactor multiplexing UDP and TCP
    #[default]
    EventLoop,
}

impl std::str::FromStr for ListenerMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocking" | "sync" => Ok(ListenerMode::Blocking),
            "event-loop" | "event_loop" | "async" => Ok(ListenerMode::EventLoop),
            other => Err(ProtocolError::ConfigError(format!(
                "Unknown listener mode '{other}' (expected 'blocking' or 'event-loop')"
            ))),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP (and TCP) listen address, e.g. "0.0.0.0:4244"
    pub address: String,

    pub mode: ListenerMode,

    /// Also accept TCP connections on `address`
    pub tcp_enabled: bool,

    /// Newline-delimited JSON listener, disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_address: Option<String>,

    /// Largest response the service will emit; longer lists are truncated
    pub response_capacity: usize,

    /// How often blocking listeners check for shutdown
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            mode: ListenerMode::default(),
            tcp_enabled: true,
            json_address: None,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address.parse().map_err(|e| {
            ProtocolError::ConfigError(format!("Invalid server address '{}': {e}", self.address))
        })
    }

    pub fn json_socket_addr(&self) -> Result<Option<SocketAddr>> {
        self.json_address
            .as_deref()
            .map(|addr| {
                addr.parse().map_err(|e| {
                    ProtocolError::ConfigError(format!("Invalid JSON address '{addr}': {e}"))
                })
            })
            .transpose()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:4244')",
                self.address
            ));
        }

        if let Some(json) = &self.json_address {
            match json.parse::<SocketAddr>() {
                Err(_) => errors.push(format!(
                    "Invalid JSON listener address format: '{json}' (expected format: '0.0.0.0:{DEFAULT_JSON_PORT}')"
                )),
                Ok(addr) if self.tcp_enabled && Some(addr) == self.address.parse().ok() => errors
                    .push("JSON listener cannot share the binary TCP address".to_string()),
                Ok(_) => {}
            }
        }

        if self.response_capacity < OPERATION_RESPONSE_SIZE {
            errors.push(format!(
                "Response capacity too small: {} (minimum: {OPERATION_RESPONSE_SIZE})",
                self.response_capacity
            ));
        } else if self.response_capacity > MAX_DATAGRAM_SIZE {
            errors.push(format!(
                "Response capacity too large: {} (maximum: {MAX_DATAGRAM_SIZE})",
                self.response_capacity
            ));
        }

        if self.poll_interval.as_millis() < 10 {
            errors.push("Poll interval too short (minimum: 10ms)".to_string());
        } else if self.poll_interval.as_secs() > 10 {
            errors.push("Poll interval too long (maximum: 10s)".to_string());
        }

        errors
    }
}

/// Shared-secret pair every request must carry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub code: i32,

    #[serde(with = "hex_u64_serde")]
    pub access_code: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            code: DEFAULT_CODE,
            access_code: DEFAULT_ACCESS_CODE,
        }
    }
}

/// Persistence backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Json,
}

impl std::str::FromStr for StorageBackend {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "json" => Ok(StorageBackend::Json),
            other => Err(ProtocolError::ConfigError(format!(
                "Unknown storage backend '{other}' (expected 'memory' or 'json')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Identity file (json backend)
    pub identity_path: PathBuf,

    /// Gateway file (json backend)
    pub gateway_path: PathBuf,

    /// Reject device addresses outside this network's range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_id: Option<NetId>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            identity_path: PathBuf::from("identity.json"),
            gateway_path: PathBuf::from("gateway.json"),
            net_id: None,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.backend == StorageBackend::Json {
            for (name, path) in [
                ("identity_path", &self.identity_path),
                ("gateway_path", &self.gateway_path),
            ] {
                if path.as_os_str().is_empty() {
                    errors.push(format!("{name} must be set for the json backend"));
                } else if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Storage directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            }
            if self.identity_path == self.gateway_path {
                errors.push("identity_path and gateway_path must differ".to_string());
            }
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("lorawan-storage"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Duration as milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// u64 as a hex string ("2A")
mod hex_u64_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{value:X}"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        super::parse_access_code(&text).map_err(serde::de::Error::custom)
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
