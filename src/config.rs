//! Bridge Configuration
//!
//! Handles parsing and management of bridge.toml configuration files, and
//! holds the configuration active for this process.

use std::path::Path;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{FIRST_HANDLE, NULL_HANDLE};

/// File name searched for by [`BridgeConfig::find_and_load`].
pub const CONFIG_FILE_NAME: &str = "bridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching bridge.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Handle table settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Socket defaults
    #[serde(default)]
    pub socket: SocketConfig,

    /// TLS defaults
    #[serde(default)]
    pub tls: TlsConfig,

    /// RSA key generation defaults
    #[serde(default)]
    pub rsa: RsaConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                log::debug!("using configuration at {}", config_path.display());
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialize: {}", e)))
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.registry.first_handle == NULL_HANDLE {
            return Err(ConfigError::Invalid(
                "registry.first_handle must be greater than 0".to_string(),
            ));
        }
        if self.socket.backlog <= 0 {
            return Err(ConfigError::Invalid(
                "socket.backlog must be positive".to_string(),
            ));
        }
        let bits = self.rsa.default_key_size;
        if bits < 512 || bits % 8 != 0 {
            return Err(ConfigError::Invalid(format!(
                "rsa.default_key_size {} must be at least 512 and a multiple of 8",
                bits
            )));
        }
        Ok(())
    }
}

/// Handle table settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// First handle the process-wide table issues
    #[serde(default = "default_first_handle")]
    pub first_handle: u64,
}

fn default_first_handle() -> u64 {
    FIRST_HANDLE
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            first_handle: default_first_handle(),
        }
    }
}

/// Socket defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Connect timeout in milliseconds when the caller passes 0 (0 = blocking)
    #[serde(default)]
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds (0 = none)
    #[serde(default)]
    pub read_timeout_ms: u64,

    /// Write timeout in milliseconds (0 = none)
    #[serde(default)]
    pub write_timeout_ms: u64,

    /// Listen backlog when the caller passes 0
    #[serde(default = "default_backlog")]
    pub backlog: i32,

    /// Set SO_REUSEADDR on newly created sockets
    #[serde(default = "default_true")]
    pub reuse_address: bool,
}

fn default_backlog() -> i32 {
    128
}

fn default_true() -> bool {
    true
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            backlog: default_backlog(),
            reuse_address: true,
        }
    }
}

/// TLS defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Trust the bundled Mozilla roots when no trust file is set
    #[serde(default)]
    pub use_webpki_roots: bool,

    /// Servers ask for a client certificate unless told otherwise
    #[serde(default)]
    pub require_client_auth: bool,
}

/// RSA key generation defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsaConfig {
    /// Modulus size used when a generator has no explicit size
    #[serde(default = "default_key_size")]
    pub default_key_size: usize,
}

fn default_key_size() -> usize {
    2048
}

impl Default for RsaConfig {
    fn default() -> Self {
        Self {
            default_key_size: default_key_size(),
        }
    }
}

// =============================================================================
// Active configuration
// =============================================================================

static ACTIVE: OnceCell<BridgeConfig> = OnceCell::new();

/// Make `config` the configuration for this process.
///
/// Fails if a configuration is already active, including the defaults that
/// [`current`] installs on first read.
pub fn install(config: BridgeConfig) -> ConfigResult<()> {
    config.validate()?;
    ACTIVE
        .set(config)
        .map_err(|_| ConfigError::Invalid("configuration already installed".to_string()))?;
    log::debug!("configuration installed");
    Ok(())
}

/// The active configuration, installing defaults if none was set.
pub fn current() -> &'static BridgeConfig {
    ACTIVE.get_or_init(BridgeConfig::default)
}
