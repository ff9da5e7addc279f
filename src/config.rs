//! pagedsm node configuration

use serde::{Deserialize, Serialize};

/// Default configuration constants
///
/// This module centralizes all default values used throughout pagedsm.
pub mod defaults {

    // Network defaults
    /// Port this node accepts its peer's request stream on
    pub const LISTEN_PORT: u16 = 9000;

    /// Port of the peer's listener (our outbound request stream)
    pub const SEND_PORT: u16 = 9001;

    /// Delay between outbound connection attempts while the peer is not up yet
    pub const CONNECT_RETRY_MS: u64 = 1000;

    pub const fn default_listen_addr() -> &'static str {
        crate::constants::DEFAULT_LISTEN_ADDR
    }

    pub const fn default_peer_host() -> &'static str {
        crate::constants::DEFAULT_PEER_HOST
    }

    // Region defaults
    /// Upper bound on the page count an initiator may allocate
    pub const MAX_PAGES: usize = 1 << 20;

    // Log level
    /// Default log level
    pub const fn default_log_level() -> &'static str {
        "info"
    }
}

/// pagedsm node configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DsmConfig {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Peer link configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Shared region configuration
    #[serde(default)]
    pub region: RegionConfig,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    defaults::default_log_level().to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Peer link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the request server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port the request server listens on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Host running the peer's request server
    #[serde(default = "default_peer_host")]
    pub peer_host: String,

    /// Peer's listen port
    #[serde(default = "default_send_port")]
    pub send_port: u16,

    /// Delay between outbound connection attempts, in milliseconds
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
}

fn default_listen_addr() -> String {
    defaults::default_listen_addr().to_string()
}

fn default_listen_port() -> u16 {
    defaults::LISTEN_PORT
}

fn default_peer_host() -> String {
    defaults::default_peer_host().to_string()
}

fn default_send_port() -> u16 {
    defaults::SEND_PORT
}

fn default_connect_retry_ms() -> u64 {
    defaults::CONNECT_RETRY_MS
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            peer_host: default_peer_host(),
            send_port: default_send_port(),
            connect_retry_ms: default_connect_retry_ms(),
        }
    }
}

impl NetworkConfig {
    /// `host:port` the request server binds to
    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    /// `host:port` of the peer's request server
    pub fn peer_endpoint(&self) -> String {
        format!("{}:{}", self.peer_host, self.send_port)
    }
}

/// Shared region configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Number of pages to allocate when this node becomes the initiator.
    /// When unset, the page count source passed to the node is asked instead.
    #[serde(default)]
    pub pages: Option<usize>,

    /// Largest page count accepted from either the config or the peer
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// How accesses to missing pages are intercepted
    #[serde(default)]
    pub fault_mode: FaultMode,
}

/// Fault interception mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultMode {
    /// The region is registered with userfaultfd and a fault thread serves
    /// every missing-page access, including raw loads and stores.
    #[default]
    Userfaultfd,
    /// Nothing is registered. `DsmNode::read` resolves `Invalid` pages
    /// itself and installs them with plain stores; raw pointer access to the
    /// region bypasses coherence. For hosts that do not permit userfaultfd.
    Explicit,
}

fn default_max_pages() -> usize {
    defaults::MAX_PAGES
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            pages: None,
            max_pages: default_max_pages(),
            fault_mode: FaultMode::default(),
        }
    }
}

impl DsmConfig {
    /// Configuration for a node listening on `listen_port` and sending to the
    /// peer's `send_port`, everything else defaulted.
    pub fn with_ports(listen_port: u16, send_port: u16) -> Self {
        let mut config = Self::default();
        config.network.listen_port = listen_port;
        config.network.send_port = send_port;
        config
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("Failed to read config file: {}", e)))?;

        let config: DsmConfig = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::SerializeError(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.listen_port == 0 || self.network.send_port == 0 {
            return Err(ConfigError::ValidationError(
                "Listen and send ports must be non-zero".to_string(),
            ));
        }

        if self.network.peer_host.is_empty() {
            return Err(ConfigError::ValidationError(
                "Peer host cannot be empty".to_string(),
            ));
        }

        if self.network.connect_retry_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Connect retry interval must be > 0".to_string(),
            ));
        }

        if self.region.max_pages == 0 {
            return Err(ConfigError::ValidationError(
                "max_pages must be > 0".to_string(),
            ));
        }

        if let Some(pages) = self.region.pages {
            self.validate_page_count(pages)?;
        }

        match self.node.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.node.log_level
                )));
            }
        }

        Ok(())
    }

    /// Check a page count requested for allocation against the limits
    pub fn validate_page_count(&self, pages: usize) -> Result<(), ConfigError> {
        if pages == 0 || pages > self.region.max_pages {
            return Err(ConfigError::ValidationError(format!(
                "Page count must be between 1 and {} (got {})",
                self.region.max_pages, pages
            )));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
