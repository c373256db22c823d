//! Configuration structs with defaults and RON persistence.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Client-facing listener and session settings.
    pub proxy: ProxyConfig,
    /// Backend servers in priority order.
    pub servers: Vec<ServerConfig>,
    /// Retry policy for the startup content multiplex.
    pub mux: MuxConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address game clients connect to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent client sessions.
    pub max_clients: usize,
    /// Player name content probes log in with.
    pub probe_user: String,
    /// Destination for new sessions when no join hook picks one.
    pub default_server: String,
    /// A handshake not finished within this window closes the connection.
    pub handshake_timeout_ms: u64,
    /// Interval at which an unanswered `Init` is resent.
    pub init_resend_ms: u64,
    /// Transport idle timeout.
    pub idle_timeout_secs: u64,
    /// Timeout for dialing a backend.
    pub connect_timeout_ms: u64,
}

/// One backend server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    /// `host:port`.
    pub address: String,
    /// Content namespace shared with other servers; empty means the server's own name.
    pub media_pool: String,
    /// Servers tried in order when this one cannot be reached.
    pub fallbacks: Vec<String>,
}

impl ServerConfig {
    /// The media pool this server belongs to.
    pub fn pool(&self) -> &str {
        if self.media_pool.is_empty() {
            &self.name
        } else {
            &self.media_pool
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MuxConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 retries forever.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            servers: vec![ServerConfig {
                name: "lobby".to_string(),
                address: "127.0.0.1:30000".to_string(),
                ..Default::default()
            }],
            mux: MuxConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 40000)),
            max_clients: 128,
            probe_user: "voxmux-probe".to_string(),
            default_server: "lobby".to_string(),
            handshake_timeout_ms: 10_000,
            init_resend_ms: 500,
            idle_timeout_secs: 30,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// `<platform config dir>/voxmux`, or the working directory when the
/// platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("voxmux"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Re-read the file: `Some(new_config)` if it changed, `None` otherwise.
    ///
    /// Only the server list and logging can usefully change at runtime; the
    /// merged content namespace stays frozen.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Check the server layout: at least one server, unique non-empty names,
    /// known fallbacks and a known default server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Invalid("no servers configured".into()));
        }

        let mut names = HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "server at {} has no name",
                    server.address
                )));
            }
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate server name {:?}",
                    server.name
                )));
            }
        }

        for server in &self.servers {
            if let Some(missing) = server.fallbacks.iter().find(|f| !names.contains(f.as_str())) {
                return Err(ConfigError::Invalid(format!(
                    "server {:?} falls back to unknown server {missing:?}",
                    server.name
                )));
            }
        }

        if !names.contains(self.proxy.default_server.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "default server {:?} is not configured",
                self.proxy.default_server
            )));
        }

        Ok(())
    }
}
