//! Configuration for the voxmux proxy.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line. Every section uses `#[serde(default)]`, so older files keep
//! loading when fields are added.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, MuxConfig, ProxyConfig, ServerConfig, default_config_dir};
pub use error::ConfigError;
