//! Command-line argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// voxmux command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "voxmux", about = "Multiplexing proxy for voxel game servers")]
pub struct CliArgs {
    /// Address to accept game clients on.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Server new sessions are sent to.
    #[arg(long)]
    pub default_server: Option<String>,

    /// Directory for the JSON log file. No file is written when unset.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(bind) = args.bind {
            self.proxy.bind_addr = bind;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(ref server) = args.default_server {
            self.proxy.default_server = server.clone();
        }
    }
}
