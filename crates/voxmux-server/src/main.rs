//! The voxmux proxy binary.
//!
//! Loads `config.ron` (CLI flags override it), merges the content of every
//! configured media pool, then accepts game clients until interrupted.
//! Run with `cargo run -p voxmux-server -- --bind 0.0.0.0:30000`.

use std::process::ExitCode;

use clap::Parser;
use voxmux_config::{CliArgs, Config, default_config_dir};
use voxmux_net::{Listener, ListenerConfig, SocketConfig};
use voxmux_proxy::proxy::peer_config;
use voxmux_proxy::{LinkSettings, Proxy, RetryPolicy, ServerDirectory, Services};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    voxmux_log::init_logging(args.log_dir.as_deref(), args.log_dir.is_some(), Some(&config));

    if let Err(e) = config.validate() {
        tracing::error!(dir = %config_dir.display(), "invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    // Clients are only admitted once every pool has been merged.
    let multiplex = Proxy::multiplex_with_retry(
        ServerDirectory::from_config(&config.servers),
        Services::from_config(&config),
        LinkSettings::from(&config),
        RetryPolicy::from(&config.mux),
    );
    let proxy = tokio::select! {
        result = multiplex => match result {
            Ok(proxy) => proxy,
            Err(e) => {
                tracing::error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted while multiplexing");
            return ExitCode::SUCCESS;
        }
    };

    let listener = match Listener::bind(ListenerConfig {
        bind_addr: config.proxy.bind_addr,
        max_clients: config.proxy.max_clients,
        socket: SocketConfig::default(),
        peer: peer_config(&config),
    }) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.proxy.bind_addr, "failed to bind: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(addr = %config.proxy.bind_addr, servers = config.servers.len(), "accepting clients");

    let serve = proxy.serve(&listener);
    tokio::pin!(serve);
    let result = tokio::select! {
        result = &mut serve => result,
        _ = tokio::signal::ctrl_c() => {
            listener.shutdown();
            serve.await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
