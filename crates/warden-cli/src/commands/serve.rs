//! `warden serve` — Run the privileged helper.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use warden_common::config::{MkdirPolicy, ServerConfig};
use warden_server::PrivilegedServer;
use warden_server::listener::{bind_socket, serve_listener};

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// JSON configuration file.
    #[arg(long, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Create directories on mkdir requests instead of only recording them.
    #[arg(long)]
    pub create_dirs: bool,
}

/// Executes the `serve` command.
///
/// Binds the helper socket and serves connections until accepting fails.
/// The process must already hold root rights.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the socket cannot
/// be bound.
pub fn execute(args: ServeArgs, socket: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(socket) = socket {
        config.socket_path = socket;
    }
    if args.create_dirs {
        config.mkdir_policy = MkdirPolicy::Create;
    }

    tracing::info!(
        socket = %config.socket_path.display(),
        dev_dir = %config.dev_dir.display(),
        mkdir_policy = ?config.mkdir_policy,
        "starting {}",
        warden_common::constants::APP_NAME
    );
    let listener = bind_socket(&config)?;
    let mut server = PrivilegedServer::new(config)?;
    serve_listener(&mut server, &listener)?;
    Ok(())
}
