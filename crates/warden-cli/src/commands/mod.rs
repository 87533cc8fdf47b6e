//! CLI command definitions and dispatch.

pub mod chroot;
pub mod loop_attach;
pub mod mkdir;
pub mod mount;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use warden_client::SocketClient;

/// Warden — privileged helper for rootless containers.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the helper's Unix socket [default: /run/warden/warden.sock].
    #[arg(long, global = true, env = "WARDEN_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the privileged helper (must already run as root).
    Serve(serve::ServeArgs),
    /// Mount a filesystem through the helper.
    Mount(mount::MountArgs),
    /// Create a directory through the helper.
    Mkdir(mkdir::MkdirArgs),
    /// Pivot the helper into a new root.
    Chroot(chroot::ChrootArgs),
    /// Bind an image to a free loop device.
    LoopAttach(loop_attach::LoopAttachArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let socket = cli.socket;
    match cli.command {
        Command::Serve(args) => serve::execute(args, socket),
        Command::Mount(args) => mount::execute(args, &client_socket(socket)),
        Command::Mkdir(args) => mkdir::execute(args, &client_socket(socket)),
        Command::Chroot(args) => chroot::execute(args, &client_socket(socket)),
        Command::LoopAttach(args) => loop_attach::execute(args, &client_socket(socket)),
    }
}

fn client_socket(socket: Option<PathBuf>) -> PathBuf {
    socket.unwrap_or_else(|| PathBuf::from(warden_common::constants::DEFAULT_SOCKET_PATH))
}

/// Opens a client connection to the helper.
fn connect(socket: &Path) -> anyhow::Result<SocketClient> {
    SocketClient::connect(socket)
        .with_context(|| format!("cannot reach privileged helper at {}", socket.display()))
}
