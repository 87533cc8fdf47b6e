//! `warden mkdir` — Create a directory through the helper.

use std::path::{Path, PathBuf};

use clap::Args;

/// Arguments for the `mkdir` command.
#[derive(Args, Debug)]
pub struct MkdirArgs {
    /// Directory to create.
    pub path: PathBuf,
}

/// Executes the `mkdir` command.
///
/// # Errors
///
/// Returns an error if the helper is unreachable or refuses the request.
pub fn execute(args: MkdirArgs, socket: &Path) -> anyhow::Result<()> {
    let mut client = super::connect(socket)?;
    client.mkdir(&args.path)?;
    crate::output::print_done(&format!("mkdir {}", args.path.display()));
    Ok(())
}
