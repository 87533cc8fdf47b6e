//! `warden chroot` — Pivot the helper into a new root.

use std::path::{Path, PathBuf};

use clap::Args;

/// Arguments for the `chroot` command.
#[derive(Args, Debug)]
pub struct ChrootArgs {
    /// Directory that becomes the helper's root. Must contain the scratch
    /// directory the helper parks the old root on.
    pub new_root: PathBuf,
}

/// Executes the `chroot` command.
///
/// # Errors
///
/// Returns an error if the helper is unreachable or the switch fails.
pub fn execute(args: ChrootArgs, socket: &Path) -> anyhow::Result<()> {
    let mut client = super::connect(socket)?;
    client.chroot(&args.new_root)?;
    crate::output::print_done(&format!("root switched to {}", args.new_root.display()));
    Ok(())
}
