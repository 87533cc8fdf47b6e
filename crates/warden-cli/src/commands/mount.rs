//! `warden mount` — Mount a filesystem through the helper.

use std::path::{Path, PathBuf};

use clap::Args;

/// Arguments for the `mount` command.
#[derive(Args, Debug)]
pub struct MountArgs {
    /// Mount source.
    pub source: String,

    /// Mount point.
    pub target: PathBuf,

    /// Filesystem type.
    #[arg(short = 't', long = "type", default_value = "")]
    pub fstype: String,

    /// Raw `MS_*` flag bits, decimal or 0x-prefixed hex.
    #[arg(long, default_value = "0", value_parser = parse_flags)]
    pub flags: u64,

    /// Filesystem-specific options.
    #[arg(short = 'o', long, default_value = "")]
    pub data: String,
}

fn parse_flags(raw: &str) -> Result<u64, String> {
    let parsed = raw.strip_prefix("0x").map_or_else(
        || raw.parse::<u64>(),
        |hex| u64::from_str_radix(hex, 16),
    );
    parsed.map_err(|e| format!("invalid mount flags {raw:?}: {e}"))
}

/// Executes the `mount` command.
///
/// # Errors
///
/// Returns an error if the helper is unreachable or the mount fails.
pub fn execute(args: MountArgs, socket: &Path) -> anyhow::Result<()> {
    let mut client = super::connect(socket)?;
    client.mount(&args.source, &args.target, &args.fstype, args.flags, &args.data)?;
    crate::output::print_done(&format!("mounted {}", args.target.display()));
    Ok(())
}
