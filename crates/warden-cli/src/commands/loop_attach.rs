//! `warden loop-attach` — Bind an image to a free loop device.

use std::path::{Path, PathBuf};

use clap::Args;
use warden_common::types::{
    LO_FLAGS_AUTOCLEAR, LO_FLAGS_PARTSCAN, LO_FLAGS_READ_ONLY, LoopInfo, LoopStatus64, OpenMode,
};

/// Arguments for the `loop-attach` command.
#[derive(Args, Debug)]
pub struct LoopAttachArgs {
    /// Backing image file.
    pub image: PathBuf,

    /// Open the image and the device read-only.
    #[arg(long)]
    pub read_only: bool,

    /// Byte offset of the data inside the image.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Maximum size in bytes, 0 for the rest of the file.
    #[arg(long, default_value_t = 0)]
    pub sizelimit: u64,

    /// Detach the device automatically when its last user closes it.
    #[arg(long)]
    pub autoclear: bool,

    /// Ask the kernel to scan the device for partitions.
    #[arg(long)]
    pub partscan: bool,
}

impl LoopAttachArgs {
    fn open_mode(&self) -> OpenMode {
        if self.read_only {
            OpenMode::ReadOnly
        } else {
            OpenMode::ReadWrite
        }
    }

    fn status(&self) -> LoopStatus64 {
        let mut flags = 0;
        if self.read_only {
            flags |= LO_FLAGS_READ_ONLY;
        }
        if self.autoclear {
            flags |= LO_FLAGS_AUTOCLEAR;
        }
        if self.partscan {
            flags |= LO_FLAGS_PARTSCAN;
        }
        LoopStatus64 {
            lo_offset: self.offset,
            lo_sizelimit: self.sizelimit,
            lo_flags: flags,
            ..LoopStatus64::default()
        }
        .with_file_name(&self.image.to_string_lossy())
    }
}

/// Executes the `loop-attach` command, printing the device path.
///
/// # Errors
///
/// Returns an error if the helper is unreachable or the attach fails.
pub fn execute(args: LoopAttachArgs, socket: &Path) -> anyhow::Result<()> {
    let mut client = super::connect(socket)?;
    let info = LoopInfo::from_status(&args.status());
    let number = client.loop_attach(&args.image, args.open_mode(), &info)?;
    crate::output::print_loop_device(number);
    Ok(())
}
