//! Transparent `mount(2)` forwarding.
//!
//! Arguments arrive from the unprivileged side and are handed to the kernel
//! exactly as received. Validating them is the caller's job, before the
//! request crosses the privilege boundary.

use std::path::Path;

use warden_common::error::{Result, WardenError};

use crate::syscalls::Syscalls;

/// Arguments of a single `mount(2)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec<'a> {
    /// Device, directory, or pseudo-filesystem name to mount.
    pub source: &'a str,
    /// Mount point.
    pub target: &'a Path,
    /// Filesystem type, empty when the flags make it irrelevant.
    pub fstype: &'a str,
    /// Raw `MS_*` flag bits.
    pub flags: u64,
    /// Filesystem-specific option string.
    pub data: &'a str,
}

/// Issues `mount(2)` with the given arguments unchanged.
///
/// # Errors
///
/// Returns [`WardenError::KernelRejected`] carrying the kernel errno.
pub fn forward_mount<S: Syscalls + ?Sized>(sys: &S, spec: &MountSpec<'_>) -> Result<()> {
    sys.mount(spec.source, spec.target, spec.fstype, spec.flags, spec.data)
        .map_err(|e| {
            tracing::debug!(target = %spec.target.display(), error = %e, "mount rejected");
            WardenError::kernel("mount", e)
        })?;
    tracing::info!(
        source = spec.source,
        target = %spec.target.display(),
        fstype = spec.fstype,
        flags = spec.flags,
        "mounted"
    );
    Ok(())
}
