//! Root filesystem switching via `pivot_root(2)`.
//!
//! The old root is parked on a scratch subdirectory of the new root, then
//! lazily detached so it disappears from the mount table even while busy.
//! Once `pivot_root` succeeds there is no way back: later failures are
//! reported but the process stays rooted at the new root.

use std::path::{Path, PathBuf};

use warden_common::error::{Result, WardenError};

use crate::syscalls::Syscalls;

/// Makes `new_root` the root and working directory of the process.
///
/// `scratch` names an existing subdirectory of `new_root` that temporarily
/// holds the old root.
///
/// # Errors
///
/// Returns [`WardenError::EnvironmentMismatch`] if the scratch directory is
/// missing (nothing has been changed yet), or
/// [`WardenError::KernelRejected`] naming the step that failed.
pub fn switch_root<S: Syscalls + ?Sized>(sys: &S, new_root: &Path, scratch: &str) -> Result<()> {
    let put_old = new_root.join(scratch);
    if !sys.is_dir(&put_old) {
        return Err(WardenError::EnvironmentMismatch {
            path: put_old,
            message: "pivot scratch directory does not exist".into(),
        });
    }

    sys.chdir(new_root)
        .map_err(|e| WardenError::kernel("chdir", e))?;
    sys.pivot_root(Path::new("."), Path::new(scratch))
        .map_err(|e| WardenError::kernel("pivot_root", e))?;
    tracing::info!(new_root = %new_root.display(), "pivot_root committed");

    sys.chroot(Path::new("."))
        .map_err(|e| WardenError::kernel("chroot", e))?;
    let old_root = PathBuf::from("/").join(scratch);
    sys.unmount_detach(&old_root)
        .map_err(|e| WardenError::kernel("umount2", e))?;
    sys.chdir(Path::new("/"))
        .map_err(|e| WardenError::kernel("chdir", e))?;

    tracing::info!(new_root = %new_root.display(), "root switched, old root detached");
    Ok(())
}
