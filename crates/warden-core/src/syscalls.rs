//! Syscall seam for the mount and root-switch primitives.

use std::path::Path;

use nix::mount::{MntFlags, MsFlags};
use nix::sys::stat::Mode;

/// Filesystem syscalls issued by the privileged handlers.
///
/// [`LinuxSyscalls`] forwards each method to the kernel. Other
/// implementations exist to observe call sequences in tests.
pub trait Syscalls {
    /// `mount(2)` with the arguments passed through as given.
    ///
    /// # Errors
    ///
    /// Returns the kernel errno.
    fn mount(
        &self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: u64,
        data: &str,
    ) -> nix::Result<()>;

    /// `chdir(2)`.
    ///
    /// # Errors
    ///
    /// Returns the kernel errno.
    fn chdir(&self, path: &Path) -> nix::Result<()>;

    /// `pivot_root(2)`.
    ///
    /// # Errors
    ///
    /// Returns the kernel errno.
    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> nix::Result<()>;

    /// `chroot(2)`.
    ///
    /// # Errors
    ///
    /// Returns the kernel errno.
    fn chroot(&self, path: &Path) -> nix::Result<()>;

    /// `umount2(2)` with `MNT_DETACH`.
    ///
    /// # Errors
    ///
    /// Returns the kernel errno.
    fn unmount_detach(&self, target: &Path) -> nix::Result<()>;

    /// `mkdir(2)`.
    ///
    /// # Errors
    ///
    /// Returns the kernel errno.
    fn mkdir(&self, path: &Path, mode: u32) -> nix::Result<()>;

    /// Returns whether `path` names an existing directory.
    fn is_dir(&self, path: &Path) -> bool;
}

/// Syscalls issued directly against the running kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxSyscalls;

/// Empty mount data means "no options". The filesystem type is always
/// passed, so an empty one reaches the kernel as `""`.
fn mount_data(data: &str) -> Option<&str> {
    (!data.is_empty()).then_some(data)
}

impl Syscalls for LinuxSyscalls {
    fn mount(
        &self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: u64,
        data: &str,
    ) -> nix::Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let flags = MsFlags::from_bits_retain(flags as libc::c_ulong);
        nix::mount::mount(
            Some(source),
            target,
            Some(fstype),
            flags,
            mount_data(data),
        )
    }

    fn chdir(&self, path: &Path) -> nix::Result<()> {
        nix::unistd::chdir(path)
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> nix::Result<()> {
        nix::unistd::pivot_root(new_root, put_old)
    }

    fn chroot(&self, path: &Path) -> nix::Result<()> {
        nix::unistd::chroot(path)
    }

    fn unmount_detach(&self, target: &Path) -> nix::Result<()> {
        nix::mount::umount2(target, MntFlags::MNT_DETACH)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> nix::Result<()> {
        nix::unistd::mkdir(path, Mode::from_bits_truncate(mode))
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}
