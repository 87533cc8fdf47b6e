//! Loop device allocation.
//!
//! Finds a free `/dev/loopN`, creating missing nodes on demand, and binds a
//! backing image to it. There is no in-memory registry: the kernel's
//! `EBUSY` answer to `LOOP_SET_FD` is what keeps two concurrent attaches
//! from receiving the same device.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use warden_common::config::ServerConfig;
use warden_common::constants::{LOOP_DEVICE_LIMIT, LOOP_MAJOR, LOOP_NODE_MODE, LOOP_NODE_PREFIX};
use warden_common::error::{Result, WardenError};
use warden_common::types::{LoopInfo, LoopStatus64, OpenMode};

use crate::creds::FsuidElevation;

mod ioctl {
    use warden_common::types::LoopStatus64;

    const LOOP_SET_FD: u32 = 0x4C00;
    const LOOP_SET_STATUS64: u32 = 0x4C04;

    nix::ioctl_write_int_bad!(
        /// Associates an open backing file with a loop device.
        loop_set_fd,
        LOOP_SET_FD
    );
    nix::ioctl_write_ptr_bad!(
        /// Applies a `loop_info64` record to a bound loop device.
        loop_set_status64,
        LOOP_SET_STATUS64,
        LoopStatus64
    );
}

/// What currently sits at a loop device node path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Nothing exists at the path.
    Missing,
    /// A block-special file.
    BlockDevice,
    /// Anything else.
    Other,
}

/// Kernel operations used while scanning for a free loop device.
pub trait LoopControl {
    /// Open handle to a loop device node.
    type Device;

    /// Inspects the node path, following symlinks.
    ///
    /// # Errors
    ///
    /// Returns any failure other than "not found".
    fn node_kind(&self, path: &Path) -> io::Result<NodeKind>;

    /// Creates `path` as loop block device `number`.
    ///
    /// # Errors
    ///
    /// Returns the `mknod(2)` errno.
    fn create_node(&self, path: &Path, number: u32) -> nix::Result<()>;

    /// Opens an existing loop device node for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns the open failure.
    fn open_node(&self, path: &Path) -> io::Result<Self::Device>;

    /// Issues `LOOP_SET_FD`.
    ///
    /// # Errors
    ///
    /// Returns the ioctl errno; `EBUSY` means the device is taken.
    fn bind(&self, device: &Self::Device, image: BorrowedFd<'_>) -> nix::Result<()>;

    /// Issues `LOOP_SET_STATUS64`.
    ///
    /// # Errors
    ///
    /// Returns the ioctl errno.
    fn set_status(&self, device: &Self::Device, info: &LoopInfo) -> nix::Result<()>;
}

/// Loop control backed by real device nodes and ioctls.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelLoopControl;

impl LoopControl for KernelLoopControl {
    type Device = File;

    fn node_kind(&self, path: &Path) -> io::Result<NodeKind> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.file_type().is_block_device() => Ok(NodeKind::BlockDevice),
            Ok(_) => Ok(NodeKind::Other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(NodeKind::Missing),
            Err(e) => Err(e),
        }
    }

    fn create_node(&self, path: &Path, number: u32) -> nix::Result<()> {
        mknod(
            path,
            SFlag::S_IFBLK,
            Mode::from_bits_truncate(LOOP_NODE_MODE),
            makedev(LOOP_MAJOR, u64::from(number)),
        )
    }

    fn open_node(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(path)
    }

    fn bind(&self, device: &File, image: BorrowedFd<'_>) -> nix::Result<()> {
        // SAFETY: both descriptors are open for the duration of the call and
        // LOOP_SET_FD takes the image descriptor by value.
        unsafe { ioctl::loop_set_fd(device.as_raw_fd(), image.as_raw_fd()) }.map(drop)
    }

    fn set_status(&self, device: &File, info: &LoopInfo) -> nix::Result<()> {
        let status: LoopStatus64 = info.to_status();
        // SAFETY: `status` is a live, correctly laid out `loop_info64` that
        // the kernel only reads.
        unsafe { ioctl::loop_set_status64(device.as_raw_fd(), &raw const status) }.map(drop)
    }
}

/// A loop device with an image bound to it.
///
/// Owns the device handle. Dropping the record closes the handle but does
/// not detach the image.
#[derive(Debug)]
pub struct LoopDevice<D = File> {
    number: u32,
    path: PathBuf,
    handle: D,
}

impl<D> LoopDevice<D> {
    /// Device number (the `N` in `/dev/loopN`).
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Node path of the device.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open handle to the device.
    #[must_use]
    pub const fn handle(&self) -> &D {
        &self.handle
    }
}

/// Allocates loop devices under a device directory.
#[derive(Debug)]
pub struct LoopDeviceManager<L = KernelLoopControl> {
    control: L,
    dev_dir: PathBuf,
    limit: u32,
}

impl LoopDeviceManager<KernelLoopControl> {
    /// Creates a manager for the kernel using the configured directory and
    /// slot count.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(KernelLoopControl, &config.dev_dir, config.max_loop_devices)
    }
}

impl<L: LoopControl> LoopDeviceManager<L> {
    /// Creates a manager probing at most `limit` slots (capped at 256).
    pub fn new(control: L, dev_dir: impl Into<PathBuf>, limit: u32) -> Self {
        Self {
            control,
            dev_dir: dev_dir.into(),
            limit: limit.min(LOOP_DEVICE_LIMIT),
        }
    }

    /// Returns the loop control in use.
    pub const fn control(&self) -> &L {
        &self.control
    }

    /// Returns the node path for device `number`.
    pub fn node_path(&self, number: u32) -> PathBuf {
        self.dev_dir.join(format!("{LOOP_NODE_PREFIX}{number}"))
    }

    /// Binds `image` to the first free loop device.
    ///
    /// The scan runs with the thread's fsuid raised to root and restores it
    /// on return. Only `EBUSY` (or a node that cannot be opened) moves the
    /// scan to the next number; any other failure ends the call. The image
    /// descriptor is closed on every failure path.
    ///
    /// # Errors
    ///
    /// - [`WardenError::Io`] if the image cannot be opened or a node cannot
    ///   be inspected.
    /// - [`WardenError::ElevationActive`] if this thread is already elevated.
    /// - [`WardenError::KernelRejected`] if node creation or `LOOP_SET_FD`
    ///   fails with anything but `EBUSY`.
    /// - [`WardenError::EnvironmentMismatch`] if a node path exists but is
    ///   not a block device.
    /// - [`WardenError::ResourceExhausted`] if every slot was busy.
    pub fn attach(&self, image: &Path, mode: OpenMode) -> Result<LoopDevice<L::Device>> {
        let image_file = OpenOptions::new()
            .read(true)
            .write(mode.is_writable())
            .open(image)
            .map_err(|e| WardenError::Io {
                path: image.to_path_buf(),
                source: e,
            })?;

        let _elevation = FsuidElevation::acquire()?;
        let device = self.scan(image_file.as_fd())?;
        tracing::info!(
            image = %image.display(),
            mode = %mode,
            device = %device.path.display(),
            "image attached to loop device"
        );
        Ok(device)
    }

    fn scan(&self, image: BorrowedFd<'_>) -> Result<LoopDevice<L::Device>> {
        for number in 0..self.limit {
            let path = self.node_path(number);
            let kind = self.control.node_kind(&path).map_err(|e| WardenError::Io {
                path: path.clone(),
                source: e,
            })?;
            match kind {
                NodeKind::Missing => {
                    self.control
                        .create_node(&path, number)
                        .map_err(|e| WardenError::kernel("mknod", e))?;
                    tracing::debug!(path = %path.display(), "created loop device node");
                }
                NodeKind::Other => {
                    return Err(WardenError::EnvironmentMismatch {
                        path,
                        message: "exists but is not a block device".into(),
                    });
                }
                NodeKind::BlockDevice => {}
            }

            let handle = match self.control.open_node(&path) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "loop device unavailable");
                    continue;
                }
            };

            match self.control.bind(&handle, image) {
                Ok(()) => {
                    return Ok(LoopDevice {
                        number,
                        path,
                        handle,
                    });
                }
                Err(Errno::EBUSY) => {
                    drop(handle);
                    tracing::debug!(path = %path.display(), "loop device busy");
                }
                Err(e) => return Err(WardenError::kernel("LOOP_SET_FD", e)),
            }
        }
        Err(WardenError::ResourceExhausted { tried: self.limit })
    }

    /// Applies a caller-supplied `loop_info64` record to a bound device.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::KernelRejected`] with the kernel errno.
    pub fn set_status(&self, device: &LoopDevice<L::Device>, info: &LoopInfo) -> Result<()> {
        self.control
            .set_status(&device.handle, info)
            .map_err(|e| WardenError::kernel("LOOP_SET_STATUS64", e))?;
        tracing::debug!(device = device.number, "loop status applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;
    use std::sync::Mutex;

    use tempfile::NamedTempFile;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Slot {
        Missing,
        Free,
        Bound(u64),
        NotBlock,
        Unopenable,
    }

    /// Device table standing in for `/dev/loop*` and the loop driver.
    #[derive(Debug)]
    struct SimulatedLoops {
        slots: Mutex<Vec<Slot>>,
        events: Mutex<Vec<String>>,
        statuses: Mutex<Vec<(u32, LoopInfo)>>,
        create_error: Option<Errno>,
        bind_error: Option<(u32, Errno)>,
        status_error: Option<Errno>,
    }

    impl SimulatedLoops {
        fn new(slots: Vec<Slot>) -> Self {
            Self {
                slots: Mutex::new(slots),
                events: Mutex::new(Vec::new()),
                statuses: Mutex::new(Vec::new()),
                create_error: None,
                bind_error: None,
                status_error: None,
            }
        }

        fn free(count: usize) -> Self {
            Self::new(vec![Slot::Free; count])
        }

        fn slot(&self, number: u32) -> Slot {
            self.slots.lock().unwrap()[number as usize]
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn log(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn number_of(path: &Path) -> u32 {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("loop"))
            .and_then(|n| n.parse().ok())
            .expect("loop node path")
    }

    fn inode_of(fd: BorrowedFd<'_>) -> io::Result<u64> {
        Ok(File::from(fd.try_clone_to_owned()?).metadata()?.ino())
    }

    impl LoopControl for SimulatedLoops {
        type Device = u32;

        fn node_kind(&self, path: &Path) -> io::Result<NodeKind> {
            let n = number_of(path);
            self.log(format!("stat {n}"));
            Ok(match self.slot(n) {
                Slot::Missing => NodeKind::Missing,
                Slot::NotBlock => NodeKind::Other,
                Slot::Free | Slot::Bound(_) | Slot::Unopenable => NodeKind::BlockDevice,
            })
        }

        fn create_node(&self, path: &Path, number: u32) -> nix::Result<()> {
            assert_eq!(number_of(path), number);
            self.log(format!("mknod {number}"));
            if let Some(errno) = self.create_error {
                return Err(errno);
            }
            self.slots.lock().unwrap()[number as usize] = Slot::Free;
            Ok(())
        }

        fn open_node(&self, path: &Path) -> io::Result<u32> {
            let n = number_of(path);
            self.log(format!("open {n}"));
            if self.slot(n) == Slot::Unopenable {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            Ok(n)
        }

        fn bind(&self, device: &u32, image: BorrowedFd<'_>) -> nix::Result<()> {
            self.log(format!("bind {device}"));
            if let Some((n, errno)) = self.bind_error {
                if n == *device {
                    return Err(errno);
                }
            }
            let inode = inode_of(image).map_err(|_| Errno::EBADF)?;
            let mut slots = self.slots.lock().unwrap();
            match slots[*device as usize] {
                Slot::Free => {
                    slots[*device as usize] = Slot::Bound(inode);
                    Ok(())
                }
                _ => Err(Errno::EBUSY),
            }
        }

        fn set_status(&self, device: &u32, info: &LoopInfo) -> nix::Result<()> {
            if let Some(errno) = self.status_error {
                return Err(errno);
            }
            self.statuses.lock().unwrap().push((*device, info.clone()));
            Ok(())
        }
    }

    fn image() -> (NamedTempFile, u64) {
        let file = NamedTempFile::new().expect("image");
        let inode = file.as_file().metadata().expect("metadata").ino();
        (file, inode)
    }

    fn manager(loops: SimulatedLoops) -> LoopDeviceManager<SimulatedLoops> {
        LoopDeviceManager::new(loops, "/dev", LOOP_DEVICE_LIMIT)
    }

    #[test]
    fn attach_binds_first_free_device_to_the_image() {
        let (img, inode) = image();
        let mgr = manager(SimulatedLoops::free(256));
        let dev = mgr.attach(img.path(), OpenMode::ReadWrite).expect("attach");
        assert_eq!(dev.number(), 0);
        assert_eq!(dev.path(), Path::new("/dev/loop0"));
        assert_eq!(mgr.control().slot(0), Slot::Bound(inode));
    }

    #[test]
    fn busy_devices_are_skipped_and_left_untouched() {
        let mut slots = vec![Slot::Bound(1); 5];
        slots.extend(vec![Slot::Free; 251]);
        let (img, inode) = image();
        let mgr = manager(SimulatedLoops::new(slots));

        let dev = mgr.attach(img.path(), OpenMode::ReadOnly).expect("attach");
        assert_eq!(dev.number(), 5);
        for n in 0..5 {
            assert_eq!(mgr.control().slot(n), Slot::Bound(1));
        }
        assert_eq!(mgr.control().slot(5), Slot::Bound(inode));
    }

    #[test]
    fn non_block_node_aborts_without_probing_further() {
        let mut slots = vec![Slot::NotBlock];
        slots.extend(vec![Slot::Free; 255]);
        let (img, _) = image();
        let mgr = manager(SimulatedLoops::new(slots));

        let err = mgr.attach(img.path(), OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(err, WardenError::EnvironmentMismatch { ref path, .. } if path == Path::new("/dev/loop0")));
        assert_eq!(mgr.control().events(), ["stat 0"]);
    }

    #[test]
    fn missing_nodes_are_created_then_bound() {
        let (img, inode) = image();
        let mgr = manager(SimulatedLoops::new(vec![Slot::Missing; 256]));
        let dev = mgr.attach(img.path(), OpenMode::ReadWrite).expect("attach");
        assert_eq!(dev.number(), 0);
        assert_eq!(
            mgr.control().events(),
            ["stat 0", "mknod 0", "open 0", "bind 0"]
        );
        assert_eq!(mgr.control().slot(0), Slot::Bound(inode));
    }

    #[test]
    fn node_creation_failure_aborts_the_call() {
        let (img, _) = image();
        let mut loops = SimulatedLoops::new(vec![Slot::Missing; 256]);
        loops.create_error = Some(Errno::EROFS);
        let mgr = manager(loops);

        let err = mgr.attach(img.path(), OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(
            err,
            WardenError::KernelRejected {
                operation: "mknod",
                source: Errno::EROFS
            }
        ));
        assert_eq!(mgr.control().events(), ["stat 0", "mknod 0"]);
    }

    #[test]
    fn unopenable_node_is_treated_as_busy() {
        let mut slots = vec![Slot::Unopenable, Slot::Unopenable];
        slots.extend(vec![Slot::Free; 254]);
        let (img, _) = image();
        let mgr = manager(SimulatedLoops::new(slots));
        let dev = mgr.attach(img.path(), OpenMode::ReadWrite).expect("attach");
        assert_eq!(dev.number(), 2);
    }

    #[test]
    fn unexpected_bind_error_aborts_the_call() {
        let (img, _) = image();
        let mut loops = SimulatedLoops::free(256);
        loops.bind_error = Some((0, Errno::EINVAL));
        let mgr = manager(loops);

        let err = mgr.attach(img.path(), OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(
            err,
            WardenError::KernelRejected {
                operation: "LOOP_SET_FD",
                source: Errno::EINVAL
            }
        ));
        assert!(!mgr.control().events().contains(&"stat 1".to_owned()));
    }

    #[test]
    fn exhaustion_is_reported_after_every_slot_was_probed() {
        let (img, _) = image();
        let mgr = LoopDeviceManager::new(SimulatedLoops::new(vec![Slot::Bound(9); 4]), "/dev", 4);
        let err = mgr.attach(img.path(), OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(err, WardenError::ResourceExhausted { tried: 4 }));
        let binds = mgr
            .control()
            .events()
            .iter()
            .filter(|e| e.starts_with("bind"))
            .count();
        assert_eq!(binds, 4);
    }

    #[test]
    fn full_table_probes_all_256_slots() {
        let (img, _) = image();
        let mgr = manager(SimulatedLoops::new(vec![Slot::Bound(9); 256]));
        let err = mgr.attach(img.path(), OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(err, WardenError::ResourceExhausted { tried: 256 }));
        assert!(mgr.control().events().contains(&"bind 255".to_owned()));
    }

    #[test]
    fn missing_image_fails_before_scanning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager(SimulatedLoops::free(256));
        let err = mgr
            .attach(&dir.path().join("absent.img"), OpenMode::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, WardenError::Io { .. }));
        assert!(mgr.control().events().is_empty());
    }

    #[test]
    fn attach_restores_credentials_on_failure() {
        let (img, _) = image();
        let mgr = manager(SimulatedLoops::new(vec![Slot::NotBlock; 256]));
        assert!(mgr.attach(img.path(), OpenMode::ReadWrite).is_err());
        assert!(!FsuidElevation::is_active());
    }

    #[test]
    fn attach_refuses_to_nest_inside_an_elevation() {
        let (img, _) = image();
        let mgr = manager(SimulatedLoops::free(256));
        let _held = FsuidElevation::acquire().expect("acquire");
        let err = mgr.attach(img.path(), OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(err, WardenError::ElevationActive));
        assert!(mgr.control().events().is_empty());
    }

    #[test]
    fn concurrent_attaches_get_distinct_devices() {
        let mgr = manager(SimulatedLoops::free(256));
        let images: Vec<_> = (0..8).map(|_| image()).collect();

        let numbers: Vec<u32> = std::thread::scope(|s| {
            let handles: Vec<_> = images
                .iter()
                .map(|(img, _)| {
                    let mgr = &mgr;
                    s.spawn(move || {
                        mgr.attach(img.path(), OpenMode::ReadWrite)
                            .expect("attach")
                            .number()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("join")).collect()
        });

        let mut sorted = numbers.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), numbers.len());
        for (n, (_, inode)) in numbers.iter().zip(&images) {
            assert_eq!(mgr.control().slot(*n), Slot::Bound(*inode));
        }
    }

    #[test]
    fn set_status_passes_record_through() {
        let (img, _) = image();
        let mgr = manager(SimulatedLoops::free(256));
        let dev = mgr.attach(img.path(), OpenMode::ReadWrite).expect("attach");
        let info = LoopInfo::from_status(&LoopStatus64 {
            lo_offset: 512,
            ..LoopStatus64::default()
        });

        mgr.set_status(&dev, &info).expect("status");
        let statuses = mgr.control().statuses.lock().unwrap();
        assert_eq!(statuses.as_slice(), [(0, info)]);
    }

    #[test]
    fn set_status_error_is_returned_verbatim() {
        let (img, _) = image();
        let mut loops = SimulatedLoops::free(256);
        loops.status_error = Some(Errno::ENXIO);
        let mgr = manager(loops);
        let dev = mgr.attach(img.path(), OpenMode::ReadWrite).expect("attach");

        let err = mgr.set_status(&dev, &LoopInfo::default()).unwrap_err();
        assert!(matches!(
            err,
            WardenError::KernelRejected {
                operation: "LOOP_SET_STATUS64",
                source: Errno::ENXIO
            }
        ));
        assert!(matches!(mgr.control().slot(0), Slot::Bound(_)));
    }

    #[test]
    fn kernel_control_classifies_node_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("loop0");
        std::fs::write(&file, b"").expect("write");
        let ctl = KernelLoopControl;
        assert_eq!(ctl.node_kind(&file).expect("kind"), NodeKind::Other);
        assert_eq!(
            ctl.node_kind(&dir.path().join("loop1")).expect("kind"),
            NodeKind::Missing
        );
    }

    #[test]
    fn node_paths_follow_dev_dir() {
        let mgr = LoopDeviceManager::new(KernelLoopControl, "/tmp/devs", 300);
        assert_eq!(mgr.node_path(17), PathBuf::from("/tmp/devs/loop17"));
        assert_eq!(mgr.limit, LOOP_DEVICE_LIMIT);
    }
}
