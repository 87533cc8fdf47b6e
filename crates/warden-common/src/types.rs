//! Domain primitive types shared by both sides of the privilege boundary.

use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::error::WardenError;

/// Mode used to open a loop device's backing image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Open the image read-only.
    ReadOnly,
    /// Open the image for reading and writing.
    #[default]
    ReadWrite,
}

impl OpenMode {
    /// Returns whether the image must be opened writable.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "ro"),
            Self::ReadWrite => write!(f, "rw"),
        }
    }
}

/// Loop device is read-only.
pub const LO_FLAGS_READ_ONLY: u32 = 1;
/// Loop device detaches itself when its last opener closes it.
pub const LO_FLAGS_AUTOCLEAR: u32 = 4;
/// Kernel scans the loop device for partitions.
pub const LO_FLAGS_PARTSCAN: u32 = 8;

const LO_NAME_SIZE: usize = 64;
const LO_KEY_SIZE: usize = 32;

/// Mirror of the kernel's `struct loop_info64`.
///
/// Field order and widths follow `<linux/loop.h>`; the struct has no
/// padding, so every byte of it is initialized.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LoopStatus64 {
    /// Device number of the backing file (ioctl: read-only).
    pub lo_device: u64,
    /// Inode of the backing file (ioctl: read-only).
    pub lo_inode: u64,
    /// Device number of the loop device (ioctl: read-only).
    pub lo_rdevice: u64,
    /// Byte offset into the backing file.
    pub lo_offset: u64,
    /// Size limit in bytes, 0 for the whole file.
    pub lo_sizelimit: u64,
    /// Loop device number (ioctl: read-only).
    pub lo_number: u32,
    /// Obsolete encryption type.
    pub lo_encrypt_type: u32,
    /// Obsolete encryption key size.
    pub lo_encrypt_key_size: u32,
    /// `LO_FLAGS_*` bits.
    pub lo_flags: u32,
    /// NUL-terminated name of the backing file.
    pub lo_file_name: [u8; LO_NAME_SIZE],
    /// Obsolete crypt name.
    pub lo_crypt_name: [u8; LO_NAME_SIZE],
    /// Obsolete encryption key.
    pub lo_encrypt_key: [u8; LO_KEY_SIZE],
    /// Obsolete init vector.
    pub lo_init: [u64; 2],
}

/// Size in bytes of the kernel's `struct loop_info64`.
pub const LOOP_INFO64_SIZE: usize = 232;

const _: () = assert!(mem::size_of::<LoopStatus64>() == LOOP_INFO64_SIZE);

impl Default for LoopStatus64 {
    fn default() -> Self {
        Self {
            lo_device: 0,
            lo_inode: 0,
            lo_rdevice: 0,
            lo_offset: 0,
            lo_sizelimit: 0,
            lo_number: 0,
            lo_encrypt_type: 0,
            lo_encrypt_key_size: 0,
            lo_flags: 0,
            lo_file_name: [0; LO_NAME_SIZE],
            lo_crypt_name: [0; LO_NAME_SIZE],
            lo_encrypt_key: [0; LO_KEY_SIZE],
            lo_init: [0; 2],
        }
    }
}

impl LoopStatus64 {
    /// Sets the recorded backing file name, truncated to fit with its NUL.
    #[must_use]
    pub fn with_file_name(mut self, name: &str) -> Self {
        self.lo_file_name = [0; LO_NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(LO_NAME_SIZE - 1);
        self.lo_file_name[..len].copy_from_slice(&bytes[..len]);
        self
    }
}

impl fmt::Debug for LoopStatus64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_len = self
            .lo_file_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LO_NAME_SIZE);
        f.debug_struct("LoopStatus64")
            .field("lo_offset", &self.lo_offset)
            .field("lo_sizelimit", &self.lo_sizelimit)
            .field("lo_flags", &self.lo_flags)
            .field(
                "lo_file_name",
                &String::from_utf8_lossy(&self.lo_file_name[..name_len]),
            )
            .finish_non_exhaustive()
    }
}

/// Opaque `loop_info64` record supplied by the unprivileged caller.
///
/// The privileged side hands these bytes to `LOOP_SET_STATUS64` without
/// looking at them; only the length is checked.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct LoopInfo {
    raw: [u8; LOOP_INFO64_SIZE],
}

impl LoopInfo {
    /// Encodes a status record into its native byte layout.
    #[must_use]
    pub fn from_status(status: &LoopStatus64) -> Self {
        let mut raw = [0u8; LOOP_INFO64_SIZE];
        // SAFETY: `LoopStatus64` is `repr(C)`, exactly `LOOP_INFO64_SIZE`
        // bytes long, and has no padding, so all of its bytes are initialized.
        let bytes = unsafe {
            std::slice::from_raw_parts(
                std::ptr::from_ref(status).cast::<u8>(),
                LOOP_INFO64_SIZE,
            )
        };
        raw.copy_from_slice(bytes);
        Self { raw }
    }

    /// Returns an aligned copy of the record, bit for bit.
    #[must_use]
    pub fn to_status(&self) -> LoopStatus64 {
        // SAFETY: the buffer holds exactly `size_of::<LoopStatus64>()` bytes
        // and every bit pattern is a valid value for its integer fields.
        unsafe { std::ptr::read_unaligned(self.raw.as_ptr().cast::<LoopStatus64>()) }
    }

    /// Returns the raw native bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; LOOP_INFO64_SIZE] {
        &self.raw
    }
}

impl Default for LoopInfo {
    fn default() -> Self {
        Self::from_status(&LoopStatus64::default())
    }
}

impl TryFrom<Vec<u8>> for LoopInfo {
    type Error = WardenError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        let raw: [u8; LOOP_INFO64_SIZE] =
            bytes.try_into().map_err(|b: Vec<u8>| WardenError::Protocol {
                message: format!(
                    "loop info must be {LOOP_INFO64_SIZE} bytes, got {}",
                    b.len()
                ),
            })?;
        Ok(Self { raw })
    }
}

impl From<LoopInfo> for Vec<u8> {
    fn from(info: LoopInfo) -> Self {
        info.raw.to_vec()
    }
}

impl fmt::Debug for LoopInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoopInfo").field(&self.to_status()).finish()
    }
}
