//! System-wide constants and default paths.

/// Default Unix socket the privileged helper listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/run/warden/warden.sock";

/// Directory holding loop device nodes.
pub const DEFAULT_DEV_DIR: &str = "/dev";

/// Block device major number assigned to loop devices.
pub const LOOP_MAJOR: u64 = 7;

/// Number of loop device slots probed by a single attach.
pub const LOOP_DEVICE_LIMIT: u32 = 256;

/// Permission bits for loop device nodes created on demand.
pub const LOOP_NODE_MODE: u32 = 0o600;

/// Prefix of loop device node names (`loop0`, `loop1`, ...).
pub const LOOP_NODE_PREFIX: &str = "loop";

/// Subdirectory of the new root that receives the old root during a pivot.
///
/// Only used as a temporary mount point, never read as configuration.
pub const PIVOT_SCRATCH_DIR: &str = "etc";

/// Permission bits for directories created by the helper.
pub const MKDIR_MODE: u32 = 0o755;

/// Permission bits applied to the listening socket.
///
/// The group bits let members of `socket_group` reach the helper.
pub const SOCKET_MODE: u32 = 0o660;

/// Largest protocol frame accepted from a peer, in bytes.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Application name used in log output.
pub const APP_NAME: &str = "warden";
