//! # warden-client
//!
//! Unprivileged side of Warden: one blocking call per privileged
//! operation.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use warden_client::Client;
//!
//! let mut client = Client::connect(Path::new("/run/warden/warden.sock"))?;
//! client.chroot(Path::new("/run/containers/c1/rootfs"))?;
//! # Ok::<(), warden_common::error::WardenError>(())
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

use std::os::unix::net::UnixStream;
use std::path::Path;

use warden_common::error::{Result, WardenError};
use warden_common::types::{LoopInfo, OpenMode};
use warden_protocol::{FramedStream, Request, Transport};

/// Client connected over the helper's Unix socket.
pub type SocketClient = Client<FramedStream<UnixStream>>;

/// Blocking stub for the privileged helper.
///
/// Each method sends one request and waits for its reply. Failures
/// reported by the helper come back as [`WardenError::Remote`].
#[derive(Debug)]
pub struct Client<T> {
    transport: T,
}

impl SocketClient {
    /// Connects to the helper listening on `socket`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Io`] if the socket cannot be reached.
    pub fn connect(socket: &Path) -> Result<Self> {
        Ok(Self::new(FramedStream::connect(socket)?))
    }
}

impl<T: Transport> Client<T> {
    /// Wraps an established transport.
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Returns the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn call(&mut self, request: &Request) -> Result<i64> {
        let kind = request.kind();
        let result = self.transport.call(request)?.into_result();
        tracing::debug!(%kind, ok = result.is_ok(), "privileged call returned");
        result
    }

    /// Asks the helper to mount `source` on `target`.
    ///
    /// The helper does not validate the arguments; check them first.
    ///
    /// # Errors
    ///
    /// Returns the transport error or the helper's failure.
    pub fn mount(
        &mut self,
        source: &str,
        target: &Path,
        filesystem_type: &str,
        flags: u64,
        data: &str,
    ) -> Result<()> {
        self.call(&Request::Mount {
            source: source.to_owned(),
            target: target.to_path_buf(),
            filesystem_type: filesystem_type.to_owned(),
            flags,
            data: data.to_owned(),
        })
        .map(drop)
    }

    /// Asks the helper to create `path`.
    ///
    /// # Errors
    ///
    /// Returns the transport error or the helper's failure.
    pub fn mkdir(&mut self, path: &Path) -> Result<()> {
        self.call(&Request::Mkdir {
            path: path.to_path_buf(),
        })
        .map(drop)
    }

    /// Asks the helper to pivot its root into `new_root`.
    ///
    /// `new_root` must contain the helper's scratch directory (`etc` by
    /// default). The switch cannot be undone.
    ///
    /// # Errors
    ///
    /// Returns the transport error or the helper's failure.
    pub fn chroot(&mut self, new_root: &Path) -> Result<()> {
        self.call(&Request::Chroot {
            new_root: new_root.to_path_buf(),
        })
        .map(drop)
    }

    /// Asks the helper to bind `image` to a free loop device and apply
    /// `info`, returning the device number.
    ///
    /// If applying `info` fails the device stays bound; releasing it is
    /// up to the caller.
    ///
    /// # Errors
    ///
    /// Returns the transport error, the helper's failure, or a protocol
    /// error if the reported number is out of range.
    pub fn loop_attach(&mut self, image: &Path, mode: OpenMode, info: &LoopInfo) -> Result<u32> {
        let value = self.call(&Request::LoopAttach {
            image_path: image.to_path_buf(),
            open_mode: mode,
            loop_info: info.clone(),
        })?;
        u32::try_from(value).map_err(|_| WardenError::Protocol {
            message: format!("helper returned invalid loop device number {value}"),
        })
    }
}
