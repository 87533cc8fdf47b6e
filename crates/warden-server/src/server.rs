//! Request dispatch and handlers.

use std::path::Path;

use warden_common::config::{MkdirPolicy, ServerConfig};
use warden_common::constants::MKDIR_MODE;
use warden_common::error::{Result, WardenError};
use warden_common::types::{LoopInfo, OpenMode};
use warden_core::filesystem::mount::{MountSpec, forward_mount};
use warden_core::filesystem::pivot_root::switch_root;
use warden_core::loopdev::{KernelLoopControl, LoopControl, LoopDeviceManager};
use warden_core::syscalls::{LinuxSyscalls, Syscalls};
use warden_protocol::{Reply, Request, ServerTransport};

use crate::context::ServerContext;

/// Executes privileged requests with root rights already in place.
///
/// Requests are handled one at a time. After a successful chroot every
/// later request resolves paths under the new root.
#[derive(Debug)]
pub struct PrivilegedServer<S = LinuxSyscalls, L = KernelLoopControl> {
    sys: S,
    loops: LoopDeviceManager<L>,
    context: ServerContext,
}

impl PrivilegedServer {
    /// Creates a server talking to the running kernel.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if `config` does not validate.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let loops = LoopDeviceManager::from_config(&config);
        Self::with_parts(config, LinuxSyscalls, loops)
    }
}

impl<S: Syscalls, L: LoopControl> PrivilegedServer<S, L> {
    /// Creates a server from explicit syscall and loop-device backends.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if `config` does not validate.
    pub fn with_parts(config: ServerConfig, sys: S, loops: LoopDeviceManager<L>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sys,
            loops,
            context: ServerContext::new(config),
        })
    }

    /// State accumulated by this server.
    pub const fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Syscall backend in use.
    pub const fn syscalls(&self) -> &S {
        &self.sys
    }

    /// Loop device manager in use.
    pub const fn loop_devices(&self) -> &LoopDeviceManager<L> {
        &self.loops
    }

    /// Runs one request and builds its reply.
    pub fn handle(&mut self, request: Request) -> Reply {
        let kind = request.kind();
        tracing::debug!(%kind, "handling request");
        let result = match request {
            Request::Mount {
                source,
                target,
                filesystem_type,
                flags,
                data,
            } => self.mount(&MountSpec {
                source: &source,
                target: &target,
                fstype: &filesystem_type,
                flags,
                data: &data,
            }),
            Request::Mkdir { path } => self.mkdir(&path),
            Request::Chroot { new_root } => self.chroot(&new_root),
            Request::LoopAttach {
                image_path,
                open_mode,
                loop_info,
            } => self.loop_attach(&image_path, open_mode, &loop_info),
        };

        self.context.record_outcome(kind, result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(%kind, error = %e, "request failed");
        }
        Reply::from_result(&result)
    }

    /// Serves requests from `transport` until the peer hangs up.
    ///
    /// Returns the number of requests handled.
    ///
    /// # Errors
    ///
    /// Returns the transport error that ended the session.
    pub fn serve<T: ServerTransport + ?Sized>(&mut self, transport: &mut T) -> Result<u64> {
        let mut handled = 0;
        while let Some(request) = transport.recv()? {
            let reply = self.handle(request);
            transport.send(&reply)?;
            handled += 1;
        }
        tracing::debug!(handled, "peer closed session");
        Ok(handled)
    }

    fn mount(&self, spec: &MountSpec<'_>) -> Result<i64> {
        forward_mount(&self.sys, spec)?;
        Ok(0)
    }

    fn mkdir(&mut self, path: &Path) -> Result<i64> {
        match self.context.config().mkdir_policy {
            MkdirPolicy::RecordOnly => {
                tracing::info!(path = %path.display(), "mkdir request recorded");
                self.context.record_mkdir(path.to_path_buf());
            }
            MkdirPolicy::Create => {
                self.sys
                    .mkdir(path, MKDIR_MODE)
                    .map_err(|e| WardenError::kernel("mkdir", e))?;
                tracing::info!(path = %path.display(), "directory created");
            }
        }
        Ok(0)
    }

    fn chroot(&self, new_root: &Path) -> Result<i64> {
        switch_root(&self.sys, new_root, &self.context.config().pivot_scratch_dir)?;
        Ok(0)
    }

    fn loop_attach(&self, image: &Path, mode: OpenMode, info: &LoopInfo) -> Result<i64> {
        let device = self.loops.attach(image, mode)?;
        // The image stays bound when the status call fails; either way the
        // handle closes here and the binding outlives it.
        self.loops.set_status(&device, info)?;
        Ok(i64::from(device.number()))
    }
}
