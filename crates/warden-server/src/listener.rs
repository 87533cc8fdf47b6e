//! Unix socket front end for the privileged helper.

use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use nix::unistd::{Gid, Uid, chown};
use warden_common::config::ServerConfig;
use warden_common::constants::SOCKET_MODE;
use warden_common::error::{Result, WardenError};
use warden_core::loopdev::LoopControl;
use warden_core::syscalls::Syscalls;
use warden_protocol::FramedStream;

use crate::server::PrivilegedServer;

/// Pause after the process runs out of descriptors, before accepting again.
const EXHAUSTED_BACKOFF: Duration = Duration::from_millis(100);

/// Binds the helper socket at `config.socket_path`.
///
/// The socket gets [`SOCKET_MODE`] and, when configured, the owner and
/// group that unprivileged clients connect as. A stale socket left by an
/// earlier run is removed first; any other kind of file at the path is left
/// alone and reported.
///
/// # Errors
///
/// Returns an error if the path is occupied by a non-socket, or if the
/// parent directory, bind, ownership or permission change fails.
pub fn bind_socket(config: &ServerConfig) -> Result<UnixListener> {
    let path = config.socket_path.as_path();
    let io_err = |source| WardenError::Io {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path).map_err(io_err)?;
            tracing::debug!(socket = %path.display(), "removed stale socket");
        }
        Ok(_) => {
            return Err(WardenError::EnvironmentMismatch {
                path: path.to_path_buf(),
                message: "exists and is not a socket".into(),
            });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WardenError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let listener = UnixListener::bind(path).map_err(io_err)?;
    if config.socket_owner.is_some() || config.socket_group.is_some() {
        chown(
            path,
            config.socket_owner.map(Uid::from_raw),
            config.socket_group.map(Gid::from_raw),
        )
        .map_err(|e| WardenError::kernel("chown", e))?;
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
        .map_err(io_err)?;
    tracing::info!(
        socket = %path.display(),
        owner = ?config.socket_owner,
        group = ?config.socket_group,
        "listening"
    );
    Ok(listener)
}

/// Accepts connections and serves each to completion, one at a time.
///
/// A failing session is logged and the next connection is accepted, as is
/// an accept that failed for a transient reason.
///
/// # Errors
///
/// Returns an error only if accepting fails for a non-transient reason.
pub fn serve_listener<S: Syscalls, L: LoopControl>(
    server: &mut PrivilegedServer<S, L>,
    listener: &UnixListener,
) -> Result<()> {
    loop {
        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) if is_transient(&e) => {
                tracing::warn!(error = %e, "accept failed, retrying");
                let errno = e.raw_os_error().map(Errno::from_raw);
                if matches!(errno, Some(Errno::EMFILE | Errno::ENFILE)) {
                    std::thread::sleep(EXHAUSTED_BACKOFF);
                }
                continue;
            }
            Err(e) => {
                return Err(WardenError::Protocol {
                    message: format!("accept failed: {e}"),
                });
            }
        };
        log_peer(&stream);
        let mut transport = FramedStream::new(stream);
        match server.serve(&mut transport) {
            Ok(handled) => tracing::debug!(handled, "session finished"),
            Err(e) => tracing::warn!(error = %e, "session aborted"),
        }
    }
}

/// Accept failures that say nothing about the listening socket itself.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error().map(Errno::from_raw),
        Some(
            Errno::EINTR
                | Errno::ECONNABORTED
                | Errno::EPROTO
                | Errno::EMFILE
                | Errno::ENFILE
                | Errno::ENOBUFS
                | Errno::ENOMEM
        )
    )
}

fn log_peer(stream: &UnixStream) {
    match getsockopt(stream, PeerCredentials) {
        Ok(cred) => tracing::info!(
            uid = cred.uid(),
            gid = cred.gid(),
            pid = cred.pid(),
            "client connected"
        ),
        Err(e) => tracing::debug!(error = %e, "peer credentials unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    use super::*;

    const NOBODY: u32 = 65534;

    fn config_at(path: &Path) -> ServerConfig {
        ServerConfig {
            socket_path: path.to_path_buf(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn bind_socket_sets_group_accessible_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run").join("warden.sock");
        let _listener = bind_socket(&config_at(&path)).expect("bind");
        let mode = std::fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o660);
        let _stream = UnixStream::connect(&path).expect("connect");
    }

    #[test]
    fn bind_socket_applies_configured_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warden.sock");
        let gid = nix::unistd::getegid().as_raw();
        let config = ServerConfig {
            socket_group: Some(gid),
            ..config_at(&path)
        };
        let _listener = bind_socket(&config).expect("bind");
        assert_eq!(std::fs::metadata(&path).expect("meta").gid(), gid);
    }

    #[test]
    #[allow(unsafe_code)]
    fn socket_owner_can_connect_without_root() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        let path = dir.path().join("warden.sock");
        let config = ServerConfig {
            socket_owner: Some(NOBODY),
            ..config_at(&path)
        };
        let _listener = bind_socket(&config).expect("bind");
        assert_eq!(std::fs::metadata(&path).expect("meta").uid(), NOBODY);

        let connected = std::thread::spawn(move || {
            // The raw syscall changes the credentials of this thread only.
            // SAFETY: plain syscall with integer arguments.
            let rc = unsafe { libc::syscall(libc::SYS_setresuid, NOBODY, NOBODY, NOBODY) };
            assert_eq!(rc, 0);
            UnixStream::connect(&path).map(drop).map_err(|e| e.kind())
        })
        .join()
        .expect("client thread");
        assert_eq!(connected, Ok(()));
    }

    #[test]
    fn bind_socket_replaces_stale_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_at(&dir.path().join("warden.sock"));
        drop(bind_socket(&config).expect("first bind"));
        assert!(config.socket_path.exists());
        let _listener = bind_socket(&config).expect("second bind");
    }

    #[test]
    fn bind_socket_refuses_to_clobber_regular_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warden.sock");
        std::fs::write(&path, b"keep me").expect("write");
        let err = bind_socket(&config_at(&path)).unwrap_err();
        assert!(matches!(err, WardenError::EnvironmentMismatch { .. }));
        assert_eq!(std::fs::read(&path).expect("read"), b"keep me");
    }

    #[test]
    fn descriptor_exhaustion_does_not_stop_accepting() {
        for errno in [Errno::EMFILE, Errno::ENFILE, Errno::ECONNABORTED, Errno::EINTR] {
            assert!(is_transient(&io::Error::from_raw_os_error(errno as i32)), "{errno}");
        }
        assert!(!is_transient(&io::Error::from_raw_os_error(Errno::EBADF as i32)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::Other)));
    }
}
