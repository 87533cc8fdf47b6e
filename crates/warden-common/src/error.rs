//! Unified error types for the Warden workspace.
//!
//! Errors raised on the privileged side cross the process boundary as an
//! [`ErrorKind`] plus a message; the client surfaces them as
//! [`WardenError::Remote`].

use std::fmt;
use std::path::PathBuf;

use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Every loop device slot was probed and none could be bound.
    #[error("no free loop device after probing {tried} slots")]
    ResourceExhausted {
        /// Number of device numbers that were tried.
        tried: u32,
    },

    /// The host environment does not look the way the operation requires.
    #[error("environment mismatch at {path}: {message}")]
    EnvironmentMismatch {
        /// Path that failed the check.
        path: PathBuf,
        /// Description of the mismatch.
        message: String,
    },

    /// A privileged syscall was refused by the kernel.
    #[error("{operation} failed: {source}")]
    KernelRejected {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Errno reported by the kernel.
        source: Errno,
    },

    /// The peer sent something that is not a valid protocol message.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Credential elevation was requested while one is already active on
    /// the calling thread.
    #[error("credential elevation already active on this thread")]
    ElevationActive,

    /// The privileged peer reported a failure.
    #[error("privileged helper reported {kind}: {message}")]
    Remote {
        /// Category of the remote failure.
        kind: ErrorKind,
        /// Error text produced by the peer.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl WardenError {
    /// Wraps a kernel errno for the named operation.
    #[must_use]
    pub const fn kernel(operation: &'static str, source: Errno) -> Self {
        Self::KernelRejected { operation, source }
    }

    /// Returns the wire category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::EnvironmentMismatch { .. } => ErrorKind::EnvironmentMismatch,
            Self::KernelRejected { .. } | Self::ElevationActive => ErrorKind::KernelRejected,
            Self::Protocol { .. } | Self::Serialization { .. } => ErrorKind::Protocol,
            Self::Io { .. } | Self::Config { .. } => ErrorKind::Internal,
            Self::Remote { kind, .. } => *kind,
        }
    }
}

/// Error categories carried in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// All loop device slots were busy.
    ResourceExhausted,
    /// The host is not set up the way the operation expects.
    EnvironmentMismatch,
    /// A syscall failed.
    KernelRejected,
    /// The request could not be decoded or transported.
    Protocol,
    /// Any other failure on the privileged side.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted => write!(f, "resource exhausted"),
            Self::EnvironmentMismatch => write!(f, "environment mismatch"),
            Self::KernelRejected => write!(f, "kernel rejected"),
            Self::Protocol => write!(f, "protocol error"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, WardenError>;
