//! Request and reply messages.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use warden_common::error::{ErrorKind, Result, WardenError};
use warden_common::types::{LoopInfo, OpenMode};

/// One privileged operation requested by the unprivileged side.
///
/// The set is closed: the helper matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Mount a filesystem with the given arguments, unvalidated.
    Mount {
        /// Mount source.
        source: String,
        /// Mount point.
        target: PathBuf,
        /// Filesystem type, empty when unused.
        filesystem_type: String,
        /// Raw `MS_*` flag bits.
        flags: u64,
        /// Filesystem-specific options.
        data: String,
    },
    /// Create a directory.
    Mkdir {
        /// Directory to create.
        path: PathBuf,
    },
    /// Pivot the helper's root into `new_root`.
    Chroot {
        /// Directory that becomes `/`.
        new_root: PathBuf,
    },
    /// Bind an image to a free loop device and apply its status.
    LoopAttach {
        /// Backing image.
        image_path: PathBuf,
        /// Mode the image is opened with.
        open_mode: OpenMode,
        /// Native `loop_info64` record applied after binding.
        loop_info: LoopInfo,
    },
}

impl Request {
    /// Returns the kind of this request.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Mount { .. } => RequestKind::Mount,
            Self::Mkdir { .. } => RequestKind::Mkdir,
            Self::Chroot { .. } => RequestKind::Chroot,
            Self::LoopAttach { .. } => RequestKind::LoopAttach,
        }
    }
}

/// Discriminant of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    /// [`Request::Mount`].
    Mount,
    /// [`Request::Mkdir`].
    Mkdir,
    /// [`Request::Chroot`].
    Chroot,
    /// [`Request::LoopAttach`].
    LoopAttach,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mount => write!(f, "mount"),
            Self::Mkdir => write!(f, "mkdir"),
            Self::Chroot => write!(f, "chroot"),
            Self::LoopAttach => write!(f, "loop_attach"),
        }
    }
}

/// Failure reported by the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable error text.
    pub message: String,
}

/// Answer to a single [`Request`].
///
/// `value` is the device number for a loop attach and 0 otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Operation-specific result.
    pub value: i64,
    /// Failure, if the operation did not succeed.
    pub error: Option<RemoteError>,
}

impl Reply {
    /// A successful reply carrying `value`.
    #[must_use]
    pub const fn ok(value: i64) -> Self {
        Self { value, error: None }
    }

    /// A failed reply describing `err`.
    #[must_use]
    pub fn failure(err: &WardenError) -> Self {
        Self {
            value: 0,
            error: Some(RemoteError {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    /// Builds a reply from a handler result.
    #[must_use]
    pub fn from_result(result: &Result<i64>) -> Self {
        match result {
            Ok(value) => Self::ok(*value),
            Err(err) => Self::failure(err),
        }
    }

    /// Converts the reply back into a result on the client side.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Remote`] if the helper reported a failure.
    pub fn into_result(self) -> Result<i64> {
        match self.error {
            None => Ok(self.value),
            Some(RemoteError { kind, message }) => Err(WardenError::Remote { kind, message }),
        }
    }
}
