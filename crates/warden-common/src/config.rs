//! Configuration model for the privileged helper.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, WardenError};

/// How the helper answers a directory-creation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MkdirPolicy {
    /// Log and record the request without touching the filesystem.
    #[default]
    RecordOnly,
    /// Create the directory.
    Create,
}

/// Root configuration for the privileged helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket the helper listens on.
    pub socket_path: PathBuf,
    /// Uid given ownership of the socket. `None` keeps the helper's uid.
    pub socket_owner: Option<u32>,
    /// Gid whose members may connect. `None` keeps the helper's gid.
    pub socket_group: Option<u32>,
    /// Directory holding `loopN` device nodes.
    pub dev_dir: PathBuf,
    /// Number of loop device slots an attach may probe.
    pub max_loop_devices: u32,
    /// Subdirectory of a new root that receives the old root on pivot.
    pub pivot_scratch_dir: String,
    /// Behavior of directory-creation requests.
    pub mkdir_policy: MkdirPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(constants::DEFAULT_SOCKET_PATH),
            socket_owner: None,
            socket_group: None,
            dev_dir: PathBuf::from(constants::DEFAULT_DEV_DIR),
            max_loop_devices: constants::LOOP_DEVICE_LIMIT,
            pivot_scratch_dir: constants::PIVOT_SCRATCH_DIR.to_owned(),
            mkdir_policy: MkdirPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or
    /// fails [`ServerConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| WardenError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded helper configuration");
        Ok(config)
    }

    /// Checks value ranges that the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.max_loop_devices == 0 || self.max_loop_devices > constants::LOOP_DEVICE_LIMIT {
            return Err(WardenError::Config {
                message: format!(
                    "max_loop_devices must be within 1..={}, got {}",
                    constants::LOOP_DEVICE_LIMIT,
                    self.max_loop_devices
                ),
            });
        }
        let scratch = Path::new(&self.pivot_scratch_dir);
        let mut parts = scratch.components();
        let single_normal = matches!(parts.next(), Some(std::path::Component::Normal(_)))
            && parts.next().is_none();
        if !single_normal {
            return Err(WardenError::Config {
                message: format!(
                    "pivot_scratch_dir must be a single relative path component, got {:?}",
                    self.pivot_scratch_dir
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.max_loop_devices, 256);
        assert_eq!(config.pivot_scratch_dir, "etc");
        assert_eq!(config.mkdir_policy, MkdirPolicy::RecordOnly);
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warden.json");
        std::fs::write(&path, r#"{"mkdir_policy": "create", "max_loop_devices": 8}"#)
            .expect("write");

        let config = ServerConfig::load(&path).expect("load");
        assert_eq!(config.mkdir_policy, MkdirPolicy::Create);
        assert_eq!(config.max_loop_devices, 8);
        assert_eq!(config.dev_dir, PathBuf::from("/dev"));
        assert_eq!(config.socket_group, None);
    }

    #[test]
    fn load_reads_socket_ownership() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("warden.json");
        std::fs::write(&path, r#"{"socket_owner": 1000, "socket_group": 27}"#).expect("write");

        let config = ServerConfig::load(&path).expect("load");
        assert_eq!(config.socket_owner, Some(1000));
        assert_eq!(config.socket_group, Some(27));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ServerConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, WardenError::Io { .. }));
    }

    #[test]
    fn validate_rejects_out_of_range_device_count() {
        let config = ServerConfig {
            max_loop_devices: 257,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(WardenError::Config { .. })));

        let config = ServerConfig {
            max_loop_devices: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_nested_scratch_dir() {
        for bad in ["", "a/b", "/etc", ".."] {
            let config = ServerConfig {
                pivot_scratch_dir: bad.into(),
                ..ServerConfig::default()
            };
            assert!(config.validate().is_err(), "{bad:?} should be rejected");
        }
    }
}
