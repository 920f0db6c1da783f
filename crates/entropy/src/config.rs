//! Daemon configuration.
//!
//! Loaded from TOML with environment overrides, or built in code. Durations
//! travel as integer seconds in the file format.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EntropyError, Result};
use crate::pool::PoolConfig;

/// Runtime configuration of the entropy daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Socket path; defaults to the per-user runtime dir + `entropy.sock`.
    pub socket_path: PathBuf,
    /// UID to drop to after binding; 0 = do not drop.
    pub drop_uid: u32,
    /// GID to drop to after binding; 0 = do not drop.
    pub drop_gid: u32,
    /// UID allowed to connect; `None` means the daemon's effective UID.
    pub allowed_uid: Option<u32>,
    /// Per-connection read deadline.
    pub read_timeout: Duration,
    /// Blended-pool tuning.
    pub pool: PoolConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: witnessd_core::default_socket_path()
                .unwrap_or_else(|_| PathBuf::from("/tmp/witnessd/entropy.sock")),
            drop_uid: 0,
            drop_gid: 0,
            allowed_uid: None,
            read_timeout: Duration::from_secs(30),
            pool: PoolConfig::default(),
        }
    }
}

/// On-disk representation (TOML).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DaemonConfigFile {
    socket_path: Option<PathBuf>,
    uid: Option<u32>,
    gid: Option<u32>,
    allowed_uid: Option<u32>,
    read_timeout_secs: Option<u64>,
    min_healthy_sources: Option<usize>,
    reseed_interval_secs: Option<u64>,
}

impl DaemonConfig {
    /// Load configuration from a TOML file, applying defaults for anything
    /// unset. `WITNESSD_DATA_DIR` (via the default socket path) still wins
    /// when the file does not pin a socket path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: DaemonConfigFile =
            toml::from_str(&content).map_err(|e| EntropyError::Config(e.to_string()))?;

        let mut config = Self::default();
        if let Some(socket_path) = file.socket_path {
            config.socket_path = socket_path;
        }
        if let Some(uid) = file.uid {
            config.drop_uid = uid;
        }
        if let Some(gid) = file.gid {
            config.drop_gid = gid;
        }
        config.allowed_uid = file.allowed_uid.or(config.allowed_uid);
        if let Some(secs) = file.read_timeout_secs {
            config.read_timeout = Duration::from_secs(secs);
        }
        if let Some(min) = file.min_healthy_sources {
            config.pool.min_healthy_sources = min;
        }
        if let Some(secs) = file.reseed_interval_secs {
            config.pool.reseed_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_sensible() {
        let config = DaemonConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.drop_uid, 0);
        assert!(config.socket_path.to_string_lossy().ends_with("entropy.sock"));
    }

    #[test]
    fn from_file_applies_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "socket_path = \"/run/witnessd/entropy.sock\"\n\
             uid = 990\n\
             gid = 990\n\
             read_timeout_secs = 5\n\
             min_healthy_sources = 2"
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/witnessd/entropy.sock"));
        assert_eq!(config.drop_uid, 990);
        assert_eq!(config.drop_gid, 990);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.pool.min_healthy_sources, 2);
    }

    #[test]
    fn from_file_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "socket_path = [not toml").unwrap();
        assert!(matches!(
            DaemonConfig::from_file(file.path()),
            Err(EntropyError::Config(_))
        ));
    }
}
