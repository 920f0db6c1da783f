//! Filesystem policy for persisted secrets.
//!
//! Witnessd persists exactly one kind of file on its own behalf: small
//! owner-only secret blobs (the software-PUF seed, daemon configuration).
//! This module owns the rules for where those files live and how they are
//! written:
//!
//! - Paths are validated against traversal before any I/O
//! - Writes are atomic: temp file with mode 0600, fsync, rename over target
//! - Reads refuse files that are readable by anyone but the owner
//! - The base directory honours `WITNESSD_DATA_DIR`, then the platform
//!   convention (`XDG_DATA_HOME`, `~/Library/Application Support`,
//!   `%LOCALAPPDATA%`)

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::time::now_nanos;

/// Application directory name used under every platform base.
const APP_DIR: &str = "witnessd";

/// Reject paths that are empty or contain parent-directory components.
pub fn validate_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::InvalidPath("empty path".to_string()));
    }
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(CoreError::PathTraversal(path.display().to_string()));
        }
    }
    Ok(())
}

/// Resolve the per-user data directory for persisted state.
///
/// `WITNESSD_DATA_DIR` overrides everything. Otherwise: `$XDG_DATA_HOME/witnessd`
/// (or `~/.local/share/witnessd`) on Linux, `~/Library/Application Support/witnessd`
/// on macOS, `%LOCALAPPDATA%\witnessd` on Windows.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("WITNESSD_DATA_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME")
            .map_err(|_| CoreError::InvalidPath("HOME not set".to_string()))?;
        Ok(PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join(APP_DIR))
    }

    #[cfg(target_os = "windows")]
    {
        let base = std::env::var("LOCALAPPDATA")
            .map_err(|_| CoreError::InvalidPath("LOCALAPPDATA not set".to_string()))?;
        Ok(PathBuf::from(base).join(APP_DIR))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            if !xdg.is_empty() {
                return Ok(PathBuf::from(xdg).join(APP_DIR));
            }
        }
        let home = std::env::var("HOME")
            .map_err(|_| CoreError::InvalidPath("HOME not set".to_string()))?;
        Ok(PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR))
    }
}

/// Resolve the per-user runtime directory (sockets, pid files).
///
/// Prefers `XDG_RUNTIME_DIR`; falls back to the data directory so the daemon
/// still works on systems without a runtime dir.
pub fn runtime_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir).join(APP_DIR));
        }
    }
    data_dir()
}

/// Default path of the entropy daemon socket.
pub fn default_socket_path() -> Result<PathBuf> {
    Ok(runtime_dir()?.join("entropy.sock"))
}

/// Atomically write a secret file with owner-only permissions.
///
/// The data lands in `<target>.tmp.<nanos>` first (mode 0600), is fsynced,
/// then renamed over the target so a crash never leaves a partial secret.
/// The temp file is removed on any failure.
pub fn write_secret_file(path: &Path, data: &[u8]) -> Result<()> {
    validate_path(path)?;

    let parent = path
        .parent()
        .ok_or_else(|| CoreError::InvalidPath(path.display().to_string()))?;
    fs::create_dir_all(parent)?;
    restrict_dir_permissions(parent);

    let file_name = path
        .file_name()
        .ok_or_else(|| CoreError::InvalidPath(path.display().to_string()))?
        .to_string_lossy();
    let tmp_path = parent.join(format!("{file_name}.tmp.{}", now_nanos()));

    let result = write_and_rename(&tmp_path, path, data);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_and_rename(tmp_path: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp_path, target).map_err(|e| CoreError::WriteFailed {
        path: target.display().to_string(),
        reason: e.to_string(),
    })?;

    // Persist the rename itself where the platform allows it.
    if let Some(parent) = target.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Verify that `path` is readable only by its owner.
#[cfg(unix)]
pub fn check_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let meta = fs::metadata(path)?;
    let mode = meta.mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(CoreError::InsecurePermissions {
            path: path.display().to_string(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_traversal() {
        assert!(matches!(
            validate_path(Path::new("/tmp/../etc/passwd")),
            Err(CoreError::PathTraversal(_))
        ));
        assert!(validate_path(Path::new("/tmp/witnessd/seed")).is_ok());
    }

    #[test]
    fn validate_rejects_empty() {
        assert!(matches!(
            validate_path(Path::new("")),
            Err(CoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn write_secret_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("seed");
        write_secret_file(&target, b"0123456789abcdef").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn write_secret_file_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("seed");
        write_secret_file(&target, &[7u8; 32]).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_secret_file_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("seed");
        write_secret_file(&target, b"old").unwrap();
        write_secret_file(&target, b"new").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn secret_files_are_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("seed");
        write_secret_file(&target, &[1u8; 32]).unwrap();
        check_owner_only(&target).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn check_owner_only_rejects_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("seed");
        fs::write(&target, b"x").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            check_owner_only(&target),
            Err(CoreError::InsecurePermissions { .. })
        ));
    }

    #[test]
    fn data_dir_honours_override() {
        // Env mutation: keep assertions in one test to avoid ordering races.
        std::env::set_var("WITNESSD_DATA_DIR", "/tmp/witnessd-test-base");
        let dir = data_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/witnessd-test-base"));
        std::env::remove_var("WITNESSD_DATA_DIR");
    }
}
