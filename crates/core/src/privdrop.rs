//! Privilege-drop capability for the isolated entropy daemon.
//!
//! The daemon binds its socket as the launching user, then sheds privileges
//! before serving requests. The order matters: supplementary groups first,
//! then GID, then UID, and finally the core-dump rlimit is zeroed so a crash
//! cannot spill pool state to disk. The daemon consumes the capability as a
//! trait so tests and non-Unix builds can substitute a no-op.

use crate::error::{CoreError, Result};

/// Capability to drop process privileges to an unprivileged identity.
pub trait PrivilegeDropper: Send + Sync {
    /// Drop to `uid`/`gid`. A target of 0 for both means "do not drop".
    fn drop_privileges(&self, uid: u32, gid: u32) -> Result<()>;
}

/// Production dropper backed by libc.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPrivilegeDropper;

#[cfg(unix)]
impl PrivilegeDropper for UnixPrivilegeDropper {
    fn drop_privileges(&self, uid: u32, gid: u32) -> Result<()> {
        if uid == 0 && gid == 0 {
            tracing::debug!("privilege drop skipped (target uid/gid 0)");
            disable_core_dumps()?;
            return Ok(());
        }

        // SAFETY: plain syscalls; each return value is checked before the
        // next step so a partial drop never goes unnoticed.
        unsafe {
            if gid != 0 {
                if libc::setgroups(0, std::ptr::null()) != 0 {
                    return Err(last_errno("setgroups"));
                }
                if libc::setgid(gid) != 0 {
                    return Err(last_errno("setgid"));
                }
            }
            if uid != 0 {
                if libc::setuid(uid) != 0 {
                    return Err(last_errno("setuid"));
                }
                // A successful setuid must not be reversible.
                if libc::setuid(0) == 0 {
                    return Err(CoreError::PrivilegeDrop(
                        "setuid succeeded but root could be re-acquired".to_string(),
                    ));
                }
            }
        }

        disable_core_dumps()?;
        tracing::info!(uid, gid, "privileges dropped");
        Ok(())
    }
}

#[cfg(not(unix))]
impl PrivilegeDropper for UnixPrivilegeDropper {
    fn drop_privileges(&self, _uid: u32, _gid: u32) -> Result<()> {
        Err(CoreError::PrivilegeDrop(
            "privilege drop is not supported on this platform".to_string(),
        ))
    }
}

/// No-op dropper for tests and embedders that manage privileges themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPrivilegeDropper;

impl PrivilegeDropper for NoopPrivilegeDropper {
    fn drop_privileges(&self, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn disable_core_dumps() -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: passes a pointer to a stack-local struct for the call duration.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };
    if rc != 0 {
        return Err(last_errno("setrlimit(RLIMIT_CORE)"));
    }
    Ok(())
}

#[cfg(unix)]
fn last_errno(call: &str) -> CoreError {
    CoreError::PrivilegeDrop(format!(
        "{call} failed: {}",
        std::io::Error::last_os_error()
    ))
}
