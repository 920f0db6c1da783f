//! Secure memory for key material.
//!
//! Every buffer that holds a seed, a session key, or a PUF response is kept
//! in a [`SecretBytes`]: zeroed on drop, pinned against swap where the
//! platform allows it, and excluded from `Debug` output. Page locking is
//! best-effort; a failed `mlock` is logged and the buffer is still usable.

use zeroize::Zeroize;

/// A byte buffer holding secret material.
///
/// The contents are zeroized on drop. On Unix the backing pages are locked
/// with `mlock` when possible so they cannot be written to swap.
pub struct SecretBytes {
    bytes: Vec<u8>,
    locked: bool,
}

impl SecretBytes {
    /// Wrap an existing buffer. Takes ownership so no unzeroized copy of the
    /// secret outlives this value.
    pub fn new(bytes: Vec<u8>) -> Self {
        let locked = lock_pages(&bytes);
        if !locked && !bytes.is_empty() {
            tracing::debug!(len = bytes.len(), "mlock unavailable; secret pages may swap");
        }
        Self { bytes, locked }
    }

    /// Allocate a zero-filled secret buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    /// Borrow the secret. Callers must not copy it into unmanaged buffers.
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutably borrow the secret, e.g. to fill it from an entropy source.
    pub fn expose_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the backing pages are pinned against swap.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({} bytes, locked={})", self.bytes.len(), self.locked)
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            unlock_pages(&self.bytes);
        }
    }
}

#[cfg(unix)]
fn lock_pages(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    // SAFETY: the pointer and length describe a live allocation owned by the
    // caller for the duration of the call.
    unsafe { libc::mlock(bytes.as_ptr() as *const libc::c_void, bytes.len()) == 0 }
}

#[cfg(unix)]
fn unlock_pages(bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    // SAFETY: same allocation that was locked in `lock_pages`.
    unsafe {
        libc::munlock(bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

#[cfg(not(unix))]
fn lock_pages(_bytes: &[u8]) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_pages(_bytes: &[u8]) {}

/// Best-effort lock of the whole process image against swap.
///
/// Used by the entropy daemon before dropping privileges. Failure is not
/// fatal; the daemon continues and logs the condition.
#[cfg(unix)]
pub fn lock_process_memory() -> bool {
    // SAFETY: plain syscall with constant flags.
    unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) == 0 }
}

#[cfg(not(unix))]
pub fn lock_process_memory() -> bool {
    false
}
