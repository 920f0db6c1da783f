//! Isolated entropy daemon.
//!
//! Runs as its own OS process bound to a local stream socket with owner-only
//! permissions. The accept loop reads peer credentials from the kernel at
//! accept time, hands each authorized connection a fresh 32-byte session
//! key, and serves HMAC-authenticated requests from the blended pool.
//!
//! Privilege model: bind socket → best-effort lock of process memory →
//! drop to the configured UID/GID (supplementary groups cleared) → zero the
//! core-dump rlimit → serve. No lock is held across socket I/O; each
//! connection runs on its own task.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;

use witnessd_core::PrivilegeDropper;

use crate::blended::BlendedEntropyPool;
use crate::config::DaemonConfig;
use crate::error::{EntropyError, Result};
use crate::wire::{self, ErrorCode};

/// Per-connection session state.
struct PeerSession {
    uid: u32,
    pid: i32,
    key: [u8; wire::KEY_LEN],
    last_nonce: Option<[u8; wire::NONCE_LEN]>,
    seq: u64,
}

/// The isolated entropy daemon.
pub struct EntropyDaemon {
    config: DaemonConfig,
    pool: Arc<BlendedEntropyPool>,
    listener: UnixListener,
}

impl EntropyDaemon {
    /// Bind the socket, lock memory, and drop privileges.
    ///
    /// Must be called before serving; the returned daemon is ready for
    /// [`EntropyDaemon::run`].
    pub fn bind(
        config: DaemonConfig,
        pool: Arc<BlendedEntropyPool>,
        dropper: &dyn PrivilegeDropper,
    ) -> Result<Self> {
        witnessd_core::fsio::validate_path(&config.socket_path)?;
        if let Some(parent) = config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A stale socket from a previous run blocks bind.
        let _ = std::fs::remove_file(&config.socket_path);

        let listener = UnixListener::bind(&config.socket_path)?;
        restrict_socket_permissions(&config.socket_path)?;

        if !witnessd_core::secure::lock_process_memory() {
            tracing::warn!("could not lock process memory; pool pages may swap");
        }

        dropper.drop_privileges(config.drop_uid, config.drop_gid)?;

        tracing::info!(socket = %config.socket_path.display(), "entropy daemon bound");
        Ok(Self {
            config,
            pool,
            listener,
        })
    }

    /// Path the daemon is bound to.
    pub fn socket_path(&self) -> &std::path::Path {
        &self.config.socket_path
    }

    /// Serve until `shutdown` fires. Open connections are torn down and the
    /// socket file is removed on exit.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let allowed_uid = self.config.allowed_uid.unwrap_or_else(effective_uid);
        let mut connections = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let pool = Arc::clone(&self.pool);
                            let read_timeout = self.config.read_timeout;
                            connections.spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, pool, allowed_uid, read_timeout).await
                                {
                                    tracing::debug!(error = %e, "entropy connection closed");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => {
                    tracing::info!("entropy daemon shutting down");
                    break;
                }
            }
        }

        connections.shutdown().await;
        let _ = std::fs::remove_file(&self.config.socket_path);
        Ok(())
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    pool: Arc<BlendedEntropyPool>,
    allowed_uid: u32,
    read_timeout: std::time::Duration,
) -> Result<()> {
    let cred = stream.peer_cred()?;
    let uid = cred.uid();
    let pid = peer_pid(&cred);

    if uid != allowed_uid {
        tracing::warn!(uid, allowed_uid, "unauthorized entropy client rejected");
        let _ = stream.write_all(&wire::encode_error(ErrorCode::Unauthorized)).await;
        return Err(EntropyError::UnauthorizedClient(format!(
            "uid {uid} (pid {pid})"
        )));
    }

    let mut session = PeerSession {
        uid,
        pid,
        key: fresh_session_key(&pool),
        last_nonce: None,
        seq: 0,
    };

    stream.write_all(&wire::encode_hello(&session.key)).await?;
    tracing::debug!(uid = session.uid, pid = session.pid, "entropy session established");

    let mut frame = [0u8; wire::REQUEST_FRAME_LEN];
    loop {
        match tokio::time::timeout(read_timeout, stream.read_exact(&mut frame)).await {
            Err(_) => {
                tracing::debug!(uid = session.uid, "entropy connection read deadline expired");
                return Ok(());
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }

        // Authentication and protocol violations terminate the connection;
        // the client reconnects with a fresh session.
        serve_request(&mut stream, &pool, &mut session, &frame).await?;
    }
}

async fn serve_request(
    stream: &mut UnixStream,
    pool: &BlendedEntropyPool,
    session: &mut PeerSession,
    frame: &[u8],
) -> Result<()> {
    let request = match wire::decode_request(&session.key, frame) {
        Ok(request) => request,
        Err(e) => {
            let code = match &e {
                EntropyError::AuthenticationFailed => ErrorCode::AuthenticationFailed,
                _ => ErrorCode::ProtocolViolation,
            };
            let _ = stream.write_all(&wire::encode_error(code)).await;
            return Err(e);
        }
    };

    if session.last_nonce == Some(request.nonce) {
        let _ = stream
            .write_all(&wire::encode_error(ErrorCode::ProtocolViolation))
            .await;
        return Err(EntropyError::ProtocolViolation(
            "request nonce replayed".to_string(),
        ));
    }

    let n = request.bytes_requested.min(wire::MAX_REQUEST_BYTES) as usize;
    let entropy = match pool.get_bytes(n) {
        Ok(entropy) => entropy,
        Err(e) => {
            tracing::warn!(error = %e, "blended pool refused request");
            stream.write_all(&wire::encode_error(ErrorCode::Depleted)).await?;
            // Depletion is recoverable; keep the connection.
            session.last_nonce = Some(request.nonce);
            return Ok(());
        }
    };

    session.seq += 1;
    session.last_nonce = Some(request.nonce);

    let mut flags = 0u32;
    if pool.is_healthy() {
        flags |= wire::FLAG_POOL_HEALTHY;
    } else {
        flags |= wire::FLAG_DEGRADED;
    }

    let response = wire::encode_success(
        &session.key,
        request.request_id,
        &entropy,
        flags,
        witnessd_core::now_millis(),
        session.seq,
    );
    stream.write_all(&response).await?;
    Ok(())
}

/// Owner-only mode on the socket node (0600).
#[cfg(unix)]
fn restrict_socket_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_socket_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

/// Derive a per-connection session key, preferring the pool itself.
fn fresh_session_key(pool: &BlendedEntropyPool) -> [u8; wire::KEY_LEN] {
    let mut key = [0u8; wire::KEY_LEN];
    match pool.get_bytes(wire::KEY_LEN) {
        Ok(bytes) => key.copy_from_slice(&bytes),
        Err(_) => OsRng.fill_bytes(&mut key),
    }
    key
}

#[cfg(unix)]
fn effective_uid() -> u32 {
    // SAFETY: geteuid cannot fail.
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn effective_uid() -> u32 {
    0
}

#[cfg(target_os = "linux")]
fn peer_pid(cred: &tokio::net::unix::UCred) -> i32 {
    cred.pid().unwrap_or(0)
}

/// Platforms that expose only the UID report PID 0; sessions are keyed by
/// UID there.
#[cfg(not(target_os = "linux"))]
fn peer_pid(_cred: &tokio::net::unix::UCred) -> i32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::sources::OsSource;
    use witnessd_core::NoopPrivilegeDropper;

    fn test_pool() -> Arc<BlendedEntropyPool> {
        let pool = BlendedEntropyPool::new(PoolConfig::default());
        pool.add_source(Box::new(OsSource::new()));
        Arc::new(pool)
    }

    fn test_config(dir: &tempfile::TempDir) -> DaemonConfig {
        DaemonConfig {
            socket_path: dir.path().join("entropy.sock"),
            ..DaemonConfig::default()
        }
    }

    #[tokio::test]
    async fn daemon_binds_with_owner_only_socket() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let daemon =
            EntropyDaemon::bind(config.clone(), test_pool(), &NoopPrivilegeDropper).unwrap();

        witnessd_core::fsio::check_owner_only(daemon.socket_path()).unwrap();
    }

    #[tokio::test]
    async fn daemon_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::write(&config.socket_path, b"stale").unwrap();

        let daemon =
            EntropyDaemon::bind(config.clone(), test_pool(), &NoopPrivilegeDropper).unwrap();
        assert_eq!(daemon.socket_path(), config.socket_path);
    }

    #[tokio::test]
    async fn daemon_serves_and_enforces_nonce_uniqueness() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let socket_path = config.socket_path.clone();
        let daemon = EntropyDaemon::bind(config, test_pool(), &NoopPrivilegeDropper).unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = tokio::spawn(daemon.run(shutdown_rx));

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let mut hello = [0u8; wire::HELLO_FRAME_LEN];
        stream.read_exact(&mut hello).await.unwrap();
        let key = wire::decode_hello(&hello).unwrap();

        // First request succeeds.
        let request = wire::Request {
            request_id: 1,
            bytes_requested: 64,
            nonce: [0xA1; wire::NONCE_LEN],
        };
        stream.write_all(&wire::encode_request(&key, &request)).await.unwrap();

        let mut header = [0u8; 12];
        stream.read_exact(&mut header).await.unwrap();
        let request_id = u64::from_le_bytes(header[..8].try_into().unwrap());
        let len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
        assert_eq!(request_id, 1);
        assert_eq!(len, 64);

        let mut body = vec![0u8; len + 4 + 8 + 8 + wire::MAC_LEN];
        stream.read_exact(&mut body).await.unwrap();

        // Replaying the same nonce kills the connection with a protocol error.
        stream.write_all(&wire::encode_request(&key, &request)).await.unwrap();
        let mut error_frame = [0u8; wire::ERROR_FRAME_LEN];
        stream.read_exact(&mut error_frame).await.unwrap();
        assert_eq!(u64::from_le_bytes(error_frame[..8].try_into().unwrap()), 0);
        assert_eq!(
            u32::from_le_bytes(error_frame[8..12].try_into().unwrap()),
            ErrorCode::ProtocolViolation as u32
        );

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn daemon_clamps_oversized_requests() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let socket_path = config.socket_path.clone();
        let daemon = EntropyDaemon::bind(config, test_pool(), &NoopPrivilegeDropper).unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = tokio::spawn(daemon.run(shutdown_rx));

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let mut hello = [0u8; wire::HELLO_FRAME_LEN];
        stream.read_exact(&mut hello).await.unwrap();
        let key = wire::decode_hello(&hello).unwrap();

        let request = wire::Request {
            request_id: 7,
            bytes_requested: 1_000_000,
            nonce: [0xB2; wire::NONCE_LEN],
        };
        stream.write_all(&wire::encode_request(&key, &request)).await.unwrap();

        let mut header = [0u8; 12];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_le_bytes(header[8..12].try_into().unwrap());
        assert_eq!(len, wire::MAX_REQUEST_BYTES);

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn daemon_drops_unauthenticated_requests() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let socket_path = config.socket_path.clone();
        let daemon = EntropyDaemon::bind(config, test_pool(), &NoopPrivilegeDropper).unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = tokio::spawn(daemon.run(shutdown_rx));

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let mut hello = [0u8; wire::HELLO_FRAME_LEN];
        stream.read_exact(&mut hello).await.unwrap();

        // Wrong key: the daemon must answer with an auth error and close.
        let request = wire::Request {
            request_id: 1,
            bytes_requested: 32,
            nonce: [0xC3; wire::NONCE_LEN],
        };
        let bogus_key = [0u8; wire::KEY_LEN];
        stream.write_all(&wire::encode_request(&bogus_key, &request)).await.unwrap();

        let mut error_frame = [0u8; wire::ERROR_FRAME_LEN];
        stream.read_exact(&mut error_frame).await.unwrap();
        assert_eq!(
            u32::from_le_bytes(error_frame[8..12].try_into().unwrap()),
            ErrorCode::AuthenticationFailed as u32
        );

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
