//! Client for the isolated entropy daemon.
//!
//! The client speaks the authenticated RPC of [`crate::wire`] and enforces
//! the response rules: MAC validity and strictly increasing `seq` within a
//! connection. If the daemon is unreachable the client transparently falls
//! back to the OS kernel CSPRNG and marks itself degraded; the next call
//! attempts to reconnect, clearing the flag on success. Authentication and
//! ordering violations are security events, not availability events - they
//! drop the connection and surface as errors instead of falling back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use crate::error::{EntropyError, Result};
use crate::wire::{self, ErrorCode};

/// Deadline for any single read from the daemon.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

struct Connection {
    stream: UnixStream,
    key: [u8; wire::KEY_LEN],
    last_seq: u64,
}

/// Authenticated client handle. Cheap to share behind an `Arc`.
pub struct EntropyClient {
    socket_path: PathBuf,
    connection: Mutex<Option<Connection>>,
    next_request_id: AtomicU64,
    degraded: AtomicBool,
}

impl EntropyClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connection: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the client is currently serving from the local fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Fetch `n` bytes (clamped to the protocol maximum) from the daemon,
    /// or from the kernel CSPRNG when the daemon is down.
    pub async fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let n = n.min(wire::MAX_REQUEST_BYTES as usize);
        let mut guard = self.connection.lock().await;

        if guard.is_none() {
            match self.connect().await {
                Ok(connection) => {
                    *guard = Some(connection);
                    self.degraded.store(false, Ordering::Relaxed);
                    tracing::debug!(socket = %self.socket_path.display(), "entropy daemon connected");
                }
                Err(e) => {
                    drop(guard);
                    return self.fallback(n, &e);
                }
            }
        }

        let Some(connection) = guard.as_mut() else {
            drop(guard);
            return self.fallback(
                n,
                &EntropyError::DaemonUnavailable("no connection".to_string()),
            );
        };
        match self.exchange(connection, n).await {
            Ok(bytes) => Ok(bytes),
            Err(EntropyError::Io(e)) => {
                // Daemon death: reconnect next call, serve locally now.
                *guard = None;
                drop(guard);
                self.fallback(n, &EntropyError::Io(e))
            }
            Err(e) => {
                // Auth, ordering, or depletion: drop the session but do not
                // silently substitute local bytes for a security failure.
                if !matches!(e, EntropyError::Depleted) {
                    *guard = None;
                }
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(EntropyError::Io)?;

        let mut hello = [0u8; wire::HELLO_FRAME_LEN];
        tokio::time::timeout(RESPONSE_TIMEOUT, stream.read_exact(&mut hello))
            .await
            .map_err(|_| EntropyError::DaemonUnavailable("hello timed out".to_string()))??;
        let key = wire::decode_hello(&hello)?;

        Ok(Connection {
            stream,
            key,
            last_seq: 0,
        })
    }

    async fn exchange(&self, connection: &mut Connection, n: usize) -> Result<Vec<u8>> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut nonce = [0u8; wire::NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let request = wire::Request {
            request_id,
            bytes_requested: n as u32,
            nonce,
        };
        connection
            .stream
            .write_all(&wire::encode_request(&connection.key, &request))
            .await?;

        let mut header = [0u8; 12];
        tokio::time::timeout(RESPONSE_TIMEOUT, connection.stream.read_exact(&mut header))
            .await
            .map_err(|_| EntropyError::DaemonUnavailable("response timed out".to_string()))??;

        let response_id = u64::from_le_bytes(header[..8].try_into().unwrap());
        if response_id == 0 {
            let code = u32::from_le_bytes(header[8..12].try_into().unwrap());
            return Err(ErrorCode::from_u32(code)
                .map(ErrorCode::into_error)
                .unwrap_or_else(|| {
                    EntropyError::ProtocolViolation(format!("unknown error code {code}"))
                }));
        }
        if response_id != request_id {
            return Err(EntropyError::ProtocolViolation(format!(
                "response id {response_id} does not match request {request_id}"
            )));
        }

        let len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
        if len > wire::MAX_REQUEST_BYTES as usize {
            return Err(EntropyError::ProtocolViolation(format!(
                "oversized response of {len} bytes"
            )));
        }

        let mut body = vec![0u8; len + 4 + 8 + 8 + wire::MAC_LEN];
        tokio::time::timeout(RESPONSE_TIMEOUT, connection.stream.read_exact(&mut body))
            .await
            .map_err(|_| EntropyError::DaemonUnavailable("response timed out".to_string()))??;

        let entropy = &body[..len];
        let timestamp = u64::from_le_bytes(body[len + 4..len + 12].try_into().unwrap());
        let seq = u64::from_le_bytes(body[len + 12..len + 20].try_into().unwrap());
        let mac = &body[len + 20..];

        let expected = wire::response_mac(&connection.key, request_id, entropy, timestamp, seq);
        if !constant_time_eq(mac, &expected) {
            return Err(EntropyError::AuthenticationFailed);
        }

        if seq <= connection.last_seq {
            return Err(EntropyError::ProtocolViolation(format!(
                "response seq {seq} not above {}",
                connection.last_seq
            )));
        }
        connection.last_seq = seq;

        Ok(entropy.to_vec())
    }

    fn fallback(&self, n: usize, cause: &EntropyError) -> Result<Vec<u8>> {
        self.degraded.store(true, Ordering::Relaxed);
        tracing::warn!(error = %cause, "entropy daemon unreachable; using kernel CSPRNG fallback");
        let mut bytes = vec![0u8; n];
        getrandom::getrandom(&mut bytes).map_err(|e| EntropyError::SourceFailed {
            name: "os-fallback".to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
