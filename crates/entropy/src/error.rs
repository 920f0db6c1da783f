//! Error types for the entropy engine.

use thiserror::Error;

/// Errors from pools, sources, and the isolated daemon RPC.
#[derive(Debug, Error)]
pub enum EntropyError {
    /// Fewer healthy sources than the pool's configured minimum
    #[error("no healthy entropy sources: {healthy} healthy, {required} required")]
    NoHealthySources { healthy: usize, required: usize },

    /// The daemon's pool cannot currently satisfy requests
    #[error("entropy depleted")]
    Depleted,

    /// A single source failed to produce bytes
    #[error("entropy source '{name}' failed: {reason}")]
    SourceFailed { name: String, reason: String },

    /// RPC message failed HMAC verification
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Peer credentials did not match the daemon's policy
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Malformed frame, replayed nonce, or out-of-order sequence
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The daemon is not reachable and fallback was not permitted
    #[error("entropy daemon unavailable: {0}")]
    DaemonUnavailable(String),

    /// I/O error on the daemon socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core platform error
    #[error(transparent)]
    Core(#[from] witnessd_core::CoreError),

    /// Daemon configuration could not be parsed
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for entropy operations.
pub type Result<T> = std::result::Result<T, EntropyError>;
