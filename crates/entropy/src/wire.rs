//! Wire framing for the entropy daemon's local RPC.
//!
//! All integers are little-endian. Three frame shapes travel on the socket:
//!
//! - **Hello** (daemon → client, once per connection, 40 bytes):
//!   `"WTSD" || version u32 || session_key [32]`. The owner-only socket plus
//!   the peer-credential check is what makes handing the key out safe.
//! - **Request** (client → daemon, 76 bytes):
//!   `request_id u64 || bytes_requested u32 || nonce [32] || mac [32]` where
//!   `mac = HMAC-SHA256(key, request_id || bytes_requested || nonce)`.
//! - **Response** (daemon → client): success is
//!   `request_id u64 || len u32 || entropy [len] || health_flags u32 ||
//!   timestamp u64 || seq u64 || mac [32]` with
//!   `mac = HMAC-SHA256(key, request_id || entropy || timestamp || seq)`;
//!   errors are the fixed 12-byte `0u64 || error_code u32`.
//!
//! A `request_id` of zero is reserved to mark error frames, so clients
//! allocate ids starting at one.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{EntropyError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Hello frame magic.
pub const MAGIC: [u8; 4] = *b"WTSD";
/// Wire protocol version carried in the hello frame.
pub const PROTOCOL_VERSION: u32 = 1;
/// Session key length.
pub const KEY_LEN: usize = 32;
/// Request nonce length.
pub const NONCE_LEN: usize = 32;
/// HMAC-SHA256 tag length.
pub const MAC_LEN: usize = 32;
/// Fixed request frame length.
pub const REQUEST_FRAME_LEN: usize = 8 + 4 + NONCE_LEN + MAC_LEN;
/// Fixed hello frame length.
pub const HELLO_FRAME_LEN: usize = 4 + 4 + KEY_LEN;
/// Fixed error frame length.
pub const ERROR_FRAME_LEN: usize = 12;
/// Hard clamp on `bytes_requested`.
pub const MAX_REQUEST_BYTES: u32 = 1024;

/// Response flag: the daemon's pool currently meets its healthy minimum.
pub const FLAG_POOL_HEALTHY: u32 = 1;
/// Response flag: the daemon is serving below full source diversity.
pub const FLAG_DEGRADED: u32 = 1 << 1;

/// Error codes carried in error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    AuthenticationFailed = 1,
    Depleted = 2,
    Unauthorized = 3,
    ProtocolViolation = 4,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::AuthenticationFailed),
            2 => Some(Self::Depleted),
            3 => Some(Self::Unauthorized),
            4 => Some(Self::ProtocolViolation),
            _ => None,
        }
    }

    pub fn into_error(self) -> EntropyError {
        match self {
            Self::AuthenticationFailed => EntropyError::AuthenticationFailed,
            Self::Depleted => EntropyError::Depleted,
            Self::Unauthorized => {
                EntropyError::UnauthorizedClient("rejected by daemon".to_string())
            }
            Self::ProtocolViolation => {
                EntropyError::ProtocolViolation("reported by daemon".to_string())
            }
        }
    }
}

/// Decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub request_id: u64,
    pub bytes_requested: u32,
    pub nonce: [u8; NONCE_LEN],
}

fn mac_keyed(key: &[u8]) -> HmacSha256 {
    // HMAC accepts any key length.
    HmacSha256::new_from_slice(key).expect("HMAC key")
}

/// MAC over a request's authenticated fields.
pub fn request_mac(key: &[u8], request_id: u64, bytes_requested: u32, nonce: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = mac_keyed(key);
    mac.update(&request_id.to_le_bytes());
    mac.update(&bytes_requested.to_le_bytes());
    mac.update(nonce);
    mac.finalize().into_bytes().into()
}

/// MAC over a success response's authenticated fields.
pub fn response_mac(
    key: &[u8],
    request_id: u64,
    entropy: &[u8],
    timestamp: u64,
    seq: u64,
) -> [u8; MAC_LEN] {
    let mut mac = mac_keyed(key);
    mac.update(&request_id.to_le_bytes());
    mac.update(entropy);
    mac.update(&timestamp.to_le_bytes());
    mac.update(&seq.to_le_bytes());
    mac.finalize().into_bytes().into()
}

/// Encode a request frame.
pub fn encode_request(key: &[u8], request: &Request) -> [u8; REQUEST_FRAME_LEN] {
    let mut frame = [0u8; REQUEST_FRAME_LEN];
    frame[..8].copy_from_slice(&request.request_id.to_le_bytes());
    frame[8..12].copy_from_slice(&request.bytes_requested.to_le_bytes());
    frame[12..44].copy_from_slice(&request.nonce);
    let mac = request_mac(key, request.request_id, request.bytes_requested, &request.nonce);
    frame[44..].copy_from_slice(&mac);
    frame
}

/// Decode and authenticate a request frame.
pub fn decode_request(key: &[u8], frame: &[u8]) -> Result<Request> {
    if frame.len() != REQUEST_FRAME_LEN {
        return Err(EntropyError::ProtocolViolation(format!(
            "request frame is {} bytes, expected {REQUEST_FRAME_LEN}",
            frame.len()
        )));
    }

    let request_id = u64::from_le_bytes(frame[..8].try_into().unwrap());
    let bytes_requested = u32::from_le_bytes(frame[8..12].try_into().unwrap());
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&frame[12..44]);

    let mut mac = mac_keyed(key);
    mac.update(&frame[..44]);
    if mac.verify_slice(&frame[44..]).is_err() {
        return Err(EntropyError::AuthenticationFailed);
    }

    if request_id == 0 {
        return Err(EntropyError::ProtocolViolation(
            "request id zero is reserved".to_string(),
        ));
    }

    Ok(Request {
        request_id,
        bytes_requested,
        nonce,
    })
}

/// Encode a success response frame.
pub fn encode_success(
    key: &[u8],
    request_id: u64,
    entropy: &[u8],
    health_flags: u32,
    timestamp: u64,
    seq: u64,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + 4 + entropy.len() + 4 + 8 + 8 + MAC_LEN);
    frame.extend_from_slice(&request_id.to_le_bytes());
    frame.extend_from_slice(&(entropy.len() as u32).to_le_bytes());
    frame.extend_from_slice(entropy);
    frame.extend_from_slice(&health_flags.to_le_bytes());
    frame.extend_from_slice(&timestamp.to_le_bytes());
    frame.extend_from_slice(&seq.to_le_bytes());
    frame.extend_from_slice(&response_mac(key, request_id, entropy, timestamp, seq));
    frame
}

/// Encode the fixed-size error frame.
pub fn encode_error(code: ErrorCode) -> [u8; ERROR_FRAME_LEN] {
    let mut frame = [0u8; ERROR_FRAME_LEN];
    frame[8..12].copy_from_slice(&(code as u32).to_le_bytes());
    frame
}

/// Encode the hello frame that hands the session key to the client.
pub fn encode_hello(session_key: &[u8; KEY_LEN]) -> [u8; HELLO_FRAME_LEN] {
    let mut frame = [0u8; HELLO_FRAME_LEN];
    frame[..4].copy_from_slice(&MAGIC);
    frame[4..8].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    frame[8..].copy_from_slice(session_key);
    frame
}

/// Decode and validate a hello frame, returning the session key.
pub fn decode_hello(frame: &[u8]) -> Result<[u8; KEY_LEN]> {
    if frame.len() != HELLO_FRAME_LEN {
        return Err(EntropyError::ProtocolViolation(format!(
            "hello frame is {} bytes, expected {HELLO_FRAME_LEN}",
            frame.len()
        )));
    }
    if frame[..4] != MAGIC {
        return Err(EntropyError::ProtocolViolation("bad hello magic".to_string()));
    }
    let version = u32::from_le_bytes(frame[4..8].try_into().unwrap());
    if version != PROTOCOL_VERSION {
        return Err(EntropyError::ProtocolViolation(format!(
            "unsupported protocol version {version}"
        )));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&frame[8..]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn request_round_trips() {
        let request = Request {
            request_id: 42,
            bytes_requested: 64,
            nonce: [9u8; NONCE_LEN],
        };
        let frame = encode_request(&KEY, &request);
        assert_eq!(frame.len(), REQUEST_FRAME_LEN);
        assert_eq!(decode_request(&KEY, &frame).unwrap(), request);
    }

    #[test]
    fn tampered_request_fails_authentication() {
        let request = Request {
            request_id: 1,
            bytes_requested: 32,
            nonce: [3u8; NONCE_LEN],
        };
        let mut frame = encode_request(&KEY, &request);
        frame[8] ^= 1; // bump bytes_requested
        assert!(matches!(
            decode_request(&KEY, &frame),
            Err(EntropyError::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let request = Request {
            request_id: 1,
            bytes_requested: 32,
            nonce: [3u8; NONCE_LEN],
        };
        let frame = encode_request(&KEY, &request);
        assert!(matches!(
            decode_request(&[8u8; 32], &frame),
            Err(EntropyError::AuthenticationFailed)
        ));
    }

    #[test]
    fn zero_request_id_is_rejected() {
        let request = Request {
            request_id: 0,
            bytes_requested: 32,
            nonce: [3u8; NONCE_LEN],
        };
        let frame = encode_request(&KEY, &request);
        assert!(matches!(
            decode_request(&KEY, &frame),
            Err(EntropyError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn success_frame_layout() {
        let entropy = [0xAB; 16];
        let frame = encode_success(&KEY, 5, &entropy, FLAG_POOL_HEALTHY, 1234, 9);
        assert_eq!(frame.len(), 8 + 4 + 16 + 4 + 8 + 8 + MAC_LEN);
        assert_eq!(u64::from_le_bytes(frame[..8].try_into().unwrap()), 5);
        assert_eq!(u32::from_le_bytes(frame[8..12].try_into().unwrap()), 16);
        assert_eq!(&frame[12..28], &entropy);

        let mac = response_mac(&KEY, 5, &entropy, 1234, 9);
        assert_eq!(&frame[frame.len() - MAC_LEN..], &mac);
    }

    #[test]
    fn error_frame_layout() {
        let frame = encode_error(ErrorCode::Depleted);
        assert_eq!(frame.len(), ERROR_FRAME_LEN);
        assert_eq!(u64::from_le_bytes(frame[..8].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(frame[8..12].try_into().unwrap()), 2);
    }

    #[test]
    fn error_codes_round_trip() {
        for code in [
            ErrorCode::AuthenticationFailed,
            ErrorCode::Depleted,
            ErrorCode::Unauthorized,
            ErrorCode::ProtocolViolation,
        ] {
            assert_eq!(ErrorCode::from_u32(code as u32), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(0), None);
        assert_eq!(ErrorCode::from_u32(9), None);
    }

    #[test]
    fn hello_round_trips() {
        let key = [0x5A; KEY_LEN];
        let frame = encode_hello(&key);
        assert_eq!(decode_hello(&frame).unwrap(), key);
    }

    #[test]
    fn hello_rejects_bad_magic_and_version() {
        let key = [0x5A; KEY_LEN];
        let mut frame = encode_hello(&key);
        frame[0] = b'X';
        assert!(decode_hello(&frame).is_err());

        let mut frame = encode_hello(&key);
        frame[4] = 99;
        assert!(decode_hello(&frame).is_err());
    }
}
