//! Continuous attestation session and checkpoint chain for witnessd.
//!
//! During a typing session this crate produces a hash-linked sequence of
//! [`Checkpoint`]s binding the content typed so far to the device's TPM
//! (monotonic counter, PCR quotes) and optionally to a PUF response. The
//! chain is tamper-evident: any field mutation, reordering, or gap is
//! caught by [`verify_chain`], which the remote verification protocol
//! reuses.
//!
//! The TPM and PUF are consumed through the `witnessd-tpm` and
//! `witnessd-puf` capability traits; nothing here talks to hardware
//! directly.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use witnessd_attest::{AttestationSession, SessionConfig};
//! use witnessd_tpm::MockTpm;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Arc::new(AttestationSession::new(
//!         Arc::new(MockTpm::new()),
//!         None,
//!         SessionConfig::default(),
//!     ));
//!     session.start()?;
//!     session.record_keystroke([0u8; 32], b"")?;
//!     session.stop();
//!
//!     let export = session.export();
//!     println!("{} checkpoints", export.chain.len());
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod session;
pub mod verify;

pub use checkpoint::{compute_checkpoint_hash, timing_hash, Checkpoint, Hash32, ZERO_HASH};
pub use error::{AttestError, Result};
pub use session::{
    AttestationSession, CheckpointCallback, ErrorCallback, SessionConfig, SessionExport,
    DEFAULT_PCRS,
};
pub use verify::{verify_chain, ChainVerification};
