//! Shared foundation for the witnessd attestation core.
//!
//! This crate carries the pieces every other witnessd crate leans on:
//!
//! - **Errors**: the base [`CoreError`] type for I/O and policy failures
//! - **Logging**: `tracing`-based initialization plus a log sanitiser that
//!   strips key material before it can reach a log sink
//! - **Secure memory**: [`SecretBytes`], a zeroize-on-drop buffer that
//!   attempts to pin its pages against swap
//! - **Filesystem policy**: atomic owner-only secret writes and the
//!   per-platform data/runtime directory layout
//! - **Privilege drop**: the [`PrivilegeDropper`] capability consumed by the
//!   isolated entropy daemon
//!
//! Nothing in this crate talks to a TPM, a PUF, or a socket; it exists so
//! the higher layers agree on the boring parts.

pub mod error;
pub mod fsio;
pub mod logging;
pub mod privdrop;
pub mod secure;
pub mod time;

pub use error::{CoreError, Result};
pub use fsio::{data_dir, default_socket_path, runtime_dir, write_secret_file};
pub use privdrop::{NoopPrivilegeDropper, PrivilegeDropper, UnixPrivilegeDropper};
pub use secure::SecretBytes;
pub use time::{now_millis, now_nanos};
