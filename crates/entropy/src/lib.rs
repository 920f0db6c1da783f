//! Multi-source entropy engine for witnessd.
//!
//! Everything random in the attestation core flows through here: session
//! ids, nonces, PUF seeds, daemon session keys. The engine is built from
//! four layers:
//!
//! - **Health tests** ([`health`]): NIST SP 800-90B continuous tests that
//!   gate every source
//! - **Sources** ([`source`], [`sources`]): OS CSPRNG, RDRAND/RDSEED,
//!   TPM RNG, CPU jitter, and embedder-supplied producers, each under
//!   continuous supervision
//! - **Pools** ([`pool`], [`blended`]): the hardened accumulator pool for
//!   in-process use and the stricter XOR-and-hash blend the daemon serves
//! - **Isolation** ([`daemon`], [`client`], [`wire`]): a privilege-dropped
//!   daemon process behind an HMAC-authenticated local socket, with a
//!   client that enforces response ordering and falls back to the kernel
//!   CSPRNG when the daemon dies

pub mod blended;
pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;
pub mod pool;
pub mod selftest;
pub mod source;
pub mod sources;
pub mod wire;

pub use blended::BlendedEntropyPool;
pub use client::EntropyClient;
pub use config::DaemonConfig;
pub use daemon::EntropyDaemon;
pub use error::{EntropyError, Result};
pub use health::{
    AdaptiveProportionTest, AutocorrelationTest, ChiSquareTest, HealthStatus, HealthTest,
    RepetitionCountTest,
};
pub use pool::{HardenedEntropyPool, PoolConfig, PoolHealthReport};
pub use selftest::{SelfTestReport, SourceSelfTest, DEFAULT_SELF_TEST_BYTES};
pub use source::{EntropySource, SourceKind, SourceStats};
pub use sources::{
    ExternalSource, JitterSource, OsSource, RdrandSource, RdseedSource, TpmSource,
};
