//! Concrete entropy sources.

mod external;
mod hardware;
mod jitter;
mod os;
mod tpm;

pub use external::ExternalSource;
pub use hardware::{rdrand_supported, rdseed_supported, RdrandSource, RdseedSource};
pub use jitter::JitterSource;
pub use os::OsSource;
pub use tpm::TpmSource;
