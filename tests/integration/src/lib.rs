//! End-to-end integration tests for the witnessd attestation core.
//!
//! This suite exercises the full stack - entropy daemon and client,
//! software PUF, mock TPM, attestation session, and the remote
//! enrollment/verification protocol - the way an embedding editor and a
//! remote verification service would drive it.

pub mod test_utils;

#[cfg(test)]
mod end_to_end_tests;

#[cfg(test)]
mod entropy_isolation_tests;

#[cfg(test)]
mod tamper_resistance_tests;
