//! Code-offset fuzzy extractor.
//!
//! Turns a noisy bitstring `w` into a stable key plus public helper data.
//! The construction is the classic code-offset scheme with a 16x repetition
//! code:
//!
//! - `generate`: draw a random secret `s`, expand each secret bit into 16
//!   codeword bits, and publish `mask = codeword ⊕ w` together with a hash
//!   commitment to `s`. The key is a domain-separated hash of `s`.
//! - `reproduce`: given a fresh reading `w'`, compute `codeword' = mask ⊕
//!   w'` and majority-decode each 16-bit group. Up to 7 flipped bits per
//!   group are corrected; the commitment catches anything beyond that.
//!
//! The mask leaks nothing about `s` when `w` has full entropy; the
//! commitment is over the secret, which never appears in helper data.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use witnessd_core::SecretBytes;

use crate::error::{PufError, Result};

/// Repetition factor: each secret bit occupies 16 codeword bits.
const REPETITION: usize = 16;

/// Public helper data emitted by enrollment. Safe to store and transmit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperData {
    /// `codeword ⊕ w`; same length as the noisy input
    pub mask: Vec<u8>,
    /// SHA-256 commitment to the decoded secret
    pub secret_hash: [u8; 32],
}

/// Derive a stable key from noisy input `w`.
///
/// `w` must be a multiple of 16 bytes and at least 16 bytes long; 512 bytes
/// yields a full-strength 256-bit secret.
pub fn generate(w: &[u8]) -> Result<(SecretBytes, HelperData)> {
    validate_width(w)?;
    let secret_len = w.len() / REPETITION;

    let mut secret = vec![0u8; secret_len];
    OsRng.fill_bytes(&mut secret);

    let mut mask = encode(&secret, w.len());
    for (slot, byte) in mask.iter_mut().zip(w.iter()) {
        *slot ^= byte;
    }

    let helper = HelperData {
        mask,
        secret_hash: commit(&secret),
    };
    let key = derive_key(&secret);
    secret.zeroize();

    Ok((key, helper))
}

/// Reconstruct the enrolled key from a fresh reading `w'`.
pub fn reproduce(w: &[u8], helper: &HelperData) -> Result<SecretBytes> {
    validate_width(w)?;
    if helper.mask.len() != w.len() {
        return Err(PufError::ChallengeInvalid(format!(
            "helper mask is {} bytes, reading is {}",
            helper.mask.len(),
            w.len()
        )));
    }

    let mut codeword: Vec<u8> = helper
        .mask
        .iter()
        .zip(w.iter())
        .map(|(m, r)| m ^ r)
        .collect();
    let mut secret = decode(&codeword);
    codeword.zeroize();

    if commit(&secret) != helper.secret_hash {
        secret.zeroize();
        return Err(PufError::ReconstructFailed);
    }

    let key = derive_key(&secret);
    secret.zeroize();
    Ok(key)
}

fn validate_width(w: &[u8]) -> Result<()> {
    if w.len() < REPETITION || w.len() % REPETITION != 0 {
        return Err(PufError::ChallengeInvalid(format!(
            "noisy input of {} bytes is not a positive multiple of {REPETITION}",
            w.len()
        )));
    }
    Ok(())
}

/// Expand each secret bit into `REPETITION` codeword bits.
fn encode(secret: &[u8], codeword_len: usize) -> Vec<u8> {
    let mut codeword = vec![0u8; codeword_len];
    for bit_index in 0..secret.len() * 8 {
        let bit = (secret[bit_index / 8] >> (7 - bit_index % 8)) & 1;
        if bit == 1 {
            for rep in 0..REPETITION {
                let out_bit = bit_index * REPETITION + rep;
                codeword[out_bit / 8] |= 1 << (7 - out_bit % 8);
            }
        }
    }
    codeword
}

/// Majority-decode each `REPETITION`-bit group back into one secret bit.
fn decode(codeword: &[u8]) -> Vec<u8> {
    let secret_bits = codeword.len() * 8 / REPETITION;
    let mut secret = vec![0u8; secret_bits / 8];
    for bit_index in 0..secret_bits {
        let mut ones = 0usize;
        for rep in 0..REPETITION {
            let in_bit = bit_index * REPETITION + rep;
            if (codeword[in_bit / 8] >> (7 - in_bit % 8)) & 1 == 1 {
                ones += 1;
            }
        }
        if ones > REPETITION / 2 {
            secret[bit_index / 8] |= 1 << (7 - bit_index % 8);
        }
    }
    secret
}

fn commit(secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"witnessd-fe-commit-v1");
    hasher.update(secret);
    hasher.finalize().into()
}

fn derive_key(secret: &[u8]) -> SecretBytes {
    let mut hasher = Sha256::new();
    hasher.update(b"witnessd-fe-key-v1");
    hasher.update(secret);
    SecretBytes::new(hasher.finalize().to_vec())
}
