//! In-memory TPM provider for tests and software-only deployments.
//!
//! INSECURE - the mock holds all state in process memory and its quote
//! signature is 64 random bytes (the signature scheme is left to real
//! bindings to define). It preserves the behavioural contract the session
//! and verifier rely on: stable PCR values, strictly monotonic counters,
//! nonce-bound quotes, and reversible sealing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::{Result, Tpm, TpmCapabilities, TpmError, TpmQuote};

/// Magic prefix of the mock's raw quote structure.
const QUOTE_MAGIC: &[u8; 8] = b"WTNSQT01";

struct MockState {
    pcrs: BTreeMap<u8, Vec<u8>>,
    counters: HashMap<u8, u64>,
}

/// Software stand-in for a TPM 2.0 device.
pub struct MockTpm {
    ek_public: Vec<u8>,
    seal_key: [u8; 32],
    state: Mutex<MockState>,
    available: bool,
}

impl MockTpm {
    /// Create a mock with a fresh endorsement key and a deterministic PCR
    /// bank (each PCR is the SHA-256 of its index, so values are non-zero
    /// and stable for the life of the mock).
    pub fn new() -> Self {
        let mut ek_public = vec![0u8; 64];
        OsRng.fill_bytes(&mut ek_public);
        let mut seal_key = [0u8; 32];
        OsRng.fill_bytes(&mut seal_key);

        tracing::warn!(
            "using mock TPM (no hardware binding). INSECURE - for testing and \
             software-only deployments"
        );

        let mut pcrs = BTreeMap::new();
        for index in 0u8..24 {
            let mut hasher = Sha256::new();
            hasher.update(b"mock-pcr");
            hasher.update([index]);
            pcrs.insert(index, hasher.finalize().to_vec());
        }

        Self {
            ek_public,
            seal_key,
            state: Mutex::new(MockState {
                pcrs,
                counters: HashMap::new(),
            }),
            available: true,
        }
    }

    /// Mock that reports itself unavailable, for failure-path tests.
    pub fn unavailable() -> Self {
        let mut tpm = Self::new();
        tpm.available = false;
        tpm
    }

    /// Extend a PCR the way boot measurements do: `new = SHA256(old || data)`.
    /// Tests use this to simulate a platform-state change after enrollment.
    pub fn extend_pcr(&self, index: u8, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let old = state.pcrs.get(&index).cloned().unwrap_or_else(|| vec![0u8; 32]);
        let mut hasher = Sha256::new();
        hasher.update(&old);
        hasher.update(data);
        state.pcrs.insert(index, hasher.finalize().to_vec());
    }

    /// Force a counter to a specific value. Only for crafting rollback
    /// scenarios in tests; a real device cannot do this.
    pub fn set_counter(&self, index: u8, value: u64) {
        self.state.lock().unwrap().counters.insert(index, value);
    }

    fn require_available(&self) -> Result<()> {
        if !self.available {
            return Err(TpmError::Unavailable("mock configured unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MockTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl Tpm for MockTpm {
    fn available(&self) -> bool {
        self.available
    }

    fn capabilities(&self) -> TpmCapabilities {
        TpmCapabilities {
            hardware_backed: false,
            supports_pcrs: true,
            supports_sealing: true,
            supports_attestation: true,
            monotonic_counter: true,
        }
    }

    fn get_endorsement_key_public(&self) -> Result<Vec<u8>> {
        self.require_available()?;
        Ok(self.ek_public.clone())
    }

    fn read_pcr(&self, index: u8) -> Result<Vec<u8>> {
        self.require_available()?;
        if index >= 24 {
            return Err(TpmError::PcrReadFailed {
                index,
                reason: "index out of range".to_string(),
            });
        }
        let state = self.state.lock().unwrap();
        state
            .pcrs
            .get(&index)
            .cloned()
            .ok_or_else(|| TpmError::PcrReadFailed {
                index,
                reason: "unallocated".to_string(),
            })
    }

    fn quote(&self, nonce: &[u8], pcrs: &[u8]) -> Result<TpmQuote> {
        self.require_available()?;
        if nonce.is_empty() {
            return Err(TpmError::QuoteFailed("empty nonce".to_string()));
        }

        let pcr_values = self.read_pcrs(pcrs)?;
        let timestamp = witnessd_core::now_nanos();

        // The raw structure commits to the nonce, the selection, and the
        // values; verifiers parse none of it, they only re-hash it.
        let mut raw_quote = Vec::with_capacity(64 + pcr_values.len() * 33);
        raw_quote.extend_from_slice(QUOTE_MAGIC);
        raw_quote.extend_from_slice(nonce);
        raw_quote.extend_from_slice(&timestamp.to_be_bytes());
        for (index, value) in &pcr_values {
            raw_quote.push(*index);
            raw_quote.extend_from_slice(value);
        }

        let mut signature = vec![0u8; 64];
        OsRng.fill_bytes(&mut signature);

        Ok(TpmQuote {
            pcr_values,
            nonce: nonce.to_vec(),
            timestamp,
            signature,
            raw_quote,
        })
    }

    fn increment_counter(&self, index: u8) -> Result<u64> {
        self.require_available()?;
        let mut state = self.state.lock().unwrap();
        let counter = state.counters.entry(index).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn read_counter(&self, index: u8) -> Result<u64> {
        self.require_available()?;
        let state = self.state.lock().unwrap();
        Ok(state.counters.get(&index).copied().unwrap_or(0))
    }

    fn seal(&self, data: &[u8], pcrs: &[u8]) -> Result<Vec<u8>> {
        self.require_available()?;
        // The mock binds to the PCR *selection*, not the values; enough to
        // exercise callers without re-implementing policy sessions.
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);

        let mut blob = Vec::with_capacity(17 + pcrs.len() + data.len());
        blob.push(pcrs.len() as u8);
        blob.extend_from_slice(pcrs);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&keystream_xor(&self.seal_key, &nonce, data));
        Ok(blob)
    }

    fn unseal(&self, blob: &[u8]) -> Result<Vec<u8>> {
        self.require_available()?;
        if blob.is_empty() {
            return Err(TpmError::UnsealFailed("empty blob".to_string()));
        }
        let pcr_count = blob[0] as usize;
        let header = 1 + pcr_count + 16;
        if blob.len() < header {
            return Err(TpmError::UnsealFailed("blob truncated".to_string()));
        }
        let nonce = &blob[1 + pcr_count..header];
        Ok(keystream_xor(&self.seal_key, nonce, &blob[header..]))
    }

    fn get_random(&self, n: usize) -> Result<Vec<u8>> {
        self.require_available()?;
        let mut bytes = vec![0u8; n];
        OsRng.fill_bytes(&mut bytes);
        Ok(bytes)
    }
}

/// XOR `data` with a SHA-256 keystream derived from `key` and `nonce`.
fn keystream_xor(key: &[u8; 32], nonce: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut block: u64 = 0;
    for chunk in data.chunks(32) {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(nonce);
        hasher.update(block.to_be_bytes());
        let stream = hasher.finalize();
        for (i, byte) in chunk.iter().enumerate() {
            out.push(byte ^ stream[i]);
        }
        block += 1;
    }
    out
}
