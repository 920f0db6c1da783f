//! Hardened multi-source entropy pool.
//!
//! The pool keeps a 64-byte accumulator and a set of supervised sources.
//! On a reseed it collects a fresh 32-byte contribution from every available
//! and healthy source and ratchets each one into the accumulator; output is
//! derived from the accumulator through a counter-separated SHA-256
//! construction that also ratchets the accumulator forward on every block,
//! so no two emissions ever share state.
//!
//! Failure semantics: a source that errors is skipped for that collection
//! (its own stats record the failure); a collection where no source
//! succeeds, or a call entered with fewer healthy sources than the
//! configured minimum while degraded operation is disallowed, fails with
//! `NoHealthySources`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{EntropyError, Result};
use crate::source::{EntropySource, SourceStats};

/// Bytes collected from each source per reseed.
pub(crate) const CONTRIBUTION_BYTES: usize = 32;

/// Pool tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum number of healthy sources required to serve requests.
    pub min_healthy_sources: usize,
    /// Serve requests even when below the minimum (never below one).
    pub allow_degraded: bool,
    /// How long accumulator state may be reused before fresh contributions
    /// are collected.
    pub reseed_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_healthy_sources: 1,
            allow_degraded: false,
            reseed_interval: Duration::from_secs(60),
        }
    }
}

/// Snapshot of the pool and its sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHealthReport {
    pub healthy_sources: usize,
    pub required_sources: usize,
    pub allow_degraded: bool,
    pub total_bytes_emitted: u64,
    pub seconds_since_reseed: Option<u64>,
    pub sources: Vec<SourceStats>,
}

/// The 64-byte accumulator with the mixing and output constructions shared
/// by both pool flavours.
pub(crate) struct Accumulator {
    state: [u8; 64],
    written_counter: u64,
    read_counter: u64,
}

impl Accumulator {
    pub(crate) fn new() -> Self {
        Self {
            state: [0u8; 64],
            written_counter: 0,
            read_counter: 0,
        }
    }

    /// Ratchet one contribution into the accumulator.
    pub(crate) fn mix(&mut self, contribution: &[u8], now_nanos: i64) {
        let mut hasher = Sha256::new();
        hasher.update(self.state);
        hasher.update(contribution);
        hasher.update(now_nanos.to_be_bytes());
        let front: [u8; 32] = hasher.finalize().into();
        self.state[..32].copy_from_slice(&front);

        let mut hasher = Sha256::new();
        hasher.update(contribution);
        hasher.update(&self.state[..32]);
        hasher.update(self.written_counter.to_be_bytes());
        let back: [u8; 32] = hasher.finalize().into();
        self.state[32..].copy_from_slice(&back);

        self.written_counter += contribution.len() as u64;
    }

    /// Derive `n` output bytes, ratcheting the accumulator per block.
    pub(crate) fn emit(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        let mut offset = 0usize;
        while offset < n {
            let mut hasher = Sha256::new();
            hasher.update(self.state);
            hasher.update(self.read_counter.to_be_bytes());
            hasher.update((offset as u64).to_be_bytes());
            let block: [u8; 32] = hasher.finalize().into();

            let take = (n - offset).min(32);
            out[offset..offset + take].copy_from_slice(&block[..take]);
            self.read_counter += 1;

            let mut hasher = Sha256::new();
            hasher.update(self.state);
            hasher.update(block);
            let front: [u8; 32] = hasher.finalize().into();
            self.state[..32].copy_from_slice(&front);

            offset += 32;
        }
        out
    }

    pub(crate) fn written(&self) -> u64 {
        self.written_counter
    }
}

impl Drop for Accumulator {
    fn drop(&mut self) {
        self.state.zeroize();
    }
}

struct PoolState {
    accumulator: Accumulator,
    sources: Vec<Box<dyn EntropySource>>,
    last_reseed: Option<Instant>,
    total_emitted: u64,
}

/// Multi-source pool with health gating and timed reseeding.
pub struct HardenedEntropyPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl HardenedEntropyPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState {
                accumulator: Accumulator::new(),
                sources: Vec::new(),
                last_reseed: None,
                total_emitted: 0,
            }),
        }
    }

    /// Append a source to the rotation.
    pub fn add_source(&self, source: Box<dyn EntropySource>) {
        let mut state = self.state.lock().unwrap();
        tracing::debug!(name = source.name(), "entropy source added");
        state.sources.push(source);
    }

    /// Draw `n` bytes from the pool.
    pub fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();

        let healthy = healthy_count(&state.sources);
        if healthy < self.config.min_healthy_sources && !self.config.allow_degraded {
            return Err(EntropyError::NoHealthySources {
                healthy,
                required: self.config.min_healthy_sources,
            });
        }

        let due = match state.last_reseed {
            None => true,
            Some(at) => at.elapsed() >= self.config.reseed_interval,
        };
        if due {
            collect_and_mix(&mut state)?;
        }

        state.total_emitted += n as u64;
        Ok(state.accumulator.emit(n))
    }

    /// Force a reseed regardless of the interval.
    pub fn reseed(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        collect_and_mix(&mut state)
    }

    /// Whether enough sources are healthy to serve requests.
    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock().unwrap();
        healthy_count(&state.sources) >= self.config.min_healthy_sources
    }

    /// Snapshot per-source statistics.
    pub fn health_report(&self) -> PoolHealthReport {
        let state = self.state.lock().unwrap();
        PoolHealthReport {
            healthy_sources: healthy_count(&state.sources),
            required_sources: self.config.min_healthy_sources,
            allow_degraded: self.config.allow_degraded,
            total_bytes_emitted: state.total_emitted,
            seconds_since_reseed: state.last_reseed.map(|at| at.elapsed().as_secs()),
            sources: state.sources.iter().map(|s| s.stats()).collect(),
        }
    }

    /// `std::io::Read`-shaped adaptor over [`HardenedEntropyPool::get_bytes`].
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.get_bytes(buf.len())?;
        buf.copy_from_slice(&bytes);
        Ok(buf.len())
    }

    /// Run the start-up test battery over every available source.
    pub fn startup_self_test(&self, sample_bytes: usize) -> crate::selftest::SelfTestReport {
        let state = self.state.lock().unwrap();
        crate::selftest::run_self_test(&state.sources, sample_bytes)
    }
}

fn healthy_count(sources: &[Box<dyn EntropySource>]) -> usize {
    sources
        .iter()
        .filter(|s| s.available() && s.healthy())
        .count()
}

fn collect_and_mix(state: &mut PoolState) -> Result<()> {
    let now = witnessd_core::now_nanos();
    let mut successes = 0usize;

    // Indexed loop: `mix` needs `&mut` to the accumulator while the source
    // list is borrowed.
    for index in 0..state.sources.len() {
        let source = &state.sources[index];
        if !source.available() || !source.healthy() {
            continue;
        }
        match source.get_bytes(CONTRIBUTION_BYTES) {
            Ok(mut contribution) => {
                state.accumulator.mix(&contribution, now);
                contribution.zeroize();
                successes += 1;
            }
            Err(e) => {
                tracing::warn!(
                    source = state.sources[index].name(),
                    error = %e,
                    "entropy source skipped for this reseed"
                );
            }
        }
    }

    if successes == 0 {
        return Err(EntropyError::NoHealthySources {
            healthy: 0,
            required: 1,
        });
    }
    state.last_reseed = Some(Instant::now());
    Ok(())
}
