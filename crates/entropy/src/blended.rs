//! Blended pool used by the isolated entropy daemon.
//!
//! Same external contract as [`HardenedEntropyPool`](crate::pool::HardenedEntropyPool)
//! with a different mixer and stricter gating. Every collection XOR-blends
//! all contributions together *and* hashes their concatenation, then folds
//! both through the 64-byte accumulator, so compromising any proper subset
//! of sources leaves the blend unpredictable. The daemon never serves
//! degraded: below the healthy minimum the pool refuses outright.

use std::sync::Mutex;
use std::time::Instant;

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{EntropyError, Result};
use crate::pool::{Accumulator, PoolConfig, PoolHealthReport, CONTRIBUTION_BYTES};
use crate::source::EntropySource;

struct BlendedState {
    accumulator: Accumulator,
    sources: Vec<Box<dyn EntropySource>>,
    last_reseed: Option<Instant>,
    total_emitted: u64,
}

/// XOR-and-hash blending pool. `allow_degraded` in the supplied config is
/// ignored; the daemon's pool always enforces the minimum.
pub struct BlendedEntropyPool {
    config: PoolConfig,
    state: Mutex<BlendedState>,
}

impl BlendedEntropyPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BlendedState {
                accumulator: Accumulator::new(),
                sources: Vec::new(),
                last_reseed: None,
                total_emitted: 0,
            }),
        }
    }

    pub fn add_source(&self, source: Box<dyn EntropySource>) {
        let mut state = self.state.lock().unwrap();
        tracing::debug!(name = source.name(), "blended pool source added");
        state.sources.push(source);
    }

    pub fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();

        let due = match state.last_reseed {
            None => true,
            Some(at) => at.elapsed() >= self.config.reseed_interval,
        };
        if due {
            self.blend(&mut state)?;
        } else {
            // Even between reseeds the minimum must hold at entry.
            let healthy = healthy_count(&state.sources);
            if healthy < self.config.min_healthy_sources {
                return Err(EntropyError::NoHealthySources {
                    healthy,
                    required: self.config.min_healthy_sources,
                });
            }
        }

        state.total_emitted += n as u64;
        Ok(state.accumulator.emit(n))
    }

    pub fn reseed(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.blend(&mut state)
    }

    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock().unwrap();
        healthy_count(&state.sources) >= self.config.min_healthy_sources
    }

    pub fn health_report(&self) -> PoolHealthReport {
        let state = self.state.lock().unwrap();
        PoolHealthReport {
            healthy_sources: healthy_count(&state.sources),
            required_sources: self.config.min_healthy_sources,
            allow_degraded: false,
            total_bytes_emitted: state.total_emitted,
            seconds_since_reseed: state.last_reseed.map(|at| at.elapsed().as_secs()),
            sources: state.sources.iter().map(|s| s.stats()).collect(),
        }
    }

    /// `std::io::Read`-shaped adaptor over [`BlendedEntropyPool::get_bytes`].
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

    /// Collect, XOR-blend, hash, and fold into the accumulator.
    fn blend(&self, state: &mut BlendedState) -> Result<()> {
        let mut contributions: Vec<Vec<u8>> = Vec::new();
        for index in 0..state.sources.len() {
            let source = &state.sources[index];
            if !source.available() || !source.healthy() {
                continue;
            }
            match source.get_bytes(CONTRIBUTION_BYTES) {
                Ok(bytes) => contributions.push(bytes),
                Err(e) => {
                    tracing::warn!(
                        source = state.sources[index].name(),
                        error = %e,
                        "blended pool source skipped"
                    );
                }
            }
        }

        if contributions.len() < self.config.min_healthy_sources {
            let failed = contributions.len();
            for c in &mut contributions {
                c.zeroize();
            }
            return Err(EntropyError::NoHealthySources {
                healthy: failed,
                required: self.config.min_healthy_sources,
            });
        }

        let mut xor_blend = [0u8; CONTRIBUTION_BYTES];
        let mut hasher = Sha256::new();
        for contribution in &contributions {
            for (slot, byte) in xor_blend.iter_mut().zip(contribution.iter()) {
                *slot ^= byte;
            }
            hasher.update(contribution);
        }
        hasher.update(xor_blend);
        let digest: [u8; 32] = hasher.finalize().into();

        let now = witnessd_core::now_nanos();
        state.accumulator.mix(&xor_blend, now);
        state.accumulator.mix(&digest, now);

        for c in &mut contributions {
            c.zeroize();
        }
        xor_blend.zeroize();

        state.last_reseed = Some(Instant::now());
        Ok(())
    }
}

fn healthy_count(sources: &[Box<dyn EntropySource>]) -> usize {
    sources
        .iter()
        .filter(|s| s.available() && s.healthy())
        .count()
}
