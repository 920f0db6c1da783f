//! CPU execution-jitter entropy source.
//!
//! Each output byte is distilled from 512 timing samples. One sample times a
//! 4 KiB memory fill plus a short loop synchronized against a companion
//! thread, then XORs in that thread's free-running timestamp; the 512
//! samples are folded through SHA-256 and the low byte of the digest becomes
//! the output byte. Output bytes pass through the standard monitor; the
//! adaptive-proportion verdict is what gates this source in practice.
//!
//! This source is slow by design. Pools ask it for small contributions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::source::{EntropySource, SourceKind, SourceStats, SourceSupervisor};

/// Timing samples accumulated per output byte.
const SAMPLES_PER_BYTE: usize = 64 * 8;
/// Scratch buffer filled on every sample.
const FILL_BYTES: usize = 4096;

/// Entropy from scheduling and memory-subsystem timing jitter.
pub struct JitterSource {
    supervisor: SourceSupervisor,
    cross_timestamp: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl JitterSource {
    pub fn new() -> Self {
        let cross_timestamp = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let ts = Arc::clone(&cross_timestamp);
        let stop_flag = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("witnessd-jitter".to_string())
            .spawn(move || {
                let epoch = Instant::now();
                while !stop_flag.load(Ordering::Relaxed) {
                    ts.store(epoch.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    thread::yield_now();
                }
            })
            .ok();

        Self {
            supervisor: SourceSupervisor::new("cpu-jitter", SourceKind::CpuJitter),
            cross_timestamp,
            stop,
            worker,
        }
    }

    fn sample(&self, scratch: &mut [u8; FILL_BYTES], round: u64) -> u64 {
        let start = Instant::now();

        for (i, slot) in scratch.iter_mut().enumerate() {
            *slot = slot.wrapping_add(i as u8).wrapping_mul(167).wrapping_add(round as u8);
        }
        std::hint::black_box(&scratch);

        // Loop synchronized against the companion thread's store.
        let mut cross = 0u64;
        for _ in 0..8 {
            cross ^= self.cross_timestamp.load(Ordering::Relaxed);
            std::hint::spin_loop();
        }

        (start.elapsed().as_nanos() as u64) ^ cross
    }
}

impl Default for JitterSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JitterSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl EntropySource for JitterSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CpuJitter
    }

    fn name(&self) -> &str {
        self.supervisor.name()
    }

    fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut scratch = [0u8; FILL_BYTES];
        let mut bytes = Vec::with_capacity(n);

        for byte_index in 0..n {
            let mut hasher = Sha256::new();
            for sample_index in 0..SAMPLES_PER_BYTE {
                let sample = self.sample(&mut scratch, (byte_index * SAMPLES_PER_BYTE + sample_index) as u64);
                hasher.update(sample.to_le_bytes());
            }
            let digest = hasher.finalize();
            bytes.push(digest[digest.len() - 1]);
        }

        self.supervisor.record_success(&bytes);
        Ok(bytes)
    }

    fn available(&self) -> bool {
        true
    }

    fn healthy(&self) -> bool {
        self.supervisor.healthy()
    }

    fn stats(&self) -> SourceStats {
        self.supervisor.stats(self.available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_produces_requested_length() {
        let source = JitterSource::new();
        let bytes = source.get_bytes(4).unwrap();
        assert_eq!(bytes.len(), 4);
    }

    #[test]
    fn jitter_draws_differ() {
        let source = JitterSource::new();
        let a = source.get_bytes(8).unwrap();
        let b = source.get_bytes(8).unwrap();
        // 64 bits of timing-derived output colliding would mean the clock
        // is frozen; treat as failure.
        assert_ne!(a, b);
    }

    #[test]
    fn jitter_reports_healthy_after_draws() {
        let source = JitterSource::new();
        source.get_bytes(8).unwrap();
        assert!(source.healthy());
        assert_eq!(source.stats().kind, SourceKind::CpuJitter);
    }
}
