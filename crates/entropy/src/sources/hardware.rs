//! x86 hardware RNG sources (RDRAND / RDSEED).
//!
//! Feature detection reads CPUID directly: leaf 1 ECX bit 30 for RDRAND,
//! leaf 7 EBX bit 18 for RDSEED. Both instructions can transiently fail
//! (carry flag clear); draws retry a capped number of times: 10 for RDRAND
//! and 100 for RDSEED, whose conditioning makes underflow more common. On
//! non-x86 targets both sources report unavailable.

use crate::error::{EntropyError, Result};
use crate::source::{EntropySource, SourceKind, SourceStats, SourceSupervisor};

/// Retry cap for a single RDRAND step.
const RDRAND_RETRIES: u32 = 10;
/// Retry cap for a single RDSEED step.
const RDSEED_RETRIES: u32 = 100;

/// Whether this CPU supports RDRAND.
pub fn rdrand_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: CPUID leaf 1 is valid on every x86_64 CPU.
        let info = unsafe { core::arch::x86_64::__cpuid(1) };
        info.ecx & (1 << 30) != 0
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Whether this CPU supports RDSEED.
pub fn rdseed_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: CPUID leaf 7 subleaf 0 is valid on every x86_64 CPU.
        let info = unsafe { core::arch::x86_64::__cpuid_count(7, 0) };
        info.ebx & (1 << 18) != 0
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "rdrand")]
unsafe fn rdrand_step() -> Option<u64> {
    let mut value = 0u64;
    if core::arch::x86_64::_rdrand64_step(&mut value) == 1 {
        Some(value)
    } else {
        None
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "rdseed")]
unsafe fn rdseed_step() -> Option<u64> {
    let mut value = 0u64;
    if core::arch::x86_64::_rdseed64_step(&mut value) == 1 {
        Some(value)
    } else {
        None
    }
}

fn fill_from_steps(
    n: usize,
    retries: u32,
    step: impl Fn() -> Option<u64>,
) -> std::result::Result<Vec<u8>, String> {
    let mut bytes = Vec::with_capacity(n);
    while bytes.len() < n {
        let mut value = None;
        for _ in 0..retries {
            value = step();
            if value.is_some() {
                break;
            }
        }
        match value {
            Some(word) => {
                let needed = (n - bytes.len()).min(8);
                bytes.extend_from_slice(&word.to_le_bytes()[..needed]);
            }
            None => return Err(format!("carry flag clear after {retries} retries")),
        }
    }
    Ok(bytes)
}

/// Entropy from the RDRAND instruction (DRBG output).
pub struct RdrandSource {
    supervisor: SourceSupervisor,
    supported: bool,
}

impl RdrandSource {
    pub fn new() -> Self {
        Self {
            supervisor: SourceSupervisor::new("rdrand", SourceKind::Rdrand),
            supported: rdrand_supported(),
        }
    }
}

impl Default for RdrandSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for RdrandSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Rdrand
    }

    fn name(&self) -> &str {
        self.supervisor.name()
    }

    fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        if !self.supported {
            return Err(EntropyError::SourceFailed {
                name: self.supervisor.name().to_string(),
                reason: "RDRAND not supported on this CPU".to_string(),
            });
        }

        #[cfg(target_arch = "x86_64")]
        {
            // SAFETY: support was confirmed via CPUID above.
            let result = fill_from_steps(n, RDRAND_RETRIES, || unsafe { rdrand_step() });
            match result {
                Ok(bytes) => {
                    self.supervisor.record_success(&bytes);
                    Ok(bytes)
                }
                Err(reason) => {
                    self.supervisor.record_failure(&reason);
                    Err(EntropyError::SourceFailed {
                        name: self.supervisor.name().to_string(),
                        reason,
                    })
                }
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            unreachable!("supported is false on non-x86_64")
        }
    }

    fn available(&self) -> bool {
        self.supported
    }

    fn healthy(&self) -> bool {
        self.supported && self.supervisor.healthy()
    }

    fn stats(&self) -> SourceStats {
        self.supervisor.stats(self.available())
    }
}

/// Entropy from the RDSEED instruction (conditioned noise source).
pub struct RdseedSource {
    supervisor: SourceSupervisor,
    supported: bool,
}

impl RdseedSource {
    pub fn new() -> Self {
        Self {
            supervisor: SourceSupervisor::new("rdseed", SourceKind::Rdseed),
            supported: rdseed_supported(),
        }
    }
}

impl Default for RdseedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for RdseedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Rdseed
    }

    fn name(&self) -> &str {
        self.supervisor.name()
    }

    fn get_bytes(&self, n: usize) -> Result<Vec<u8>> {
        if !self.supported {
            return Err(EntropyError::SourceFailed {
                name: self.supervisor.name().to_string(),
                reason: "RDSEED not supported on this CPU".to_string(),
            });
        }

        #[cfg(target_arch = "x86_64")]
        {
            // SAFETY: support was confirmed via CPUID above.
            let result = fill_from_steps(n, RDSEED_RETRIES, || unsafe { rdseed_step() });
            match result {
                Ok(bytes) => {
                    self.supervisor.record_success(&bytes);
                    Ok(bytes)
                }
                Err(reason) => {
                    self.supervisor.record_failure(&reason);
                    Err(EntropyError::SourceFailed {
                        name: self.supervisor.name().to_string(),
                        reason,
                    })
                }
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            unreachable!("supported is false on non-x86_64")
        }
    }

    fn available(&self) -> bool {
        self.supported
    }

    fn healthy(&self) -> bool {
        self.supported && self.supervisor.healthy()
    }

    fn stats(&self) -> SourceStats {
        self.supervisor.stats(self.available())
    }
}
