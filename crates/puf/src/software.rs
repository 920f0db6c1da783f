//! Software PUF backed by a per-device seed file.
//!
//! Machines without PUF silicon still need device binding. The software PUF
//! derives responses with HKDF-SHA256 from a 32-byte seed generated once
//! per device and persisted owner-only under the witnessd data directory
//! (`.puf_seed`). The seed never leaves the file and the in-memory copy is
//! zeroized on drop.
//!
//! Unlike silicon, responses are exact, so reconstruction never needs error
//! correction - but the enrollment flow is identical to hardware providers.

use std::path::{Path, PathBuf};

use hkdf::Hkdf;
use sha2::Sha256;

use witnessd_core::SecretBytes;

use crate::error::{PufError, Result};
use crate::{Puf, PufKind};

/// Seed file name under the data directory.
const SEED_FILE: &str = ".puf_seed";
/// Required seed length.
const SEED_LEN: usize = 32;

/// Seed-file-backed PUF.
pub struct SoftwarePuf {
    seed: SecretBytes,
    seed_path: PathBuf,
}

impl SoftwarePuf {
    /// Open the PUF at the default per-user location, creating a fresh seed
    /// on first use and regenerating it if the stored one is corrupted.
    pub fn open_default() -> Result<Self> {
        let path = witnessd_core::data_dir()?.join(SEED_FILE);
        Self::open_or_init(&path)
    }

    /// Open the PUF at `path`, creating or regenerating the seed as needed.
    pub fn open_or_init(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(puf) => Ok(puf),
            Err(PufError::SeedCorrupted { length }) => {
                tracing::warn!(
                    path = %path.display(),
                    length,
                    "PUF seed corrupted; regenerating - previously derived keys are lost"
                );
                Self::init(path)
            }
            Err(PufError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::init(path),
            Err(e) => Err(e),
        }
    }

    /// Load an existing seed. Fails with `SeedCorrupted` when the file is
    /// not exactly 32 bytes, and with `Io(NotFound)` when absent.
    pub fn load(path: &Path) -> Result<Self> {
        witnessd_core::fsio::validate_path(path)?;
        #[cfg(unix)]
        if path.exists() {
            witnessd_core::fsio::check_owner_only(path)?;
        }

        let bytes = std::fs::read(path)?;
        if bytes.len() != SEED_LEN {
            return Err(PufError::SeedCorrupted { length: bytes.len() });
        }

        Ok(Self {
            seed: SecretBytes::new(bytes),
            seed_path: path.to_path_buf(),
        })
    }

    /// Generate and persist a fresh seed at `path`.
    pub fn init(path: &Path) -> Result<Self> {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let mut seed = vec![0u8; SEED_LEN];
        OsRng.fill_bytes(&mut seed);

        witnessd_core::write_secret_file(path, &seed)
            .map_err(|e| PufError::WriteFailed(e.to_string()))?;
        tracing::info!(path = %path.display(), "software PUF seed created");

        Ok(Self {
            seed: SecretBytes::new(seed),
            seed_path: path.to_path_buf(),
        })
    }

    /// Where this PUF's seed lives.
    pub fn seed_path(&self) -> &Path {
        &self.seed_path
    }
}

impl Puf for SoftwarePuf {
    fn kind(&self) -> PufKind {
        PufKind::Software
    }

    fn available(&self) -> bool {
        true
    }

    fn challenge(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        if challenge.is_empty() {
            return Err(PufError::ChallengeInvalid("empty challenge".to_string()));
        }

        let hk = Hkdf::<Sha256>::new(Some(b"witnessd-puf-v1"), self.seed.expose());
        let mut response = vec![0u8; 32];
        hk.expand(challenge, &mut response)
            .map_err(|_| PufError::ChallengeInvalid("HKDF expand failed".to_string()))?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_owner_only_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SEED_FILE);
        let puf = SoftwarePuf::init(&path).unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), SEED_LEN as u64);
        #[cfg(unix)]
        witnessd_core::fsio::check_owner_only(&path).unwrap();
        assert_eq!(puf.kind(), PufKind::Software);
    }

    #[test]
    fn responses_are_deterministic_per_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SEED_FILE);
        let puf = SoftwarePuf::init(&path).unwrap();

        let a = puf.challenge(b"hello").unwrap();
        let b = puf.challenge(b"hello").unwrap();
        let c = puf.challenge(b"other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn reload_preserves_responses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SEED_FILE);

        let first = SoftwarePuf::init(&path).unwrap().challenge(b"x").unwrap();
        let second = SoftwarePuf::load(&path).unwrap().challenge(b"x").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_seeds_give_distinct_devices() {
        let dir = tempfile::tempdir().unwrap();
        let a = SoftwarePuf::init(&dir.path().join("a")).unwrap();
        let b = SoftwarePuf::init(&dir.path().join("b")).unwrap();
        assert_ne!(a.challenge(b"x").unwrap(), b.challenge(b"x").unwrap());
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn load_rejects_wrong_size_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SEED_FILE);
        witnessd_core::write_secret_file(&path, &[1u8; 16]).unwrap();

        assert!(matches!(
            SoftwarePuf::load(&path),
            Err(PufError::SeedCorrupted { length: 16 })
        ));
    }

    #[test]
    fn open_or_init_regenerates_corrupted_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SEED_FILE);
        witnessd_core::write_secret_file(&path, &[1u8; 7]).unwrap();

        let puf = SoftwarePuf::open_or_init(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), SEED_LEN as u64);
        puf.challenge(b"works").unwrap();
    }

    #[test]
    fn open_or_init_creates_missing_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SEED_FILE);
        let puf = SoftwarePuf::open_or_init(&path).unwrap();
        assert!(path.exists());
        assert!(puf.available());
    }

    #[test]
    fn enrollment_flow_works_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let puf = SoftwarePuf::init(&dir.path().join(SEED_FILE)).unwrap();

        let (key, helper) = puf.enroll(b"session-binding").unwrap();
        let rebuilt = puf.reconstruct(b"session-binding", &helper).unwrap();
        assert_eq!(key.expose(), rebuilt.expose());
    }
}
