//! PRNG seeding chain
//!
//! Key generation draws from a `StdRng` seeded from a persistent seed file. If
//! the file cannot be loaded the seed is gathered from the system entropy
//! devices instead; failing that is fatal. After use, fresh bytes are written
//! back to the seed file.

use crate::error::{BridgeError, BridgeResult};
use crate::util::fatal;
use ndn_bridge_config::BridgeConfig;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const PRIMARY_MIX_BYTES: u64 = 8;
const URANDOM_BYTES: u64 = 2048;
const RANDOM_BYTES: u64 = 32;
const SAVED_SEED_BYTES: usize = 1024;

/// Where seed material comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedChain {
    primary: PathBuf,
    urandom: PathBuf,
    random: PathBuf,
}

impl SeedChain {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        Self::with_sources(primary, "/dev/urandom", "/dev/random")
    }

    pub fn with_sources(
        primary: impl Into<PathBuf>,
        urandom: impl Into<PathBuf>,
        random: impl Into<PathBuf>,
    ) -> Self {
        Self {
            primary: primary.into(),
            urandom: urandom.into(),
            random: random.into(),
        }
    }

    /// Chain whose seed file is the configured one, or the default
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        match config.seed_file() {
            Some(path) => Ok(Self::new(path)),
            None => default_seed_file().map(Self::new),
        }
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    /// Gather seed material, preferring the seed file
    pub fn gather(&self) -> BridgeResult<Vec<u8>> {
        match fs::read(&self.primary) {
            Ok(mut material) if !material.is_empty() => {
                debug!(file = %self.primary.display(), "seeding from seed file");
                if let Ok(extra) = read_up_to(&self.random, PRIMARY_MIX_BYTES) {
                    material.extend_from_slice(&extra);
                }
                Ok(material)
            }
            _ => {
                debug!("seed file unavailable, gathering from entropy devices");
                let mut material = read_up_to(&self.urandom, URANDOM_BYTES).unwrap_or_default();
                if (material.len() as u64) < URANDOM_BYTES {
                    return Err(BridgeError::InvalidArgument(format!(
                        "Unable to gather seed, {} not available?",
                        self.urandom.display()
                    )));
                }
                let extra = read_up_to(&self.random, RANDOM_BYTES).unwrap_or_default();
                if (extra.len() as u64) < RANDOM_BYTES {
                    return Err(BridgeError::InvalidArgument(format!(
                        "Unable to gather enough entropy, {} not available?",
                        self.random.display()
                    )));
                }
                material.extend_from_slice(&extra);
                Ok(material)
            }
        }
    }
}

/// `$RANDFILE` if set, otherwise `~/.rnd`
pub fn default_seed_file() -> BridgeResult<PathBuf> {
    if let Some(path) = std::env::var_os("RANDFILE").filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".rnd"))
        .ok_or_else(|| {
            BridgeError::InvalidArgument("Unable to obtain name for random seed file.".to_string())
        })
}

fn read_up_to(path: &Path, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    File::open(path)?.take(limit).read_to_end(&mut buf)?;
    Ok(buf)
}

/// A seeded generator. Only obtainable through [`seed_prng`], so holding one
/// means seeding succeeded.
pub struct SeededRng {
    rng: StdRng,
    chain: SeedChain,
}

/// Seed a generator from `chain`, aborting the process if no entropy source works
pub fn seed_prng(chain: &SeedChain) -> SeededRng {
    match chain.gather() {
        Ok(material) => {
            let seed: [u8; 32] = Sha256::digest(&material).into();
            SeededRng {
                rng: StdRng::from_seed(seed),
                chain: chain.clone(),
            }
        }
        Err(e) => fatal(&e.to_string()),
    }
}

impl SeededRng {
    pub fn fill(&mut self, buf: &mut [u8]) {
        self.rng.fill(buf);
    }

    /// Write fresh bytes back to the seed file
    pub fn save_seed(&mut self) -> BridgeResult<()> {
        let mut bytes = vec![0u8; SAVED_SEED_BYTES];
        self.rng.fill(&mut bytes[..]);

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.chain.primary)?;
        file.write_all(&bytes)?;
        debug!(file = %self.chain.primary.display(), "saved seed");
        Ok(())
    }
}
