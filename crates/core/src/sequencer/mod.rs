//! Deterministic random source for one scheduling run.
//!
//! The seed literal is hashed with SHA-256 and the digest keys a ChaCha8
//! stream. Both steps are specified bit-for-bit, so a seed reproduces the same
//! draws on every platform and in every process.

use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ClipperError, Result};

pub const DEFAULT_SEED: &str = "amaze me";

/// Opaque reproducibility token supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seed {
    Number(u64),
    Text(String),
}

impl Seed {
    /// Integer seeds hash their decimal form so that `--seed 42` on the
    /// command line and `Seed::Number(42)` select the same stream.
    fn digest(&self) -> [u8; 32] {
        let literal = match self {
            Seed::Number(value) => value.to_string(),
            Seed::Text(text) => text.clone(),
        };
        Sha256::digest(literal.as_bytes()).into()
    }
}

impl Default for Seed {
    fn default() -> Self {
        Seed::Text(DEFAULT_SEED.to_string())
    }
}

impl From<u64> for Seed {
    fn from(value: u64) -> Self {
        Seed::Number(value)
    }
}

impl From<&str> for Seed {
    fn from(value: &str) -> Self {
        Seed::Text(value.to_string())
    }
}

impl From<String> for Seed {
    fn from(value: String) -> Self {
        Seed::Text(value)
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seed::Number(value) => write!(f, "{value}"),
            Seed::Text(text) => f.write_str(text),
        }
    }
}

/// Pseudo-random generator owned by a single scheduler invocation.
pub struct SeededSequencer {
    seed: Seed,
    rng: ChaCha8Rng,
    draws: u64,
}

impl SeededSequencer {
    pub fn new(seed: impl Into<Seed>) -> Self {
        let seed = seed.into();
        let rng = ChaCha8Rng::from_seed(seed.digest());
        Self {
            seed,
            rng,
            draws: 0,
        }
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Number of values drawn so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Uniform integer in `[low, high)`.
    pub fn next_int(&mut self, low: u64, high: u64) -> Result<u64> {
        if low >= high {
            return Err(ClipperError::invalid(format!(
                "cannot draw from empty range [{low}, {high})"
            )));
        }
        self.draws += 1;
        Ok(self.rng.gen_range(low..high))
    }

    /// Uniform real in `[0, 1)`.
    pub fn next_uniform(&mut self) -> f64 {
        self.draws += 1;
        self.rng.gen::<f64>()
    }
}

impl fmt::Debug for SeededSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeededSequencer")
            .field("seed", &self.seed)
            .field("draws", &self.draws)
            .finish()
    }
}
