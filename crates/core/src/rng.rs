//! Deterministic RNG construction.
//!
//! Every stochastic component (probes, adaptors, selection tie-breaks)
//! derives its generator from a seed so that a fixed seed and a fixed
//! arrival multiset reproduce a run exactly (see engine module docs on
//! why the arrival multiset is the one source of nondeterminism).

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

pub fn get_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Derive a per-candidate sub-seed so parallel adaption doesn't share a generator.
pub fn derive_seed(base_seed: u64, candidate_index: u64) -> u64 {
    base_seed
        .wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add(candidate_index)
}

/// A checkpointable snapshot of a ChaCha8 generator's exact position in its
/// keystream, captured via the seed plus word offset rather than relying on
/// the crate's own (optional) serde support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngState {
    seed: [u8; 32],
    word_pos: u128,
}

impl RngState {
    pub fn capture(rng: &ChaCha8Rng) -> Self {
        Self { seed: rng.get_seed(), word_pos: rng.get_word_pos() }
    }

    pub fn restore(&self) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::from_seed(self.seed);
        rng.set_word_pos(self.word_pos);
        rng
    }
}
