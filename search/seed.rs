//! Deterministic seed derivation.
//!
//! A run owns a single base seed. Every iteration and every candidate draws from
//! its own stream derived from that seed, so results do not depend on thread
//! scheduling and a resumed run replays exactly what an uninterrupted run would.

use rand::SeedableRng;
use rand::rngs::StdRng;

/// Independent random streams used by a search run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedStream {
    /// Exploration sampling in the generator.
    Generate,
    /// Train/test partition and model initialisation for one candidate.
    Evaluate,
    /// Sampling of random gene sets.
    RandomSets,
}

impl SeedStream {
    fn tag(self) -> u64 {
        match self {
            Self::Generate => 0x6765_6E65_7261_7465,
            Self::Evaluate => 0x6576_616C_7561_7465,
            Self::RandomSets => 0x7261_6E64_6F6D_7365,
        }
    }
}

/// SplitMix64 finaliser.
#[inline]
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub fn derive_seed(base: u64, stream: SeedStream, iteration: usize, index: usize) -> u64 {
    let mut state = mix(base ^ stream.tag());
    state = mix(state ^ iteration as u64);
    mix(state ^ index as u64)
}

pub fn derive_rng(base: u64, stream: SeedStream, iteration: usize, index: usize) -> StdRng {
    StdRng::seed_from_u64(derive_seed(base, stream, iteration, index))
}

/// Uses the configured seed, or draws a fresh one from the thread RNG.
pub fn resolve_base_seed(configured: Option<u64>) -> u64 {
    configured.unwrap_or_else(rand::random)
}
