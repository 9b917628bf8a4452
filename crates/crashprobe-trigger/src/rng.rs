//! Per-iteration RNG seeding with ChaCha8.
//!
//! Each iteration draws from its own ChaCha8Rng derived from
//! `(campaign seed, iteration index)`, so any single iteration's offset can be
//! recomputed without replaying the ones before it.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const ITERATION_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Deterministic RNG for one iteration of a campaign.
pub fn iteration_rng(campaign_seed: u64, iteration: u64) -> ChaCha8Rng {
    let combined = campaign_seed ^ iteration.wrapping_mul(ITERATION_STRIDE);
    ChaCha8Rng::seed_from_u64(combined)
}
