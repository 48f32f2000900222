//! Per-worker RNG seeding with ChaCha8.
//!
//! Worker `i` draws from a ChaCha8Rng seeded with `(seed + i)`. A failing
//! run is reproducible from (seed, worker id, draw count).

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Create the deterministic RNG for one worker of a campaign.
pub fn worker_rng(campaign_seed: u64, worker_id: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(campaign_seed.wrapping_add(worker_id))
}
