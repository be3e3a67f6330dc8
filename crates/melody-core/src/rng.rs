//! Seeded randomness. Every random choice in the generator flows through here.

use rand::SeedableRng;
use rand_pcg::Pcg32;

/// Derive an independent stream seed for a named component via BLAKE3.
pub fn derive_seed(base_seed: u64, key: &str) -> u64 {
    let mut input = Vec::with_capacity(8 + key.len());
    input.extend_from_slice(&base_seed.to_le_bytes());
    input.extend_from_slice(key.as_bytes());
    let hash = blake3::hash(&input);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}

pub fn component_rng(base_seed: u64, key: &str) -> Pcg32 {
    Pcg32::seed_from_u64(derive_seed(base_seed, key))
}
