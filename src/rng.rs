//! Seeded random source owned by one simulation instance.
//!
//! Every draw made by an instance goes through its own [`SeededRng`], which
//! is derived solely from the run's seed text. No thread-local or wall-clock
//! entropy is used anywhere in the engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand::seq::{IndexedRandom, SliceRandom};
use rand_distr::StandardNormal;

/// FNV-1a over the seed text. Stable across platforms and releases, unlike
/// `std`'s `DefaultHasher`.
const fn hash_seed(seed: &str) -> u64 {
    let bytes = seed.as_bytes();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

#[derive(Debug, Clone)]
pub struct SeededRng {
    rng: StdRng,
}

impl SeededRng {
    /// Seeds from text. `"42"` and `"test"` are both valid seeds.
    pub fn from_seed_str(seed: &str) -> Self {
        Self::from_u64(hash_seed(seed))
    }

    pub fn from_u64(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Uniform in `[0, 1)`.
    #[inline]
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Uniform in `[min, max)`. Degenerate ranges return `min`, and an
    /// infinite bound is returned as-is (an event that never fires).
    pub fn uniform_range(&mut self, min: f64, max: f64) -> f64 {
        if !min.is_finite() {
            return min;
        }
        if !max.is_finite() {
            return max;
        }
        if max <= min {
            return min;
        }
        self.rng.random_range(min..max)
    }

    /// Uniform integer in `[min, max]`.
    pub fn int(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        self.rng.random_range(min..=max)
    }

    /// `true` with probability `p`, clamped to `[0, 1]`.
    pub fn bool(&mut self, p: f64) -> bool {
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        self.rng.random_bool(p)
    }

    pub fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + std_dev * z
    }

    pub fn choice<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}
