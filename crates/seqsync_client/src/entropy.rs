//! Injectable randomness.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use uuid::Uuid;

/// Source of random identifiers and delays.
pub trait RandomSource: Send + Sync {
    /// Returns a fresh random (version 4) UUID.
    fn uuid(&self) -> Uuid;

    /// Returns a uniform value in `0..bound`, or 0 when `bound` is 0.
    fn below(&self, bound: u64) -> u64;
}

/// Operating-system randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn uuid(&self) -> Uuid {
        Uuid::new_v4()
    }

    fn below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Deterministic randomness for tests and simulations.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Creates a generator from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.rng.lock().fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    fn below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.rng.lock().gen_range(0..bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_is_reproducible() {
        let a = SeededRandom::new(7);
        let b = SeededRandom::new(7);

        assert_eq!(a.uuid(), b.uuid());
        assert_eq!(a.below(1000), b.below(1000));
    }

    #[test]
    fn uuids_are_v4() {
        assert_eq!(SeededRandom::new(1).uuid().get_version_num(), 4);
        assert_eq!(OsRandom.uuid().get_version_num(), 4);
    }

    #[test]
    fn below_respects_bound() {
        let random = SeededRandom::new(3);
        for _ in 0..100 {
            assert!(random.below(5) < 5);
        }
        assert_eq!(random.below(0), 0);
        assert_eq!(OsRandom.below(0), 0);
    }
}
