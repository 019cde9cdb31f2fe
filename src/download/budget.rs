//! Worker count derived from the configured thread-budget level.

use std::num::NonZeroUsize;

/// Highest supported level.
pub const MAX_LEVEL: u8 = 4;
/// Upper bound for level 4 so socket and memory use stay sane on many-core hosts.
const LEVEL4_CAP: usize = 64;

/// Fixed worker count for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBudget {
    level: u8,
    workers: usize,
}

impl PoolBudget {
    /// Budget for `level` on this host. Levels above 4 are treated as 4.
    pub fn from_level(level: u8) -> Self {
        let cores = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_cores(level, cores)
    }

    /// 0 -> 1, 1 -> cores/2, 2 -> cores, 3 -> 2*cores, 4 -> up to 8*cores (capped).
    pub fn with_cores(level: u8, cores: usize) -> Self {
        let cores = cores.max(1);
        let level = level.min(MAX_LEVEL);
        let workers = match level {
            0 => 1,
            1 => (cores / 2).max(1),
            2 => cores,
            3 => cores * 2,
            _ => (cores * 8).min(LEVEL4_CAP).max(cores * 2),
        };
        Self { level, workers }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_core_multiples() {
        assert_eq!(PoolBudget::with_cores(0, 8).workers(), 1);
        assert_eq!(PoolBudget::with_cores(1, 8).workers(), 4);
        assert_eq!(PoolBudget::with_cores(2, 8).workers(), 8);
        assert_eq!(PoolBudget::with_cores(3, 8).workers(), 16);
        assert_eq!(PoolBudget::with_cores(4, 8).workers(), 64);
    }

    #[test]
    fn single_core_never_drops_below_one() {
        assert_eq!(PoolBudget::with_cores(1, 1).workers(), 1);
        assert_eq!(PoolBudget::with_cores(2, 0).workers(), 1);
    }

    #[test]
    fn worker_count_is_monotonic_in_level() {
        for cores in [1, 2, 3, 4, 6, 8, 16, 32, 64, 128] {
            let counts: Vec<usize> = (0..=MAX_LEVEL)
                .map(|l| PoolBudget::with_cores(l, cores).workers())
                .collect();
            assert!(
                counts.windows(2).all(|w| w[0] <= w[1]),
                "cores={} counts={:?}",
                cores,
                counts
            );
        }
    }

    #[test]
    fn out_of_range_level_is_clamped() {
        let b = PoolBudget::with_cores(9, 4);
        assert_eq!(b.level(), 4);
        assert_eq!(b.workers(), PoolBudget::with_cores(4, 4).workers());
    }
}
