//! Exponentially distributed passenger inter-arrival gaps.
//!
//! Each stop owns one [`ArrivalProcess`]: a 16-bit linear-congruential
//! generator feeding the inverse CDF of the exponential distribution,
//!
//! ```text
//! gap  = -(1 / rate) * ln((seed + 1) / 65536)
//! seed = (25173 * seed + 13849) mod 65536
//! ```
//!
//! which yields the inter-arrival times of a Poisson process with mean
//! `rate` arrivals per second.
//!
//! # Determinism
//!
//! Generators are never shared between stops. Stop `i` is seeded with
//! `base_seed XOR (i * SEED_MIXING_CONSTANT)` reduced to 16 bits, so the
//! sequence each stop sees depends only on the base seed, the stop index,
//! and the rate -- never on task scheduling.

/// LCG multiplier.
const LCG_MULTIPLIER: u32 = 25_173;

/// LCG increment.
const LCG_INCREMENT: u32 = 13_849;

/// LCG modulus is 2^16; reduction is a mask.
const LCG_MASK: u32 = 0xFFFF;

/// Number of distinct generator states.
const LCG_MODULUS: f64 = 65_536.0;

/// Spreads consecutive stop indices across the 16-bit seed space.
const SEED_MIXING_CONSTANT: u32 = 0x9E37;

/// Per-stop generator of inter-arrival gaps, in simulated seconds.
///
/// Implements [`Iterator`] as an infinite, non-restartable sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalProcess {
    seed: u32,
    mean_gap: f64,
}

impl ArrivalProcess {
    /// Create a generator with an explicit 16-bit seed.
    ///
    /// `arrival_rate` must be positive and finite; validated configuration
    /// guarantees this.
    pub fn new(seed: u32, arrival_rate: f64) -> Self {
        Self {
            seed: seed & LCG_MASK,
            mean_gap: arrival_rate.recip(),
        }
    }

    /// Create the generator for stop `stop_index` from the run's base seed.
    ///
    /// Stop 0 always starts from `base_seed` itself.
    pub fn for_stop(base_seed: u32, stop_index: usize, arrival_rate: f64) -> Self {
        // Truncation is fine: only the low 16 bits survive the mask anyway.
        #[allow(clippy::cast_possible_truncation)]
        let index = stop_index as u32;
        Self::new(base_seed ^ index.wrapping_mul(SEED_MIXING_CONSTANT), arrival_rate)
    }

    /// Current generator state.
    pub const fn seed(&self) -> u32 {
        self.seed
    }

    /// Draw the next gap and advance the generator.
    ///
    /// The result is always finite and non-negative.
    pub fn next_gap(&mut self) -> f64 {
        let uniform = f64::from(self.seed.saturating_add(1)) / LCG_MODULUS;
        let gap = -self.mean_gap * uniform.ln();
        self.seed = LCG_MULTIPLIER
            .wrapping_mul(self.seed)
            .wrapping_add(LCG_INCREMENT)
            & LCG_MASK;
        // ln(1) yields -0.0 for the last state; normalise it.
        if gap > 0.0 { gap } else { 0.0 }
    }
}

impl Iterator for ArrivalProcess {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        Some(self.next_gap())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn first_gap_matches_closed_form() {
        let mut process = ArrivalProcess::new(100, 5.0);
        let expected = -(1.0 / 5.0) * (101.0_f64 / 65_536.0).ln();
        assert_eq!(process.next_gap(), expected);
        // (25173 * 100 + 13849) mod 65536
        assert_eq!(process.seed(), 2_531_149 % 65_536);
    }

    #[test]
    fn sequence_is_reproducible() {
        let a: Vec<u64> = ArrivalProcess::new(100, 2.5)
            .take(1_000)
            .map(f64::to_bits)
            .collect();
        let b: Vec<u64> = ArrivalProcess::new(100, 2.5)
            .take(1_000)
            .map(f64::to_bits)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn gaps_are_finite_and_non_negative() {
        // Walk the whole 65536-state cycle.
        assert!(
            ArrivalProcess::new(0, 1.0)
                .take(65_536)
                .all(|gap| gap.is_finite() && gap >= 0.0)
        );
    }

    #[test]
    fn last_state_yields_zero_gap() {
        let mut process = ArrivalProcess::new(65_535, 3.0);
        assert_eq!(process.next_gap().to_bits(), 0.0_f64.to_bits());
    }

    #[test]
    fn mean_gap_tracks_rate() {
        let rate = 4.0;
        let n = 65_536;
        let total: f64 = ArrivalProcess::new(100, rate).take(n).sum();
        let mean = total / f64::from(65_536_u32);
        assert!((mean - 1.0 / rate).abs() < 0.01, "mean gap {mean}");
    }

    #[test]
    fn stop_zero_keeps_base_seed() {
        assert_eq!(ArrivalProcess::for_stop(100, 0, 1.0).seed(), 100);
    }

    #[test]
    fn stops_get_independent_streams() {
        let first: Vec<f64> = ArrivalProcess::for_stop(100, 0, 1.0).take(8).collect();
        let second: Vec<f64> = ArrivalProcess::for_stop(100, 1, 1.0).take(8).collect();
        assert_ne!(first, second);

        // Same stop, same stream.
        let again: Vec<f64> = ArrivalProcess::for_stop(100, 1, 1.0).take(8).collect();
        assert_eq!(second, again);
    }
}
