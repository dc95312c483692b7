//! Harmonic primitives shared by the aggregator and the interference engine.
//!
//! The pressure curve is nonlinear and non-monotonic. Resonance thresholds
//! downstream were tuned against these exact constants.

use std::f64::consts::{PI, TAU};
use std::sync::Mutex;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::contribution::Position;

/// The golden ratio φ.
pub const PHI: f64 = 1.618033988749895;
/// φ², which is also φ + 1.
pub const PHI_SQUARED: f64 = 2.618033988749895;
/// 1/φ, which is also φ - 1.
pub const PHI_INV: f64 = 0.618033988749895;

/// Reference frequency. Also the documented `average_frequency` of an empty field.
pub const BASELINE_FREQUENCY: f64 = 432.0;

const DAMPING_PER_KHZ: f64 = 0.3;
const DAMPED_WEIGHT: f64 = 0.5;
const MODULATION_WEIGHT: f64 = 0.3;
const DEPTH_WEIGHT: f64 = 0.1;
const RECURSION_DEPTH: u32 = 3;

/// Source of the small random term mixed into harmonic pressure.
pub trait NoiseSource: Send + Sync {
    /// Draw one noise sample.
    fn sample(&self) -> f64;
}

/// Noise source that always returns zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroNoise;

impl NoiseSource for ZeroNoise {
    fn sample(&self) -> f64 {
        0.0
    }
}

/// Uniform noise in `[-amplitude, amplitude]` from a seedable ChaCha8 stream.
#[derive(Debug)]
pub struct SeededNoise {
    amplitude: f64,
    rng: Mutex<ChaCha8Rng>,
}

impl SeededNoise {
    pub fn new(amplitude: f64, seed: u64) -> Self {
        Self {
            amplitude: amplitude.abs(),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Seed from the thread RNG.
    pub fn from_entropy(amplitude: f64) -> Self {
        Self::new(amplitude, rand::random())
    }
}

impl NoiseSource for SeededNoise {
    fn sample(&self) -> f64 {
        if self.amplitude == 0.0 {
            return 0.0;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(-self.amplitude..=self.amplitude),
            Err(_) => 0.0,
        }
    }
}

/// Recursive depth term: each level re-samples the signal at 1/φ of the
/// previous scale with weight 1/φ. Bounded by roughly ±0.124.
fn depth_term(x: f64, depth: u32) -> f64 {
    if depth == 0 {
        return 0.0;
    }
    DEPTH_WEIGHT * PHI_INV * x.sin() + PHI_INV * depth_term(x / PHI, depth - 1)
}

/// Noise-free harmonic pressure of one contribution.
///
/// `a * (1 + 0.5·damped + 0.3·cos(f·π/φ) + depth)`, where `damped` is a sine
/// over the baseline period decaying with frequency. For valid inputs the
/// result lies in roughly `[0.3·a, 1.93·a]`; callers clamp, the curve does not.
pub fn harmonic_pressure(frequency: f64, amplitude: f64) -> f64 {
    let damped = (TAU * frequency / BASELINE_FREQUENCY).sin()
        * (-DAMPING_PER_KHZ * frequency / 1000.0).exp();
    let modulation = (frequency * PI / PHI).cos();
    let recursive = depth_term(frequency / BASELINE_FREQUENCY, RECURSION_DEPTH);

    amplitude * (1.0 + DAMPED_WEIGHT * damped + MODULATION_WEIGHT * modulation + recursive)
}

/// Harmonic pressure with one noise draw added.
pub fn noisy_pressure(frequency: f64, amplitude: f64, noise: &dyn NoiseSource) -> f64 {
    harmonic_pressure(frequency, amplitude) + noise.sample()
}

/// Bloom weight of a contribution: `1/φ` at phase π, `1` at phase 0.
pub fn bloom_weight(phase: f64) -> f64 {
    PHI_INV + (1.0 - PHI_INV) * (1.0 + phase.cos()) / 2.0
}

/// Point `t` on the golden spiral: `θ = t·2π/φ`, `r = scale·√t`.
pub fn spiral_position(t: f64, scale: f64) -> Position {
    let theta = t * TAU / PHI;
    let r = scale * t.max(0.0).sqrt();
    Position {
        x: r * theta.cos(),
        y: r * theta.sin(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phi_identities() {
        assert!((PHI * PHI - PHI_SQUARED).abs() < 1e-12);
        assert!((1.0 / PHI - PHI_INV).abs() < 1e-12);
        assert!((PHI - 1.0 - PHI_INV).abs() < 1e-12);
    }

    #[test]
    fn test_pressure_positive_at_baseline() {
        let p = harmonic_pressure(BASELINE_FREQUENCY, 0.5);
        assert!(p > 0.35 && p < 0.45, "pressure at 432 Hz was {}", p);
    }

    #[test]
    fn test_pressure_zero_for_silent_signal() {
        assert_eq!(harmonic_pressure(880.0, 0.0), 0.0);
    }

    #[test]
    fn test_pressure_is_non_monotonic() {
        let samples: Vec<f64> = (1..200)
            .map(|i| harmonic_pressure(i as f64 * 5.0, 1.0))
            .collect();
        let rises = samples.windows(2).filter(|w| w[1] > w[0]).count();
        let falls = samples.windows(2).filter(|w| w[1] < w[0]).count();
        assert!(rises > 0 && falls > 0);
    }

    #[test]
    fn test_pressure_stays_non_negative() {
        for i in 1..=1000 {
            let f = i as f64 * 10.0;
            assert!(harmonic_pressure(f, 1.0) >= 0.0, "negative at {} Hz", f);
        }
    }

    #[test]
    fn test_bloom_bounds() {
        assert!((bloom_weight(0.0) - 1.0).abs() < 1e-12);
        assert!((bloom_weight(PI) - PHI_INV).abs() < 1e-12);
        for i in 0..64 {
            let b = bloom_weight(i as f64 * 0.1);
            assert!(b >= PHI_INV - 1e-12 && b <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn test_spiral_origin_and_radius() {
        let origin = spiral_position(0.0, 1.0);
        assert_eq!((origin.x, origin.y), (0.0, 0.0));

        let p = spiral_position(4.0, 0.5);
        let r = (p.x * p.x + p.y * p.y).sqrt();
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_noise() {
        assert_eq!(ZeroNoise.sample(), 0.0);
        assert_eq!(
            noisy_pressure(432.0, 0.5, &ZeroNoise),
            harmonic_pressure(432.0, 0.5)
        );
    }

    #[test]
    fn test_seeded_noise_is_reproducible_and_bounded() {
        let a = SeededNoise::new(0.01, 7);
        let b = SeededNoise::new(0.01, 7);
        for _ in 0..100 {
            let x = a.sample();
            assert_eq!(x, b.sample());
            assert!(x.abs() <= 0.01);
        }
    }
}
