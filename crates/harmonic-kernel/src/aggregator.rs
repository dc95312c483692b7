//! FieldAggregator: scalar statistics over the live contribution set.
//!
//! The aggregator owns no state. It is a read-only view over the
//! contributions the registry handed out at the start of a tick.

use crate::contribution::Contribution;
use crate::harmonic::{bloom_weight, noisy_pressure, NoiseSource, BASELINE_FREQUENCY};
use crate::snapshot::{FieldStats, PhiRelation};

/// Read-only view over one tick's contributions.
#[derive(Debug, Clone, Copy)]
pub struct FieldAggregator<'a> {
    contributions: &'a [Contribution],
}

impl<'a> FieldAggregator<'a> {
    pub fn over(contributions: &'a [Contribution]) -> Self {
        Self { contributions }
    }

    /// Weighted mean harmonic pressure, clamped into `[0, 1]`.
    ///
    /// Each contribution is weighted by `amplitude * bloom_weight(phase)`.
    /// Pressure is unbounded above (up to ~1.93 for full amplitude), so the
    /// clamp is what keeps the result in range. 0 with no contributions or
    /// when every amplitude is 0.
    pub fn global_resonance(&self, noise: &dyn NoiseSource) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for c in self.contributions {
            let weight = c.amplitude * bloom_weight(c.phase);
            weighted += noisy_pressure(c.frequency, c.amplitude, noise) * weight;
            total_weight += weight;
        }
        if total_weight <= 0.0 {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 1.0)
    }

    /// Mean pairwise coherence; 0 with fewer than two contributions.
    ///
    /// Pair coherence is the product of both bloom weights. O(n²) over the
    /// active set, fine for tens to low hundreds of contributors.
    pub fn field_coherence(&self) -> f64 {
        let n = self.contributions.len();
        if n < 2 {
            return 0.0;
        }
        let blooms: Vec<f64> = self
            .contributions
            .iter()
            .map(|c| bloom_weight(c.phase))
            .collect();

        let mut sum = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                sum += blooms[i] * blooms[j];
            }
        }
        let pairs = (n * (n - 1) / 2) as f64;
        sum / pairs
    }

    /// Arithmetic mean frequency, or exactly [`BASELINE_FREQUENCY`] when empty.
    ///
    /// The baseline is a fixed default, not a computed value.
    pub fn average_frequency(&self) -> f64 {
        if self.contributions.is_empty() {
            return BASELINE_FREQUENCY;
        }
        let total: f64 = self.contributions.iter().map(|c| c.frequency).sum();
        total / self.contributions.len() as f64
    }

    /// Assemble scalar stats. `active_count` comes from the registry, since
    /// sessions without a contribution still count.
    pub fn stats(
        &self,
        active_count: usize,
        relations: &[PhiRelation],
        noise: &dyn NoiseSource,
    ) -> FieldStats {
        FieldStats {
            active_count,
            global_resonance: self.global_resonance(noise),
            average_frequency: self.average_frequency(),
            phi_harmonics_count: relations.len(),
            field_coherence: self.field_coherence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldGeometryConfig;
    use crate::harmonic::{SeededNoise, ZeroNoise, PHI_INV};
    use std::f64::consts::PI;

    fn contribution(id: &str, frequency: f64, amplitude: f64, phase: f64) -> Contribution {
        Contribution::new(
            id.to_string(),
            frequency,
            amplitude,
            phase,
            &FieldGeometryConfig::default(),
        )
    }

    #[test]
    fn test_empty_field() {
        let view = FieldAggregator::over(&[]);
        assert_eq!(view.global_resonance(&ZeroNoise), 0.0);
        assert_eq!(view.field_coherence(), 0.0);
        assert_eq!(view.average_frequency(), 432.0);
    }

    #[test]
    fn test_single_contribution() {
        let contributions = vec![contribution("a", 432.0, 0.5, 0.0)];
        let view = FieldAggregator::over(&contributions);
        assert!(view.global_resonance(&ZeroNoise) > 0.0);
        assert_eq!(view.field_coherence(), 0.0);
        assert_eq!(view.average_frequency(), 432.0);
    }

    #[test]
    fn test_silent_contributions_have_no_weight() {
        let contributions = vec![contribution("a", 432.0, 0.0, 0.0)];
        let view = FieldAggregator::over(&contributions);
        assert_eq!(view.global_resonance(&ZeroNoise), 0.0);
    }

    #[test]
    fn test_resonance_bounded_over_valid_inputs() {
        let noise = SeededNoise::new(0.01, 11);
        for fi in 1..=50 {
            for ai in 0..=10 {
                for pi in 0..4 {
                    let frequency = fi as f64 * 199.0;
                    let amplitude = ai as f64 / 10.0;
                    let phase = pi as f64 * PI / 2.0;
                    let contributions = vec![
                        contribution("a", frequency, amplitude, phase),
                        contribution("b", 10_000.0 - frequency + 1.0, 1.0, 0.0),
                    ];
                    let r = FieldAggregator::over(&contributions).global_resonance(&noise);
                    assert!((0.0..=1.0).contains(&r), "{} at {} Hz", r, frequency);
                }
            }
        }
    }

    #[test]
    fn test_resonance_clamps_strong_fields() {
        // Full-amplitude contributions sitting near pressure peaks exceed 1
        let peak = (1..2000)
            .map(|i| i as f64 * 5.0)
            .max_by(|a, b| {
                crate::harmonic::harmonic_pressure(*a, 1.0)
                    .total_cmp(&crate::harmonic::harmonic_pressure(*b, 1.0))
            })
            .unwrap();
        assert!(crate::harmonic::harmonic_pressure(peak, 1.0) > 1.0);
        let contributions = vec![contribution("a", peak, 1.0, 0.0)];
        assert_eq!(
            FieldAggregator::over(&contributions).global_resonance(&ZeroNoise),
            1.0
        );
    }

    #[test]
    fn test_coherence_is_product_of_blooms() {
        let contributions = vec![
            contribution("a", 432.0, 0.5, 0.0),
            contribution("b", 528.0, 0.5, PI),
        ];
        let coherence = FieldAggregator::over(&contributions).field_coherence();
        assert!((coherence - PHI_INV).abs() < 1e-12);

        let in_phase = vec![
            contribution("a", 432.0, 0.5, 0.0),
            contribution("b", 528.0, 0.5, 0.0),
            contribution("c", 639.0, 0.5, 0.0),
        ];
        assert!((FieldAggregator::over(&in_phase).field_coherence() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_frequency() {
        let contributions = vec![
            contribution("a", 400.0, 0.5, 0.0),
            contribution("b", 600.0, 0.1, 0.0),
        ];
        assert_eq!(FieldAggregator::over(&contributions).average_frequency(), 500.0);
    }

    #[test]
    fn test_stats_uses_registry_count() {
        let contributions = vec![contribution("a", 432.0, 0.5, 0.0)];
        let stats = FieldAggregator::over(&contributions).stats(3, &[], &ZeroNoise);
        assert_eq!(stats.active_count, 3);
        assert_eq!(stats.phi_harmonics_count, 0);
    }
}
