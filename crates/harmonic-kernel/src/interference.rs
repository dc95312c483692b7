//! InterferenceEngine: pairwise phi relations and the spatial field snapshot.

use crate::aggregator::FieldAggregator;
use crate::config::FieldGeometryConfig;
use crate::contribution::{Contribution, Position};
use crate::error::FieldResult;
use crate::harmonic::{spiral_position, NoiseSource, PHI, PHI_SQUARED};
use crate::snapshot::{FieldPoint, FieldSnapshot, PhiKind, PhiRelation};

/// Derives relations and field points from one tick's contributions.
#[derive(Debug, Clone)]
pub struct InterferenceEngine {
    geometry: FieldGeometryConfig,
    /// Point positions never change, so they are laid out once.
    layout: Vec<FieldPoint>,
}

impl InterferenceEngine {
    pub fn new(geometry: FieldGeometryConfig) -> Self {
        let layout = (0..geometry.point_count)
            .map(|i| {
                let p = spiral_position(i as f64, geometry.field_spiral_scale);
                FieldPoint {
                    x: p.x,
                    y: p.y,
                    ..FieldPoint::default()
                }
            })
            .collect();
        Self { geometry, layout }
    }

    /// Field point positions with zero intensity.
    pub fn layout(&self) -> &[FieldPoint] {
        &self.layout
    }

    /// Classify one pair. Argument order does not matter.
    ///
    /// The golden ratio rule is checked first; a pair yields at most one
    /// relation.
    pub fn relation_between(&self, a: &Contribution, b: &Contribution) -> Option<PhiRelation> {
        let (hi, lo) = if a.frequency > b.frequency
            || (a.frequency == b.frequency && a.client_id <= b.client_id)
        {
            (a, b)
        } else {
            (b, a)
        };
        let ratio = hi.frequency / lo.frequency;

        let rules = [
            (PhiKind::GoldenRatio, PHI, self.geometry.epsilon_golden),
            (PhiKind::GoldenSquare, PHI_SQUARED, self.geometry.epsilon_square),
        ];
        rules.into_iter().find_map(|(kind, target, epsilon)| {
            let distance = (ratio - target).abs();
            (distance < epsilon).then(|| PhiRelation {
                client_a: hi.client_id.clone(),
                client_b: lo.client_id.clone(),
                ratio,
                strength: 1.0 - distance / epsilon,
                kind,
            })
        })
    }

    /// Scan every unordered pair for phi relations.
    ///
    /// O(n²) per tick. This is the scaling limit of the hub: past a few
    /// hundred contributors, bucket by frequency and compare only buckets a
    /// factor of φ or φ² apart.
    pub fn detect_phi_relations(&self, contributions: &[Contribution]) -> Vec<PhiRelation> {
        let mut relations = Vec::new();
        for (i, a) in contributions.iter().enumerate() {
            for b in &contributions[i + 1..] {
                if let Some(relation) = self.relation_between(a, b) {
                    relations.push(relation);
                }
            }
        }
        relations.sort_by(|x, y| {
            (x.client_a.as_str(), x.client_b.as_str()).cmp(&(y.client_a.as_str(), y.client_b.as_str()))
        });
        relations
    }

    /// Intensity and psi ratios at every layout point.
    ///
    /// Each contribution adds `amplitude · exp(-d / decay)` at distance `d`.
    /// That weight is split by phase into a bloom share `(1 + cos φ)/2` and a
    /// collapse share `(1 - cos φ)/2`; the psi values are those shares over
    /// the total, or both 0 where the total is 0.
    pub fn field_points(&self, contributions: &[Contribution]) -> Vec<FieldPoint> {
        self.layout
            .iter()
            .map(|point| {
                let mut intensity = 0.0;
                let mut bloom = 0.0;
                let mut collapse = 0.0;
                let at = Position {
                    x: point.x,
                    y: point.y,
                };
                for c in contributions {
                    let d = at.distance(&c.position);
                    let w = c.amplitude * (-d / self.geometry.decay_constant).exp();
                    let cos_phase = c.phase.cos();
                    intensity += w;
                    bloom += w * (1.0 + cos_phase) / 2.0;
                    collapse += w * (1.0 - cos_phase) / 2.0;
                }

                let (psi_bloom, psi_collapse) = if intensity > 0.0 {
                    (bloom / intensity, collapse / intensity)
                } else {
                    (0.0, 0.0)
                };
                FieldPoint {
                    x: point.x,
                    y: point.y,
                    intensity,
                    psi_collapse,
                    psi_bloom,
                }
            })
            .collect()
    }

    /// Full snapshot for one tick.
    ///
    /// Fails with `AggregatorComputeFailure` if any published value is not
    /// finite; the caller decides what to publish instead.
    pub fn snapshot(
        &self,
        contributions: &[Contribution],
        active_count: usize,
        noise: &dyn NoiseSource,
        timestamp: i64,
    ) -> FieldResult<FieldSnapshot> {
        let view = FieldAggregator::over(contributions);
        let snapshot = FieldSnapshot {
            global_resonance: view.global_resonance(noise),
            active_count,
            field_coherence: view.field_coherence(),
            average_frequency: view.average_frequency(),
            phi_harmonics: self.detect_phi_relations(contributions),
            field_points: self.field_points(contributions),
            timestamp,
        };
        snapshot.ensure_finite()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonic::ZeroNoise;
    use std::f64::consts::PI;

    fn engine() -> InterferenceEngine {
        InterferenceEngine::new(FieldGeometryConfig::default())
    }

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
    fn test_layout_is_fixed_length_spiral() {
        let engine = engine();
        assert_eq!(engine.layout().len(), 50);
        assert_eq!((engine.layout()[0].x, engine.layout()[0].y), (0.0, 0.0));
        let p = engine.layout()[16];
        assert!(((p.x * p.x + p.y * p.y).sqrt() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_golden_pair_detected() {
        let a = contribution("a", 432.0, 0.5, 0.0);
        let b = contribution("b", 432.0 * 1.618, 0.5, 0.0);
        let relations = engine().detect_phi_relations(&[a, b]);

        assert_eq!(relations.len(), 1);
        let r = &relations[0];
        assert_eq!(r.kind, PhiKind::GoldenRatio);
        assert_eq!(r.client_a, "b");
        assert_eq!(r.client_b, "a");
        assert!(r.ratio >= 1.0);
        assert!(r.strength > 0.99, "strength {}", r.strength);
    }

    #[test]
    fn test_relation_is_symmetric() {
        let engine = engine();
        let pairs = [(300.0, 485.0), (200.0, 523.0), (440.0, 712.0), (100.0, 1000.0)];
        for (fa, fb) in pairs {
            let a = contribution("a", fa, 0.5, 0.0);
            let b = contribution("b", fb, 0.9, 1.0);
            assert_eq!(engine.relation_between(&a, &b), engine.relation_between(&b, &a));
        }
    }

    #[test]
    fn test_strength_decreases_away_from_phi() {
        let engine = engine();
        let base = contribution("base", 400.0, 0.5, 0.0);
        let mut previous = f64::INFINITY;
        for step in 0..5 {
            let ratio = PHI + step as f64 * 0.01;
            let other = contribution("other", 400.0 * ratio, 0.5, 0.0);
            let relation = engine.relation_between(&base, &other).unwrap();
            assert_eq!(relation.kind, PhiKind::GoldenRatio);
            assert!(relation.strength < previous);
            previous = relation.strength;
        }
        let outside = contribution("other", 400.0 * (PHI + 0.06), 0.5, 0.0);
        assert!(engine.relation_between(&base, &outside).is_none());
    }

    #[test]
    fn test_golden_square_detected() {
        let a = contribution("a", 200.0, 0.5, 0.0);
        let b = contribution("b", 200.0 * PHI_SQUARED + 10.0, 0.5, 0.0);
        let relation = engine().relation_between(&a, &b).unwrap();
        assert_eq!(relation.kind, PhiKind::GoldenSquare);
        assert!(relation.strength > 0.0 && relation.strength < 1.0);
    }

    #[test]
    fn test_unrelated_pairs_yield_nothing() {
        let contributions = vec![
            contribution("a", 432.0, 0.5, 0.0),
            contribution("b", 440.0, 0.5, 0.0),
            contribution("c", 432.0, 0.5, 0.0),
        ];
        assert!(engine().detect_phi_relations(&contributions).is_empty());
    }

    #[test]
    fn test_empty_field_points_are_zero() {
        let points = engine().field_points(&[]);
        assert_eq!(points.len(), 50);
        for p in points {
            assert_eq!(p.intensity, 0.0);
            assert_eq!(p.psi_bloom, 0.0);
            assert_eq!(p.psi_collapse, 0.0);
        }
    }

    #[test]
    fn test_silent_contribution_leaves_points_zero() {
        let points = engine().field_points(&[contribution("a", 432.0, 0.0, 0.0)]);
        assert!(points.iter().all(|p| p.intensity == 0.0 && p.psi_bloom == 0.0));
    }

    #[test]
    fn test_intensity_peaks_near_contribution() {
        let engine = engine();
        let c = contribution("a", 1600.0, 1.0, 0.0);
        let points = engine.field_points(std::slice::from_ref(&c));

        let nearest = points
            .iter()
            .min_by(|p, q| {
                let dp = (p.x - c.position.x).hypot(p.y - c.position.y);
                let dq = (q.x - c.position.x).hypot(q.y - c.position.y);
                dp.total_cmp(&dq)
            })
            .unwrap();
        let max = points.iter().map(|p| p.intensity).fold(0.0, f64::max);
        assert_eq!(nearest.intensity, max);
        for p in &points {
            assert!((p.psi_bloom - 1.0).abs() < 1e-12);
            assert!(p.psi_collapse.abs() < 1e-12);
        }
    }

    #[test]
    fn test_psi_split_by_phase() {
        let points = engine().field_points(&[
            contribution("a", 800.0, 1.0, 0.0),
            contribution("b", 800.0, 1.0, PI),
        ]);
        for p in points {
            assert!((p.psi_bloom - 0.5).abs() < 1e-9);
            assert!((p.psi_collapse - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_snapshot_assembles_everything() {
        let contributions = vec![
            contribution("a", 432.0, 0.5, 0.0),
            contribution("b", 432.0 * 1.618, 0.5, 0.0),
        ];
        let snapshot = engine().snapshot(&contributions, 2, &ZeroNoise, 99).unwrap();
        assert_eq!(snapshot.active_count, 2);
        assert_eq!(snapshot.phi_harmonics.len(), 1);
        assert_eq!(snapshot.field_points.len(), 50);
        assert!(snapshot.global_resonance > 0.0);
        assert!((snapshot.average_frequency - (432.0 + 432.0 * 1.618) / 2.0).abs() < 1e-9);
        assert_eq!(snapshot.timestamp, 99);
    }
}
