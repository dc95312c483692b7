//! Snapshot types: the immutable field state published on every fast tick.

use serde::{Deserialize, Serialize};

use crate::contribution::ClientId;
use crate::error::{FieldError, FieldResult};

/// Which golden-ratio family a frequency pair falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiKind {
    /// Ratio near φ
    GoldenRatio,
    /// Ratio near φ²
    GoldenSquare,
}

/// A detected near-golden-ratio relationship between two contributions.
///
/// `client_a` is always the higher-frequency side, so `ratio >= 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhiRelation {
    pub client_a: ClientId,
    pub client_b: ClientId,
    pub ratio: f64,
    /// 1 at the exact ratio, falling linearly to 0 at the tolerance edge
    pub strength: f64,
    pub kind: PhiKind,
}

/// One sample of the spatial field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldPoint {
    pub x: f64,
    pub y: f64,
    pub intensity: f64,
    pub psi_collapse: f64,
    pub psi_bloom: f64,
}

/// Aggregate field state, recomputed wholesale each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSnapshot {
    pub global_resonance: f64,
    pub active_count: usize,
    pub field_coherence: f64,
    pub average_frequency: f64,
    pub phi_harmonics: Vec<PhiRelation>,
    pub field_points: Vec<FieldPoint>,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl FieldSnapshot {
    /// Safe stand-in when a tick's computation fails.
    ///
    /// Metrics are zero, relations empty, points carry their layout with zero
    /// intensity. `active_count` still reflects the registry so the count
    /// invariant holds even on a failed tick.
    pub fn zeroed(active_count: usize, layout: &[FieldPoint], timestamp: i64) -> Self {
        Self {
            global_resonance: 0.0,
            active_count,
            field_coherence: 0.0,
            average_frequency: 0.0,
            phi_harmonics: Vec::new(),
            field_points: layout
                .iter()
                .map(|p| FieldPoint {
                    x: p.x,
                    y: p.y,
                    ..FieldPoint::default()
                })
                .collect(),
            timestamp,
        }
    }

    /// Reject snapshots carrying NaN or infinities.
    pub fn ensure_finite(&self) -> FieldResult<()> {
        let scalars = [
            ("globalResonance", self.global_resonance),
            ("fieldCoherence", self.field_coherence),
            ("averageFrequency", self.average_frequency),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(FieldError::AggregatorComputeFailure(format!(
                    "{} is {}",
                    name, value
                )));
            }
        }
        for relation in &self.phi_harmonics {
            if !(relation.ratio.is_finite() && relation.strength.is_finite()) {
                return Err(FieldError::AggregatorComputeFailure(format!(
                    "relation {}/{} is not finite",
                    relation.client_a, relation.client_b
                )));
            }
        }
        for (i, point) in self.field_points.iter().enumerate() {
            let values = [point.x, point.y, point.intensity, point.psi_collapse, point.psi_bloom];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(FieldError::AggregatorComputeFailure(format!(
                    "field point {} is not finite",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Scalar summary of this snapshot.
    pub fn stats(&self) -> FieldStats {
        FieldStats {
            active_count: self.active_count,
            global_resonance: self.global_resonance,
            average_frequency: self.average_frequency,
            phi_harmonics_count: self.phi_harmonics.len(),
            field_coherence: self.field_coherence,
        }
    }
}

/// Scalar field statistics for monitoring consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldStats {
    pub active_count: usize,
    pub global_resonance: f64,
    pub average_frequency: f64,
    pub phi_harmonics_count: usize,
    pub field_coherence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> FieldSnapshot {
        FieldSnapshot {
            global_resonance: 0.4,
            active_count: 2,
            field_coherence: 0.9,
            average_frequency: 565.0,
            phi_harmonics: vec![PhiRelation {
                client_a: "b".into(),
                client_b: "a".into(),
                ratio: 1.618,
                strength: 0.99,
                kind: PhiKind::GoldenRatio,
            }],
            field_points: vec![FieldPoint {
                x: 1.0,
                y: 0.5,
                intensity: 0.3,
                psi_collapse: 0.0,
                psi_bloom: 1.0,
            }],
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample_snapshot()).unwrap();
        assert!(json.get("globalResonance").is_some());
        assert!(json.get("phiHarmonics").is_some());
        assert_eq!(json["phiHarmonics"][0]["kind"], "golden_ratio");
        assert_eq!(json["phiHarmonics"][0]["clientA"], "b");
        assert_eq!(json["fieldPoints"][0]["psi_bloom"], 1.0);
    }

    #[test]
    fn test_zeroed_keeps_layout_and_count() {
        let snapshot = sample_snapshot();
        let zeroed = FieldSnapshot::zeroed(3, &snapshot.field_points, 5);
        assert_eq!(zeroed.active_count, 3);
        assert_eq!(zeroed.global_resonance, 0.0);
        assert_eq!(zeroed.field_points[0].x, 1.0);
        assert_eq!(zeroed.field_points[0].intensity, 0.0);
        assert!(zeroed.ensure_finite().is_ok());
    }

    #[test]
    fn test_ensure_finite_flags_nan() {
        let mut snapshot = sample_snapshot();
        snapshot.field_coherence = f64::NAN;
        let err = snapshot.ensure_finite().unwrap_err();
        assert_eq!(err.code(), "compute_failure");

        let mut snapshot = sample_snapshot();
        snapshot.field_points[0].psi_bloom = f64::INFINITY;
        assert!(snapshot.ensure_finite().is_err());
    }

    #[test]
    fn test_stats_counts_relations() {
        let stats = sample_snapshot().stats();
        assert_eq!(stats.phi_harmonics_count, 1);
        assert_eq!(stats.active_count, 2);
    }
}
