//! Contribution types: one client's latest signal sample and its rolling signature.

use chrono::Utc;
use mti::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{FieldGeometryConfig, SignalConfig};
use crate::error::{FieldError, FieldResult};
use crate::harmonic::spiral_position;

/// Identifier of a session. Server-allocated ids look like `client_01h...`.
pub type ClientId = String;

/// Allocate a fresh, time-ordered client id.
pub fn new_client_id() -> ClientId {
    "client".create_type_id::<V7>().to_string()
}

/// Point in the field plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// The latest sample a client streamed into the field.
///
/// Overwritten wholesale on every accepted update; no history is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub client_id: ClientId,
    /// Hz, in (0, max_frequency]
    pub frequency: f64,
    /// In [0, 1]
    pub amplitude: f64,
    /// Radians
    pub phase: f64,
    /// Derived from frequency once per update
    pub position: Position,
    /// Unix milliseconds
    pub last_update: i64,
}

impl Contribution {
    /// Build a contribution, deriving its position on the contribution spiral.
    ///
    /// Does not validate; see [`validate_signal`].
    pub fn new(
        client_id: ClientId,
        frequency: f64,
        amplitude: f64,
        phase: f64,
        geometry: &FieldGeometryConfig,
    ) -> Self {
        let position = spiral_position(
            frequency / geometry.contribution_frequency_step,
            geometry.contribution_spiral_scale,
        );
        Self {
            client_id,
            frequency,
            amplitude,
            phase,
            position,
            last_update: Utc::now().timestamp_millis(),
        }
    }
}

/// Check a raw sample against the configured bounds.
pub fn validate_signal(
    frequency: f64,
    amplitude: f64,
    phase: f64,
    bounds: &SignalConfig,
) -> FieldResult<()> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(FieldError::invalid_signal(format!(
            "frequency must be > 0, got {}",
            frequency
        )));
    }
    if frequency > bounds.max_frequency {
        return Err(FieldError::invalid_signal(format!(
            "frequency {} exceeds maximum {}",
            frequency, bounds.max_frequency
        )));
    }
    if !amplitude.is_finite() || !(0.0..=1.0).contains(&amplitude) {
        return Err(FieldError::invalid_signal(format!(
            "amplitude must be in [0, 1], got {}",
            amplitude
        )));
    }
    if !phase.is_finite() {
        return Err(FieldError::invalid_signal("phase must be finite"));
    }
    Ok(())
}

/// Rolling, amplitude-weighted summary of a client's stream.
///
/// The frequency term blends with `alpha * amplitude`, so near-silent samples
/// barely move it; amplitude itself blends with plain `alpha`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalSignature {
    pub frequency: f64,
    pub amplitude: f64,
    pub samples: u64,
}

impl SignalSignature {
    /// Seed a signature from the first sample.
    pub fn seed(frequency: f64, amplitude: f64) -> Self {
        Self {
            frequency,
            amplitude,
            samples: 1,
        }
    }

    /// Fold one more sample into the signature.
    pub fn update(&mut self, frequency: f64, amplitude: f64, alpha: f64) {
        let weighted_alpha = alpha * amplitude;
        self.frequency = weighted_alpha * frequency + (1.0 - weighted_alpha) * self.frequency;
        self.amplitude = alpha * amplitude + (1.0 - alpha) * self.amplitude;
        self.samples += 1;
    }
}
