//! Configuration types for the hub.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FieldError, FieldResult};

/// Top-level hub configuration.
///
/// This defines tick cadence, signal bounds, field geometry, noise and
/// delivery behaviour. Loaded from JSON at runtime; every field has a default
/// so partial files are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HubConfig {
    /// Tick and eviction timing
    pub ticks: TickConfig,

    /// Accepted signal range and signature smoothing
    pub signal: SignalConfig,

    /// Field geometry and phi-relation tolerances
    pub field: FieldGeometryConfig,

    /// Noise mixed into harmonic pressure
    pub noise: NoiseConfig,

    /// Per-session outbound queue behaviour
    pub delivery: DeliveryConfig,

    /// Listener addresses
    pub network: NetworkConfig,
}

/// Tick configuration: how often the field is recomputed and swept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Fast tick interval in milliseconds (snapshot + fan-out)
    pub fast_tick_ms: u64,

    /// Slow tick interval in milliseconds (stale session sweep)
    pub sweep_interval_ms: u64,

    /// Sessions silent for longer than this are evicted (milliseconds)
    pub session_timeout_ms: u64,
}

/// Signal configuration: what a client may submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Upper frequency bound in Hz; the accepted range is (0, max_frequency]
    pub max_frequency: f64,

    /// Smoothing factor for the rolling signature (0.0 to 1.0)
    pub signature_alpha: f64,
}

/// Field geometry: spiral layout, decay and phi tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldGeometryConfig {
    /// Number of field points per snapshot
    pub point_count: usize,

    /// Radial scale of the field point spiral
    pub field_spiral_scale: f64,

    /// Radial scale of the contribution spiral
    pub contribution_spiral_scale: f64,

    /// Hz per spiral step when placing a contribution
    pub contribution_frequency_step: f64,

    /// Distance decay constant for point intensity
    pub decay_constant: f64,

    /// Tolerance around φ for a golden ratio relation
    pub epsilon_golden: f64,

    /// Tolerance around φ² for a golden square relation
    pub epsilon_square: f64,
}

/// Noise configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Half-width of the uniform noise band; 0 disables noise
    pub amplitude: f64,

    /// Fixed seed for reproducible runs; entropy-seeded when absent
    pub seed: Option<u64>,
}

/// Delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Capacity of each session's outbound queue
    pub outbound_capacity: usize,

    /// Socket write timeout per frame (milliseconds)
    pub write_timeout_ms: u64,
}

/// Listener addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Persistent session stream listener
    pub stream_addr: String,

    /// Request/response RPC listener
    pub rpc_addr: String,

    /// Metrics exposition listener
    pub metrics_addr: String,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            fast_tick_ms: 100,
            sweep_interval_ms: 10_000,  // 10 seconds
            session_timeout_ms: 30_000, // 30 seconds
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            max_frequency: 10_000.0,
            signature_alpha: 0.2,
        }
    }
}

impl Default for FieldGeometryConfig {
    fn default() -> Self {
        Self {
            point_count: 50,
            field_spiral_scale: 1.0,
            contribution_spiral_scale: 0.5,
            contribution_frequency_step: 100.0,
            decay_constant: 2.0,
            epsilon_golden: 0.05,
            epsilon_square: 0.1,
        }
    }
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            amplitude: 0.01,
            seed: None,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 32,
            write_timeout_ms: 2_000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            stream_addr: "127.0.0.1:7400".to_string(),
            rpc_addr: "127.0.0.1:7401".to_string(),
            metrics_addr: "127.0.0.1:7402".to_string(),
        }
    }
}

impl TickConfig {
    pub fn fast_tick(&self) -> Duration {
        Duration::from_millis(self.fast_tick_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

impl HubConfig {
    /// Configuration for tests: no noise, everything else default.
    pub fn deterministic() -> Self {
        let mut config = Self::default();
        config.noise.amplitude = 0.0;
        config
    }

    /// Parse a JSON document, falling back to defaults for missing fields.
    pub fn from_json(json: &str) -> FieldResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FieldError::InvalidConfig(format!("parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> FieldResult<()> {
        let fail = |msg: &str| Err(FieldError::InvalidConfig(msg.to_string()));

        if self.ticks.fast_tick_ms == 0 {
            return fail("ticks.fast_tick_ms must be > 0");
        }
        if self.ticks.sweep_interval_ms == 0 {
            return fail("ticks.sweep_interval_ms must be > 0");
        }
        if self.ticks.session_timeout_ms == 0 {
            return fail("ticks.session_timeout_ms must be > 0");
        }
        if !(self.signal.max_frequency.is_finite() && self.signal.max_frequency > 0.0) {
            return fail("signal.max_frequency must be finite and > 0");
        }
        if !(0.0..=1.0).contains(&self.signal.signature_alpha) {
            return fail("signal.signature_alpha must be in [0, 1]");
        }
        if self.field.point_count == 0 {
            return fail("field.point_count must be > 0");
        }
        if self.field.decay_constant <= 0.0 {
            return fail("field.decay_constant must be > 0");
        }
        if self.field.contribution_frequency_step <= 0.0 {
            return fail("field.contribution_frequency_step must be > 0");
        }
        if self.field.epsilon_golden <= 0.0 || self.field.epsilon_square <= 0.0 {
            return fail("field epsilons must be > 0");
        }
        if !(self.noise.amplitude.is_finite() && self.noise.amplitude >= 0.0) {
            return fail("noise.amplitude must be finite and >= 0");
        }
        if self.delivery.outbound_capacity == 0 {
            return fail("delivery.outbound_capacity must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(HubConfig::default().validate().is_ok());
        assert_eq!(HubConfig::deterministic().noise.amplitude, 0.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HubConfig::from_json(r#"{"ticks": {"fast_tick_ms": 50}}"#).unwrap();
        assert_eq!(config.ticks.fast_tick_ms, 50);
        assert_eq!(config.ticks.session_timeout_ms, 30_000);
        assert_eq!(config.field.point_count, 50);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = HubConfig::from_json(r#"{"delivery": {"outbound_capacity": 0}}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn test_rejects_alpha_out_of_range() {
        let mut config = HubConfig::default();
        config.signal.signature_alpha = 1.5;
        assert!(config.validate().is_err());
    }
}
