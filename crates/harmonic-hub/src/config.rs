//! Effective configuration: JSON file, then command-line/env overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use harmonic_kernel::HubConfig;

/// Overrides layered on top of the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// JSON config file; missing fields take their defaults
    #[arg(long, env = "HARMONIC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Stream listener address
    #[arg(long, env = "HARMONIC_STREAM_ADDR")]
    pub stream_addr: Option<String>,

    /// RPC listener address
    #[arg(long, env = "HARMONIC_RPC_ADDR")]
    pub rpc_addr: Option<String>,

    /// Metrics listener address
    #[arg(long, env = "HARMONIC_METRICS_ADDR")]
    pub metrics_addr: Option<String>,

    /// Fast tick interval in milliseconds
    #[arg(long, env = "HARMONIC_FAST_TICK_MS")]
    pub fast_tick_ms: Option<u64>,

    /// Silence after which a session is evicted, in milliseconds
    #[arg(long, env = "HARMONIC_SESSION_TIMEOUT_MS")]
    pub session_timeout_ms: Option<u64>,

    /// Noise band half-width; 0 disables noise
    #[arg(long, env = "HARMONIC_NOISE_AMPLITUDE")]
    pub noise_amplitude: Option<f64>,

    /// Fixed noise seed for reproducible runs
    #[arg(long, env = "HARMONIC_NOISE_SEED")]
    pub noise_seed: Option<u64>,
}

impl ConfigOverrides {
    /// Load the file (if any), apply overrides, validate.
    pub fn resolve(&self) -> Result<HubConfig> {
        let mut config = match &self.config {
            Some(path) => load_file(path)?,
            None => HubConfig::default(),
        };
        self.apply(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut HubConfig) {
        if let Some(addr) = &self.stream_addr {
            config.network.stream_addr = addr.clone();
        }
        if let Some(addr) = &self.rpc_addr {
            config.network.rpc_addr = addr.clone();
        }
        if let Some(addr) = &self.metrics_addr {
            config.network.metrics_addr = addr.clone();
        }
        if let Some(ms) = self.fast_tick_ms {
            config.ticks.fast_tick_ms = ms;
        }
        if let Some(ms) = self.session_timeout_ms {
            config.ticks.session_timeout_ms = ms;
        }
        if let Some(amplitude) = self.noise_amplitude {
            config.noise.amplitude = amplitude;
        }
        if self.noise_seed.is_some() {
            config.noise.seed = self.noise_seed;
        }
    }
}

/// Read and parse a JSON config file.
pub fn load_file(path: &Path) -> Result<HubConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    HubConfig::from_json(&json).with_context(|| format!("Failed to load {}", path.display()))
}
