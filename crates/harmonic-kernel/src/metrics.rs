//! Prometheus metrics for scrapers.

use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

use crate::error::{FieldError, FieldResult};
use crate::snapshot::FieldSnapshot;

/// Gauges mirror the latest snapshot; counters accumulate over the process.
#[derive(Clone)]
pub struct FieldMetrics {
    registry: Registry,
    active_sessions: Gauge,
    global_resonance: Gauge,
    average_frequency: Gauge,
    field_coherence: Gauge,
    phi_harmonics: Gauge,
    ticks: IntCounter,
    deliveries: IntCounter,
    delivery_failures: IntCounter,
    sessions_evicted: IntCounter,
    compute_failures: IntCounter,
}

impl std::fmt::Debug for FieldMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMetrics")
            .field("ticks", &self.ticks.get())
            .field("deliveries", &self.deliveries.get())
            .finish()
    }
}

fn metrics_error(e: prometheus::Error) -> FieldError {
    FieldError::Metrics(e.to_string())
}

impl FieldMetrics {
    pub fn new() -> FieldResult<Self> {
        let registry = Registry::new();

        let gauge = |name: &str, help: &str| -> FieldResult<Gauge> {
            let gauge = Gauge::new(name, help).map_err(metrics_error)?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(metrics_error)?;
            Ok(gauge)
        };
        let counter = |name: &str, help: &str| -> FieldResult<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(metrics_error)?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(metrics_error)?;
            Ok(counter)
        };

        Ok(Self {
            active_sessions: gauge("harmonic_active_sessions", "Live sessions")?,
            global_resonance: gauge("harmonic_global_resonance", "Global resonance in [0, 1]")?,
            average_frequency: gauge(
                "harmonic_average_frequency_hz",
                "Mean frequency of active contributions",
            )?,
            field_coherence: gauge("harmonic_field_coherence", "Mean pairwise coherence")?,
            phi_harmonics: gauge("harmonic_phi_harmonics", "Phi relations in the latest snapshot")?,
            ticks: counter("harmonic_ticks_total", "Fast ticks published")?,
            deliveries: counter("harmonic_deliveries_total", "Snapshots queued to sessions")?,
            delivery_failures: counter(
                "harmonic_delivery_failures_total",
                "Sessions dropped because a snapshot could not be queued",
            )?,
            sessions_evicted: counter(
                "harmonic_sessions_evicted_total",
                "Sessions removed by the stale sweep",
            )?,
            compute_failures: counter(
                "harmonic_compute_failures_total",
                "Ticks that fell back to a zeroed snapshot",
            )?,
            registry,
        })
    }

    pub fn record_snapshot(&self, snapshot: &FieldSnapshot) {
        self.ticks.inc();
        self.active_sessions.set(snapshot.active_count as f64);
        self.global_resonance.set(snapshot.global_resonance);
        self.average_frequency.set(snapshot.average_frequency);
        self.field_coherence.set(snapshot.field_coherence);
        self.phi_harmonics.set(snapshot.phi_harmonics.len() as f64);
    }

    pub fn record_delivery(&self, delivered: usize, failed: usize) {
        self.deliveries.inc_by(delivered as u64);
        self.delivery_failures.inc_by(failed as u64);
    }

    pub fn record_evictions(&self, count: usize) {
        self.sessions_evicted.inc_by(count as u64);
    }

    pub fn record_compute_failure(&self) {
        self.compute_failures.inc();
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> FieldResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| FieldError::Metrics(e.to_string()))
    }
}
