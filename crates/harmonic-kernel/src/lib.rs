//! Harmonic Kernel: a shared, continuously recomputed field of client signals.
//!
//! Clients stream frequency/amplitude/phase samples into a session registry.
//! A fast tick folds the live contributions into a field snapshot (resonance,
//! coherence, golden-ratio relations, spatial field points) and fans it out
//! to every streaming session; a slow tick evicts sessions that went silent.

pub mod actors;
pub mod aggregator;
pub mod config;
pub mod contribution;
pub mod error;
pub mod harmonic;
pub mod hub;
pub mod interference;
pub mod messages;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod snapshot;

pub use aggregator::FieldAggregator;
pub use config::HubConfig;
pub use contribution::{ClientId, Contribution, Position, SignalSignature};
pub use error::{FieldError, FieldResult};
pub use harmonic::{NoiseSource, SeededNoise, ZeroNoise};
pub use hub::{DeliveryReport, FieldHub, TickReport};
pub use interference::InterferenceEngine;
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{SessionInfo, SessionKind, SessionRegistry};
pub use scheduler::BroadcastScheduler;
pub use snapshot::{FieldPoint, FieldSnapshot, FieldStats, PhiKind, PhiRelation};
