//! Error taxonomy for the harmonic field.
//!
//! Only `InvalidSignal` and `UnknownSession` ever reach a client. Delivery and
//! compute failures are absorbed by the tick loop and surface as logs and
//! metrics.

use thiserror::Error;

use crate::contribution::ClientId;

/// Errors produced by the field kernel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FieldError {
    /// Client supplied an out-of-range frequency, amplitude or phase.
    ///
    /// The sample is rejected before any state is touched; the connection
    /// stays open.
    #[error("invalid signal: {reason}")]
    InvalidSignal {
        /// Which bound was violated
        reason: String,
    },

    /// Heartbeat or update for a session that is no longer live.
    ///
    /// # Recovery
    ///
    /// The client must reconnect to obtain a fresh session.
    #[error("unknown session {0}")]
    UnknownSession(ClientId),

    /// A snapshot could not be handed to one session's outbound queue.
    #[error("delivery to {client_id} failed: {reason}")]
    DeliveryFailure {
        /// Session that could not be reached
        client_id: ClientId,
        /// Queue full or receiver gone
        reason: String,
    },

    /// A tick produced a non-finite value.
    #[error("aggregator compute failure: {0}")]
    AggregatorComputeFailure(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metric registration or encoding failed.
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl FieldError {
    /// Short machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            FieldError::InvalidSignal { .. } => "invalid_signal",
            FieldError::UnknownSession(_) => "unknown_session",
            FieldError::DeliveryFailure { .. } => "delivery_failure",
            FieldError::AggregatorComputeFailure(_) => "compute_failure",
            FieldError::InvalidConfig(_) => "invalid_config",
            FieldError::Metrics(_) => "metrics",
        }
    }

    pub(crate) fn invalid_signal(reason: impl Into<String>) -> Self {
        FieldError::InvalidSignal {
            reason: reason.into(),
        }
    }
}

/// Result alias for kernel operations.
pub type FieldResult<T> = Result<T, FieldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(FieldError::invalid_signal("x").code(), "invalid_signal");
        assert_eq!(
            FieldError::UnknownSession("client_a".to_string()).code(),
            "unknown_session"
        );
    }

    #[test]
    fn test_display_includes_reason() {
        let err = FieldError::invalid_signal("frequency must be > 0");
        assert_eq!(err.to_string(), "invalid signal: frequency must be > 0");
    }
}
