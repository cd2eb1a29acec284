//! Error types for the reconciliation core.

use thiserror::Error;

/// Errors raised while interpreting catalog data.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// A definition cannot be simulated (bad interval or range)
    #[error("Invalid definition for {sensor_id}: {reason}")]
    InvalidDefinition { sensor_id: String, reason: String },

    /// A change event decoded but is not internally consistent
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

impl CoreError {
    pub(crate) fn invalid(sensor_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            sensor_id: sensor_id.to_string(),
            reason: reason.into(),
        }
    }
}
