//! Error types for the sensor simulator environment abstraction.

use thiserror::Error;

/// Errors raised by collaborators outside the core.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Connection, DNS, broker or socket failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote answered with a non-success status
    #[error("Unexpected status {code}: {body}")]
    Status { code: u16, body: String },

    /// Response or message body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The change-event topic does not exist yet
    #[error("Topic not ready: {0}")]
    TopicNotReady(String),

    /// The subscription or channel was closed by the other side
    #[error("Closed: {0}")]
    Closed(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Creates a decode error.
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }

    /// Creates a closed error.
    pub fn closed(what: impl Into<String>) -> Self {
        Self::Closed(what.into())
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err)
    }
}
