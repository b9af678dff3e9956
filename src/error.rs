// Typed errors with thiserror. Every failure leaves prior state untouched.
// Surface meaningful messages to JS.

use thiserror::Error;

use crate::types::FrameIndex;

/// Engine error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("A rally is already in progress")]
    RallyAlreadyInProgress,

    #[error("No rally in progress")]
    NoRallyInProgress,

    #[error("Invalid score format: {0}")]
    InvalidScoreFormat(String),

    #[error("Rally index {index} out of range (have {len} rallies)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Rally must end after it starts (start frame {start}, end frame {end})")]
    InvalidRallyTiming { start: FrameIndex, end: FrameIndex },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
