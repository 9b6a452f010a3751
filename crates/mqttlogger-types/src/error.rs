//! Error types for payload and topic parsing in mqttlogger-types.

use thiserror::Error;

/// Errors that can occur when decoding sensor messages.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload was not valid JSON for the expected message shape.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The topic does not follow the expected layout.
    #[error("Invalid topic '{0}'")]
    InvalidTopic(String),

    /// A channel segment could not be parsed as an integer.
    #[error("Invalid channel '{0}'")]
    InvalidChannel(String),

    /// The timestamp is outside the representable range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Unknown rollup granularity name.
    #[error("Unknown granularity '{0}' (expected day, week, month or year)")]
    UnknownGranularity(String),
}

/// Result type alias using mqttlogger-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
