//! Error types for the event model

use thiserror::Error;

/// Result type alias for event construction
pub type EventResult<T> = std::result::Result<T, EventError>;

/// Structural errors in a single event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("empty interval [{start}, {end})")]
    EmptyInterval { start: i64, end: i64 },

    #[error("interval starting at {start} has no finite end")]
    UnboundedInterval { start: i64 },

    #[error("invalid timestamp {timestamp}: {reason}")]
    InvalidTimestamp { timestamp: i64, reason: String },
}
