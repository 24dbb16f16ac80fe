//! Error types for the stream processor
//!
//! This module provides error handling for every processor operation:
//! ingestion, pipeline lifecycle, windowing, aggregation, expression
//! evaluation and checkpoint state management.
//!
//! All errors are `Clone` because a fault is fanned out to every registered
//! output of a container.

use tempo_types::EventError;
use thiserror::Error;

/// Main processor error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    /// Ingress policy violations (surfaced through faulted outputs)
    #[error("ingress error: {0}")]
    Ingress(#[from] IngressError),

    /// Structural misuse of a query container
    #[error("stream processing error: {0}")]
    StreamProcessing(#[from] StreamProcessingError),

    /// Window-related errors
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Aggregation-related errors
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// Checkpoint state errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Expression evaluation errors
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Malformed events
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ProcessorError {
    /// Whether this error originated from an ingress policy violation
    pub fn is_ingress(&self) -> bool {
        matches!(self, ProcessorError::Ingress(_))
    }

    /// Whether this error is a structural container error
    pub fn is_stream_processing(&self) -> bool {
        matches!(self, ProcessorError::StreamProcessing(_))
    }
}

/// Violations detected while admitting events into a pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngressError {
    /// Event arrived further behind the high-water mark than the policy tolerates
    #[error("out-of-order event on input '{input}': sync time {sync_time} is below admission floor {floor} (high-water mark {high_water})")]
    OutOfOrder {
        input: String,
        sync_time: i64,
        floor: i64,
        high_water: i64,
    },

    /// Punctuation lower than a previously issued one
    #[error("punctuation regression on input '{input}': {punctuation} is before {previous}")]
    PunctuationRegression {
        input: String,
        previous: i64,
        punctuation: i64,
    },

    /// End edge without an open Start
    #[error("end edge on input '{input}' at {sync_time} references no open start at {start_time}")]
    UnmatchedEnd {
        input: String,
        sync_time: i64,
        start_time: i64,
    },

    /// Stream completed while Start edges were still open
    #[error("input '{input}' completed with {open} unmatched start edge(s), earliest at {earliest}")]
    UnmatchedStart {
        input: String,
        open: usize,
        earliest: i64,
    },

    /// Structurally invalid event
    #[error("invalid event on input '{input}': {reason}")]
    InvalidEvent { input: String, reason: String },

    /// The push source reported an error
    #[error("input '{input}' faulted: {reason}")]
    SourceFaulted { input: String, reason: String },

    /// Event pushed after the input completed
    #[error("input '{input}' already completed")]
    AlreadyCompleted { input: String },
}

/// Structural misuse of a query container
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamProcessingError {
    /// `restore` was called on a running container
    #[error("container has already been restored")]
    AlreadyRestored,

    /// Operation requires a running container
    #[error("container is not running (state: {state})")]
    NotRunning { state: String },

    /// Checkpoint does not describe the declared pipeline
    #[error("checkpoint shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    /// Checkpoint could not be applied
    #[error("restore failed: {reason}")]
    RestoreFailed { reason: String },

    /// The plan can no longer be modified
    #[error("query plan is frozen once the container is restored")]
    PlanFrozen,

    /// Handle belongs to a different container
    #[error("handle does not belong to this container")]
    ForeignHandle,

    /// The plan is structurally invalid
    #[error("invalid query plan: {reason}")]
    InvalidPlan { reason: String },

    /// Columnar execution was required but an operator only runs row-based
    #[error("operator '{operator}' cannot run columnar and row-based fallback is disabled")]
    ColumnarUnsupported { operator: String },
}

/// Window definition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Window size is invalid
    #[error("invalid window size: {size}, must be greater than 0")]
    InvalidWindowSize { size: i64 },

    /// Hop period is invalid for hopping windows
    #[error("invalid hop period: {period}, must be greater than 0")]
    InvalidPeriod { period: i64 },

    /// Timeout is invalid for session windows
    #[error("invalid session timeout: {timeout}, must be greater than 0")]
    InvalidTimeout { timeout: i64 },

    /// Maximum session duration is invalid
    #[error("invalid maximum session duration {max_duration}: must be at least the timeout {timeout}")]
    InvalidMaxDuration { max_duration: i64, timeout: i64 },
}

/// Aggregation computation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    /// Numeric overflow during aggregation
    #[error("numeric overflow in {operation}")]
    NumericOverflow { operation: String },

    /// Value type cannot be aggregated
    #[error("type mismatch in {operation}: cannot aggregate {actual}")]
    TypeMismatch { operation: String, actual: String },

    /// Accumulator state does not match the aggregate definition
    #[error("corrupted aggregation state for {aggregation_type}: {details}")]
    CorruptedState {
        aggregation_type: String,
        details: String,
    },
}

/// Checkpoint state errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Operator state serialization failed
    #[error("state serialization failed for operator {operator}: {reason}")]
    SerializationFailed { operator: String, reason: String },

    /// Operator state deserialization failed
    #[error("state deserialization failed for operator {operator}: {reason}")]
    DeserializationFailed { operator: String, reason: String },

    /// Blob contents do not match the recorded checksum
    #[error("checkpoint checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Blob written by an unsupported format version
    #[error("unsupported checkpoint version {version}")]
    UnsupportedVersion { version: u32 },

    /// Blob could not be decoded at all
    #[error("invalid checkpoint blob: {reason}")]
    InvalidBlob { reason: String },
}

/// Expression evaluation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// Field reference beyond the row arity
    #[error("field {index} out of range for row of {arity} field(s)")]
    FieldOutOfRange { index: usize, arity: usize },

    /// Operator applied to unsupported operand types
    #[error("cannot apply {op} to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },

    /// Predicate did not evaluate to a boolean
    #[error("predicate evaluated to {actual}, expected bool")]
    NotBoolean { actual: String },

    /// Integer division or remainder by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Integer overflow in arithmetic
    #[error("integer overflow in {op}")]
    Overflow { op: String },
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Result type alias for window operations
pub type WindowResult<T> = std::result::Result<T, WindowError>;

/// Result type alias for aggregation operations
pub type AggregationResult<T> = std::result::Result<T, AggregationError>;

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Result type alias for expression evaluation
pub type ExpressionResult<T> = std::result::Result<T, ExpressionError>;

impl From<bincode::Error> for ProcessorError {
    fn from(err: bincode::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ProcessorError {
    fn from(err: std::io::Error) -> Self {
        ProcessorError::Io(err.to_string())
    }
}

impl From<figment::Error> for ProcessorError {
    fn from(err: figment::Error) -> Self {
        ProcessorError::Configuration(err.to_string())
    }
}
