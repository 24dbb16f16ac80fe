//! Temporal stream processor
//!
//! This crate evaluates continuous queries over streams of timestamped
//! events. Every event carries a validity interval; operators (windows,
//! snapshot aggregates, temporal joins) compute results that are a function
//! of those intervals only, independent of arrival order within the bounds an
//! input's ingress policy admits.
//!
//! The main entry point is [`QueryContainer`]: register inputs, compose
//! [`Stream`]s, register outputs, `restore` (fresh or from a checkpoint) and
//! push events.

pub mod aggregation;
pub mod batch;
pub mod config;
pub mod error;
pub mod expr;
pub mod ingress;
pub mod join;
pub mod pipeline;
pub mod state;
pub mod window;

pub use aggregation::{Aggregate, Comparer, ResultSelector};
pub use config::{ExecutionMode, ProcessorConfig};
pub use error::{
    AggregationError, ExpressionError, IngressError, ProcessorError, Result, StateError,
    StreamProcessingError, WindowError,
};
pub use expr::{Expr, KeySelector, Predicate, Projection};
pub use ingress::{DisorderDiagnostic, DisorderKind, DisorderPolicy, IngressPolicy, WatermarkPolicy};
pub use join::JoinCombiner;
pub use pipeline::{
    ContainerRunner, ContainerState, ContainerStats, InputHandle, InputSender, OutputHandle,
    OutputMessage, QueryContainer, Stream,
};
pub use window::{WindowOutput, WindowSpec};

/// Everything needed to declare and run a query
pub mod prelude {
    pub use crate::aggregation::{Aggregate, Comparer, ResultSelector};
    pub use crate::config::ProcessorConfig;
    pub use crate::expr::{Expr, KeySelector, Predicate, Projection};
    pub use crate::ingress::{DisorderPolicy, IngressPolicy, WatermarkPolicy};
    pub use crate::join::JoinCombiner;
    pub use crate::pipeline::{
        ContainerRunner, ContainerState, InputHandle, OutputHandle, OutputMessage, QueryContainer,
        Stream,
    };
    pub use crate::window::{WindowOutput, WindowSpec};
}
