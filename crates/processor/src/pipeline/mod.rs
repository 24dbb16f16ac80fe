//! Query plans and their execution
//!
//! This module provides:
//! - the [`Operator`] contract and the stateless operators
//! - fluent composition through [`Stream`]
//! - the [`QueryContainer`], which owns inputs, operators and outputs
//! - key sharding of keyed operators
//! - the async [`ContainerRunner`]
//!
//! # Example
//!
//! ```rust
//! use tempo_processor::prelude::*;
//! use tempo_types::{row, StreamEvent};
//!
//! # fn main() -> tempo_processor::Result<()> {
//! let mut container = QueryContainer::new(ProcessorConfig::default())?;
//! let clicks = container.register_input("clicks", IngressPolicy::default())?;
//! let counts = clicks.stream().window_aggregate(
//!     WindowSpec::tumbling(10),
//!     KeySelector::fields(&[0]),
//!     Aggregate::count(),
//! )?;
//! let mut output = container.register_output(&counts)?;
//! container.restore(None)?;
//!
//! container.on_next(&clicks, StreamEvent::point(3, row!["home"]))?;
//! container.on_next(&clicks, StreamEvent::point(7, row!["home"]))?;
//! container.on_completed(&clicks)?;
//!
//! assert_eq!(output.drain_data(), vec![StreamEvent::interval(10, 20, row!["home", 2])]);
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod operator;
pub mod output;
pub mod plan;
pub mod runner;
pub mod shard;
pub mod stream;

pub use container::{ContainerState, ContainerStats, InputHandle, QueryContainer};
pub use operator::{
    Emission, Operator, OperatorContext, OperatorFactory, OperatorKind, SelectManyFn,
    SelectManyOperator, SelectOperator, UnionOperator, WhereOperator,
};
pub use output::{DiagnosticReceiver, OutputHandle, OutputMessage};
pub use plan::NodeId;
pub use runner::{ContainerRunner, InputSender};
pub use shard::Sharded;
pub use stream::Stream;
