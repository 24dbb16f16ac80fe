//! Core types for the Tempo temporal stream processor
//!
//! This crate provides the temporal event model shared by every part of the
//! engine: dynamically typed payload values, rows, and stream events with
//! their interval algebra and canonical ordering.

pub mod errors;
pub mod events;
pub mod row;
pub mod value;

pub use errors::{EventError, EventResult};
pub use events::{canonical_data, canonical_sort, EventKind, StreamEvent, INFINITY, MIN_TIME};
pub use row::Row;
pub use value::Value;
