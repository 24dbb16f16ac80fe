//! Operator contract and stateless operators
//!
//! Every node of a query plan is an [`Operator`]. Operators receive data on
//! numbered input ports, either as row events or as columnar batches, plus
//! punctuations, and emit their results through the [`OperatorContext`].
//!
//! This module provides the stateless operators:
//! - [`WhereOperator`]: keep events satisfying a predicate
//! - [`SelectOperator`]: project payloads one-to-one
//! - [`SelectManyOperator`]: project payloads one-to-many (row-based only)
//! - [`UnionOperator`]: merge two streams

use crate::batch::{ColumnarBatch, EventBatch};
use crate::config::ExecutionMode;
use crate::error::{Result, StateResult};
use crate::expr::{Predicate, Projection};
use crate::state::{decode_state, encode_state};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;
use tempo_types::{Row, StreamEvent, MIN_TIME};
use tracing::trace;

/// Kind tag recorded in checkpoint shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    Ingress,
    Where,
    Select,
    SelectMany,
    Union,
    HoppingWindow,
    SessionWindow,
    SnapshotAggregate,
    EquiJoin,
    AntiJoin,
    Clip,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorKind::Ingress => "ingress",
            OperatorKind::Where => "where",
            OperatorKind::Select => "select",
            OperatorKind::SelectMany => "select_many",
            OperatorKind::Union => "union",
            OperatorKind::HoppingWindow => "hopping_window",
            OperatorKind::SessionWindow => "session_window",
            OperatorKind::SnapshotAggregate => "snapshot_aggregate",
            OperatorKind::EquiJoin => "equi_join",
            OperatorKind::AntiJoin => "anti_join",
            OperatorKind::Clip => "clip",
        };
        f.write_str(name)
    }
}

/// Output of an operator call
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Data(EventBatch),
    Punctuation(i64),
}

/// Per-call execution context
///
/// Carries the execution settings of the container and collects everything
/// the operator emits during the call.
#[derive(Debug)]
pub struct OperatorContext {
    mode: ExecutionMode,
    batch_size: usize,
    map_arity: usize,
    emitted: Vec<Emission>,
}

impl OperatorContext {
    pub fn new(mode: ExecutionMode, batch_size: usize, map_arity: usize) -> Self {
        Self {
            mode,
            batch_size: batch_size.max(1),
            map_arity: map_arity.max(1),
            emitted: Vec::new(),
        }
    }

    /// Context with the same settings and an empty output buffer
    pub fn fork(&self) -> Self {
        Self::new(self.mode, self.batch_size, self.map_arity)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn map_arity(&self) -> usize {
        self.map_arity
    }

    /// Emit events, packaged for the current execution mode
    pub fn emit_events(&mut self, events: Vec<StreamEvent>) {
        for batch in EventBatch::from_events(events, self.mode, self.batch_size) {
            self.emitted.push(Emission::Data(batch));
        }
    }

    /// Emit an already packaged batch
    pub fn emit_batch(&mut self, batch: EventBatch) {
        if !batch.is_empty() {
            self.emitted.push(Emission::Data(batch));
        }
    }

    pub fn emit_punctuation(&mut self, time: i64) {
        self.emitted.push(Emission::Punctuation(time));
    }

    /// Emit `time` if it is later than `*last`, and record it
    pub fn advance_punctuation(&mut self, last: &mut i64, time: i64) {
        if time > *last {
            *last = time;
            self.emit_punctuation(time);
        }
    }

    /// Take everything emitted so far
    pub fn take(&mut self) -> Vec<Emission> {
        std::mem::take(&mut self.emitted)
    }
}

/// A node of the query plan
///
/// Operators exclusively own their state. `checkpoint` and `restore` must
/// round-trip that state completely: an operator restored from a checkpoint
/// behaves exactly like the operator that produced it.
pub trait Operator: Send + Debug {
    fn kind(&self) -> OperatorKind;

    /// Parameters that identify this operator within a plan shape
    fn descriptor(&self) -> String;

    /// Process row events arriving on `port`
    fn on_rows(&mut self, port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()>;

    /// Process a columnar batch arriving on `port`
    ///
    /// The default materializes the live slots and delegates to `on_rows`.
    fn on_columnar(&mut self, port: usize, batch: ColumnarBatch, ctx: &mut OperatorContext) -> Result<()> {
        self.on_rows(port, batch.to_events(), ctx)
    }

    /// Whether `on_columnar` can consume batches without falling back to rows
    fn supports_columnar(&self) -> bool {
        true
    }

    /// Process a punctuation arriving on `port`
    fn on_punctuation(&mut self, port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()>;

    /// Serialize the operator state
    fn checkpoint(&self) -> StateResult<Vec<u8>>;

    /// Replace the operator state with a checkpointed one
    fn restore(&mut self, state: &[u8]) -> StateResult<()>;
}

/// Boxed operator constructor held by the plan
pub type OperatorFactory = Arc<dyn Fn() -> Box<dyn Operator> + Send + Sync>;

/// Run `f` over `events`, in parallel chunks when the context allows it
fn map_chunks<T, F>(events: Vec<StreamEvent>, ctx: &OperatorContext, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(StreamEvent) -> Result<Option<T>> + Send + Sync,
{
    let arity = ctx.map_arity();
    if arity > 1 && events.len() >= arity {
        let chunk = events.len().div_ceil(arity);
        let chunks: Vec<Vec<StreamEvent>> = events.chunks(chunk).map(<[StreamEvent]>::to_vec).collect();
        let results = chunks
            .into_par_iter()
            .map(|chunk| -> Result<Vec<T>> {
                let mut out = Vec::with_capacity(chunk.len());
                for event in chunk {
                    if let Some(item) = f(event)? {
                        out.push(item);
                    }
                }
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(results.into_iter().flatten().collect())
    } else {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            if let Some(item) = f(event)? {
                out.push(item);
            }
        }
        Ok(out)
    }
}

/// Filter operator: keeps events satisfying a predicate
#[derive(Debug)]
pub struct WhereOperator {
    predicate: Predicate,
}

impl WhereOperator {
    pub fn new(predicate: Predicate) -> Self {
        Self { predicate }
    }
}

impl Operator for WhereOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Where
    }

    fn descriptor(&self) -> String {
        self.predicate.to_string()
    }

    fn on_rows(&mut self, _port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()> {
        let predicate = &self.predicate;
        let kept = map_chunks(events, ctx, |event| {
            Ok(predicate.matches(&event)?.then_some(event))
        })?;
        ctx.emit_events(kept);
        Ok(())
    }

    fn on_columnar(&mut self, _port: usize, mut batch: ColumnarBatch, ctx: &mut OperatorContext) -> Result<()> {
        self.predicate.filter_batch(&mut batch)?;
        trace!(live = batch.live_count(), slots = batch.slots(), "filtered batch");
        ctx.emit_batch(EventBatch::Columnar(batch));
        Ok(())
    }

    fn on_punctuation(&mut self, _port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        ctx.emit_punctuation(time);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn restore(&mut self, _state: &[u8]) -> StateResult<()> {
        Ok(())
    }
}

/// Projection operator: transforms each payload
#[derive(Debug)]
pub struct SelectOperator {
    projection: Projection,
}

impl SelectOperator {
    pub fn new(projection: Projection) -> Self {
        Self { projection }
    }
}

impl Operator for SelectOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Select
    }

    fn descriptor(&self) -> String {
        self.projection.to_string()
    }

    fn on_rows(&mut self, _port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()> {
        let projection = &self.projection;
        let projected = map_chunks(events, ctx, |event| {
            let payload = projection.project(&event)?;
            Ok(Some(event.with_payload(payload)))
        })?;
        ctx.emit_events(projected);
        Ok(())
    }

    fn on_columnar(&mut self, port: usize, batch: ColumnarBatch, ctx: &mut OperatorContext) -> Result<()> {
        match self.projection.project_batch(&batch)? {
            Some(projected) => {
                ctx.emit_batch(EventBatch::Columnar(projected));
                Ok(())
            }
            // General projection fallback: rebuild each live row inside the batch
            None => self.on_rows(port, batch.to_events(), ctx),
        }
    }

    fn on_punctuation(&mut self, _port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        ctx.emit_punctuation(time);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn restore(&mut self, _state: &[u8]) -> StateResult<()> {
        Ok(())
    }
}

/// One-to-many payload function
pub type SelectManyFn = Arc<dyn Fn(&Row) -> Vec<Row> + Send + Sync>;

/// One-to-many projection; every output keeps the input's interval
pub struct SelectManyOperator {
    f: SelectManyFn,
}

impl SelectManyOperator {
    pub fn new(f: SelectManyFn) -> Self {
        Self { f }
    }
}

impl Debug for SelectManyOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectManyOperator").finish_non_exhaustive()
    }
}

impl Operator for SelectManyOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::SelectMany
    }

    fn descriptor(&self) -> String {
        "<fn>".to_string()
    }

    fn on_rows(&mut self, _port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()> {
        let f = &self.f;
        let expanded = map_chunks(events, ctx, |event| {
            Ok(Some(
                f(&event.payload)
                    .into_iter()
                    .map(|payload| event.with_payload(payload))
                    .collect::<Vec<_>>(),
            ))
        })?;
        ctx.emit_events(expanded.into_iter().flatten().collect());
        Ok(())
    }

    fn supports_columnar(&self) -> bool {
        false
    }

    fn on_punctuation(&mut self, _port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        ctx.emit_punctuation(time);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn restore(&mut self, _state: &[u8]) -> StateResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnionState {
    inputs: [i64; 2],
    output: i64,
}

/// Merges two streams; progress is the slower of the two inputs
#[derive(Debug)]
pub struct UnionOperator {
    state: UnionState,
}

impl UnionOperator {
    pub fn new() -> Self {
        Self {
            state: UnionState {
                inputs: [MIN_TIME; 2],
                output: MIN_TIME,
            },
        }
    }
}

impl Default for UnionOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for UnionOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Union
    }

    fn descriptor(&self) -> String {
        "union".to_string()
    }

    fn on_rows(&mut self, _port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()> {
        ctx.emit_events(events);
        Ok(())
    }

    fn on_columnar(&mut self, _port: usize, batch: ColumnarBatch, ctx: &mut OperatorContext) -> Result<()> {
        ctx.emit_batch(EventBatch::Columnar(batch));
        Ok(())
    }

    fn on_punctuation(&mut self, port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        let slot = &mut self.state.inputs[port.min(1)];
        *slot = (*slot).max(time);
        let low = self.state.inputs[0].min(self.state.inputs[1]);
        ctx.advance_punctuation(&mut self.state.output, low);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        encode_state("union", &self.state)
    }

    fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        self.state = decode_state("union", state)?;
        Ok(())
    }
}
