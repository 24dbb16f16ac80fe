//! Query container: owns the inputs, the operator graph and the outputs of a
//! query, and drives events through it.
//!
//! Lifecycle:
//!
//! ```text
//! Unbuilt --restore--> Running --on_completed (all inputs)--> Completed
//!    |                    |
//!    |                    +--fault--> Faulted
//!    +--rejected checkpoint--> RestoreFailed --restore(None)--> Running
//!
//! any state --dispose--> Disposed
//! ```
//!
//! Inputs, outputs and diagnostic subscriptions are registered while the
//! container is unbuilt. `restore` instantiates every operator, optionally
//! from a checkpoint blob, and freezes the plan.

use super::operator::{Emission, Operator, OperatorContext, OperatorKind};
use super::output::{DiagnosticReceiver, OutputHandle, OutputSink};
use super::plan::{NodeId, NodeSource, Plan};
use super::shard::Sharded;
use super::stream::Stream;
use crate::batch::EventBatch;
use crate::config::{ExecutionMode, ProcessorConfig};
use crate::error::{IngressError, ProcessorError, Result, StreamProcessingError};
use crate::ingress::{DisorderDiagnostic, Ingress, IngressPolicy};
use crate::state::{Checkpoint, NodeShape, PlanShape};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tempo_types::StreamEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Lifecycle state of a [`QueryContainer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Unbuilt,
    Running,
    RestoreFailed,
    Faulted,
    Completed,
    Disposed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerState::Unbuilt => "unbuilt",
            ContainerState::Running => "running",
            ContainerState::RestoreFailed => "restore_failed",
            ContainerState::Faulted => "faulted",
            ContainerState::Completed => "completed",
            ContainerState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Counters of a container since it was restored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Events pushed into inputs, punctuations included
    pub events_ingested: u64,
    pub events_admitted: u64,
    pub events_dropped: u64,
    pub events_adjusted: u64,
    /// Explicit punctuations received
    pub punctuations: u64,
    /// Data events delivered to outputs
    pub output_events: u64,
    pub checkpoints: u64,
}

/// Handle to a registered input
#[derive(Debug, Clone)]
pub struct InputHandle {
    name: String,
    stream: Stream,
}

impl InputHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> NodeId {
        self.stream.node()
    }

    /// The stream of admitted events of this input
    pub fn stream(&self) -> Stream {
        self.stream.clone()
    }
}

#[derive(Debug)]
enum RuntimeNode {
    Input(Ingress),
    Operator(Box<dyn Operator>),
}

/// Instantiated plan of a running container
struct Runtime {
    nodes: Vec<RuntimeNode>,
    /// `(target, port)` edges leaving each node
    downstream: Vec<Vec<(NodeId, usize)>>,
    shape: PlanShape,
    sinks: Vec<OutputSink>,
    completed: BTreeSet<NodeId>,
    input_count: usize,
    context: OperatorContext,
    output_events: u64,
}

impl Runtime {
    fn build(plan: &Plan, config: &ProcessorConfig, sinks: Vec<OutputSink>) -> Result<Self> {
        if plan.input_count() == 0 {
            return Err(StreamProcessingError::InvalidPlan {
                reason: "plan has no inputs".to_string(),
            }
            .into());
        }
        let mode = config.execution_mode();
        let mut nodes = Vec::with_capacity(plan.nodes().len());
        let mut shape = PlanShape::default();
        let mut downstream = vec![Vec::new(); plan.nodes().len()];

        for (index, plan_node) in plan.nodes().iter().enumerate() {
            for (port, input) in plan_node.inputs.iter().enumerate() {
                downstream[*input].push((index, port));
            }
            let (node, kind, descriptor, shards) = match &plan_node.source {
                NodeSource::Input { name, policy } => {
                    let ingress = Ingress::new(name.clone(), policy.clone());
                    let descriptor = ingress.descriptor();
                    (RuntimeNode::Input(ingress), OperatorKind::Ingress, descriptor, 1)
                }
                NodeSource::Operator {
                    factory,
                    shard_keys,
                } => {
                    let (operator, shards): (Box<dyn Operator>, usize) = match shard_keys {
                        Some(keys) if config.reduce_arity > 1 => (
                            Box::new(Sharded::new(factory, keys.clone(), config.reduce_arity)),
                            config.reduce_arity,
                        ),
                        _ => (factory(), 1),
                    };
                    if mode == ExecutionMode::Columnar
                        && config.dont_fall_back_to_row_based_execution
                        && !operator.supports_columnar()
                    {
                        return Err(StreamProcessingError::ColumnarUnsupported {
                            operator: operator.kind().to_string(),
                        }
                        .into());
                    }
                    let kind = operator.kind();
                    let descriptor = operator.descriptor();
                    (RuntimeNode::Operator(operator), kind, descriptor, shards)
                }
            };
            shape.nodes.push(NodeShape {
                index,
                kind,
                descriptor,
                inputs: plan_node.inputs.clone(),
                shards,
            });
            nodes.push(node);
        }

        Ok(Self {
            nodes,
            downstream,
            shape,
            sinks,
            completed: BTreeSet::new(),
            input_count: plan.input_count(),
            context: OperatorContext::new(mode, config.data_batch_size, config.map_arity),
            output_events: 0,
        })
    }

    fn apply_checkpoint(&mut self, bytes: &[u8]) -> Result<()> {
        let checkpoint = Checkpoint::from_bytes(bytes)?;
        if let Some(reason) = checkpoint.shape.mismatch(&self.shape) {
            return Err(StreamProcessingError::ShapeMismatch { reason }.into());
        }
        for (node, state) in self.nodes.iter_mut().zip(&checkpoint.states) {
            match node {
                RuntimeNode::Input(ingress) => ingress.restore(state)?,
                RuntimeNode::Operator(operator) => operator.restore(state)?,
            }
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if matches!(node, RuntimeNode::Input(ingress) if ingress.is_completed()) {
                self.completed.insert(index);
            }
        }
        for sink in &mut self.sinks {
            sink.complete_if_ready(&self.completed);
        }
        info!(
            checkpoint_id = %checkpoint.metadata.checkpoint_id,
            size_bytes = checkpoint.metadata.size_bytes,
            "restored checkpoint"
        );
        Ok(())
    }

    fn ingress_mut(&mut self, node: NodeId) -> Result<&mut Ingress> {
        match self.nodes.get_mut(node) {
            Some(RuntimeNode::Input(ingress)) => Ok(ingress),
            _ => Err(StreamProcessingError::InvalidPlan {
                reason: format!("node {} is not an input", node),
            }
            .into()),
        }
    }

    fn ingest(
        &mut self,
        node: NodeId,
        event: StreamEvent,
        diagnostics: &mut Vec<DisorderDiagnostic>,
    ) -> Result<()> {
        let mut ctx = self.context.fork();
        self.ingress_mut(node)?.on_event(event, &mut ctx, diagnostics)?;
        self.propagate(node, ctx.take())
    }

    fn complete_input(&mut self, node: NodeId) -> Result<()> {
        let mut ctx = self.context.fork();
        self.ingress_mut(node)?.complete(&mut ctx)?;
        self.propagate(node, ctx.take())?;
        self.completed.insert(node);
        for sink in &mut self.sinks {
            sink.complete_if_ready(&self.completed);
        }
        Ok(())
    }

    fn all_inputs_completed(&self) -> bool {
        self.completed.len() == self.input_count
    }

    fn flush_inputs(&mut self) -> Result<()> {
        for node in 0..self.nodes.len() {
            let mut ctx = self.context.fork();
            if let RuntimeNode::Input(ingress) = &mut self.nodes[node] {
                ingress.flush(&mut ctx);
            }
            self.propagate(node, ctx.take())?;
        }
        Ok(())
    }

    /// Push emissions of `source` through the graph, breadth first
    fn propagate(&mut self, source: NodeId, emissions: Vec<Emission>) -> Result<()> {
        let mut queue: VecDeque<(NodeId, Emission)> =
            emissions.into_iter().map(|emission| (source, emission)).collect();

        while let Some((node, emission)) = queue.pop_front() {
            self.deliver(node, &emission);
            for edge in 0..self.downstream[node].len() {
                let (target, port) = self.downstream[node][edge];
                let mut ctx = self.context.fork();
                let RuntimeNode::Operator(operator) = &mut self.nodes[target] else {
                    continue;
                };
                match emission.clone() {
                    Emission::Data(EventBatch::Rows(events)) => operator.on_rows(port, events, &mut ctx)?,
                    Emission::Data(EventBatch::Columnar(batch)) if operator.supports_columnar() => {
                        operator.on_columnar(port, batch, &mut ctx)?
                    }
                    Emission::Data(batch) => {
                        trace!(node = target, "row-based fallback");
                        operator.on_rows(port, batch.into_events(), &mut ctx)?
                    }
                    Emission::Punctuation(time) => operator.on_punctuation(port, time, &mut ctx)?,
                }
                queue.extend(ctx.take().into_iter().map(|emission| (target, emission)));
            }
        }
        Ok(())
    }

    fn deliver(&mut self, node: NodeId, emission: &Emission) {
        for sink in self.sinks.iter_mut().filter(|sink| sink.node() == node) {
            match emission {
                Emission::Data(batch) => {
                    self.output_events += sink.deliver_events(batch.clone().into_events());
                }
                Emission::Punctuation(time) => sink.deliver_punctuation(*time),
            }
        }
    }

    fn checkpoint(&self) -> Result<Checkpoint> {
        let states = self
            .nodes
            .iter()
            .map(|node| match node {
                RuntimeNode::Input(ingress) => ingress.checkpoint(),
                RuntimeNode::Operator(operator) => operator.checkpoint(),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Checkpoint::new(self.shape.clone(), states)?)
    }

    fn fault(&mut self, error: &ProcessorError) {
        for sink in &mut self.sinks {
            sink.fault(error);
        }
    }

    fn stats(&self) -> ContainerStats {
        let mut stats = ContainerStats {
            output_events: self.output_events,
            ..ContainerStats::default()
        };
        for node in &self.nodes {
            if let RuntimeNode::Input(ingress) = node {
                let counters = ingress.counters();
                stats.events_ingested += counters.received;
                stats.events_admitted += counters.admitted;
                stats.events_dropped += counters.dropped;
                stats.events_adjusted += counters.adjusted;
                stats.punctuations += counters.punctuations;
            }
        }
        stats
    }
}

/// A temporal query and its execution state
pub struct QueryContainer {
    id: Uuid,
    config: ProcessorConfig,
    plan: Arc<Mutex<Plan>>,
    state: ContainerState,
    /// Registered outputs, handed to the runtime on restore
    sinks: Vec<OutputSink>,
    diagnostics: BTreeMap<NodeId, Vec<mpsc::UnboundedSender<DisorderDiagnostic>>>,
    runtime: Option<Runtime>,
    checkpoints: u64,
}

impl fmt::Debug for QueryContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContainer")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("outputs", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl QueryContainer {
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        debug!(container = %id, mode = ?config.execution_mode(), "created query container");
        Ok(Self {
            id,
            config,
            plan: Arc::new(Mutex::new(Plan::new(id))),
            state: ContainerState::Unbuilt,
            sinks: Vec::new(),
            diagnostics: BTreeMap::new(),
            runtime: None,
            checkpoints: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn stats(&self) -> ContainerStats {
        let mut stats = self.runtime.as_ref().map(Runtime::stats).unwrap_or_default();
        stats.checkpoints = self.checkpoints;
        stats
    }

    fn not_running(&self) -> ProcessorError {
        StreamProcessingError::NotRunning {
            state: self.state.to_string(),
        }
        .into()
    }

    fn ensure_configurable(&self) -> Result<()> {
        if self.state == ContainerState::Disposed {
            return Err(self.not_running());
        }
        self.plan.lock().ensure_mutable()
    }

    fn ensure_owned(&self, stream: &Stream) -> Result<()> {
        if stream.container() != self.id {
            return Err(StreamProcessingError::ForeignHandle.into());
        }
        Ok(())
    }

    fn running_runtime(&mut self) -> Result<&mut Runtime> {
        if self.state != ContainerState::Running {
            return Err(self.not_running());
        }
        let state = self.state.to_string();
        self.runtime
            .as_mut()
            .ok_or_else(|| StreamProcessingError::NotRunning { state }.into())
    }

    /// Declare an input of the query
    pub fn register_input(&mut self, name: impl Into<String>, policy: IngressPolicy) -> Result<InputHandle> {
        if self.state == ContainerState::Disposed {
            return Err(self.not_running());
        }
        let name = name.into();
        let node = self.plan.lock().add_input(name.clone(), policy)?;
        debug!(container = %self.id, input = %name, node, "registered input");
        Ok(InputHandle {
            name,
            stream: Stream::new(self.plan.clone(), self.id, node),
        })
    }

    /// Observe a stream of the query
    pub fn register_output(&mut self, stream: &Stream) -> Result<OutputHandle> {
        self.ensure_owned(stream)?;
        self.ensure_configurable()?;
        let node = stream.node();
        let ancestors = self.plan.lock().ancestor_inputs(node);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.sinks.push(OutputSink::new(node, sender, ancestors));
        debug!(container = %self.id, node, "registered output");
        Ok(OutputHandle::new(node, receiver))
    }

    /// Receive the disorder decisions of an input
    pub fn subscribe_diagnostics(&mut self, input: &InputHandle) -> Result<DiagnosticReceiver> {
        self.ensure_owned(&input.stream)?;
        self.ensure_configurable()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.diagnostics.entry(input.node()).or_default().push(sender);
        Ok(DiagnosticReceiver::new(receiver))
    }

    /// Instantiate the query, fresh or from a checkpoint blob
    pub fn restore(&mut self, checkpoint: Option<&[u8]>) -> Result<()> {
        match self.state {
            ContainerState::Unbuilt => {}
            ContainerState::RestoreFailed if checkpoint.is_none() => {}
            ContainerState::RestoreFailed => {
                return Err(StreamProcessingError::RestoreFailed {
                    reason: "a checkpoint was already rejected; only a fresh restore is allowed".to_string(),
                }
                .into())
            }
            ContainerState::Disposed => return Err(self.not_running()),
            _ => return Err(StreamProcessingError::AlreadyRestored.into()),
        }

        let mut runtime = {
            let plan = self.plan.lock();
            Runtime::build(&plan, &self.config, self.sinks.clone())?
        };
        if let Some(bytes) = checkpoint {
            if let Err(err) = runtime.apply_checkpoint(bytes) {
                warn!(container = %self.id, error = %err, "checkpoint rejected");
                self.state = ContainerState::RestoreFailed;
                return Err(err);
            }
        }

        self.plan.lock().freeze();
        self.sinks.clear();
        self.state = if runtime.all_inputs_completed() {
            ContainerState::Completed
        } else {
            ContainerState::Running
        };
        info!(
            container = %self.id,
            nodes = runtime.nodes.len(),
            from_checkpoint = checkpoint.is_some(),
            "query container running"
        );
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Restore from a checkpoint read to its end from `reader`
    pub fn restore_from(&mut self, mut reader: impl Read) -> Result<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.restore(Some(&bytes))
    }

    fn publish_diagnostics(&self, node: NodeId, diagnostics: Vec<DisorderDiagnostic>) {
        if diagnostics.is_empty() {
            return;
        }
        let Some(subscribers) = self.diagnostics.get(&node) else {
            return;
        };
        for diagnostic in diagnostics {
            for subscriber in subscribers {
                if subscriber.send(diagnostic.clone()).is_err() {
                    trace!(node, "diagnostic receiver dropped");
                }
            }
        }
    }

    fn fault(&mut self, error: ProcessorError) {
        warn!(container = %self.id, error = %error, "query container faulted");
        if let Some(runtime) = self.runtime.as_mut() {
            runtime.fault(&error);
        }
        self.state = ContainerState::Faulted;
    }

    /// Push one event into an input
    ///
    /// Errors raised while processing the event fault the container and are
    /// reported on every output; the call itself then succeeds. Calls on a
    /// container that is not running fail.
    pub fn on_next(&mut self, input: &InputHandle, event: StreamEvent) -> Result<()> {
        self.ensure_owned(&input.stream)?;
        let node = input.node();
        let mut diagnostics = Vec::new();
        let result = self.running_runtime()?.ingest(node, event, &mut diagnostics);
        self.publish_diagnostics(node, diagnostics);
        if let Err(error) = result {
            self.fault(error);
        }
        Ok(())
    }

    /// Push events into an input, stopping early if the container faults
    pub fn on_next_batch(&mut self, input: &InputHandle, events: impl IntoIterator<Item = StreamEvent>) -> Result<()> {
        for event in events {
            self.on_next(input, event)?;
            if self.state != ContainerState::Running {
                break;
            }
        }
        Ok(())
    }

    /// Complete an input
    pub fn on_completed(&mut self, input: &InputHandle) -> Result<()> {
        self.ensure_owned(&input.stream)?;
        let runtime = self.running_runtime()?;
        match runtime.complete_input(input.node()) {
            Ok(()) => {
                if runtime.all_inputs_completed() {
                    debug!(container = %self.id, "all inputs completed");
                    self.state = ContainerState::Completed;
                }
            }
            Err(error) => self.fault(error),
        }
        Ok(())
    }

    /// Report a failure of an input's source; faults the container
    pub fn on_error(&mut self, input: &InputHandle, reason: impl Into<String>) -> Result<()> {
        self.ensure_owned(&input.stream)?;
        self.running_runtime()?;
        self.fault(
            IngressError::SourceFaulted {
                input: input.name.clone(),
                reason: reason.into(),
            }
            .into(),
        );
        Ok(())
    }

    /// Snapshot the state of every node
    ///
    /// Must only be called while no events are being pushed. Buffered input
    /// events are flushed through the graph first.
    pub fn checkpoint(&mut self) -> Result<Vec<u8>> {
        if !matches!(self.state, ContainerState::Running | ContainerState::Completed) {
            return Err(self.not_running());
        }
        let Some(runtime) = self.runtime.as_mut() else {
            return Err(self.not_running());
        };
        if let Err(error) = runtime.flush_inputs() {
            self.fault(error.clone());
            return Err(error);
        }
        let checkpoint = runtime.checkpoint()?;
        let bytes = checkpoint.to_bytes()?;
        self.checkpoints += 1;
        info!(
            container = %self.id,
            checkpoint_id = %checkpoint.metadata.checkpoint_id,
            bytes = bytes.len(),
            "checkpoint taken"
        );
        Ok(bytes)
    }

    pub fn checkpoint_to(&mut self, mut writer: impl Write) -> Result<()> {
        let bytes = self.checkpoint()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Release every operator and close every output channel
    pub fn dispose(&mut self) {
        if self.state != ContainerState::Disposed {
            debug!(container = %self.id, "disposing query container");
        }
        self.runtime = None;
        self.sinks.clear();
        self.diagnostics.clear();
        self.state = ContainerState::Disposed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, KeySelector};
    use crate::ingress::DisorderPolicy;
    use crate::pipeline::OutputMessage;
    use tempo_types::{canonical_data, row, INFINITY};

    fn container() -> QueryContainer {
        QueryContainer::new(ProcessorConfig::default()).unwrap()
    }

    #[test]
    fn test_passthrough_and_completion() {
        let mut c = container();
        let input = c.register_input("in", IngressPolicy::default()).unwrap();
        let mut out = c.register_output(&input.stream()).unwrap();
        c.restore(None).unwrap();
        assert_eq!(c.state(), ContainerState::Running);

        c.on_next(&input, StreamEvent::point(1, row![1])).unwrap();
        c.on_next(&input, StreamEvent::punctuation(5)).unwrap();
        c.on_completed(&input).unwrap();
        assert_eq!(c.state(), ContainerState::Completed);

        assert_eq!(
            out.drain(),
            vec![
                OutputMessage::Event(StreamEvent::point(1, row![1])),
                OutputMessage::Event(StreamEvent::punctuation(5)),
                OutputMessage::Completed,
            ]
        );
        assert!(c.on_next(&input, StreamEvent::point(9, row![1])).is_err());
    }

    #[test]
    fn test_restore_twice_rejected() {
        let mut c = container();
        c.register_input("in", IngressPolicy::default()).unwrap();
        c.restore(None).unwrap();
        assert_eq!(
            c.restore(None).unwrap_err(),
            ProcessorError::from(StreamProcessingError::AlreadyRestored)
        );
    }

    #[test]
    fn test_registration_after_restore_rejected() {
        let mut c = container();
        let input = c.register_input("in", IngressPolicy::default()).unwrap();
        c.restore(None).unwrap();
        assert!(c.register_output(&input.stream()).is_err());
        assert!(input.stream().filter(Expr::lit(true)).is_err());
        assert!(c.register_input("other", IngressPolicy::default()).is_err());
    }

    #[test]
    fn test_foreign_handles_rejected() {
        let mut a = container();
        let mut b = container();
        let input_a = a.register_input("in", IngressPolicy::default()).unwrap();
        let input_b = b.register_input("in", IngressPolicy::default()).unwrap();
        assert_eq!(
            b.register_output(&input_a.stream()).unwrap_err(),
            ProcessorError::from(StreamProcessingError::ForeignHandle)
        );
        assert!(input_a.stream().union(&input_b.stream()).is_err());
    }

    #[test]
    fn test_fault_reaches_every_output() {
        let mut c = container();
        let input = c.register_input("in", IngressPolicy::default()).unwrap();
        let mut first = c.register_output(&input.stream()).unwrap();
        let mut second = c
            .register_output(&input.stream().filter(Expr::field(0).gt(Expr::lit(0))).unwrap())
            .unwrap();
        c.restore(None).unwrap();

        c.on_next(&input, StreamEvent::point(10, row![1])).unwrap();
        // Late event under Throw(0)
        c.on_next(&input, StreamEvent::point(5, row![1])).unwrap();
        assert_eq!(c.state(), ContainerState::Faulted);

        for out in [&mut first, &mut second] {
            let messages = out.drain();
            assert!(matches!(
                messages.last(),
                Some(OutputMessage::Faulted(ProcessorError::Ingress(IngressError::OutOfOrder { .. })))
            ));
        }
        assert!(c.on_next(&input, StreamEvent::point(20, row![1])).is_err());
    }

    #[test]
    fn test_on_error_faults() {
        let mut c = container();
        let input = c.register_input("in", IngressPolicy::default()).unwrap();
        let mut out = c.register_output(&input.stream()).unwrap();
        c.restore(None).unwrap();
        c.on_error(&input, "connection reset").unwrap();
        assert_eq!(c.state(), ContainerState::Faulted);
        assert!(matches!(
            out.drain().as_slice(),
            [OutputMessage::Faulted(ProcessorError::Ingress(IngressError::SourceFaulted { .. }))]
        ));
    }

    #[test]
    fn test_diagnostics_delivered() {
        let mut c = container();
        let input = c
            .register_input("in", IngressPolicy::default().with_disorder(DisorderPolicy::drop(0)))
            .unwrap();
        let mut diagnostics = c.subscribe_diagnostics(&input).unwrap();
        c.restore(None).unwrap();
        c.on_next(&input, StreamEvent::point(10, row![1])).unwrap();
        c.on_next(&input, StreamEvent::point(3, row![2])).unwrap();

        let received = diagnostics.drain();
        assert_eq!(received.len(), 1);
        assert!(!received[0].adjusted);
        assert_eq!(c.stats().events_dropped, 1);
        assert_eq!(c.stats().events_ingested, 2);
    }

    #[test]
    fn test_checkpoint_restore_continues() {
        let build = |c: &mut QueryContainer| {
            let input = c.register_input("in", IngressPolicy::default()).unwrap();
            let sums = input
                .stream()
                .snapshot_aggregate(KeySelector::none(), crate::aggregation::Aggregate::count())
                .unwrap();
            let out = c.register_output(&sums).unwrap();
            (input, out)
        };

        let mut first = container();
        let (input, mut out) = build(&mut first);
        first.restore(None).unwrap();
        first.on_next(&input, StreamEvent::interval(0, 10, row![])).unwrap();
        let blob = first.checkpoint().unwrap();
        assert_eq!(first.stats().checkpoints, 1);
        first.on_next(&input, StreamEvent::interval(5, 15, row![])).unwrap();
        first.on_completed(&input).unwrap();
        let expected = canonical_data(out.drain_data());

        let mut second = container();
        let (input, mut out) = build(&mut second);
        second.restore(Some(&blob)).unwrap();
        second.on_next(&input, StreamEvent::interval(5, 15, row![])).unwrap();
        second.on_completed(&input).unwrap();
        assert_eq!(canonical_data(out.drain_data()), expected);
        assert_eq!(expected.len(), 3);
    }

    #[test]
    fn test_shape_mismatch_sets_restore_failed() {
        let mut first = container();
        first.register_input("in", IngressPolicy::default()).unwrap();
        first.restore(None).unwrap();
        let blob = first.checkpoint().unwrap();

        let mut second = container();
        let input = second.register_input("in", IngressPolicy::default()).unwrap();
        input.stream().filter(Expr::lit(true)).unwrap();
        let err = second.restore(Some(&blob)).unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::StreamProcessing(StreamProcessingError::ShapeMismatch { .. })
        ));
        assert_eq!(second.state(), ContainerState::RestoreFailed);
        assert!(second.restore(Some(&blob)).is_err());
        second.restore(None).unwrap();
        assert_eq!(second.state(), ContainerState::Running);
    }

    #[test]
    fn test_garbage_blob_rejected() {
        let mut c = container();
        c.register_input("in", IngressPolicy::default()).unwrap();
        assert!(matches!(
            c.restore(Some(b"garbage")).unwrap_err(),
            ProcessorError::State(_)
        ));
        assert_eq!(c.state(), ContainerState::RestoreFailed);
    }

    #[test]
    fn test_columnar_unsupported_when_fallback_disabled() {
        let config = ProcessorConfig::default().with_dont_fall_back_to_row_based_execution(true);
        let mut c = QueryContainer::new(config).unwrap();
        let input = c.register_input("in", IngressPolicy::default()).unwrap();
        input.stream().select_many(|r| vec![r.clone()]).unwrap();
        assert!(matches!(
            c.restore(None).unwrap_err(),
            ProcessorError::StreamProcessing(StreamProcessingError::ColumnarUnsupported { .. })
        ));
        assert_eq!(c.state(), ContainerState::Unbuilt);
    }

    #[test]
    fn test_empty_plan_is_invalid() {
        let mut c = container();
        assert!(matches!(
            c.restore(None).unwrap_err(),
            ProcessorError::StreamProcessing(StreamProcessingError::InvalidPlan { .. })
        ));
    }

    #[test]
    fn test_dispose_closes_outputs() {
        let mut c = container();
        let input = c.register_input("in", IngressPolicy::default()).unwrap();
        let mut out = c.register_output(&input.stream()).unwrap();
        c.restore(None).unwrap();
        c.dispose();
        assert_eq!(c.state(), ContainerState::Disposed);
        assert!(out.drain().is_empty());
        assert!(c.on_next(&input, StreamEvent::point(1, row![])).is_err());
        assert!(c.checkpoint().is_err());
    }

    #[test]
    fn test_punctuation_infinity_not_forwarded() {
        let mut c = container();
        let input = c.register_input("in", IngressPolicy::default()).unwrap();
        let mut out = c.register_output(&input.stream()).unwrap();
        c.restore(None).unwrap();
        c.on_next(&input, StreamEvent::punctuation(INFINITY)).unwrap();
        assert!(out.drain().is_empty());
    }
}
