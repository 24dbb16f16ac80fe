//! Fluent query composition
//!
//! A [`Stream`] is a handle to a node of a container's plan. Composition
//! methods add a node and return a handle to it; they fail once the
//! container has been restored, since the plan is then frozen.
//!
//! # Example
//!
//! ```rust
//! use tempo_processor::prelude::*;
//!
//! # fn main() -> tempo_processor::Result<()> {
//! let mut container = QueryContainer::new(ProcessorConfig::default())?;
//! let input = container.register_input("readings", IngressPolicy::default())?;
//! let totals = input
//!     .stream()
//!     .filter(Expr::field(0).gt(Expr::lit(0)))?
//!     .window_aggregate(
//!         WindowSpec::tumbling(10),
//!         KeySelector::fields(&[1]),
//!         Aggregate::sum(Expr::field(0)),
//!     )?;
//! let _output = container.register_output(&totals)?;
//! container.restore(None)?;
//! # Ok(())
//! # }
//! ```

use super::operator::{
    Operator, OperatorFactory, SelectManyOperator, SelectOperator, UnionOperator, WhereOperator,
};
use super::plan::{NodeId, Plan};
use crate::aggregation::{Aggregate, ResultSelector, SnapshotAggregate};
use crate::error::{Result, StreamProcessingError};
use crate::expr::{KeySelector, Predicate, Projection};
use crate::join::{AntiJoinOperator, ClipOperator, EquiJoinOperator, JoinCombiner};
use crate::window::{
    HoppingAssigner, HoppingWindowOperator, SessionWindowOperator, WindowOutput, WindowSpec,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tempo_types::Row;
use uuid::Uuid;

/// Handle to a node of a query plan
#[derive(Clone)]
pub struct Stream {
    plan: Arc<Mutex<Plan>>,
    container: Uuid,
    node: NodeId,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("container", &self.container)
            .field("node", &self.node)
            .finish()
    }
}

fn shard_keys(keys: Vec<KeySelector>) -> Option<Vec<KeySelector>> {
    if keys.iter().all(KeySelector::is_empty) {
        None
    } else {
        Some(keys)
    }
}

impl Stream {
    pub(crate) fn new(plan: Arc<Mutex<Plan>>, container: Uuid, node: NodeId) -> Self {
        Self {
            plan,
            container,
            node,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn container(&self) -> Uuid {
        self.container
    }

    fn ensure_same_container(&self, other: &Stream) -> Result<()> {
        if self.container != other.container {
            return Err(StreamProcessingError::ForeignHandle.into());
        }
        Ok(())
    }

    fn derive(
        &self,
        inputs: Vec<NodeId>,
        factory: OperatorFactory,
        shard_keys: Option<Vec<KeySelector>>,
    ) -> Result<Stream> {
        let node = self.plan.lock().add_operator(inputs, factory, shard_keys)?;
        Ok(Stream::new(self.plan.clone(), self.container, node))
    }

    /// Keep the events satisfying `predicate`
    pub fn filter(&self, predicate: impl Into<Predicate>) -> Result<Stream> {
        let predicate = predicate.into();
        self.derive(
            vec![self.node],
            Arc::new(move || Box::new(WhereOperator::new(predicate.clone())) as Box<dyn Operator>),
            None,
        )
    }

    /// Replace every payload, keeping the intervals
    pub fn select(&self, projection: Projection) -> Result<Stream> {
        self.derive(
            vec![self.node],
            Arc::new(move || Box::new(SelectOperator::new(projection.clone())) as Box<dyn Operator>),
            None,
        )
    }

    /// Replace every payload with zero or more payloads
    pub fn select_many(&self, f: impl Fn(&Row) -> Vec<Row> + Send + Sync + 'static) -> Result<Stream> {
        let f: super::operator::SelectManyFn = Arc::new(f);
        self.derive(
            vec![self.node],
            Arc::new(move || Box::new(SelectManyOperator::new(f.clone())) as Box<dyn Operator>),
            None,
        )
    }

    /// Handles sharing this stream, for feeding one result into several
    /// operators
    pub fn multicast(&self, count: usize) -> Vec<Stream> {
        (0..count).map(|_| self.clone()).collect()
    }

    pub fn union(&self, other: &Stream) -> Result<Stream> {
        self.ensure_same_container(other)?;
        self.derive(
            vec![self.node, other.node],
            Arc::new(|| Box::new(UnionOperator::new()) as Box<dyn Operator>),
            None,
        )
    }

    /// Same-key overlapping pairs, over the intersection of their intervals
    pub fn join(
        &self,
        other: &Stream,
        left_key: KeySelector,
        right_key: KeySelector,
        combiner: JoinCombiner,
    ) -> Result<Stream> {
        self.ensure_same_container(other)?;
        let keys = shard_keys(vec![left_key.clone(), right_key.clone()]);
        self.derive(
            vec![self.node, other.node],
            Arc::new(move || {
                Box::new(EquiJoinOperator::new(
                    left_key.clone(),
                    right_key.clone(),
                    combiner.clone(),
                )) as Box<dyn Operator>
            }),
            keys,
        )
    }

    /// The parts of this stream's intervals during which `other` has no
    /// same-key interval
    pub fn where_not_exists(
        &self,
        other: &Stream,
        left_key: KeySelector,
        right_key: KeySelector,
    ) -> Result<Stream> {
        self.ensure_same_container(other)?;
        let keys = shard_keys(vec![left_key.clone(), right_key.clone()]);
        self.derive(
            vec![self.node, other.node],
            Arc::new(move || {
                Box::new(AntiJoinOperator::new(left_key.clone(), right_key.clone())) as Box<dyn Operator>
            }),
            keys,
        )
    }

    /// Cut each interval at the first same-key start in `other` after it
    /// begins
    pub fn clip_event_duration(
        &self,
        other: &Stream,
        left_key: KeySelector,
        right_key: KeySelector,
    ) -> Result<Stream> {
        self.ensure_same_container(other)?;
        let keys = shard_keys(vec![left_key.clone(), right_key.clone()]);
        self.derive(
            vec![self.node, other.node],
            Arc::new(move || {
                Box::new(ClipOperator::new(left_key.clone(), right_key.clone())) as Box<dyn Operator>
            }),
            keys,
        )
    }

    /// Grouped windowed aggregate with interval results and key-then-value
    /// payloads
    pub fn window_aggregate(&self, spec: WindowSpec, key: KeySelector, aggregate: Aggregate) -> Result<Stream> {
        self.window_aggregate_with(spec, key, aggregate, WindowOutput::default(), ResultSelector::default())
    }

    pub fn window_aggregate_with(
        &self,
        spec: WindowSpec,
        key: KeySelector,
        aggregate: Aggregate,
        output: WindowOutput,
        selector: ResultSelector,
    ) -> Result<Stream> {
        spec.validate()?;
        let keys = shard_keys(vec![key.clone()]);
        let factory: OperatorFactory = match spec {
            WindowSpec::Hopping { size, period } => {
                let assigner = HoppingAssigner::new(size, period)?;
                Arc::new(move || {
                    Box::new(HoppingWindowOperator::new(
                        assigner,
                        key.clone(),
                        aggregate.clone(),
                        selector.clone(),
                        output,
                    )) as Box<dyn Operator>
                })
            }
            WindowSpec::Session {
                timeout,
                max_duration,
            } => Arc::new(move || {
                Box::new(SessionWindowOperator::new(
                    timeout,
                    max_duration,
                    key.clone(),
                    aggregate.clone(),
                    selector.clone(),
                )) as Box<dyn Operator>
            }),
        };
        self.derive(vec![self.node], factory, keys)
    }

    /// Per-key aggregate over every maximal constant region of the raw
    /// intervals
    pub fn group_apply(&self, key: KeySelector, aggregate: Aggregate, selector: ResultSelector) -> Result<Stream> {
        let keys = shard_keys(vec![key.clone()]);
        self.derive(
            vec![self.node],
            Arc::new(move || {
                Box::new(SnapshotAggregate::new(key.clone(), aggregate.clone(), selector.clone()))
                    as Box<dyn Operator>
            }),
            keys,
        )
    }

    pub fn snapshot_aggregate(&self, key: KeySelector, aggregate: Aggregate) -> Result<Stream> {
        self.group_apply(key, aggregate, ResultSelector::default())
    }
}
