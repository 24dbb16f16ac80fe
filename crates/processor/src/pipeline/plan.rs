//! Logical query plan
//!
//! The plan is an arena of nodes addressed by index. Indexes are assigned in
//! creation order, so every node's inputs precede it and the arena order is a
//! topological order of the DAG. Checkpoints record node states in that order.

use super::operator::OperatorFactory;
use crate::error::{Result, StreamProcessingError};
use crate::expr::KeySelector;
use crate::ingress::IngressPolicy;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Index of a node in the plan arena
pub type NodeId = usize;

pub(crate) enum NodeSource {
    Input {
        name: String,
        policy: IngressPolicy,
    },
    Operator {
        factory: OperatorFactory,
        /// Key per input port, when the operator can run sharded by key
        shard_keys: Option<Vec<KeySelector>>,
    },
}

pub(crate) struct PlanNode {
    pub inputs: Vec<NodeId>,
    pub source: NodeSource,
}

pub(crate) struct Plan {
    id: Uuid,
    nodes: Vec<PlanNode>,
    frozen: bool,
}

impl Plan {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            frozen: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn ensure_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(StreamProcessingError::PlanFrozen.into());
        }
        Ok(())
    }

    pub fn add_input(&mut self, name: String, policy: IngressPolicy) -> Result<NodeId> {
        self.ensure_mutable()?;
        let duplicate = self.nodes.iter().any(|node| {
            matches!(&node.source, NodeSource::Input { name: existing, .. } if *existing == name)
        });
        if duplicate {
            return Err(StreamProcessingError::InvalidPlan {
                reason: format!("input '{}' is already registered", name),
            }
            .into());
        }
        self.nodes.push(PlanNode {
            inputs: Vec::new(),
            source: NodeSource::Input { name, policy },
        });
        Ok(self.nodes.len() - 1)
    }

    pub fn add_operator(
        &mut self,
        inputs: Vec<NodeId>,
        factory: OperatorFactory,
        shard_keys: Option<Vec<KeySelector>>,
    ) -> Result<NodeId> {
        self.ensure_mutable()?;
        if let Some(bad) = inputs.iter().find(|i| **i >= self.nodes.len()) {
            return Err(StreamProcessingError::InvalidPlan {
                reason: format!("node {} does not exist", bad),
            }
            .into());
        }
        self.nodes.push(PlanNode {
            inputs,
            source: NodeSource::Operator {
                factory,
                shard_keys,
            },
        });
        Ok(self.nodes.len() - 1)
    }

    /// Input nodes `node` transitively depends on
    pub fn ancestor_inputs(&self, node: NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let mut stack = vec![node];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(plan_node) = self.nodes.get(current) else {
                continue;
            };
            match plan_node.source {
                NodeSource::Input { .. } => {
                    found.insert(current);
                }
                NodeSource::Operator { .. } => stack.extend(plan_node.inputs.iter().copied()),
            }
        }
        found
    }

    pub fn input_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.source, NodeSource::Input { .. }))
            .count()
    }
}
