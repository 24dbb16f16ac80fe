//! Checkpoint blob format
//!
//! A checkpoint is a self-describing byte sequence:
//!
//! 1. an envelope carrying the magic bytes and the format version, so that
//!    blobs from other formats are rejected before their body is decoded;
//! 2. a body with the metadata (id, creation time, SHA-256 checksum), the
//!    shape of the plan the states were taken from, and one opaque state per
//!    plan node, in plan order.
//!
//! Restoring validates, in order: envelope decoding, version, checksum, and
//! shape. Only then are node states handed to their operators.

use crate::error::{StateError, StateResult};
use crate::pipeline::OperatorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const CHECKPOINT_MAGIC: [u8; 4] = *b"TMPO";

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Position and identity of one plan node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeShape {
    pub index: usize,
    pub kind: OperatorKind,
    pub descriptor: String,
    pub inputs: Vec<usize>,
    pub shards: usize,
}

impl fmt::Display for NodeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{}] inputs {:?}",
            self.index, self.kind, self.descriptor, self.inputs
        )?;
        if self.shards > 1 {
            write!(f, " x{}", self.shards)?;
        }
        Ok(())
    }
}

/// Shape signature of a whole plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanShape {
    pub nodes: Vec<NodeShape>,
}

impl PlanShape {
    /// Describe the first difference between two shapes, if any
    pub fn mismatch(&self, live: &PlanShape) -> Option<String> {
        if self.nodes.len() != live.nodes.len() {
            return Some(format!(
                "checkpoint has {} node(s), plan has {}",
                self.nodes.len(),
                live.nodes.len()
            ));
        }
        self.nodes
            .iter()
            .zip(&live.nodes)
            .find(|(recorded, current)| recorded != current)
            .map(|(recorded, current)| format!("checkpoint node {} does not match plan node {}", recorded, current))
    }
}

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Unique checkpoint identifier
    pub checkpoint_id: Uuid,
    /// When the checkpoint was created
    pub created_at: DateTime<Utc>,
    /// Checksum of shape and states (SHA-256, hex)
    pub checksum: String,
    /// Total size of node states in bytes
    pub size_bytes: u64,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    magic: [u8; 4],
    version: u32,
    body: Vec<u8>,
}

/// A snapshot of every node state of a running container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub shape: PlanShape,
    pub states: Vec<Vec<u8>>,
}

impl Checkpoint {
    /// Create a new checkpoint
    pub fn new(shape: PlanShape, states: Vec<Vec<u8>>) -> StateResult<Self> {
        let checksum = Self::calculate_checksum(&shape, &states)?;
        let size_bytes = states.iter().map(|s| s.len() as u64).sum();
        Ok(Self {
            metadata: CheckpointMetadata {
                checkpoint_id: Uuid::new_v4(),
                created_at: Utc::now(),
                checksum,
                size_bytes,
            },
            shape,
            states,
        })
    }

    /// Calculate the SHA-256 checksum of shape and states
    fn calculate_checksum(shape: &PlanShape, states: &[Vec<u8>]) -> StateResult<String> {
        let shape_bytes = bincode::serialize(shape).map_err(|e| StateError::SerializationFailed {
            operator: "plan shape".to_string(),
            reason: e.to_string(),
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&shape_bytes);
        for state in states {
            hasher.update((state.len() as u64).to_le_bytes());
            hasher.update(state);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Validate the checkpoint's integrity
    pub fn validate(&self) -> StateResult<()> {
        let calculated = Self::calculate_checksum(&self.shape, &self.states)?;
        if calculated != self.metadata.checksum {
            return Err(StateError::ChecksumMismatch {
                expected: self.metadata.checksum.clone(),
                actual: calculated,
            });
        }
        if self.states.len() != self.shape.nodes.len() {
            return Err(StateError::InvalidBlob {
                reason: format!(
                    "{} state(s) recorded for {} node(s)",
                    self.states.len(),
                    self.shape.nodes.len()
                ),
            });
        }
        Ok(())
    }

    /// Encode into the opaque blob format
    pub fn to_bytes(&self) -> StateResult<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| StateError::SerializationFailed {
            operator: "checkpoint".to_string(),
            reason: e.to_string(),
        })?;
        let envelope = Envelope {
            magic: CHECKPOINT_MAGIC,
            version: CHECKPOINT_VERSION,
            body,
        };
        bincode::serialize(&envelope).map_err(|e| StateError::SerializationFailed {
            operator: "checkpoint".to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode and validate a blob
    pub fn from_bytes(bytes: &[u8]) -> StateResult<Self> {
        let envelope: Envelope = bincode::deserialize(bytes).map_err(|e| StateError::InvalidBlob {
            reason: e.to_string(),
        })?;
        if envelope.magic != CHECKPOINT_MAGIC {
            return Err(StateError::InvalidBlob {
                reason: "missing checkpoint magic".to_string(),
            });
        }
        if envelope.version != CHECKPOINT_VERSION {
            return Err(StateError::UnsupportedVersion {
                version: envelope.version,
            });
        }
        let checkpoint: Checkpoint =
            bincode::deserialize(&envelope.body).map_err(|e| StateError::InvalidBlob {
                reason: e.to_string(),
            })?;
        checkpoint.validate()?;
        debug!(
            checkpoint_id = %checkpoint.metadata.checkpoint_id,
            nodes = checkpoint.shape.nodes.len(),
            "decoded checkpoint"
        );
        Ok(checkpoint)
    }

    /// Save checkpoint to a file
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> StateResult<()> {
        let path = path.as_ref();
        info!(checkpoint_id = %self.metadata.checkpoint_id, path = ?path, "saving checkpoint");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::InvalidBlob {
                    reason: format!("failed to create directory: {}", e),
                })?;
        }

        let bytes = self.to_bytes()?;
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| StateError::InvalidBlob {
                reason: format!("failed to write checkpoint: {}", e),
            })
    }

    /// Load checkpoint from a file
    pub async fn load<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StateError::InvalidBlob {
                reason: format!("failed to read checkpoint: {}", e),
            })?;
        Self::from_bytes(&bytes)
    }
}
