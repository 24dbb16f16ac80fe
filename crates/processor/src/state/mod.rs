//! Operator state serialization and checkpoint blobs
//!
//! Operators serialize their own state with [`encode_state`] and
//! [`decode_state`]. The container assembles the per-node states, together
//! with the plan shape they were taken from, into a [`Checkpoint`].

pub mod checkpoint;

pub use checkpoint::{Checkpoint, CheckpointMetadata, NodeShape, PlanShape, CHECKPOINT_VERSION};

use crate::error::{StateError, StateResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize operator state
pub fn encode_state<T: Serialize>(operator: &str, state: &T) -> StateResult<Vec<u8>> {
    bincode::serialize(state).map_err(|e| StateError::SerializationFailed {
        operator: operator.to_string(),
        reason: e.to_string(),
    })
}

/// Deserialize operator state
pub fn decode_state<T: DeserializeOwned>(operator: &str, bytes: &[u8]) -> StateResult<T> {
    bincode::deserialize(bytes).map_err(|e| StateError::DeserializationFailed {
        operator: operator.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_state_round_trip() {
        let mut state = BTreeMap::new();
        state.insert(3i64, vec!["a".to_string()]);
        let bytes = encode_state("test", &state).unwrap();
        let back: BTreeMap<i64, Vec<String>> = decode_state("test", &bytes).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_decode_garbage_names_operator() {
        let err = decode_state::<Vec<String>>("window", &[0xff, 0xff]).unwrap_err();
        match err {
            StateError::DeserializationFailed { operator, .. } => assert_eq!(operator, "window"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
