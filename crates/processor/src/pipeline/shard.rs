//! Key-sharded execution of keyed operators
//!
//! With `reduce_arity > 1`, a keyed operator is instantiated once per shard.
//! Events are routed to a shard by a SHA-256 digest of their encoded key on
//! the receiving port, so each key is owned by exactly one shard and keeps
//! that shard across builds, which per-shard checkpoints rely on. Shards run concurrently
//! on the rayon pool; their outputs are merged in shard order and the merged
//! punctuation is the minimum over shards.

use super::operator::{Emission, Operator, OperatorContext, OperatorFactory, OperatorKind};
use crate::batch::{ColumnarBatch, EventBatch};
use crate::error::{Result, StateError, StateResult};
use crate::expr::KeySelector;
use crate::state::{decode_state, encode_state};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempo_types::{Row, StreamEvent, MIN_TIME};
use tracing::trace;

#[derive(Debug, Serialize, Deserialize)]
struct ShardedState {
    shards: Vec<Vec<u8>>,
    punctuations: Vec<i64>,
    output: i64,
}

/// A keyed operator split into independent shards
#[derive(Debug)]
pub struct Sharded {
    shards: Vec<Box<dyn Operator>>,
    keys: Vec<KeySelector>,
    punctuations: Vec<i64>,
    output: i64,
}

fn shard_of(key: &Row, shards: usize) -> Result<usize> {
    let encoded = bincode::serialize(key)?;
    let digest = Sha256::digest(&encoded);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Ok((u64::from_be_bytes(prefix) % shards as u64) as usize)
}

impl Sharded {
    pub fn new(factory: &OperatorFactory, keys: Vec<KeySelector>, shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| factory()).collect(),
            keys,
            punctuations: vec![MIN_TIME; shards],
            output: MIN_TIME,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn key_selector(&self, port: usize) -> &KeySelector {
        let index = port.min(self.keys.len().saturating_sub(1));
        &self.keys[index]
    }

    /// Run `f` on every shard in parallel and merge the emissions
    fn run<I, F>(&mut self, inputs: Vec<I>, ctx: &mut OperatorContext, f: F) -> Result<()>
    where
        I: Send,
        F: Fn(&mut Box<dyn Operator>, I, &mut OperatorContext) -> Result<()> + Send + Sync,
    {
        let contexts: Vec<OperatorContext> = (0..self.shards.len()).map(|_| ctx.fork()).collect();
        let outputs = self
            .shards
            .par_iter_mut()
            .zip(inputs.into_par_iter())
            .zip(contexts.into_par_iter())
            .map(|((shard, input), mut shard_ctx)| {
                f(shard, input, &mut shard_ctx)?;
                Ok(shard_ctx.take())
            })
            .collect::<Result<Vec<_>>>()?;

        for (index, emissions) in outputs.into_iter().enumerate() {
            for emission in emissions {
                match emission {
                    Emission::Data(batch) => ctx.emit_batch(batch),
                    Emission::Punctuation(time) => {
                        self.punctuations[index] = self.punctuations[index].max(time);
                    }
                }
            }
        }
        let low = self.punctuations.iter().copied().min().unwrap_or(MIN_TIME);
        ctx.advance_punctuation(&mut self.output, low);
        Ok(())
    }
}

impl Operator for Sharded {
    fn kind(&self) -> OperatorKind {
        self.shards[0].kind()
    }

    fn descriptor(&self) -> String {
        self.shards[0].descriptor()
    }

    fn on_rows(&mut self, port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()> {
        let count = self.shards.len();
        let mut buckets: Vec<Vec<StreamEvent>> = vec![Vec::new(); count];
        let selector = self.key_selector(port);
        for event in events {
            let key = selector.key_of(&event)?;
            buckets[shard_of(&key, count)?].push(event);
        }
        trace!(port, shards = count, "routing rows to shards");
        self.run(buckets, ctx, |shard, bucket, shard_ctx| {
            if bucket.is_empty() {
                Ok(())
            } else {
                shard.on_rows(port, bucket, shard_ctx)
            }
        })
    }

    fn on_columnar(&mut self, port: usize, batch: ColumnarBatch, ctx: &mut OperatorContext) -> Result<()> {
        let count = self.shards.len();
        let mut masks = vec![vec![false; batch.slots()]; count];
        for (slot, key) in self.key_selector(port).keys_of_batch(&batch)? {
            masks[shard_of(&key, count)?][slot] = true;
        }
        let parts: Vec<ColumnarBatch> = masks
            .iter()
            .map(|mask| {
                let mut part = batch.clone();
                part.apply_mask(mask);
                part
            })
            .collect();
        self.run(parts, ctx, |shard, part, shard_ctx| {
            if part.is_empty() {
                Ok(())
            } else if shard.supports_columnar() {
                shard.on_columnar(port, part, shard_ctx)
            } else {
                shard.on_rows(port, EventBatch::Columnar(part).into_events(), shard_ctx)
            }
        })
    }

    fn supports_columnar(&self) -> bool {
        self.shards[0].supports_columnar()
    }

    fn on_punctuation(&mut self, port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        let inputs = vec![time; self.shards.len()];
        self.run(inputs, ctx, |shard, time, shard_ctx| {
            shard.on_punctuation(port, time, shard_ctx)
        })
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        let shards = self
            .shards
            .iter()
            .map(|shard| shard.checkpoint())
            .collect::<StateResult<Vec<_>>>()?;
        encode_state(
            "sharded",
            &ShardedState {
                shards,
                punctuations: self.punctuations.clone(),
                output: self.output,
            },
        )
    }

    fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        let state: ShardedState = decode_state("sharded", state)?;
        if state.shards.len() != self.shards.len() {
            return Err(StateError::DeserializationFailed {
                operator: "sharded".to_string(),
                reason: format!(
                    "checkpoint has {} shard(s), operator has {}",
                    state.shards.len(),
                    self.shards.len()
                ),
            });
        }
        for (shard, bytes) in self.shards.iter_mut().zip(&state.shards) {
            shard.restore(bytes)?;
        }
        self.punctuations = state.punctuations;
        self.output = state.output;
        Ok(())
    }
}
