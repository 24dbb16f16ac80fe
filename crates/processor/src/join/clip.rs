//! Clip event duration

use super::{LEFT, RIGHT};
use crate::error::{Result, StateResult};
use crate::expr::KeySelector;
use crate::pipeline::{Operator, OperatorContext, OperatorKind};
use crate::state::{decode_state, encode_state};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tempo_types::{Row, StreamEvent, MIN_TIME};
use tracing::trace;

/// A left interval waiting for its clip point, with the end it would get
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingLeft {
    end: i64,
    event: StreamEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClipState {
    /// Pending left intervals per key, by `(sync time, id)`
    lefts: BTreeMap<Row, BTreeMap<(i64, u64), PendingLeft>>,
    /// Pending left intervals by `(end, id)`, pointing back to key and sync time
    by_end: BTreeMap<(i64, u64), (Row, i64)>,
    /// Right start times per key
    right_starts: BTreeMap<Row, BTreeSet<i64>>,
    next_id: u64,
    inputs: [i64; 2],
    output: i64,
}

/// Cuts every left interval at the first same-key right start strictly after
/// the left start
///
/// Exactly one output is produced per left interval. Each pending interval
/// carries the end it would get from the right starts seen so far; it is
/// emitted once the right punctuation reaches that end, since no right start
/// arriving later can fall before it.
#[derive(Debug)]
pub struct ClipOperator {
    keys: [KeySelector; 2],
    state: ClipState,
}

impl ClipOperator {
    pub fn new(left_key: KeySelector, right_key: KeySelector) -> Self {
        Self {
            keys: [left_key, right_key],
            state: ClipState {
                lefts: BTreeMap::new(),
                by_end: BTreeMap::new(),
                right_starts: BTreeMap::new(),
                next_id: 0,
                inputs: [MIN_TIME; 2],
                output: MIN_TIME,
            },
        }
    }

    fn first_right_start(starts: Option<&BTreeSet<i64>>, after: i64) -> Option<i64> {
        starts?
            .range((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .copied()
    }

    fn insert_left(&mut self, key: Row, event: StreamEvent) {
        let sync = event.sync_time;
        let end = Self::first_right_start(self.state.right_starts.get(&key), sync)
            .map_or(event.other_time, |r| r.min(event.other_time));
        let id = self.state.next_id;
        self.state.next_id += 1;
        self.state.by_end.insert((end, id), (key.clone(), sync));
        self.state
            .lefts
            .entry(key)
            .or_default()
            .insert((sync, id), PendingLeft { end, event });
    }

    /// Record a right start and pull in the ends of the left intervals it
    /// now clips first
    fn insert_right(&mut self, key: Row, start: i64) {
        let starts = self.state.right_starts.entry(key.clone()).or_default();
        if !starts.insert(start) {
            return;
        }
        // Lefts starting before the previous right start are clipped by it
        let previous = starts.range(..start).next_back().copied().unwrap_or(MIN_TIME);
        let Some(lefts) = self.state.lefts.get_mut(&key) else {
            return;
        };
        for ((sync, id), pending) in lefts.range_mut((previous, 0)..(start, 0)) {
            if pending.end > start {
                self.state.by_end.remove(&(pending.end, *id));
                pending.end = start;
                self.state.by_end.insert((start, *id), (key.clone(), *sync));
            }
        }
    }

    fn progress(&mut self, ctx: &mut OperatorContext) {
        let right_progress = self.state.inputs[RIGHT];
        let mut clipped = Vec::new();
        while let Some(entry) = self.state.by_end.first_entry() {
            let (end, id) = *entry.key();
            if end > right_progress {
                break;
            }
            let (key, sync) = entry.remove();
            let Some(lefts) = self.state.lefts.get_mut(&key) else {
                continue;
            };
            if let Some(PendingLeft { end, event }) = lefts.remove(&(sync, id)) {
                if end < event.other_time {
                    clipped.push(StreamEvent::interval(sync, end, event.payload));
                } else {
                    clipped.push(event);
                }
            }
            if lefts.is_empty() {
                self.state.lefts.remove(&key);
            }
        }
        if !clipped.is_empty() {
            trace!(clipped = clipped.len(), "clip resolved");
        }
        ctx.emit_events(clipped);

        let low = self
            .state
            .lefts
            .values()
            .filter_map(|lefts| lefts.keys().next().map(|(sync, _)| *sync))
            .min()
            .map_or(self.state.inputs[LEFT], |t| t.min(self.state.inputs[LEFT]));
        self.state.right_starts.retain(|_, starts| {
            *starts = starts.split_off(&low.saturating_add(1));
            !starts.is_empty()
        });
        ctx.advance_punctuation(&mut self.state.output, low);
    }
}

impl Operator for ClipOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Clip
    }

    fn descriptor(&self) -> String {
        format!("clip {} = {}", self.keys[LEFT], self.keys[RIGHT])
    }

    fn on_rows(&mut self, port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()> {
        let side = port.min(RIGHT);
        for event in events {
            let key = self.keys[side].key_of(&event)?;
            if side == LEFT {
                self.insert_left(key, event);
            } else {
                self.insert_right(key, event.sync_time);
            }
        }
        self.progress(ctx);
        Ok(())
    }

    fn on_punctuation(&mut self, port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        let slot = &mut self.state.inputs[port.min(RIGHT)];
        *slot = (*slot).max(time);
        self.progress(ctx);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        encode_state("clip", &self.state)
    }

    fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        self.state = decode_state("clip", state)?;
        Ok(())
    }
}
