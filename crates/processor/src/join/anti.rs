//! Left anti-semi-join (`where_not_exists`)

use super::{IntervalIndex, LEFT, RIGHT};
use crate::error::{Result, StateResult};
use crate::expr::KeySelector;
use crate::pipeline::{Operator, OperatorContext, OperatorKind};
use crate::state::{decode_state, encode_state};
use serde::{Deserialize, Serialize};
use tempo_types::{StreamEvent, MIN_TIME};
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AntiJoinState {
    /// Left intervals whose span may still be covered by future right input
    pending: IntervalIndex,
    right: IntervalIndex,
    inputs: [i64; 2],
    output: i64,
}

/// Emits the parts of each left interval not covered by any same-key right
/// interval
///
/// A left interval is resolved once the right punctuation reaches its end;
/// its uncovered pieces are emitted together at that point.
#[derive(Debug)]
pub struct AntiJoinOperator {
    keys: [KeySelector; 2],
    state: AntiJoinState,
}

impl AntiJoinOperator {
    pub fn new(left_key: KeySelector, right_key: KeySelector) -> Self {
        Self {
            keys: [left_key, right_key],
            state: AntiJoinState {
                pending: IntervalIndex::default(),
                right: IntervalIndex::default(),
                inputs: [MIN_TIME; 2],
                output: MIN_TIME,
            },
        }
    }

    /// Resolve left intervals, discard useless right intervals and advance
    /// the output punctuation
    fn progress(&mut self, ctx: &mut OperatorContext) {
        let right_progress = self.state.inputs[RIGHT];
        let resolved = self
            .state
            .pending
            .take_where(|e| e.other_time <= right_progress);

        let mut survivors = Vec::new();
        for (key, left) in resolved {
            uncovered(&left, self.state.right.get(&key), &mut survivors);
        }
        if !survivors.is_empty() {
            trace!(survivors = survivors.len(), "anti-join resolved");
        }
        ctx.emit_events(survivors);

        let low = self
            .state
            .pending
            .earliest_sync()
            .map_or(self.state.inputs[LEFT], |t| t.min(self.state.inputs[LEFT]));
        self.state.right.expire(low);
        ctx.advance_punctuation(&mut self.state.output, low);
    }
}

/// Push the pieces of `left` not covered by any of `rights`
fn uncovered(left: &StreamEvent, rights: &[StreamEvent], out: &mut Vec<StreamEvent>) {
    let mut covering: Vec<(i64, i64)> = rights
        .iter()
        .filter(|r| r.overlaps(left))
        .map(|r| (r.sync_time, r.other_time))
        .collect();
    covering.sort_unstable();

    let end = left.other_time;
    let mut cursor = left.sync_time;
    for (start, stop) in covering {
        if cursor >= end {
            break;
        }
        if start > cursor {
            out.push(StreamEvent::interval(cursor, start.min(end), left.payload.clone()));
        }
        cursor = cursor.max(stop);
    }
    if cursor < end {
        out.push(StreamEvent::interval(cursor, end, left.payload.clone()));
    }
}

impl Operator for AntiJoinOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::AntiJoin
    }

    fn descriptor(&self) -> String {
        format!("not exists {} = {}", self.keys[LEFT], self.keys[RIGHT])
    }

    fn on_rows(&mut self, port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()> {
        let side = port.min(RIGHT);
        for event in events {
            let key = self.keys[side].key_of(&event)?;
            if side == LEFT {
                self.state.pending.insert(key, event);
            } else {
                self.state.right.insert(key, event);
            }
        }
        if side == LEFT {
            self.progress(ctx);
        }
        Ok(())
    }

    fn on_punctuation(&mut self, port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        let slot = &mut self.state.inputs[port.min(RIGHT)];
        *slot = (*slot).max(time);
        self.progress(ctx);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        encode_state("anti_join", &self.state)
    }

    fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        self.state = decode_state("anti_join", state)?;
        Ok(())
    }
}
