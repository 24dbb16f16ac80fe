//! Symmetric equi-join

use super::{IntervalIndex, JoinCombiner, LEFT, RIGHT};
use crate::error::{Result, StateResult};
use crate::expr::KeySelector;
use crate::pipeline::{Operator, OperatorContext, OperatorKind};
use crate::state::{decode_state, encode_state};
use serde::{Deserialize, Serialize};
use tempo_types::{StreamEvent, MIN_TIME};
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EquiJoinState {
    sides: [IntervalIndex; 2],
    inputs: [i64; 2],
    output: i64,
}

/// Joins every same-key pair of overlapping left and right intervals
///
/// Both sides are indexed; each arriving interval probes the other side, so
/// every pair is produced exactly once, by whichever event arrives second.
#[derive(Debug)]
pub struct EquiJoinOperator {
    keys: [KeySelector; 2],
    combiner: JoinCombiner,
    state: EquiJoinState,
}

impl EquiJoinOperator {
    pub fn new(left_key: KeySelector, right_key: KeySelector, combiner: JoinCombiner) -> Self {
        Self {
            keys: [left_key, right_key],
            combiner,
            state: EquiJoinState {
                sides: [IntervalIndex::default(), IntervalIndex::default()],
                inputs: [MIN_TIME; 2],
                output: MIN_TIME,
            },
        }
    }
}

impl Operator for EquiJoinOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::EquiJoin
    }

    fn descriptor(&self) -> String {
        format!("{} = {} {:?}", self.keys[LEFT], self.keys[RIGHT], self.combiner)
    }

    fn on_rows(&mut self, port: usize, events: Vec<StreamEvent>, ctx: &mut OperatorContext) -> Result<()> {
        let side = port.min(RIGHT);
        let other = 1 - side;
        let mut joined = Vec::new();
        for event in events {
            let key = self.keys[side].key_of(&event)?;
            for candidate in self.state.sides[other].get(&key) {
                if let Some((start, end)) = event.intersect(candidate) {
                    let payload = if side == LEFT {
                        self.combiner.combine(&event.payload, &candidate.payload)
                    } else {
                        self.combiner.combine(&candidate.payload, &event.payload)
                    };
                    joined.push(StreamEvent::interval(start, end, payload));
                }
            }
            self.state.sides[side].insert(key, event);
        }
        trace!(port, joined = joined.len(), "equi-join probe");
        ctx.emit_events(joined);
        Ok(())
    }

    fn on_punctuation(&mut self, port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        let slot = &mut self.state.inputs[port.min(RIGHT)];
        *slot = (*slot).max(time);
        let low = self.state.inputs[LEFT].min(self.state.inputs[RIGHT]);
        for side in &mut self.state.sides {
            side.expire(low);
        }
        ctx.advance_punctuation(&mut self.state.output, low);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        encode_state("equi_join", &self.state)
    }

    fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        self.state = decode_state("equi_join", state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::pipeline::Emission;
    use tempo_types::{canonical_data, row, Row};

    fn data(emissions: Vec<Emission>) -> Vec<StreamEvent> {
        canonical_data(
            emissions
                .into_iter()
                .filter_map(|e| match e {
                    Emission::Data(batch) => Some(batch.into_events()),
                    Emission::Punctuation(_) => None,
                })
                .flatten(),
        )
    }

    fn join() -> EquiJoinOperator {
        EquiJoinOperator::new(
            KeySelector::fields(&[0]),
            KeySelector::fields(&[0]),
            JoinCombiner::function(|l, r| Row::new(vec![l[0].clone(), l[1].clone(), r[1].clone()])),
        )
    }

    #[test]
    fn test_overlapping_pairs_join_on_intersection() {
        let mut op = join();
        let mut ctx = OperatorContext::new(ExecutionMode::Row, 100, 1);
        op.on_rows(
            LEFT,
            vec![
                StreamEvent::interval(0, 10, row!["a", 1]),
                StreamEvent::interval(0, 10, row!["b", 2]),
            ],
            &mut ctx,
        )
        .unwrap();
        op.on_rows(
            RIGHT,
            vec![
                StreamEvent::interval(5, 15, row!["a", "x"]),
                StreamEvent::interval(10, 15, row!["a", "y"]),
                StreamEvent::interval(2, 3, row!["c", "z"]),
            ],
            &mut ctx,
        )
        .unwrap();
        op.on_rows(LEFT, vec![StreamEvent::interval(12, 14, row!["a", 3])], &mut ctx)
            .unwrap();

        assert_eq!(
            data(ctx.take()),
            vec![
                StreamEvent::interval(5, 10, row!["a", 1, "x"]),
                StreamEvent::interval(12, 14, row!["a", 3, "x"]),
                StreamEvent::interval(12, 14, row!["a", 3, "y"]),
            ]
        );
    }

    #[test]
    fn test_punctuation_expires_entries() {
        let mut op = join();
        let mut ctx = OperatorContext::new(ExecutionMode::Row, 100, 1);
        op.on_rows(LEFT, vec![StreamEvent::interval(0, 10, row!["a", 1])], &mut ctx)
            .unwrap();
        op.on_punctuation(LEFT, 20, &mut ctx).unwrap();
        assert_eq!(op.state.sides[LEFT].len(), 1);
        assert!(ctx.take().is_empty());

        op.on_punctuation(RIGHT, 10, &mut ctx).unwrap();
        assert_eq!(op.state.sides[LEFT].len(), 0);
        assert_eq!(ctx.take(), vec![Emission::Punctuation(10)]);
    }

    #[test]
    fn test_checkpoint_keeps_index() {
        let mut op = join();
        let mut ctx = OperatorContext::new(ExecutionMode::Row, 100, 1);
        op.on_rows(LEFT, vec![StreamEvent::interval(0, 10, row!["a", 1])], &mut ctx)
            .unwrap();
        let state = op.checkpoint().unwrap();

        let mut restored = join();
        restored.restore(&state).unwrap();
        restored
            .on_rows(RIGHT, vec![StreamEvent::interval(4, 6, row!["a", "x"])], &mut ctx)
            .unwrap();
        assert_eq!(data(ctx.take()), vec![StreamEvent::interval(4, 6, row!["a", 1, "x"])]);
    }
}
