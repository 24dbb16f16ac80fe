//! Snapshot aggregation over raw intervals
//!
//! For every key, the timeline is cut at each start and end of the key's
//! intervals. Each resulting segment has a constant set of live intervals;
//! the aggregate of that set is emitted as an interval covering the segment.
//! A segment is emitted once a punctuation reaches its end, since later
//! events cannot start inside it.

use super::{Aggregate, ResultSelector};
use crate::error::{Result, StateResult};
use crate::expr::KeySelector;
use crate::pipeline::{Operator, OperatorContext, OperatorKind};
use crate::state::{decode_state, encode_state};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tempo_types::{Row, StreamEvent, Value, MIN_TIME};
use tracing::{debug, trace};

/// An event with the span it contributes to the timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Span {
    start: i64,
    end: i64,
    event: StreamEvent,
}

/// Live spans of one group, cut into constant segments as time advances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Timeline {
    live: Vec<Span>,
    /// Everything before this time has been emitted
    cursor: i64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            live: Vec::new(),
            cursor: MIN_TIME,
        }
    }
}

impl Timeline {
    /// Add an event contributing over its own validity interval
    pub(crate) fn push(&mut self, event: StreamEvent) {
        self.push_span(event.sync_time, event.other_time, event);
    }

    /// Add an event contributing over `[start, end)`
    pub(crate) fn push_span(&mut self, start: i64, end: i64, event: StreamEvent) {
        self.live.push(Span { start, end, event });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Earliest time a future segment of this timeline can start
    pub(crate) fn horizon(&self) -> Option<i64> {
        self.live
            .iter()
            .map(|span| span.start)
            .min()
            .map(|earliest| earliest.max(self.cursor))
    }

    /// Aggregate every segment ending at or before `punctuation`
    ///
    /// Segments are bounded by consecutive span endpoints. The cursor is a
    /// boundary too, so a span that straddles it still yields the segment
    /// that starts there.
    pub(crate) fn segments(&mut self, punctuation: i64, aggregate: &Aggregate) -> Result<Vec<(i64, i64, Value)>> {
        let cursor = self.cursor;
        let mut points: Vec<i64> = self
            .live
            .iter()
            .flat_map(|span| [span.start, span.end])
            .filter(|t| *t >= cursor && *t <= punctuation)
            .collect();
        if cursor > MIN_TIME && self.live.iter().any(|span| span.start < cursor && cursor < span.end) {
            points.push(cursor);
        }
        points.sort_unstable();
        points.dedup();

        let mut segments = Vec::new();
        for pair in points.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let mut covering = self
                .live
                .iter()
                .filter(|span| span.start <= start && start < span.end)
                .map(|span| &span.event)
                .peekable();
            if covering.peek().is_none() {
                continue;
            }
            segments.push((start, end, aggregate.compute(covering)?));
        }
        if let Some(last) = points.last() {
            self.cursor = self.cursor.max(*last);
        }
        let cursor = self.cursor;
        self.live.retain(|span| span.end > cursor);
        Ok(segments)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotState {
    keys: BTreeMap<Row, Timeline>,
    punctuation: i64,
}

/// Per-key aggregate over every maximal constant region of the input
#[derive(Debug)]
pub struct SnapshotAggregate {
    key: KeySelector,
    aggregate: Aggregate,
    selector: ResultSelector,
    state: SnapshotState,
}

impl SnapshotAggregate {
    pub fn new(key: KeySelector, aggregate: Aggregate, selector: ResultSelector) -> Self {
        Self {
            key,
            aggregate,
            selector,
            state: SnapshotState {
                keys: BTreeMap::new(),
                punctuation: MIN_TIME,
            },
        }
    }

    fn emit_segments(&mut self, punctuation: i64, ctx: &mut OperatorContext) -> Result<()> {
        let mut results = Vec::new();
        for (key, timeline) in self.state.keys.iter_mut() {
            for (start, end, value) in timeline.segments(punctuation, &self.aggregate)? {
                results.push(StreamEvent::interval(start, end, self.selector.select(key, &value)));
            }
        }
        self.state.keys.retain(|_, timeline| !timeline.is_empty());

        if !results.is_empty() {
            debug!(segments = results.len(), punctuation, "emitting snapshot segments");
        }
        ctx.emit_events(results);
        Ok(())
    }
}

impl Operator for SnapshotAggregate {
    fn kind(&self) -> OperatorKind {
        OperatorKind::SnapshotAggregate
    }

    fn descriptor(&self) -> String {
        format!("{} {} {:?}", self.key, self.aggregate, self.selector)
    }

    fn on_rows(&mut self, _port: usize, events: Vec<StreamEvent>, _ctx: &mut OperatorContext) -> Result<()> {
        trace!(events = events.len(), "snapshot aggregate input");
        for event in events {
            let key = self.key.key_of(&event)?;
            self.state
                .keys
                .entry(key)
                .or_default()
                .push(event);
        }
        Ok(())
    }

    fn on_punctuation(&mut self, _port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        self.emit_segments(time, ctx)?;
        let low = self
            .state
            .keys
            .values()
            .filter_map(Timeline::horizon)
            .min()
            .map_or(time, |h| h.min(time));
        ctx.advance_punctuation(&mut self.state.punctuation, low);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        encode_state("snapshot_aggregate", &self.state)
    }

    fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        self.state = decode_state("snapshot_aggregate", state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::expr::Expr;
    use crate::pipeline::Emission;
    use tempo_types::{canonical_data, row, INFINITY};

    fn data(emissions: &[Emission]) -> Vec<StreamEvent> {
        canonical_data(
            emissions
                .iter()
                .filter_map(|e| match e {
                    Emission::Data(batch) => Some(batch.clone().into_events()),
                    Emission::Punctuation(_) => None,
                })
                .flatten(),
        )
    }

    fn sum_by_key() -> SnapshotAggregate {
        SnapshotAggregate::new(
            KeySelector::fields(&[0]),
            Aggregate::sum(Expr::field(1)),
            ResultSelector::default(),
        )
    }

    #[test]
    fn test_constant_regions() {
        let mut op = sum_by_key();
        let mut ctx = OperatorContext::new(ExecutionMode::Row, 100, 1);
        op.on_rows(
            0,
            vec![
                StreamEvent::interval(0, 10, row!["a", 1]),
                StreamEvent::interval(5, 15, row!["a", 2]),
                StreamEvent::interval(20, 25, row!["a", 4]),
                StreamEvent::interval(3, 4, row!["b", 7]),
            ],
            &mut ctx,
        )
        .unwrap();
        op.on_punctuation(0, INFINITY, &mut ctx).unwrap();

        assert_eq!(
            data(&ctx.take()),
            vec![
                StreamEvent::interval(0, 5, row!["a", 1]),
                StreamEvent::interval(3, 4, row!["b", 7]),
                StreamEvent::interval(5, 10, row!["a", 3]),
                StreamEvent::interval(10, 15, row!["a", 2]),
                StreamEvent::interval(20, 25, row!["a", 4]),
            ]
        );
    }

    #[test]
    fn test_segments_wait_for_punctuation() {
        let mut op = sum_by_key();
        let mut ctx = OperatorContext::new(ExecutionMode::Row, 100, 1);
        op.on_rows(0, vec![StreamEvent::interval(0, 10, row!["a", 1])], &mut ctx)
            .unwrap();
        op.on_punctuation(0, 6, &mut ctx).unwrap();
        // [0, 10) may still be split by an event starting at 6 or later
        assert_eq!(ctx.take(), vec![Emission::Punctuation(0)]);

        op.on_rows(0, vec![StreamEvent::interval(6, 8, row!["a", 2])], &mut ctx)
            .unwrap();
        op.on_punctuation(0, 9, &mut ctx).unwrap();
        let out = ctx.take();
        assert_eq!(
            data(&out),
            vec![
                StreamEvent::interval(0, 6, row!["a", 1]),
                StreamEvent::interval(6, 8, row!["a", 3]),
            ]
        );
        assert_eq!(out.last(), Some(&Emission::Punctuation(8)));
    }

    #[test]
    fn test_checkpoint_round_trip_continues_timeline() {
        let mut op = sum_by_key();
        let mut ctx = OperatorContext::new(ExecutionMode::Row, 100, 1);
        op.on_rows(0, vec![StreamEvent::interval(0, 10, row!["a", 1])], &mut ctx)
            .unwrap();
        op.on_punctuation(0, 5, &mut ctx).unwrap();
        ctx.take();
        let state = op.checkpoint().unwrap();

        let mut restored = sum_by_key();
        restored.restore(&state).unwrap();
        restored
            .on_rows(0, vec![StreamEvent::interval(5, 12, row!["a", 1])], &mut ctx)
            .unwrap();
        restored.on_punctuation(0, INFINITY, &mut ctx).unwrap();
        assert_eq!(
            data(&ctx.take()),
            vec![
                StreamEvent::interval(0, 5, row!["a", 1]),
                StreamEvent::interval(5, 10, row!["a", 2]),
                StreamEvent::interval(10, 12, row!["a", 1]),
            ]
        );
    }

    #[test]
    fn test_intermediate_punctuation_keeps_straddling_segment() {
        let events = vec![
            StreamEvent::interval(0, 10, row!["a", 1]),
            StreamEvent::interval(2, 20, row!["a", 1]),
        ];
        let count = || SnapshotAggregate::new(KeySelector::fields(&[0]), Aggregate::count(), ResultSelector::default());
        let expected = vec![
            StreamEvent::interval(0, 2, row!["a", 1]),
            StreamEvent::interval(2, 10, row!["a", 2]),
            StreamEvent::interval(10, 20, row!["a", 1]),
        ];

        let mut op = count();
        let mut ctx = OperatorContext::new(ExecutionMode::Row, 100, 1);
        op.on_rows(0, events.clone(), &mut ctx).unwrap();
        op.on_punctuation(0, INFINITY, &mut ctx).unwrap();
        assert_eq!(data(&ctx.take()), expected);

        let mut op = count();
        op.on_rows(0, events, &mut ctx).unwrap();
        op.on_punctuation(0, 15, &mut ctx).unwrap();
        op.on_punctuation(0, INFINITY, &mut ctx).unwrap();
        assert_eq!(data(&ctx.take()), expected);
    }
}
