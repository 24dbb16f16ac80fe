//! Grouped hopping window aggregate
//!
//! Each event is moved onto the span of window results it contributes to
//! (see [`HoppingAssigner::result_span`]) and the moved spans are aggregated
//! as a snapshot. Consecutive windows with the same contributing events
//! share one result interval, so an event spanning many windows costs the
//! same as one inside a single window.

use super::{HoppingAssigner, WindowOutput};
use crate::aggregation::snapshot::Timeline;
use crate::aggregation::{Aggregate, ResultSelector};
use crate::error::{Result, StateResult};
use crate::expr::KeySelector;
use crate::pipeline::{Operator, OperatorContext, OperatorKind};
use crate::state::{decode_state, encode_state};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tempo_types::{Row, StreamEvent, INFINITY, MIN_TIME};
use tracing::{debug, trace};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HoppingState {
    /// Pending result spans per key
    windows: BTreeMap<Row, Timeline>,
    punctuation: i64,
}

/// Aggregates every key over hopping windows
///
/// A window's result is emitted once a punctuation reaches its right edge.
/// It is valid from the close of the window until the close of the next
/// one, or is a point at the close with [`WindowOutput::Point`]. Runs of
/// windows over identical events are reported once, covering the run.
#[derive(Debug)]
pub struct HoppingWindowOperator {
    assigner: HoppingAssigner,
    key: KeySelector,
    aggregate: Aggregate,
    selector: ResultSelector,
    output: WindowOutput,
    state: HoppingState,
}

impl HoppingWindowOperator {
    pub fn new(
        assigner: HoppingAssigner,
        key: KeySelector,
        aggregate: Aggregate,
        selector: ResultSelector,
        output: WindowOutput,
    ) -> Self {
        Self {
            assigner,
            key,
            aggregate,
            selector,
            output,
            state: HoppingState {
                windows: BTreeMap::new(),
                punctuation: MIN_TIME,
            },
        }
    }

    fn accumulate(&mut self, event: StreamEvent) -> Result<()> {
        let Some((from, until)) = self.assigner.result_span(event.sync_time, event.other_time) else {
            return Ok(());
        };
        let key = self.key.key_of(&event)?;
        self.state
            .windows
            .entry(key)
            .or_default()
            .push_span(from, until, event);
        Ok(())
    }

    fn result_event(output: WindowOutput, from: i64, until: i64, payload: Row) -> Option<StreamEvent> {
        if until == INFINITY {
            return None;
        }
        match output {
            WindowOutput::Point => StreamEvent::try_point(from, payload).ok(),
            WindowOutput::Interval => Some(StreamEvent::interval(from, until, payload)),
        }
    }

    /// Emit every window result that is final at `punctuation`
    fn close_windows(&mut self, punctuation: i64, ctx: &mut OperatorContext) -> Result<i64> {
        let settled = self.assigner.settled(punctuation);
        let mut results = Vec::new();
        for (key, timeline) in self.state.windows.iter_mut() {
            for (from, until, value) in timeline.segments(settled, &self.aggregate)? {
                let payload = self.selector.select(key, &value);
                if let Some(event) = Self::result_event(self.output, from, until, payload) {
                    results.push(event);
                }
            }
        }
        self.state.windows.retain(|_, timeline| !timeline.is_empty());

        if !results.is_empty() {
            debug!(results = results.len(), punctuation, settled, "closing hopping windows");
        }
        ctx.emit_events(results);
        Ok(settled)
    }
}

impl Operator for HoppingWindowOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::HoppingWindow
    }

    fn descriptor(&self) -> String {
        format!(
            "hopping({}, {}) {} {} {:?} {}",
            self.assigner.size(),
            self.assigner.period(),
            self.key,
            self.aggregate,
            self.selector,
            self.output
        )
    }

    fn on_rows(&mut self, _port: usize, events: Vec<StreamEvent>, _ctx: &mut OperatorContext) -> Result<()> {
        trace!(events = events.len(), "hopping window input");
        for event in events {
            self.accumulate(event)?;
        }
        Ok(())
    }

    fn on_punctuation(&mut self, _port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        let settled = self.close_windows(time, ctx)?;
        let low = self
            .state
            .windows
            .values()
            .filter_map(Timeline::horizon)
            .min()
            .map_or(settled, |h| h.min(settled));
        ctx.advance_punctuation(&mut self.state.punctuation, low.min(time));
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        encode_state("hopping_window", &self.state)
    }

    fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        self.state = decode_state("hopping_window", state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::expr::Expr;
    use crate::pipeline::Emission;
    use tempo_types::{canonical_data, row};

    fn ctx() -> OperatorContext {
        OperatorContext::new(ExecutionMode::Row, 100, 1)
    }

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

    fn tumbling_sum() -> HoppingWindowOperator {
        HoppingWindowOperator::new(
            HoppingAssigner::new(10, 10).unwrap(),
            KeySelector::fields(&[1]),
            Aggregate::sum(Expr::field(0)),
            ResultSelector::function(|key, value| Row::new(vec![value.clone(), key[0].clone()])),
            WindowOutput::Interval,
        )
    }

    #[test]
    fn test_boundary_events() {
        let mut op = tumbling_sum();
        let mut ctx = ctx();
        op.on_rows(
            0,
            vec![
                StreamEvent::point(11, row![1, "A"]),
                StreamEvent::point(12, row![1, "A"]),
                StreamEvent::point(21, row![2, "D"]),
                StreamEvent::point(25, row![2, "D"]),
            ],
            &mut ctx,
        )
        .unwrap();
        op.on_punctuation(0, INFINITY, &mut ctx).unwrap();

        assert_eq!(
            data(ctx.take()),
            vec![
                StreamEvent::interval(20, 30, row![2, "A"]),
                StreamEvent::interval(30, 40, row![4, "D"]),
            ]
        );
    }

    #[test]
    fn test_windows_wait_for_punctuation() {
        let mut op = tumbling_sum();
        let mut ctx = ctx();
        op.on_rows(0, vec![StreamEvent::point(11, row![5, "A"])], &mut ctx).unwrap();
        op.on_punctuation(0, 19, &mut ctx).unwrap();
        assert_eq!(ctx.take(), vec![Emission::Punctuation(19)]);

        op.on_punctuation(0, 20, &mut ctx).unwrap();
        let out = ctx.take();
        assert_eq!(out.last(), Some(&Emission::Punctuation(20)));
        assert_eq!(data(out), vec![StreamEvent::interval(20, 30, row![5, "A"])]);
    }

    #[test]
    fn test_interval_spans_several_windows() {
        let op = |output| {
            HoppingWindowOperator::new(
                HoppingAssigner::new(10, 5).unwrap(),
                KeySelector::none(),
                Aggregate::count(),
                ResultSelector::default(),
                output,
            )
        };
        let mut ctx = ctx();
        // Windows starting at 0, 5 and 10 all hold [7, 13); the one at 15 does not
        let mut intervals = op(WindowOutput::Interval);
        intervals
            .on_rows(0, vec![StreamEvent::interval(7, 13, row![]), StreamEvent::point(16, row![])], &mut ctx)
            .unwrap();
        intervals.on_punctuation(0, INFINITY, &mut ctx).unwrap();
        assert_eq!(
            data(ctx.take()),
            vec![
                StreamEvent::interval(10, 20, row![1]),
                StreamEvent::interval(20, 25, row![2]),
                StreamEvent::interval(25, 30, row![1]),
            ]
        );

        let mut points = op(WindowOutput::Point);
        points.on_rows(0, vec![StreamEvent::interval(7, 13, row![])], &mut ctx).unwrap();
        points.on_punctuation(0, INFINITY, &mut ctx).unwrap();
        assert_eq!(data(ctx.take()), vec![StreamEvent::point(10, row![1])]);
    }

    #[test]
    fn test_long_interval_over_small_windows() {
        let mut op = HoppingWindowOperator::new(
            HoppingAssigner::new(1, 1).unwrap(),
            KeySelector::none(),
            Aggregate::count(),
            ResultSelector::default(),
            WindowOutput::Interval,
        );
        let mut ctx = ctx();
        op.on_rows(0, vec![StreamEvent::interval(0, 10_000_000_000, row![])], &mut ctx)
            .unwrap();
        op.on_punctuation(0, 5_000_000_000, &mut ctx).unwrap();
        assert_eq!(ctx.take(), vec![Emission::Punctuation(1)]);
        let state = op.checkpoint().unwrap();
        assert!(state.len() < 256);

        op.on_punctuation(0, INFINITY, &mut ctx).unwrap();
        assert_eq!(
            data(ctx.take()),
            vec![StreamEvent::interval(1, 10_000_000_001, row![1])]
        );
    }

    #[test]
    fn test_checkpoint_mid_window() {
        let mut op = tumbling_sum();
        let mut ctx = ctx();
        op.on_rows(0, vec![StreamEvent::point(11, row![1, "A"])], &mut ctx).unwrap();
        let state = op.checkpoint().unwrap();

        let mut restored = tumbling_sum();
        restored.restore(&state).unwrap();
        restored
            .on_rows(0, vec![StreamEvent::point(12, row![1, "A"])], &mut ctx)
            .unwrap();
        restored.on_punctuation(0, INFINITY, &mut ctx).unwrap();
        assert_eq!(data(ctx.take()), vec![StreamEvent::interval(20, 30, row![2, "A"])]);
    }
}
