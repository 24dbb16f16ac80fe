//! Disorder handling and progress tracking for pipeline inputs
//!
//! Every registered input is fronted by an [`Ingress`] that decides, per
//! event, whether the event is admitted as-is, adjusted, dropped or rejected:
//!
//! - `floor = max(high_water - reorder, last punctuation)`
//! - events with `sync_time >= floor` are admitted
//! - later events are handled by the [`DisorderPolicy`]
//!
//! Ingress also pairs Start and End edges into intervals, batches admitted
//! events, and generates punctuations from an optional [`WatermarkPolicy`].
//! Operators downstream of ingress only ever see `Interval` events whose sync
//! time is at or after the last punctuation they received.

mod watermark;

pub use watermark::{HighWaterTracker, WatermarkPolicy};

use crate::error::{IngressError, StateResult};
use crate::expr::KeySelector;
use crate::pipeline::OperatorContext;
use crate::state::{decode_state, encode_state};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tempo_types::{EventKind, Row, StreamEvent, INFINITY, MIN_TIME};
use tracing::{debug, trace, warn};

/// What to do with an event that arrives behind the admission floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisorderKind {
    /// Fault the container
    Throw,
    /// Discard the event and report it
    Drop,
    /// Move the event up to the floor and report it
    Adjust,
}

/// Disorder policy of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisorderPolicy {
    pub kind: DisorderKind,
    /// How far behind the high-water mark an event may arrive unchanged
    pub reorder: u32,
}

impl DisorderPolicy {
    pub fn throw(reorder: u32) -> Self {
        Self {
            kind: DisorderKind::Throw,
            reorder,
        }
    }

    pub fn drop(reorder: u32) -> Self {
        Self {
            kind: DisorderKind::Drop,
            reorder,
        }
    }

    pub fn adjust(reorder: u32) -> Self {
        Self {
            kind: DisorderKind::Adjust,
            reorder,
        }
    }
}

impl Default for DisorderPolicy {
    fn default() -> Self {
        Self::throw(0)
    }
}

impl fmt::Display for DisorderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DisorderKind::Throw => "throw",
            DisorderKind::Drop => "drop",
            DisorderKind::Adjust => "adjust",
        };
        write!(f, "{}({})", kind, self.reorder)
    }
}

/// Complete admission policy of an input
#[derive(Debug, Clone, Default)]
pub struct IngressPolicy {
    pub disorder: DisorderPolicy,
    pub watermark: Option<WatermarkPolicy>,
    /// Track high-water marks independently per partition key
    pub partition: Option<KeySelector>,
}

impl IngressPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disorder(mut self, disorder: DisorderPolicy) -> Self {
        self.disorder = disorder;
        self
    }

    pub fn with_watermark(mut self, watermark: WatermarkPolicy) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn partitioned_by(mut self, key: KeySelector) -> Self {
        self.partition = Some(key);
        self
    }
}

impl fmt::Display for IngressPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.disorder)?;
        if let Some(watermark) = &self.watermark {
            write!(f, " {}", watermark)?;
        }
        if let Some(partition) = &self.partition {
            write!(f, " partitioned {}", partition)?;
        }
        Ok(())
    }
}

/// Report of a non-fatal disorder decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisorderDiagnostic {
    /// The adjusted event when `adjusted`, otherwise the dropped original
    pub event: StreamEvent,
    pub adjusted: bool,
}

/// Admission counters of one input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressCounters {
    pub received: u64,
    pub admitted: u64,
    pub dropped: u64,
    pub adjusted: u64,
    pub punctuations: u64,
}

/// Open Start edges waiting for their End
///
/// Keyed by the original Start sync time and payload, which is what an End
/// edge refers to; the value holds the admitted (possibly adjusted) start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OpenStarts {
    by_edge: BTreeMap<(i64, Row), Vec<i64>>,
    admitted: BTreeMap<i64, usize>,
}

impl OpenStarts {
    fn open(&mut self, original: i64, payload: Row, admitted: i64) {
        self.by_edge.entry((original, payload)).or_default().push(admitted);
        *self.admitted.entry(admitted).or_insert(0) += 1;
    }

    /// Close the oldest Start matching an End edge
    fn close(&mut self, original: i64, payload: &Row) -> Option<i64> {
        let key = (original, payload.clone());
        let starts = self.by_edge.get_mut(&key)?;
        let admitted = starts.remove(0);
        if starts.is_empty() {
            self.by_edge.remove(&key);
        }
        if let Some(count) = self.admitted.get_mut(&admitted) {
            *count -= 1;
            if *count == 0 {
                self.admitted.remove(&admitted);
            }
        }
        Some(admitted)
    }

    /// Admitted time of the Start an End edge would close
    fn matching(&self, original: i64, payload: &Row) -> Option<i64> {
        self.by_edge
            .get(&(original, payload.clone()))
            .and_then(|starts| starts.first().copied())
    }

    fn earliest(&self) -> Option<i64> {
        self.admitted.keys().next().copied()
    }

    fn len(&self) -> usize {
        self.admitted.values().sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IngressState {
    high_water: HighWaterTracker,
    /// Highest punctuation promised so far, explicit or generated
    promised: i64,
    /// Last explicit punctuation
    explicit: i64,
    /// Last punctuation passed downstream
    emitted: i64,
    open: OpenStarts,
    completed: bool,
}

impl IngressState {
    fn new() -> Self {
        Self {
            high_water: HighWaterTracker::new(),
            promised: MIN_TIME,
            explicit: MIN_TIME,
            emitted: MIN_TIME,
            open: OpenStarts::default(),
            completed: false,
        }
    }
}

/// Admission front of one input
#[derive(Debug)]
pub struct Ingress {
    name: String,
    policy: IngressPolicy,
    state: IngressState,
    buffer: Vec<StreamEvent>,
    counters: IngressCounters,
}

impl Ingress {
    pub fn new(name: impl Into<String>, policy: IngressPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: IngressState::new(),
            buffer: Vec::new(),
            counters: IngressCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> String {
        format!("{}: {}", self.name, self.policy)
    }

    pub fn counters(&self) -> IngressCounters {
        self.counters
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed
    }

    /// Last punctuation passed downstream
    pub fn punctuation(&self) -> i64 {
        self.state.emitted
    }

    /// Admit one event
    pub fn on_event(
        &mut self,
        event: StreamEvent,
        ctx: &mut OperatorContext,
        diagnostics: &mut Vec<DisorderDiagnostic>,
    ) -> Result<(), IngressError> {
        if self.state.completed {
            return Err(IngressError::AlreadyCompleted {
                input: self.name.clone(),
            });
        }
        self.counters.received += 1;

        event.validate().map_err(|e| IngressError::InvalidEvent {
            input: self.name.clone(),
            reason: e.to_string(),
        })?;

        if event.is_punctuation() {
            return self.on_punctuation(event.sync_time, ctx);
        }

        let partition = self.partition_of(&event)?;
        let high_water = self.state.high_water.high_water(&partition);
        let floor = high_water
            .saturating_sub(i64::from(self.policy.disorder.reorder))
            .max(self.state.promised);

        if event.sync_time >= floor {
            let original = event.sync_time;
            self.admit(event, original, &partition)?;
        } else {
            match self.policy.disorder.kind {
                DisorderKind::Throw => {
                    warn!(input = %self.name, sync_time = event.sync_time, floor, "out-of-order event");
                    return Err(IngressError::OutOfOrder {
                        input: self.name.clone(),
                        sync_time: event.sync_time,
                        floor,
                        high_water,
                    });
                }
                DisorderKind::Drop => {
                    if event.kind == EventKind::End {
                        // The Start can never close now
                        self.state.open.close(event.other_time, &event.payload);
                    }
                    self.reject(event, diagnostics);
                }
                DisorderKind::Adjust => match self.adjust(&event, floor) {
                    Some(adjusted) => {
                        trace!(input = %self.name, from = event.sync_time, to = floor, "adjusted late event");
                        self.counters.adjusted += 1;
                        diagnostics.push(DisorderDiagnostic {
                            event: adjusted.clone(),
                            adjusted: true,
                        });
                        self.admit(adjusted, event.sync_time, &partition)?;
                    }
                    None => {
                        if event.kind == EventKind::End {
                            self.state.open.close(event.other_time, &event.payload);
                        }
                        self.reject(event, diagnostics);
                    }
                },
            }
        }

        self.generate_punctuation(ctx);
        self.advance(ctx);
        if self.buffer.len() >= ctx.batch_size() {
            self.flush(ctx);
        }
        Ok(())
    }

    fn partition_of(&self, event: &StreamEvent) -> Result<Row, IngressError> {
        match &self.policy.partition {
            Some(selector) => selector.key_of(event).map_err(|e| IngressError::InvalidEvent {
                input: self.name.clone(),
                reason: format!("partition key: {}", e),
            }),
            None => Ok(Row::empty()),
        }
    }

    fn reject(&mut self, event: StreamEvent, diagnostics: &mut Vec<DisorderDiagnostic>) {
        debug!(input = %self.name, sync_time = event.sync_time, "dropped late event");
        self.counters.dropped += 1;
        diagnostics.push(DisorderDiagnostic {
            event,
            adjusted: false,
        });
    }

    /// Move a late event up to `floor`; `None` when nothing of it survives
    fn adjust(&self, event: &StreamEvent, floor: i64) -> Option<StreamEvent> {
        match event.kind {
            // Closing at or before its Start would leave an empty interval
            EventKind::End
                if self
                    .state
                    .open
                    .matching(event.other_time, &event.payload)
                    .is_some_and(|start| floor <= start) =>
            {
                None
            }
            EventKind::Interval if event.duration() == 1 => {
                StreamEvent::try_point(floor, event.payload.clone()).ok()
            }
            EventKind::Interval => (event.other_time > floor)
                .then(|| StreamEvent::interval(floor, event.other_time, event.payload.clone())),
            EventKind::Start | EventKind::End => Some(StreamEvent {
                sync_time: floor,
                ..event.clone()
            }),
            EventKind::Punctuation => None,
        }
    }

    /// Admit an event; `original` is its sync time before any adjustment
    fn admit(&mut self, event: StreamEvent, original: i64, partition: &Row) -> Result<(), IngressError> {
        self.state.high_water.observe(partition, event.sync_time);
        match event.kind {
            EventKind::Interval => {
                self.counters.admitted += 1;
                self.buffer.push(event);
            }
            EventKind::Start => {
                self.counters.admitted += 1;
                // Ends refer to the Start by its original time
                self.state.open.open(original, event.payload, event.sync_time);
            }
            EventKind::End => {
                let start = self
                    .state
                    .open
                    .close(event.other_time, &event.payload)
                    .ok_or_else(|| IngressError::UnmatchedEnd {
                        input: self.name.clone(),
                        sync_time: event.sync_time,
                        start_time: event.other_time,
                    })?;
                self.counters.admitted += 1;
                if event.sync_time > start {
                    self.buffer
                        .push(StreamEvent::interval(start, event.sync_time, event.payload));
                }
            }
            EventKind::Punctuation => {}
        }
        Ok(())
    }

    fn on_punctuation(&mut self, time: i64, ctx: &mut OperatorContext) -> Result<(), IngressError> {
        if time < self.state.explicit {
            return Err(IngressError::PunctuationRegression {
                input: self.name.clone(),
                previous: self.state.explicit,
                punctuation: time,
            });
        }
        self.counters.punctuations += 1;
        self.state.explicit = time;
        self.state.promised = self.state.promised.max(time);
        self.advance(ctx);
        Ok(())
    }

    fn generate_punctuation(&mut self, ctx: &mut OperatorContext) {
        let Some(policy) = self.policy.watermark else {
            return;
        };
        if let Some(low) = self
            .state
            .high_water
            .low_watermark(&policy, self.policy.disorder.reorder)
        {
            if low > self.state.promised {
                self.state.promised = low;
                self.advance(ctx);
            }
        }
    }

    /// Pass the promised punctuation downstream, held back by open Starts
    fn advance(&mut self, ctx: &mut OperatorContext) {
        let mut target = self.state.promised;
        if let Some(earliest) = self.state.open.earliest() {
            target = target.min(earliest);
        }
        if target > self.state.emitted {
            self.flush(ctx);
            trace!(input = %self.name, punctuation = target, "punctuation");
            ctx.advance_punctuation(&mut self.state.emitted, target);
        }
    }

    /// Emit buffered events downstream
    pub fn flush(&mut self, ctx: &mut OperatorContext) {
        if !self.buffer.is_empty() {
            trace!(input = %self.name, events = self.buffer.len(), "flushing ingress buffer");
            ctx.emit_events(std::mem::take(&mut self.buffer));
        }
    }

    /// Complete the input: everything still buffered is flushed and the final
    /// punctuation is emitted
    pub fn complete(&mut self, ctx: &mut OperatorContext) -> Result<(), IngressError> {
        if self.state.completed {
            return Err(IngressError::AlreadyCompleted {
                input: self.name.clone(),
            });
        }
        if let Some(earliest) = self.state.open.earliest() {
            return Err(IngressError::UnmatchedStart {
                input: self.name.clone(),
                open: self.state.open.len(),
                earliest,
            });
        }
        self.state.completed = true;
        self.flush(ctx);
        ctx.advance_punctuation(&mut self.state.emitted, INFINITY);
        debug!(input = %self.name, "input completed");
        Ok(())
    }

    pub fn checkpoint(&self) -> StateResult<Vec<u8>> {
        encode_state(&self.name, &self.state)
    }

    pub fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        self.state = decode_state(&self.name, state)?;
        self.buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::pipeline::Emission;
    use tempo_types::row;

    struct Harness {
        ingress: Ingress,
        ctx: OperatorContext,
        diagnostics: Vec<DisorderDiagnostic>,
    }

    impl Harness {
        fn new(policy: IngressPolicy) -> Self {
            Self {
                ingress: Ingress::new("input", policy),
                ctx: OperatorContext::new(ExecutionMode::Row, 1000, 1),
                diagnostics: Vec::new(),
            }
        }

        fn push(&mut self, event: StreamEvent) -> Result<(), IngressError> {
            self.ingress.on_event(event, &mut self.ctx, &mut self.diagnostics)
        }

        fn finish(&mut self) -> Vec<Emission> {
            self.ingress.complete(&mut self.ctx).unwrap();
            self.ctx.take()
        }
    }

    fn data(emissions: &[Emission]) -> Vec<StreamEvent> {
        emissions
            .iter()
            .filter_map(|e| match e {
                Emission::Data(batch) => Some(batch.clone().into_events()),
                Emission::Punctuation(_) => None,
            })
            .flatten()
            .collect()
    }

    fn punctuations(emissions: &[Emission]) -> Vec<i64> {
        emissions
            .iter()
            .filter_map(|e| match e {
                Emission::Punctuation(t) => Some(*t),
                Emission::Data(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_in_order_events_admitted() {
        let mut h = Harness::new(IngressPolicy::new());
        for t in [1, 2, 2, 5] {
            h.push(StreamEvent::point(t, row![t])).unwrap();
        }
        let out = h.finish();
        assert_eq!(data(&out).len(), 4);
        assert_eq!(punctuations(&out), vec![INFINITY]);
    }

    #[test]
    fn test_throw_on_late_event() {
        let mut h = Harness::new(IngressPolicy::new());
        h.push(StreamEvent::point(10, row![1])).unwrap();
        let err = h.push(StreamEvent::point(9, row![2])).unwrap_err();
        assert!(matches!(err, IngressError::OutOfOrder { sync_time: 9, floor: 10, .. }));
    }

    #[test]
    fn test_reorder_tolerance() {
        let mut h = Harness::new(IngressPolicy::new().with_disorder(DisorderPolicy::throw(5)));
        h.push(StreamEvent::point(10, row![1])).unwrap();
        h.push(StreamEvent::point(5, row![2])).unwrap();
        assert!(h.push(StreamEvent::point(4, row![3])).is_err());
    }

    #[test]
    fn test_drop_reports_original() {
        let mut h = Harness::new(IngressPolicy::new().with_disorder(DisorderPolicy::drop(2)));
        h.push(StreamEvent::point(10, row![1])).unwrap();
        h.push(StreamEvent::point(7, row![2])).unwrap();
        let out = h.finish();
        assert_eq!(data(&out).len(), 1);
        assert_eq!(
            h.diagnostics,
            vec![DisorderDiagnostic {
                event: StreamEvent::point(7, row![2]),
                adjusted: false
            }]
        );
        assert_eq!(h.ingress.counters().dropped, 1);
    }

    #[test]
    fn test_adjust_moves_points_and_clamps_intervals() {
        let mut h = Harness::new(IngressPolicy::new().with_disorder(DisorderPolicy::adjust(2)));
        h.push(StreamEvent::point(10, row![1])).unwrap();
        h.push(StreamEvent::point(3, row![2])).unwrap();
        h.push(StreamEvent::interval(4, 20, row![3])).unwrap();
        h.push(StreamEvent::interval(1, 6, row![4])).unwrap();
        let out = h.finish();

        let admitted = tempo_types::canonical_data(data(&out));
        assert_eq!(
            admitted,
            vec![
                StreamEvent::point(8, row![2]),
                StreamEvent::interval(8, 20, row![3]),
                StreamEvent::point(10, row![1]),
            ]
        );
        assert_eq!(h.diagnostics.len(), 3);
        assert!(h.diagnostics[0].adjusted);
        assert!(h.diagnostics[1].adjusted);
        assert_eq!(
            h.diagnostics[2],
            DisorderDiagnostic {
                event: StreamEvent::interval(1, 6, row![4]),
                adjusted: false
            }
        );
    }

    #[test]
    fn test_adjusted_end_before_its_start_is_dropped() {
        let mut h = Harness::new(IngressPolicy::new().with_disorder(DisorderPolicy::adjust(0)));
        h.push(StreamEvent::start(5, row!["a"])).unwrap();
        h.push(StreamEvent::point(10, row!["p"])).unwrap();
        // Moved to 10, and its End can only close at 10 as well
        h.push(StreamEvent::start(7, row!["b"])).unwrap();
        h.push(StreamEvent::end(9, 7, row!["b"])).unwrap();
        h.push(StreamEvent::end(12, 5, row!["a"])).unwrap();
        let out = h.finish();

        assert_eq!(
            tempo_types::canonical_data(data(&out)),
            vec![
                StreamEvent::interval(5, 12, row!["a"]),
                StreamEvent::point(10, row!["p"]),
            ]
        );
        assert_eq!(h.diagnostics.len(), 2);
        assert!(h.diagnostics[0].adjusted);
        assert_eq!(
            h.diagnostics[1],
            DisorderDiagnostic {
                event: StreamEvent::end(9, 7, row!["b"]),
                adjusted: false
            }
        );
        assert_eq!(h.ingress.counters().adjusted, 1);
        assert_eq!(h.ingress.counters().dropped, 1);
    }

    #[test]
    fn test_punctuation_raises_floor() {
        let mut h = Harness::new(IngressPolicy::new().with_disorder(DisorderPolicy::throw(100)));
        h.push(StreamEvent::punctuation(50)).unwrap();
        assert!(h.push(StreamEvent::point(49, row![1])).is_err());
    }

    #[test]
    fn test_punctuation_regression() {
        let mut h = Harness::new(IngressPolicy::new());
        h.push(StreamEvent::punctuation(50)).unwrap();
        let err = h.push(StreamEvent::punctuation(40)).unwrap_err();
        assert_eq!(
            err,
            IngressError::PunctuationRegression {
                input: "input".to_string(),
                previous: 50,
                punctuation: 40
            }
        );
    }

    #[test]
    fn test_start_end_pairing() {
        let mut h = Harness::new(IngressPolicy::new());
        h.push(StreamEvent::start(5, row!["a"])).unwrap();
        h.push(StreamEvent::punctuation(8)).unwrap();
        // Punctuation held back by the open Start
        assert_eq!(punctuations(&h.ctx.take()), vec![5]);

        h.push(StreamEvent::end(9, 5, row!["a"])).unwrap();
        let out = h.finish();
        assert_eq!(data(&out), vec![StreamEvent::interval(5, 9, row!["a"])]);
        assert_eq!(punctuations(&out), vec![8, INFINITY]);
    }

    #[test]
    fn test_unmatched_end() {
        let mut h = Harness::new(IngressPolicy::new());
        let err = h.push(StreamEvent::end(9, 5, row!["a"])).unwrap_err();
        assert!(matches!(err, IngressError::UnmatchedEnd { start_time: 5, .. }));
    }

    #[test]
    fn test_unmatched_start_on_completion() {
        let mut h = Harness::new(IngressPolicy::new());
        h.push(StreamEvent::start(3, row!["a"])).unwrap();
        let err = h.ingress.complete(&mut h.ctx).unwrap_err();
        assert!(matches!(err, IngressError::UnmatchedStart { open: 1, earliest: 3, .. }));
    }

    #[test]
    fn test_invalid_event_rejected() {
        let mut h = Harness::new(IngressPolicy::new());
        let bad = StreamEvent {
            kind: EventKind::Interval,
            sync_time: 5,
            other_time: 5,
            payload: Row::empty(),
        };
        assert!(matches!(h.push(bad), Err(IngressError::InvalidEvent { .. })));
    }

    #[test]
    fn test_watermark_generation() {
        let policy = IngressPolicy::new().with_watermark(WatermarkPolicy::new(10, 0).unwrap());
        let mut h = Harness::new(policy);
        for t in [3, 12, 15, 27] {
            h.push(StreamEvent::point(t, row![t])).unwrap();
        }
        let out = h.ctx.take();
        assert_eq!(punctuations(&out), vec![0, 10, 20]);
        assert!(h.push(StreamEvent::point(19, row![0])).is_err());
    }

    #[test]
    fn test_partitions_track_disorder_independently() {
        let policy = IngressPolicy::new()
            .with_disorder(DisorderPolicy::drop(0))
            .partitioned_by(KeySelector::fields(&[0]));
        let mut h = Harness::new(policy);
        h.push(StreamEvent::point(100, row!["a"])).unwrap();
        h.push(StreamEvent::point(20, row!["b"])).unwrap();
        h.push(StreamEvent::point(19, row!["b"])).unwrap();
        assert_eq!(h.diagnostics.len(), 1);
        assert_eq!(h.diagnostics[0].event.payload, row!["b"]);
        assert_eq!(h.ingress.counters().admitted, 2);
    }

    #[test]
    fn test_partitioned_watermark_is_minimum() {
        let policy = IngressPolicy::new()
            .with_disorder(DisorderPolicy::drop(0))
            .with_watermark(WatermarkPolicy::new(1, 0).unwrap())
            .partitioned_by(KeySelector::fields(&[0]));
        let mut h = Harness::new(policy);
        h.push(StreamEvent::point(100, row!["a"])).unwrap();
        h.push(StreamEvent::point(150, row!["b"])).unwrap();
        // "a" is still allowed to arrive behind "b"'s high-water mark
        h.push(StreamEvent::point(120, row!["a"])).unwrap();
        assert!(h.diagnostics.is_empty());
        assert_eq!(punctuations(&h.ctx.take()), vec![100, 120]);

        h.push(StreamEvent::point(200, row!["a"])).unwrap();
        assert_eq!(punctuations(&h.ctx.take()), vec![150]);
    }

    #[test]
    fn test_flush_at_batch_size() {
        let mut h = Harness::new(IngressPolicy::new());
        h.ctx = OperatorContext::new(ExecutionMode::Row, 2, 1);
        h.push(StreamEvent::point(1, row![1])).unwrap();
        assert!(h.ctx.take().is_empty());
        h.push(StreamEvent::point(2, row![2])).unwrap();
        assert_eq!(data(&h.ctx.take()).len(), 2);
    }

    #[test]
    fn test_checkpoint_restores_floor() {
        let mut h = Harness::new(IngressPolicy::new());
        h.push(StreamEvent::point(10, row![1])).unwrap();
        let state = h.ingress.checkpoint().unwrap();

        let mut restored = Harness::new(IngressPolicy::new());
        restored.ingress.restore(&state).unwrap();
        assert!(restored.push(StreamEvent::point(9, row![1])).is_err());
        assert!(restored.push(StreamEvent::point(10, row![1])).is_ok());
    }
}
