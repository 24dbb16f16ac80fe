//! Temporal event model
//!
//! Every event carries a validity interval expressed with two timestamps:
//! `sync_time`, the instant at which the event takes effect, and `other_time`,
//! whose meaning depends on the event kind:
//!
//! | kind          | `sync_time`        | `other_time`                      |
//! |---------------|--------------------|-----------------------------------|
//! | `Interval`    | start (inclusive)  | end (exclusive), `> sync_time`    |
//! | `Start`       | start (inclusive)  | [`INFINITY`]                      |
//! | `End`         | end (exclusive)    | `sync_time` of the matching Start |
//! | `Punctuation` | progress time      | [`INFINITY`]                      |
//!
//! A point event is an interval of length one tick.

use crate::errors::{EventError, EventResult};
use crate::row::Row;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Sentinel for an open interval edge, and the punctuation time that marks
/// end of stream
pub const INFINITY: i64 = i64::MAX;

/// Smallest representable timestamp
pub const MIN_TIME: i64 = i64::MIN;

/// Kind of a stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Start,
    End,
    Interval,
    Punctuation,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Start => "start",
            EventKind::End => "end",
            EventKind::Interval => "interval",
            EventKind::Punctuation => "punctuation",
        };
        f.write_str(name)
    }
}

/// A single event of a temporal stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub sync_time: i64,
    pub other_time: i64,
    pub payload: Row,
}

impl StreamEvent {
    /// Interval event valid on `[start, end)`
    ///
    /// # Panics
    /// Panics when `end <= start`; use [`StreamEvent::try_interval`] for
    /// untrusted input.
    pub fn interval(start: i64, end: i64, payload: Row) -> Self {
        assert!(end > start, "Interval end must be after start");
        Self {
            kind: EventKind::Interval,
            sync_time: start,
            other_time: end,
            payload,
        }
    }

    /// Fallible interval constructor
    pub fn try_interval(start: i64, end: i64, payload: Row) -> EventResult<Self> {
        if end <= start {
            return Err(EventError::EmptyInterval { start, end });
        }
        Ok(Self {
            kind: EventKind::Interval,
            sync_time: start,
            other_time: end,
            payload,
        })
    }

    /// Point event valid on `[time, time + 1)`
    ///
    /// # Panics
    /// Panics unless the point ends before [`INFINITY`]; use
    /// [`StreamEvent::try_point`] for untrusted input.
    pub fn point(time: i64, payload: Row) -> Self {
        assert!(time < INFINITY - 1, "Point must end before the end of time");
        Self::interval(time, time + 1, payload)
    }

    /// Fallible point constructor
    pub fn try_point(time: i64, payload: Row) -> EventResult<Self> {
        let end = time
            .checked_add(1)
            .filter(|end| *end < INFINITY)
            .ok_or_else(|| EventError::InvalidTimestamp {
                timestamp: time,
                reason: "point must end before the end of time".to_string(),
            })?;
        Self::try_interval(time, end, payload)
    }

    /// Start edge opening validity at `time`
    pub fn start(time: i64, payload: Row) -> Self {
        Self {
            kind: EventKind::Start,
            sync_time: time,
            other_time: INFINITY,
            payload,
        }
    }

    /// End edge closing at `time` the Start issued at `start_time`
    pub fn end(time: i64, start_time: i64, payload: Row) -> Self {
        Self {
            kind: EventKind::End,
            sync_time: time,
            other_time: start_time,
            payload,
        }
    }

    /// Progress marker: nothing earlier than `time` follows
    pub fn punctuation(time: i64) -> Self {
        Self {
            kind: EventKind::Punctuation,
            sync_time: time,
            other_time: INFINITY,
            payload: Row::empty(),
        }
    }

    pub fn is_punctuation(&self) -> bool {
        self.kind == EventKind::Punctuation
    }

    pub fn is_data(&self) -> bool {
        !self.is_punctuation()
    }

    /// Start of the validity interval
    pub fn start_time(&self) -> i64 {
        match self.kind {
            EventKind::End => self.other_time,
            _ => self.sync_time,
        }
    }

    /// End of the validity interval ([`INFINITY`] for open Start edges)
    pub fn end_time(&self) -> i64 {
        match self.kind {
            EventKind::End => self.sync_time,
            _ => self.other_time,
        }
    }

    /// Length of the validity interval (saturating for open edges)
    pub fn duration(&self) -> i64 {
        self.end_time().saturating_sub(self.start_time())
    }

    /// Whether the validity interval contains `time`
    pub fn contains(&self, time: i64) -> bool {
        self.start_time() <= time && time < self.end_time()
    }

    /// Whether the validity intervals of two events overlap
    pub fn overlaps(&self, other: &StreamEvent) -> bool {
        self.start_time() < other.end_time() && other.start_time() < self.end_time()
    }

    /// Intersection of two validity intervals, if non-empty
    pub fn intersect(&self, other: &StreamEvent) -> Option<(i64, i64)> {
        let start = self.start_time().max(other.start_time());
        let end = self.end_time().min(other.end_time());
        (start < end).then_some((start, end))
    }

    /// Replace the payload, keeping the timestamps
    pub fn with_payload(&self, payload: Row) -> StreamEvent {
        StreamEvent {
            kind: self.kind,
            sync_time: self.sync_time,
            other_time: self.other_time,
            payload,
        }
    }

    /// Check structural validity of the event
    pub fn validate(&self) -> EventResult<()> {
        match self.kind {
            EventKind::Interval if self.other_time <= self.sync_time => {
                Err(EventError::EmptyInterval {
                    start: self.sync_time,
                    end: self.other_time,
                })
            }
            EventKind::Interval if self.other_time == INFINITY => {
                Err(EventError::UnboundedInterval {
                    start: self.sync_time,
                })
            }
            EventKind::Start if self.sync_time == INFINITY => {
                Err(EventError::InvalidTimestamp {
                    timestamp: self.sync_time,
                    reason: "start edge at end of time".to_string(),
                })
            }
            EventKind::End if self.sync_time <= self.other_time => {
                Err(EventError::EmptyInterval {
                    start: self.other_time,
                    end: self.sync_time,
                })
            }
            _ => Ok(()),
        }
    }
}

impl Ord for StreamEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sync_time
            .cmp(&other.sync_time)
            .then_with(|| self.other_time.cmp(&other.other_time))
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.payload.cmp(&other.payload))
    }
}

impl PartialOrd for StreamEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EventKind::Punctuation => write!(f, "punctuation@{}", self.sync_time),
            EventKind::Start => write!(f, "start[{}, ∞) {}", self.sync_time, self.payload),
            EventKind::End => write!(
                f,
                "end[{}, {}) {}",
                self.other_time, self.sync_time, self.payload
            ),
            EventKind::Interval => write!(
                f,
                "[{}, {}) {}",
                self.sync_time, self.other_time, self.payload
            ),
        }
    }
}

/// Sort events into canonical order: sync time, other time, kind, payload
pub fn canonical_sort(events: &mut [StreamEvent]) {
    events.sort();
}

/// Drop punctuations and sort the remaining data events canonically
pub fn canonical_data(events: impl IntoIterator<Item = StreamEvent>) -> Vec<StreamEvent> {
    let mut data: Vec<StreamEvent> = events.into_iter().filter(StreamEvent::is_data).collect();
    canonical_sort(&mut data);
    data
}
