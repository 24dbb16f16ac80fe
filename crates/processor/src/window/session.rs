//! Grouped session window aggregate

use crate::aggregation::{Aggregate, ResultSelector};
use crate::error::{Result, StateResult};
use crate::expr::KeySelector;
use crate::pipeline::{Operator, OperatorContext, OperatorKind};
use crate::state::{decode_state, encode_state};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tempo_types::{Row, StreamEvent, MIN_TIME};
use tracing::{debug, trace};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionState {
    /// Events of sessions that may still grow, per key, in canonical order
    pending: BTreeMap<Row, Vec<StreamEvent>>,
    punctuation: i64,
}

/// A closed run of events of one key
struct Session {
    first: i64,
    end: i64,
    len: usize,
}

/// Aggregates every key over session windows
///
/// Events are buffered per key until a punctuation proves their session
/// closed. Buffers are kept sorted as events arrive and sessions are formed
/// over them, so the result does not depend on arrival order.
#[derive(Debug)]
pub struct SessionWindowOperator {
    timeout: i64,
    max_duration: Option<i64>,
    key: KeySelector,
    aggregate: Aggregate,
    selector: ResultSelector,
    state: SessionState,
}

impl SessionWindowOperator {
    pub fn new(
        timeout: i64,
        max_duration: Option<i64>,
        key: KeySelector,
        aggregate: Aggregate,
        selector: ResultSelector,
    ) -> Self {
        Self {
            timeout,
            max_duration,
            key,
            aggregate,
            selector,
            state: SessionState {
                pending: BTreeMap::new(),
                punctuation: MIN_TIME,
            },
        }
    }

    fn cap(&self, first: i64) -> i64 {
        match self.max_duration {
            Some(max) => first.saturating_add(max),
            None => i64::MAX,
        }
    }

    /// Split sorted events into sessions, stopping at the first one that is
    /// still open at `punctuation`
    fn closed_sessions(&self, events: &[StreamEvent], punctuation: i64) -> Vec<Session> {
        let mut sessions = Vec::new();
        let mut i = 0;
        while i < events.len() {
            let first = events[i].sync_time;
            let cap = self.cap(first);
            let mut last = first;
            let mut j = i + 1;
            while j < events.len() {
                let t = events[j].sync_time;
                if t >= last.saturating_add(self.timeout) || t >= cap {
                    break;
                }
                last = t;
                j += 1;
            }
            let end = last.saturating_add(self.timeout).min(cap);
            if end > punctuation {
                break;
            }
            sessions.push(Session {
                first,
                end,
                len: j - i,
            });
            i = j;
        }
        sessions
    }

    fn close_sessions(&mut self, punctuation: i64, ctx: &mut OperatorContext) -> Result<()> {
        let mut results = Vec::new();
        let keys: Vec<Row> = self.state.pending.keys().cloned().collect();
        for key in keys {
            let Some(mut events) = self.state.pending.remove(&key) else {
                continue;
            };
            let sessions = self.closed_sessions(&events, punctuation);
            let consumed: usize = sessions.iter().map(|s| s.len).sum();
            let mut offset = 0;
            for session in &sessions {
                let value = self
                    .aggregate
                    .compute(&events[offset..offset + session.len])?;
                offset += session.len;
                let payload = self.selector.select(&key, &value);
                results.push(StreamEvent::interval(session.first, session.end, payload));
            }
            events.drain(..consumed);
            if !events.is_empty() {
                self.state.pending.insert(key, events);
            }
        }
        if !results.is_empty() {
            debug!(sessions = results.len(), punctuation, "closing sessions");
        }
        ctx.emit_events(results);
        Ok(())
    }

    /// Earliest sync time still buffered
    fn earliest_pending(&self) -> Option<i64> {
        self.state
            .pending
            .values()
            .filter_map(|events| events.first().map(|e| e.sync_time))
            .min()
    }
}

impl Operator for SessionWindowOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::SessionWindow
    }

    fn descriptor(&self) -> String {
        let max = self
            .max_duration
            .map(|m| m.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "session({}, {}) {} {} {:?}",
            self.timeout, max, self.key, self.aggregate, self.selector
        )
    }

    fn on_rows(&mut self, _port: usize, events: Vec<StreamEvent>, _ctx: &mut OperatorContext) -> Result<()> {
        trace!(events = events.len(), "session window input");
        for event in events {
            let key = self.key.key_of(&event)?;
            let events = self.state.pending.entry(key).or_default();
            let at = events.partition_point(|e| *e <= event);
            events.insert(at, event);
        }
        Ok(())
    }

    fn on_punctuation(&mut self, _port: usize, time: i64, ctx: &mut OperatorContext) -> Result<()> {
        self.close_sessions(time, ctx)?;
        let low = self.earliest_pending().map_or(time, |t| t.min(time));
        ctx.advance_punctuation(&mut self.state.punctuation, low);
        Ok(())
    }

    fn checkpoint(&self) -> StateResult<Vec<u8>> {
        encode_state("session_window", &self.state)
    }

    fn restore(&mut self, state: &[u8]) -> StateResult<()> {
        self.state = decode_state("session_window", state)?;
        Ok(())
    }
}
