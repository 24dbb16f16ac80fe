//! Binary temporal operators
//!
//! All joins match events by key and by temporal overlap:
//!
//! - [`EquiJoinOperator`]: every same-key overlapping pair, over the
//!   intersection of the two intervals
//! - [`AntiJoinOperator`]: the parts of each left interval during which no
//!   same-key right interval is live
//! - [`ClipOperator`]: each left interval cut at the first same-key right
//!   start after it begins
//!
//! Port 0 is the left input and port 1 the right input.

mod anti;
mod clip;
mod equi;

pub use anti::AntiJoinOperator;
pub use clip::ClipOperator;
pub use equi::EquiJoinOperator;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tempo_types::{Row, StreamEvent};

pub(crate) const LEFT: usize = 0;
pub(crate) const RIGHT: usize = 1;

/// Function building a joined payload from a left and a right payload
pub type JoinFn = Arc<dyn Fn(&Row, &Row) -> Row + Send + Sync>;

/// Payload combiner of an equi-join
#[derive(Clone, Default)]
pub enum JoinCombiner {
    /// Left fields followed by right fields
    #[default]
    Concat,
    Function(JoinFn),
}

impl JoinCombiner {
    pub fn function(f: impl Fn(&Row, &Row) -> Row + Send + Sync + 'static) -> Self {
        JoinCombiner::Function(Arc::new(f))
    }

    pub fn combine(&self, left: &Row, right: &Row) -> Row {
        match self {
            JoinCombiner::Concat => left.concat(right),
            JoinCombiner::Function(f) => f(left, right),
        }
    }
}

impl fmt::Debug for JoinCombiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinCombiner::Concat => f.write_str("concat"),
            JoinCombiner::Function(_) => f.write_str("<fn>"),
        }
    }
}

/// Live intervals of one join side, by key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct IntervalIndex {
    entries: BTreeMap<Row, Vec<StreamEvent>>,
}

impl IntervalIndex {
    pub(crate) fn insert(&mut self, key: Row, event: StreamEvent) {
        self.entries.entry(key).or_default().push(event);
    }

    pub(crate) fn get(&self, key: &Row) -> &[StreamEvent] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop every interval ending at or before `time`
    pub(crate) fn expire(&mut self, time: i64) -> usize {
        let mut expired = 0;
        self.entries.retain(|_, events| {
            let before = events.len();
            events.retain(|e| e.other_time > time);
            expired += before - events.len();
            !events.is_empty()
        });
        expired
    }

    /// Remove and return the intervals matching `resolved`, by key
    pub(crate) fn take_where(&mut self, resolved: impl Fn(&StreamEvent) -> bool) -> Vec<(Row, StreamEvent)> {
        let mut taken = Vec::new();
        self.entries.retain(|key, events| {
            let (done, pending): (Vec<_>, Vec<_>) = events.drain(..).partition(|e| resolved(e));
            taken.extend(done.into_iter().map(|e| (key.clone(), e)));
            *events = pending;
            !events.is_empty()
        });
        taken
    }

    pub(crate) fn earliest_sync(&self) -> Option<i64> {
        self.entries
            .values()
            .flat_map(|events| events.iter().map(|e| e.sync_time))
            .min()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}
