//! Batches of events flowing between operators
//!
//! A batch is either a plain vector of row events or a [`ColumnarBatch`].
//! Both carry the same logical content; operators that only understand rows
//! receive materialized events through [`EventBatch::into_events`].

mod bitmap;
mod column;
mod columnar;

pub use bitmap::Bitmap;
pub use column::Column;
pub use columnar::ColumnarBatch;

use crate::config::ExecutionMode;
use tempo_types::StreamEvent;

/// Unit of data exchanged on a plan edge
#[derive(Debug, Clone, PartialEq)]
pub enum EventBatch {
    Rows(Vec<StreamEvent>),
    Columnar(ColumnarBatch),
}

impl EventBatch {
    /// Package events for the given execution mode
    pub fn from_events(events: Vec<StreamEvent>, mode: ExecutionMode, capacity: usize) -> Vec<EventBatch> {
        if events.is_empty() {
            return Vec::new();
        }
        match mode {
            ExecutionMode::Row => vec![EventBatch::Rows(events)],
            ExecutionMode::Columnar => ColumnarBatch::from_events(events, capacity)
                .into_iter()
                .map(EventBatch::Columnar)
                .collect(),
        }
    }

    /// Number of live events
    pub fn len(&self) -> usize {
        match self {
            EventBatch::Rows(rows) => rows.len(),
            EventBatch::Columnar(batch) => batch.live_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_columnar(&self) -> bool {
        matches!(self, EventBatch::Columnar(_))
    }

    /// Materialize the batch as row events
    pub fn into_events(self) -> Vec<StreamEvent> {
        match self {
            EventBatch::Rows(rows) => rows,
            EventBatch::Columnar(batch) => batch.to_events(),
        }
    }
}
