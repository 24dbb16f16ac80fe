//! Struct-of-arrays event batches

use super::bitmap::Bitmap;
use super::column::Column;
use tempo_types::{Row, StreamEvent, Value};

/// Fixed-capacity batch of interval events stored column by column
///
/// Slots whose bit is cleared in the live bitmap are logically absent:
/// filters clear bits instead of moving data. Columnar batches only ever
/// carry `Interval` events; edges are paired at ingress and punctuations
/// travel as separate messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarBatch {
    sync: Vec<i64>,
    other: Vec<i64>,
    columns: Vec<Column>,
    live: Bitmap,
}

impl ColumnarBatch {
    /// Assemble a batch from raw parts
    ///
    /// All parts must describe the same number of slots.
    pub fn from_parts(sync: Vec<i64>, other: Vec<i64>, columns: Vec<Column>, live: Bitmap) -> Self {
        debug_assert_eq!(sync.len(), other.len());
        debug_assert_eq!(sync.len(), live.len());
        debug_assert!(columns.iter().all(|c| c.len() == sync.len()));
        Self {
            sync,
            other,
            columns,
            live,
        }
    }

    /// Pack events into batches of at most `capacity` slots
    ///
    /// A new batch starts whenever the payload arity changes, so every batch
    /// has a uniform set of columns.
    pub fn from_events(events: Vec<StreamEvent>, capacity: usize) -> Vec<ColumnarBatch> {
        let capacity = capacity.max(1);
        let mut batches = Vec::new();
        let mut pending: Vec<StreamEvent> = Vec::with_capacity(capacity.min(events.len()));

        for event in events {
            debug_assert!(event.is_data());
            let arity_changed = pending
                .first()
                .map(|first| first.payload.len() != event.payload.len())
                .unwrap_or(false);
            if pending.len() == capacity || arity_changed {
                batches.push(Self::pack(std::mem::take(&mut pending)));
            }
            pending.push(event);
        }
        if !pending.is_empty() {
            batches.push(Self::pack(pending));
        }
        batches
    }

    fn pack(events: Vec<StreamEvent>) -> ColumnarBatch {
        let len = events.len();
        let arity = events.first().map(|e| e.payload.len()).unwrap_or(0);
        let mut sync = Vec::with_capacity(len);
        let mut other = Vec::with_capacity(len);
        let mut fields: Vec<Vec<Value>> = (0..arity).map(|_| Vec::with_capacity(len)).collect();

        for event in events {
            sync.push(event.sync_time);
            other.push(event.other_time);
            for (field, value) in fields.iter_mut().zip(event.payload.into_fields()) {
                field.push(value);
            }
        }

        ColumnarBatch {
            sync,
            other,
            columns: fields.into_iter().map(Column::from_values).collect(),
            live: Bitmap::all_set(len),
        }
    }

    /// Number of slots, live or not
    pub fn slots(&self) -> usize {
        self.sync.len()
    }

    /// Number of live events
    pub fn live_count(&self) -> usize {
        self.live.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn sync_times(&self) -> &[i64] {
        &self.sync
    }

    pub fn other_times(&self) -> &[i64] {
        &self.other
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn live(&self) -> &Bitmap {
        &self.live
    }

    pub fn is_live(&self, slot: usize) -> bool {
        self.live.get(slot)
    }

    /// Indexes of live slots
    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.live.iter_ones()
    }

    /// Payload stored at `slot`
    pub fn row(&self, slot: usize) -> Row {
        self.columns.iter().map(|c| c.get(slot)).collect()
    }

    /// Event stored at `slot`
    pub fn event(&self, slot: usize) -> StreamEvent {
        StreamEvent::interval(self.sync[slot], self.other[slot], self.row(slot))
    }

    /// Clear the live bit of every slot whose mask entry is false
    pub fn apply_mask(&mut self, mask: &[bool]) {
        self.live.and_mask(mask);
    }

    pub fn kill(&mut self, slot: usize) {
        self.live.clear(slot);
    }

    /// Same timestamps and liveness with a new set of payload columns
    pub fn with_columns(&self, columns: Vec<Column>) -> ColumnarBatch {
        ColumnarBatch::from_parts(self.sync.clone(), self.other.clone(), columns, self.live.clone())
    }

    /// Materialize live slots as events, in slot order
    pub fn to_events(&self) -> Vec<StreamEvent> {
        self.live_slots().map(|slot| self.event(slot)).collect()
    }
}
