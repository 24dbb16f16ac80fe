//! Window assignment
//!
//! Maps an event's validity interval to the span of hopping window results
//! it contributes to, without enumerating the window instances.
//!
//! # Example
//! ```text
//! size 10, period 5
//! [7, 8)   -> windows starting at 0, 5          -> results over [10, 20)
//! [12, 23) -> windows starting at 5, 10, 15, 20 -> results over [15, 35)
//! ```

use crate::error::{WindowError, WindowResult};
use tempo_types::{INFINITY, MIN_TIME};

/// Assigner for hopping (and tumbling) windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoppingAssigner {
    size: i64,
    period: i64,
}

impl HoppingAssigner {
    pub fn new(size: i64, period: i64) -> WindowResult<Self> {
        if size <= 0 {
            return Err(WindowError::InvalidWindowSize { size });
        }
        if period <= 0 {
            return Err(WindowError::InvalidPeriod { period });
        }
        Ok(Self { size, period })
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    /// Indexes `k` of the windows `[k·period, k·period + size)` that
    /// intersect `[start, end)`
    fn indexes(&self, start: i64, end: i64) -> (i128, i128) {
        let (size, period) = (self.size as i128, self.period as i128);
        let first = (start as i128 - size).div_euclid(period) + 1;
        let last = (end as i128 - 1).div_euclid(period);
        (first, last)
    }

    /// Close of window `k`, which is also where its result becomes valid
    fn close(&self, k: i128) -> i128 {
        k * self.period as i128 + self.size as i128
    }

    /// Span over which `[start, end)` contributes to window results
    ///
    /// Window `k` reports on `[close_k, close_k + period)`, so an event in
    /// windows `first..=last` contributes from `close_first` until
    /// `close_last + period`. `None` when the event falls in a gap between
    /// windows or its first window never closes.
    pub fn result_span(&self, start: i64, end: i64) -> Option<(i64, i64)> {
        let (first, last) = self.indexes(start, end);
        if first > last {
            return None;
        }
        let from = self.close(first);
        if from >= INFINITY as i128 {
            return None;
        }
        let until = if end == INFINITY {
            INFINITY
        } else {
            clamp(self.close(last) + self.period as i128)
        };
        Some((from as i64, until))
    }

    /// Time up to which window results are final once `punctuation` has
    /// been reached
    ///
    /// Every window closing at or before `punctuation` is final; the value
    /// returned is the end of the last such window's result interval. No
    /// event admitted at or after `punctuation` contributes before it.
    pub fn settled(&self, punctuation: i64) -> i64 {
        if punctuation == INFINITY {
            return INFINITY;
        }
        let k = (punctuation as i128 - self.size as i128).div_euclid(self.period as i128);
        clamp(self.close(k) + self.period as i128)
    }
}

fn clamp(time: i128) -> i64 {
    time.clamp(MIN_TIME as i128, INFINITY as i128) as i64
}
