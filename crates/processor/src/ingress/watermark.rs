//! High-water tracking and periodic low-watermark generation
//!
//! The tracker keeps the maximum admitted sync time per partition. The low
//! watermark offered to downstream operators is the minimum over partitions,
//! so a slow partition holds progress back for the whole input.

use crate::error::{ProcessorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tempo_types::{Row, MIN_TIME};
use tracing::trace;

/// Periodic punctuation generation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkPolicy {
    /// Generated punctuations are multiples of this period
    pub generation_period: i64,
    /// How far generated punctuations trail the high-water mark
    pub lateness: i64,
}

impl WatermarkPolicy {
    pub fn new(generation_period: i64, lateness: i64) -> Result<Self> {
        if generation_period <= 0 {
            return Err(ProcessorError::Configuration(format!(
                "watermark generation period must be positive, got {}",
                generation_period
            )));
        }
        if lateness < 0 {
            return Err(ProcessorError::Configuration(format!(
                "watermark lateness must not be negative, got {}",
                lateness
            )));
        }
        Ok(Self {
            generation_period,
            lateness,
        })
    }

    /// Punctuation implied by a high-water mark
    ///
    /// Never exceeds `high_water - reorder`, so events still inside the
    /// reorder tolerance stay admissible.
    pub fn candidate(&self, high_water: i64, reorder: u32) -> i64 {
        if high_water == MIN_TIME {
            return MIN_TIME;
        }
        let trailing = high_water.saturating_sub(self.lateness);
        let quantized = trailing
            .div_euclid(self.generation_period)
            .checked_mul(self.generation_period)
            .unwrap_or(MIN_TIME);
        quantized.min(high_water.saturating_sub(i64::from(reorder)))
    }
}

impl fmt::Display for WatermarkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "watermark(period {}, lateness {})",
            self.generation_period, self.lateness
        )
    }
}

/// Maximum admitted sync time per partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighWaterTracker {
    partitions: BTreeMap<Row, i64>,
}

impl HighWaterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// High-water mark of a partition, `MIN_TIME` when nothing was admitted
    pub fn high_water(&self, partition: &Row) -> i64 {
        self.partitions.get(partition).copied().unwrap_or(MIN_TIME)
    }

    /// Record an admitted sync time and return the partition's high-water mark
    pub fn observe(&mut self, partition: &Row, time: i64) -> i64 {
        let entry = self.partitions.entry(partition.clone()).or_insert(MIN_TIME);
        if time > *entry {
            trace!(partition = %partition, time, "advanced high-water mark");
            *entry = time;
        }
        *entry
    }

    /// Minimum over partitions of the punctuation each one would allow
    pub fn low_watermark(&self, policy: &WatermarkPolicy, reorder: u32) -> Option<i64> {
        self.partitions
            .values()
            .map(|&high_water| policy.candidate(high_water, reorder))
            .min()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}
