//! Aggregation framework
//!
//! An [`Aggregate`] describes what to compute over the events of a group:
//!
//! - [`Aggregate::Count`]: number of contributing events
//! - [`Aggregate::Sum`]: checked integer sum, promoted to float when needed
//! - [`Aggregate::Average`]: arithmetic mean as a float
//! - [`Aggregate::Min`] / [`Aggregate::Max`]: extreme value under a [`Comparer`]
//! - [`Aggregate::Combine`]: two aggregates over the same events, combined
//!   once both are final
//!
//! Running state lives in an [`Accumulator`], which serializes with the
//! operator that owns it.
//!
//! # Example
//!
//! ```rust
//! use tempo_processor::aggregation::Aggregate;
//! use tempo_processor::expr::Expr;
//! use tempo_types::{row, StreamEvent, Value};
//!
//! let sum = Aggregate::sum(Expr::field(0));
//! let mut acc = sum.new_accumulator();
//! sum.update(&mut acc, &StreamEvent::point(1, row![3])).unwrap();
//! sum.update(&mut acc, &StreamEvent::point(2, row![4])).unwrap();
//!
//! assert_eq!(sum.finalize(&acc).unwrap(), Value::Int(7));
//! ```

mod accumulator;
pub mod snapshot;

pub use accumulator::{Accumulator, SumState};
pub use snapshot::SnapshotAggregate;

use crate::error::{AggregationError, ProcessorError, Result};
use crate::expr::Expr;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tempo_types::{Row, StreamEvent, Value};

/// Ordering function used by min/max aggregates
pub type CompareFn = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// Function joining the results of the two sides of a combined aggregate
pub type CombineFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Function building an output payload from a group key and aggregate value
pub type ResultFn = Arc<dyn Fn(&Row, &Value) -> Row + Send + Sync>;

/// Ordering used by [`Aggregate::Min`] and [`Aggregate::Max`]
#[derive(Clone, Default)]
pub enum Comparer {
    /// Canonical value order
    #[default]
    Natural,
    Custom(CompareFn),
}

impl Comparer {
    pub fn custom(f: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static) -> Self {
        Comparer::Custom(Arc::new(f))
    }

    /// Compare with the caller ordering, breaking exact ties by the canonical
    /// value order
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            Comparer::Natural => a.cmp(b),
            Comparer::Custom(f) => f(a, b).then_with(|| a.cmp(b)),
        }
    }
}

impl fmt::Debug for Comparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparer::Natural => f.write_str("natural"),
            Comparer::Custom(_) => f.write_str("custom"),
        }
    }
}

/// Builds output payloads of grouped aggregates
#[derive(Clone, Default)]
pub enum ResultSelector {
    /// Key fields followed by the aggregate value
    #[default]
    KeyThenValue,
    Function(ResultFn),
}

impl ResultSelector {
    pub fn function(f: impl Fn(&Row, &Value) -> Row + Send + Sync + 'static) -> Self {
        ResultSelector::Function(Arc::new(f))
    }

    pub fn select(&self, key: &Row, value: &Value) -> Row {
        match self {
            ResultSelector::KeyThenValue => {
                let mut row = key.clone();
                row.push(value.clone());
                row
            }
            ResultSelector::Function(f) => f(key, value),
        }
    }
}

impl fmt::Debug for ResultSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultSelector::KeyThenValue => f.write_str("key_then_value"),
            ResultSelector::Function(_) => f.write_str("<fn>"),
        }
    }
}

/// Aggregate definition
#[derive(Clone)]
pub enum Aggregate {
    Count,
    Sum(Expr),
    Average(Expr),
    Min(Expr, Comparer),
    Max(Expr, Comparer),
    Combine(Box<Aggregate>, Box<Aggregate>, CombineFn),
}

impl Aggregate {
    pub fn count() -> Self {
        Aggregate::Count
    }

    pub fn sum(input: Expr) -> Self {
        Aggregate::Sum(input)
    }

    pub fn average(input: Expr) -> Self {
        Aggregate::Average(input)
    }

    pub fn min(input: Expr) -> Self {
        Aggregate::Min(input, Comparer::Natural)
    }

    pub fn max(input: Expr) -> Self {
        Aggregate::Max(input, Comparer::Natural)
    }

    pub fn min_by(input: Expr, comparer: Comparer) -> Self {
        Aggregate::Min(input, comparer)
    }

    pub fn max_by(input: Expr, comparer: Comparer) -> Self {
        Aggregate::Max(input, comparer)
    }

    pub fn combine(
        left: Aggregate,
        right: Aggregate,
        combine: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Aggregate::Combine(Box::new(left), Box::new(right), Arc::new(combine))
    }

    /// Fresh accumulator for this aggregate
    pub fn new_accumulator(&self) -> Accumulator {
        match self {
            Aggregate::Count => Accumulator::Count(0),
            Aggregate::Sum(_) => Accumulator::Sum(SumState::default()),
            Aggregate::Average(_) => Accumulator::Average {
                sum: SumState::default(),
                count: 0,
            },
            Aggregate::Min(_, _) | Aggregate::Max(_, _) => Accumulator::Extreme(None),
            Aggregate::Combine(left, right, _) => Accumulator::Combine(
                Box::new(left.new_accumulator()),
                Box::new(right.new_accumulator()),
            ),
        }
    }

    /// Fold one event into the accumulator
    pub fn update(&self, acc: &mut Accumulator, event: &StreamEvent) -> Result<()> {
        match (self, acc) {
            (Aggregate::Count, Accumulator::Count(n)) => {
                *n += 1;
                Ok(())
            }
            (Aggregate::Sum(input), Accumulator::Sum(sum)) => {
                sum.add(&input.eval(event)?)?;
                Ok(())
            }
            (Aggregate::Average(input), Accumulator::Average { sum, count }) => {
                let value = input.eval(event)?;
                if !value.is_null() {
                    sum.add(&value)?;
                    *count += 1;
                }
                Ok(())
            }
            (Aggregate::Min(input, comparer), Accumulator::Extreme(current)) => {
                let value = input.eval(event)?;
                keep_extreme(current, value, |a, b| comparer.compare(a, b) == Ordering::Less);
                Ok(())
            }
            (Aggregate::Max(input, comparer), Accumulator::Extreme(current)) => {
                let value = input.eval(event)?;
                keep_extreme(current, value, |a, b| comparer.compare(a, b) == Ordering::Greater);
                Ok(())
            }
            (Aggregate::Combine(left, right, _), Accumulator::Combine(l, r)) => {
                left.update(l, event)?;
                right.update(r, event)
            }
            (aggregate, acc) => Err(corrupted(aggregate, acc)),
        }
    }

    /// Fold another accumulator of the same aggregate into `acc`
    pub fn merge(&self, acc: &mut Accumulator, other: &Accumulator) -> Result<()> {
        match (self, acc, other) {
            (Aggregate::Count, Accumulator::Count(a), Accumulator::Count(b)) => {
                *a += b;
                Ok(())
            }
            (Aggregate::Sum(_), Accumulator::Sum(a), Accumulator::Sum(b)) => Ok(a.merge(b)?),
            (
                Aggregate::Average(_),
                Accumulator::Average { sum, count },
                Accumulator::Average {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                sum.merge(other_sum)?;
                *count += other_count;
                Ok(())
            }
            (Aggregate::Min(_, comparer), Accumulator::Extreme(a), Accumulator::Extreme(b)) => {
                if let Some(value) = b.clone() {
                    keep_extreme(a, value, |x, y| comparer.compare(x, y) == Ordering::Less);
                }
                Ok(())
            }
            (Aggregate::Max(_, comparer), Accumulator::Extreme(a), Accumulator::Extreme(b)) => {
                if let Some(value) = b.clone() {
                    keep_extreme(a, value, |x, y| comparer.compare(x, y) == Ordering::Greater);
                }
                Ok(())
            }
            (
                Aggregate::Combine(left, right, _),
                Accumulator::Combine(l, r),
                Accumulator::Combine(other_l, other_r),
            ) => {
                left.merge(l, other_l)?;
                right.merge(r, other_r)
            }
            (aggregate, acc, _) => Err(corrupted(aggregate, acc)),
        }
    }

    /// Compute the result held by the accumulator
    pub fn finalize(&self, acc: &Accumulator) -> Result<Value> {
        match (self, acc) {
            (Aggregate::Count, Accumulator::Count(n)) => Ok(Value::Int(*n as i64)),
            (Aggregate::Sum(_), Accumulator::Sum(sum)) => Ok(sum.value()),
            (Aggregate::Average(_), Accumulator::Average { sum, count }) => {
                Ok(Accumulator::average(sum, *count))
            }
            (Aggregate::Min(_, _) | Aggregate::Max(_, _), Accumulator::Extreme(value)) => {
                Ok(value.clone().unwrap_or_default())
            }
            (Aggregate::Combine(left, right, combine), Accumulator::Combine(l, r)) => {
                let a = left.finalize(l)?;
                let b = right.finalize(r)?;
                Ok(combine(&a, &b))
            }
            (aggregate, acc) => Err(corrupted(aggregate, acc)),
        }
    }

    /// Aggregate a whole set of events at once
    pub fn compute<'a>(&self, events: impl IntoIterator<Item = &'a StreamEvent>) -> Result<Value> {
        let mut acc = self.new_accumulator();
        for event in events {
            self.update(&mut acc, event)?;
        }
        self.finalize(&acc)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum(_) => "sum",
            Aggregate::Average(_) => "average",
            Aggregate::Min(_, _) => "min",
            Aggregate::Max(_, _) => "max",
            Aggregate::Combine(_, _, _) => "combine",
        }
    }
}

fn keep_extreme(current: &mut Option<Value>, candidate: Value, better: impl Fn(&Value, &Value) -> bool) {
    if candidate.is_null() {
        return;
    }
    match current {
        Some(existing) if !better(&candidate, existing) => {}
        _ => *current = Some(candidate),
    }
}

fn corrupted(aggregate: &Aggregate, acc: &Accumulator) -> ProcessorError {
    AggregationError::CorruptedState {
        aggregation_type: aggregate.name().to_string(),
        details: format!("unexpected {} accumulator", acc.type_name()),
    }
    .into()
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Count => f.write_str("count()"),
            Aggregate::Sum(e) => write!(f, "sum({})", e),
            Aggregate::Average(e) => write!(f, "average({})", e),
            Aggregate::Min(e, c) => write!(f, "min({}, {:?})", e, c),
            Aggregate::Max(e, c) => write!(f, "max({}, {:?})", e, c),
            Aggregate::Combine(l, r, _) => write!(f, "combine({}, {})", l, r),
        }
    }
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
