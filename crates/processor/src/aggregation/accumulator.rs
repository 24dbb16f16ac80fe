//! Serializable accumulator state

use crate::error::{AggregationError, AggregationResult};
use serde::{Deserialize, Serialize};
use tempo_types::Value;

/// Running state of one aggregate
///
/// Accumulators hold plain values only, so they checkpoint with the rest of
/// an operator's state. Behavior that cannot be serialized (comparers,
/// combine functions) lives on the [`Aggregate`](super::Aggregate) that drives
/// the accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Accumulator {
    Count(u64),
    Sum(SumState),
    Average { sum: SumState, count: u64 },
    Extreme(Option<Value>),
    Combine(Box<Accumulator>, Box<Accumulator>),
}

/// Running sum that stays integral until a float is seen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SumState {
    int_total: i64,
    float_total: f64,
    saw_float: bool,
}

impl SumState {
    pub fn add(&mut self, value: &Value) -> AggregationResult<()> {
        match value {
            Value::Null => Ok(()),
            Value::Int(n) => {
                self.int_total = self.int_total.checked_add(*n).ok_or_else(|| {
                    AggregationError::NumericOverflow {
                        operation: "sum".to_string(),
                    }
                })?;
                Ok(())
            }
            Value::Float(f) => {
                self.float_total += f;
                self.saw_float = true;
                Ok(())
            }
            other => Err(AggregationError::TypeMismatch {
                operation: "sum".to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    pub fn merge(&mut self, other: &SumState) -> AggregationResult<()> {
        self.add(&Value::Int(other.int_total))?;
        self.float_total += other.float_total;
        self.saw_float |= other.saw_float;
        Ok(())
    }

    pub fn value(&self) -> Value {
        if self.saw_float {
            Value::Float(self.int_total as f64 + self.float_total)
        } else {
            Value::Int(self.int_total)
        }
    }

    fn as_f64(&self) -> f64 {
        self.int_total as f64 + self.float_total
    }
}

impl Accumulator {
    pub fn type_name(&self) -> &'static str {
        match self {
            Accumulator::Count(_) => "count",
            Accumulator::Sum(_) => "sum",
            Accumulator::Average { .. } => "average",
            Accumulator::Extreme(_) => "extreme",
            Accumulator::Combine(_, _) => "combine",
        }
    }

    /// Average of the accumulated values, `Null` when nothing was counted
    pub(crate) fn average(sum: &SumState, count: u64) -> Value {
        if count == 0 {
            Value::Null
        } else {
            Value::Float(sum.as_f64() / count as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_stays_integral() {
        let mut sum = SumState::default();
        sum.add(&Value::Int(3)).unwrap();
        sum.add(&Value::Null).unwrap();
        sum.add(&Value::Int(4)).unwrap();
        assert_eq!(sum.value(), Value::Int(7));
    }

    #[test]
    fn test_sum_promotes_to_float() {
        let mut sum = SumState::default();
        sum.add(&Value::Int(1)).unwrap();
        sum.add(&Value::Float(0.5)).unwrap();
        assert_eq!(sum.value(), Value::Float(1.5));
    }

    #[test]
    fn test_sum_overflow() {
        let mut sum = SumState::default();
        sum.add(&Value::Int(i64::MAX)).unwrap();
        let err = sum.add(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, AggregationError::NumericOverflow { .. }));
    }

    #[test]
    fn test_sum_rejects_strings() {
        let mut sum = SumState::default();
        assert!(matches!(
            sum.add(&Value::from("x")),
            Err(AggregationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_sum_merge() {
        let mut a = SumState::default();
        a.add(&Value::Int(2)).unwrap();
        let mut b = SumState::default();
        b.add(&Value::Float(1.5)).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.value(), Value::Float(3.5));
    }

    #[test]
    fn test_average_of_nothing_is_null() {
        assert_eq!(Accumulator::average(&SumState::default(), 0), Value::Null);
    }

    #[test]
    fn test_accumulator_serde() {
        let acc = Accumulator::Combine(
            Box::new(Accumulator::Extreme(Some(Value::from("a")))),
            Box::new(Accumulator::Count(3)),
        );
        let bytes = bincode::serialize(&acc).unwrap();
        let back: Accumulator = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, acc);
    }
}
