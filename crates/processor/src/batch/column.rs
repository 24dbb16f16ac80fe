//! Typed payload columns

use std::sync::Arc;
use tempo_types::Value;

/// One payload field of a columnar batch, stored contiguously
///
/// Homogeneous fields use a typed vector; fields mixing types, nulls or
/// lists fall back to a generic `Values` column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Bool(Vec<bool>),
    Utf8(Vec<Arc<str>>),
    Values(Vec<Value>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int64(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Utf8(v) => v.len(),
            Column::Values(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Int64(_) => "int64",
            Column::Float64(_) => "float64",
            Column::Bool(_) => "bool",
            Column::Utf8(_) => "utf8",
            Column::Values(_) => "values",
        }
    }

    /// Value stored at `index`
    pub fn get(&self, index: usize) -> Value {
        match self {
            Column::Int64(v) => Value::Int(v[index]),
            Column::Float64(v) => Value::Float(v[index]),
            Column::Bool(v) => Value::Bool(v[index]),
            Column::Utf8(v) => Value::Str(Arc::clone(&v[index])),
            Column::Values(v) => v[index].clone(),
        }
    }

    /// Column holding `value` in `len` slots
    pub fn repeat(value: &Value, len: usize) -> Column {
        match value {
            Value::Int(n) => Column::Int64(vec![*n; len]),
            Value::Float(f) => Column::Float64(vec![*f; len]),
            Value::Bool(b) => Column::Bool(vec![*b; len]),
            Value::Str(s) => Column::Utf8(vec![Arc::clone(s); len]),
            other => Column::Values(vec![other.clone(); len]),
        }
    }

    /// Build the most specific column able to hold `values`
    pub fn from_values(values: Vec<Value>) -> Column {
        let slots = values.into_iter().map(Some).collect();
        Column::from_optional_values(slots)
    }

    /// Build a column where `None` marks a dead slot whose content is
    /// irrelevant; dead slots never influence the inferred column type
    pub fn from_optional_values(values: Vec<Option<Value>>) -> Column {
        let kind = infer_kind(values.iter().flatten());
        match kind {
            Kind::Int => Column::Int64(
                values
                    .into_iter()
                    .map(|v| v.and_then(|v| v.as_int()).unwrap_or_default())
                    .collect(),
            ),
            Kind::Float => Column::Float64(
                values
                    .into_iter()
                    .map(|v| match v {
                        Some(Value::Float(f)) => f,
                        _ => 0.0,
                    })
                    .collect(),
            ),
            Kind::Bool => Column::Bool(
                values
                    .into_iter()
                    .map(|v| v.and_then(|v| v.as_bool()).unwrap_or_default())
                    .collect(),
            ),
            Kind::Str => Column::Utf8(
                values
                    .into_iter()
                    .map(|v| match v {
                        Some(Value::Str(s)) => s,
                        _ => Arc::from(""),
                    })
                    .collect(),
            ),
            Kind::Mixed => Column::Values(values.into_iter().map(Option::unwrap_or_default).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    Float,
    Bool,
    Str,
    Mixed,
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a Value>) -> Kind {
    let mut kind: Option<Kind> = None;
    for value in values {
        let this = match value {
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Bool(_) => Kind::Bool,
            Value::Str(_) => Kind::Str,
            Value::Null | Value::List(_) => return Kind::Mixed,
        };
        match kind {
            None => kind = Some(this),
            Some(k) if k == this => {}
            Some(_) => return Kind::Mixed,
        }
    }
    kind.unwrap_or(Kind::Mixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infers_typed_columns() {
        let ints = Column::from_values(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(ints, Column::Int64(vec![1, 2]));

        let strs = Column::from_values(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(strs.type_name(), "utf8");
        assert_eq!(strs.get(1), Value::from("b"));
    }

    #[test]
    fn test_mixed_values_fall_back() {
        let mixed = Column::from_values(vec![Value::Int(1), Value::Float(2.0)]);
        assert_eq!(mixed.type_name(), "values");
        assert_eq!(mixed.get(0), Value::Int(1));
        assert_eq!(mixed.get(1), Value::Float(2.0));

        let nulls = Column::from_values(vec![Value::Null, Value::Int(1)]);
        assert_eq!(nulls.type_name(), "values");
    }

    #[test]
    fn test_dead_slots_do_not_affect_type() {
        let column = Column::from_optional_values(vec![Some(Value::Int(4)), None, Some(Value::Int(6))]);
        assert_eq!(column, Column::Int64(vec![4, 0, 6]));
    }

    #[test]
    fn test_repeat() {
        let column = Column::repeat(&Value::from("x"), 3);
        assert_eq!(column.len(), 3);
        assert_eq!(column.get(2), Value::from("x"));
    }
}
