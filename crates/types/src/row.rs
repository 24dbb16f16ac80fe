//! Event payload rows

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

/// Ordered list of payload fields
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<Value>,
}

impl Row {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    /// The empty row, used as payload of punctuations and as the key of
    /// ungrouped aggregations
    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Value> {
        self.fields
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.fields.push(value.into());
    }

    /// Concatenate two rows
    pub fn concat(&self, other: &Row) -> Row {
        let mut fields = Vec::with_capacity(self.len() + other.len());
        fields.extend_from_slice(&self.fields);
        fields.extend_from_slice(&other.fields);
        Row { fields }
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.fields[index]
    }
}

impl From<Vec<Value>> for Row {
    fn from(fields: Vec<Value>) -> Self {
        Self { fields }
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "}}")
    }
}

/// Build a [`Row`] from a list of values convertible into [`Value`]
///
/// ```
/// use tempo_types::{row, Value};
///
/// let r = row![1i64, "A", 2.5];
/// assert_eq!(r[1], Value::from("A"));
/// ```
#[macro_export]
macro_rules! row {
    () => {
        $crate::Row::empty()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Row::new(vec![$($crate::Value::from($value)),+])
    };
}
