//! Payload expressions, predicates, projections and key selectors
//!
//! [`Expr`] is a small, inspectable expression tree. Because its structure
//! is visible, it can be evaluated either per event or vectorized over a
//! [`ColumnarBatch`]. Opaque closures are also accepted by [`Predicate`] and
//! [`Projection`]; those always evaluate per event ("general projection
//! fallback") even inside a columnar batch.
//!
//! Row and columnar evaluation agree exactly: comparisons use the total order
//! of [`Value`], integer arithmetic is checked, and errors are only reported
//! for live slots.

use crate::batch::{Column, ColumnarBatch};
use crate::error::{ExpressionError, ExpressionResult};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tempo_types::{Row, StreamEvent, Value};

/// Binary operators understood by [`Expr`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            BinaryOp::Eq => ordering == Ordering::Equal,
            BinaryOp::Ne => ordering != Ordering::Equal,
            BinaryOp::Lt => ordering == Ordering::Less,
            BinaryOp::Le => ordering != Ordering::Greater,
            BinaryOp::Gt => ordering == Ordering::Greater,
            BinaryOp::Ge => ordering != Ordering::Less,
            _ => false,
        }
    }
}

/// Expression over an event's payload and timestamps
#[derive(Debug, Clone)]
pub enum Expr {
    /// Payload field by position
    Field(usize),
    Literal(Value),
    /// The event's start time
    SyncTime,
    /// The event's end time
    OtherTime,
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    /// Build a list value from several expressions
    Tuple(Vec<Expr>),
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn field(index: usize) -> Expr {
        Expr::Field(index)
    }

    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn tuple(items: Vec<Expr>) -> Expr {
        Expr::Tuple(items)
    }

    pub fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn add(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Add, right)
    }

    pub fn sub(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Sub, right)
    }

    pub fn mul(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Mul, right)
    }

    pub fn div(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Div, right)
    }

    pub fn rem(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Rem, right)
    }

    pub fn equals(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_equals(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Ne, right)
    }

    pub fn lt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn le(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Le, right)
    }

    pub fn gt(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn ge(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Ge, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Expr {
        self.binary(BinaryOp::Or, right)
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Evaluate against a single event
    pub fn eval(&self, event: &StreamEvent) -> ExpressionResult<Value> {
        self.eval_parts(&event.payload, event.start_time(), event.end_time())
    }

    /// Evaluate against a payload and its validity interval
    pub fn eval_parts(&self, row: &Row, start: i64, end: i64) -> ExpressionResult<Value> {
        match self {
            Expr::Field(index) => row.get(*index).cloned().ok_or(ExpressionError::FieldOutOfRange {
                index: *index,
                arity: row.len(),
            }),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::SyncTime => Ok(Value::Int(start)),
            Expr::OtherTime => Ok(Value::Int(end)),
            Expr::Binary { op, left, right } => {
                let l = left.eval_parts(row, start, end)?;
                let r = right.eval_parts(row, start, end)?;
                apply_binary(*op, &l, &r)
            }
            Expr::Not(inner) => match inner.eval_parts(row, start, end)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(ExpressionError::NotBoolean {
                    actual: other.type_name().to_string(),
                }),
            },
            Expr::Tuple(items) => items
                .iter()
                .map(|item| item.eval_parts(row, start, end))
                .collect::<ExpressionResult<Vec<_>>>()
                .map(Value::List),
        }
    }

    /// Evaluate over every slot of a columnar batch
    ///
    /// Dead slots hold unspecified values in the result.
    pub fn eval_column(&self, batch: &ColumnarBatch) -> ExpressionResult<Column> {
        let len = batch.slots();
        match self {
            Expr::Field(index) => match batch.column(*index) {
                Some(column) => Ok(column.clone()),
                // Row evaluation never sees a batch without live events
                None if batch.is_empty() => Ok(Column::Values(vec![Value::Null; len])),
                None => Err(ExpressionError::FieldOutOfRange {
                    index: *index,
                    arity: batch.arity(),
                }),
            },
            Expr::Literal(value) => Ok(Column::repeat(value, len)),
            Expr::SyncTime => Ok(Column::Int64(batch.sync_times().to_vec())),
            Expr::OtherTime => Ok(Column::Int64(batch.other_times().to_vec())),
            Expr::Binary { op, left, right } => {
                let l = left.eval_column(batch)?;
                let r = right.eval_column(batch)?;
                binary_columns(*op, &l, &r, batch)
            }
            Expr::Not(inner) => match inner.eval_column(batch)? {
                Column::Bool(values) => Ok(Column::Bool(values.into_iter().map(|b| !b).collect())),
                other => per_slot(batch, |slot| match other.get(slot) {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    v => Err(ExpressionError::NotBoolean {
                        actual: v.type_name().to_string(),
                    }),
                }),
            },
            Expr::Tuple(items) => {
                let columns = items
                    .iter()
                    .map(|item| item.eval_column(batch))
                    .collect::<ExpressionResult<Vec<_>>>()?;
                per_slot(batch, |slot| {
                    Ok(Value::List(columns.iter().map(|c| c.get(slot)).collect()))
                })
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(index) => write!(f, "${}", index),
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::SyncTime => f.write_str("sync_time"),
            Expr::OtherTime => f.write_str("other_time"),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Not(inner) => write!(f, "!{}", inner),
            Expr::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

fn type_mismatch(op: BinaryOp, left: &Value, right: &Value) -> ExpressionError {
    ExpressionError::TypeMismatch {
        op: op.symbol().to_string(),
        left: left.type_name().to_string(),
        right: right.type_name().to_string(),
    }
}

/// Apply a binary operator to two values
pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> ExpressionResult<Value> {
    if op.is_comparison() {
        return Ok(Value::Bool(op.accepts(left.cmp(right))));
    }
    match op {
        BinaryOp::And | BinaryOp::Or => match (left, right) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if op == BinaryOp::And {
                *a && *b
            } else {
                *a || *b
            })),
            _ => Err(type_mismatch(op, left, right)),
        },
        _ => arithmetic(op, left, right),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> ExpressionResult<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b).map(Value::Int),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = left.as_float().unwrap_or_default();
            let b = right.as_float().unwrap_or_default();
            Ok(Value::Float(float_arithmetic(op, a, b)))
        }
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::str(format!("{}{}", a, b))),
        _ => Err(type_mismatch(op, left, right)),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> ExpressionResult<i64> {
    let overflow = || ExpressionError::Overflow {
        op: op.symbol().to_string(),
    };
    match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow),
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow),
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow),
        BinaryOp::Div if b == 0 => Err(ExpressionError::DivisionByZero),
        BinaryOp::Div => a.checked_div(b).ok_or_else(overflow),
        BinaryOp::Rem if b == 0 => Err(ExpressionError::DivisionByZero),
        BinaryOp::Rem => a.checked_rem(b).ok_or_else(overflow),
        _ => Err(overflow()),
    }
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => f64::NAN,
    }
}

/// Evaluate `f` for every live slot and pack the results into a column
fn per_slot(
    batch: &ColumnarBatch,
    mut f: impl FnMut(usize) -> ExpressionResult<Value>,
) -> ExpressionResult<Column> {
    let mut values: Vec<Option<Value>> = vec![None; batch.slots()];
    for slot in batch.live_slots() {
        values[slot] = Some(f(slot)?);
    }
    Ok(Column::from_optional_values(values))
}

fn binary_columns(
    op: BinaryOp,
    left: &Column,
    right: &Column,
    batch: &ColumnarBatch,
) -> ExpressionResult<Column> {
    match (left, right) {
        (Column::Int64(a), Column::Int64(b)) if op.is_comparison() => Ok(Column::Bool(
            a.iter().zip(b).map(|(x, y)| op.accepts(x.cmp(y))).collect(),
        )),
        (Column::Float64(a), Column::Float64(b)) if op.is_comparison() => Ok(Column::Bool(
            a.iter().zip(b).map(|(x, y)| op.accepts(x.total_cmp(y))).collect(),
        )),
        (Column::Utf8(a), Column::Utf8(b)) if op.is_comparison() => Ok(Column::Bool(
            a.iter().zip(b).map(|(x, y)| op.accepts(x.cmp(y))).collect(),
        )),
        (Column::Bool(a), Column::Bool(b)) if matches!(op, BinaryOp::And | BinaryOp::Or) => {
            Ok(Column::Bool(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| if op == BinaryOp::And { *x && *y } else { *x || *y })
                    .collect(),
            ))
        }
        (Column::Int64(a), Column::Int64(b)) if op.is_arithmetic() => {
            let mut out = vec![0i64; a.len()];
            for slot in batch.live_slots() {
                out[slot] = int_arithmetic(op, a[slot], b[slot])?;
            }
            Ok(Column::Int64(out))
        }
        (Column::Float64(a), Column::Float64(b)) if op.is_arithmetic() => {
            Ok(Column::Float64(
                a.iter().zip(b).map(|(x, y)| float_arithmetic(op, *x, *y)).collect(),
            ))
        }
        _ => per_slot(batch, |slot| apply_binary(op, &left.get(slot), &right.get(slot))),
    }
}

/// Opaque per-event predicate
pub type PredicateFn = Arc<dyn Fn(&StreamEvent) -> bool + Send + Sync>;

/// Opaque per-payload projection
pub type ProjectionFn = Arc<dyn Fn(&Row) -> Row + Send + Sync>;

/// Filter condition of a `where` operator
#[derive(Clone)]
pub enum Predicate {
    Expr(Expr),
    Function(PredicateFn),
}

impl Predicate {
    pub fn expr(expr: Expr) -> Self {
        Predicate::Expr(expr)
    }

    pub fn function(f: impl Fn(&StreamEvent) -> bool + Send + Sync + 'static) -> Self {
        Predicate::Function(Arc::new(f))
    }

    /// Whether the predicate can be evaluated vectorized
    pub fn is_vectorized(&self) -> bool {
        matches!(self, Predicate::Expr(_))
    }

    pub fn matches(&self, event: &StreamEvent) -> ExpressionResult<bool> {
        match self {
            Predicate::Expr(expr) => match expr.eval(event)? {
                Value::Bool(b) => Ok(b),
                other => Err(ExpressionError::NotBoolean {
                    actual: other.type_name().to_string(),
                }),
            },
            Predicate::Function(f) => Ok(f(event)),
        }
    }

    /// Clear the live bit of every slot that does not satisfy the predicate
    pub fn filter_batch(&self, batch: &mut ColumnarBatch) -> ExpressionResult<()> {
        let mut mask = vec![true; batch.slots()];
        match self {
            Predicate::Expr(expr) => match expr.eval_column(batch)? {
                Column::Bool(values) => mask.copy_from_slice(&values),
                column => {
                    for slot in batch.live_slots() {
                        mask[slot] = match column.get(slot) {
                            Value::Bool(b) => b,
                            other => {
                                return Err(ExpressionError::NotBoolean {
                                    actual: other.type_name().to_string(),
                                })
                            }
                        };
                    }
                }
            },
            Predicate::Function(f) => {
                for slot in batch.live_slots() {
                    mask[slot] = f(&batch.event(slot));
                }
            }
        }
        batch.apply_mask(&mask);
        Ok(())
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Expr(expr) => write!(f, "{}", expr),
            Predicate::Function(_) => f.write_str("<fn>"),
        }
    }
}

impl From<Expr> for Predicate {
    fn from(expr: Expr) -> Self {
        Predicate::Expr(expr)
    }
}

/// Payload transformation of a `select` operator
#[derive(Clone)]
pub enum Projection {
    /// One expression per output field
    Columns(Vec<Expr>),
    /// Arbitrary function, evaluated per event
    General(ProjectionFn),
}

impl Projection {
    pub fn columns(exprs: Vec<Expr>) -> Self {
        Projection::Columns(exprs)
    }

    pub fn general(f: impl Fn(&Row) -> Row + Send + Sync + 'static) -> Self {
        Projection::General(Arc::new(f))
    }

    pub fn is_vectorized(&self) -> bool {
        matches!(self, Projection::Columns(_))
    }

    pub fn project(&self, event: &StreamEvent) -> ExpressionResult<Row> {
        match self {
            Projection::Columns(exprs) => exprs.iter().map(|e| e.eval(event)).collect(),
            Projection::General(f) => Ok(f(&event.payload)),
        }
    }

    /// Project a columnar batch; `None` means the projection needs row-based
    /// evaluation
    pub fn project_batch(&self, batch: &ColumnarBatch) -> ExpressionResult<Option<ColumnarBatch>> {
        match self {
            Projection::Columns(exprs) => {
                let columns = exprs
                    .iter()
                    .map(|e| e.eval_column(batch))
                    .collect::<ExpressionResult<Vec<_>>>()?;
                Ok(Some(batch.with_columns(columns)))
            }
            Projection::General(_) => Ok(None),
        }
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Columns(exprs) => {
                f.write_str("[")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                f.write_str("]")
            }
            Projection::General(_) => f.write_str("<fn>"),
        }
    }
}

/// Grouping or join key made of one or more expressions
///
/// An empty selector puts every event under the same key.
#[derive(Debug, Clone, Default)]
pub struct KeySelector {
    exprs: Vec<Expr>,
}

impl KeySelector {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fields(indexes: &[usize]) -> Self {
        Self {
            exprs: indexes.iter().map(|i| Expr::Field(*i)).collect(),
        }
    }

    pub fn exprs(exprs: Vec<Expr>) -> Self {
        Self { exprs }
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn key_of(&self, event: &StreamEvent) -> ExpressionResult<Row> {
        self.exprs.iter().map(|e| e.eval(event)).collect()
    }

    /// Keys of every live slot of a batch, paired with the slot index
    pub fn keys_of_batch(&self, batch: &ColumnarBatch) -> ExpressionResult<Vec<(usize, Row)>> {
        let columns = self
            .exprs
            .iter()
            .map(|e| e.eval_column(batch))
            .collect::<ExpressionResult<Vec<_>>>()?;
        Ok(batch
            .live_slots()
            .map(|slot| (slot, columns.iter().map(|c| c.get(slot)).collect()))
            .collect())
    }
}

impl fmt::Display for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("key(")?;
        for (i, e) in self.exprs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", e)?;
        }
        f.write_str(")")
    }
}
