//! Numeric aggregations (sum, average, min, max).
//!
//! Each aggregation works in the numeric kind declared for its selector.
//! Elements are converted into that kind; nothing is widened or coerced
//! across kinds afterward.

use std::{cmp::Ordering, fmt};

use rust_decimal::{
    Decimal,
    prelude::{FromPrimitive, ToPrimitive},
};

use crate::{
    error::{LogicalError, QueryResult},
    query::ast::{NumericAggregate, Selector},
    value::Value,
};

/// Declared numeric type of an aggregation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Int32,
    Int64,
    Double,
    Decimal,
    Float,
}

/// Result of a numeric aggregation or count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(Decimal),
    Float(f32),
}

impl Number {
    pub fn zero(kind: NumericKind) -> Number {
        match kind {
            NumericKind::Int32 => Number::Int32(0),
            NumericKind::Int64 => Number::Int64(0),
            NumericKind::Double => Number::Double(0.0),
            NumericKind::Decimal => Number::Decimal(Decimal::ZERO),
            NumericKind::Float => Number::Float(0.0),
        }
    }

    pub fn kind(&self) -> NumericKind {
        match self {
            Number::Int32(_) => NumericKind::Int32,
            Number::Int64(_) => NumericKind::Int64,
            Number::Double(_) => NumericKind::Double,
            Number::Decimal(_) => NumericKind::Decimal,
            Number::Float(_) => NumericKind::Float,
        }
    }

    /// Whole decimals become integers; other decimals lose precision.
    pub fn to_value(self) -> Value {
        match self {
            Number::Int32(n) => Value::Integer(n as i64),
            Number::Int64(n) => Value::Integer(n),
            Number::Double(n) => Value::Float(n),
            Number::Float(n) => Value::Float(n as f64),
            Number::Decimal(d) => {
                if d.is_integer()
                    && let Some(n) = d.to_i64()
                {
                    Value::Integer(n)
                } else {
                    Value::Float(d.to_f64().unwrap_or(f64::NAN))
                }
            }
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int32(n) => *n as f64,
            Number::Int64(n) => *n as f64,
            Number::Double(n) => *n,
            Number::Float(n) => *n as f64,
            Number::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Number::Int32(n) => Some(*n as i64),
            Number::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert a selector result into `kind`. Null is skipped.
    pub fn from_value(value: &Value, kind: NumericKind) -> QueryResult<Option<Number>> {
        if matches!(value, Value::Null) {
            return Ok(None);
        }
        let mismatch =
            || LogicalError::TypeError(format!("expected {:?}, found {}", kind, value.type_name()));

        let number = match kind {
            NumericKind::Int32 => {
                let n = value.as_int().ok_or_else(mismatch)?;
                Number::Int32(i32::try_from(n).map_err(|_| mismatch())?)
            }
            NumericKind::Int64 => Number::Int64(value.as_int().ok_or_else(mismatch)?),
            NumericKind::Double => Number::Double(value.as_float().ok_or_else(mismatch)?),
            NumericKind::Float => Number::Float(value.as_float().ok_or_else(mismatch)? as f32),
            NumericKind::Decimal => {
                let d = match value {
                    Value::Integer(n) => Decimal::from_i64(*n),
                    Value::Float(n) => Decimal::from_f64(*n),
                    _ => None,
                };
                Number::Decimal(d.ok_or_else(mismatch)?)
            }
        };
        Ok(Some(number))
    }

    fn checked_add(self, other: Number, op: &'static str) -> QueryResult<Number> {
        let overflow = || LogicalError::Overflow(op);
        Ok(match (self, other) {
            (Number::Int32(a), Number::Int32(b)) => {
                Number::Int32(a.checked_add(b).ok_or_else(overflow)?)
            }
            (Number::Int64(a), Number::Int64(b)) => {
                Number::Int64(a.checked_add(b).ok_or_else(overflow)?)
            }
            (Number::Double(a), Number::Double(b)) => Number::Double(a + b),
            (Number::Float(a), Number::Float(b)) => Number::Float(a + b),
            (Number::Decimal(a), Number::Decimal(b)) => {
                Number::Decimal(a.checked_add(b).ok_or_else(overflow)?)
            }
            (a, b) => {
                return Err(LogicalError::TypeError(format!(
                    "cannot add {:?} to {:?}",
                    b.kind(),
                    a.kind()
                ))
                .into());
            }
        })
    }

    fn compare(&self, other: &Number) -> Ordering {
        match (self, other) {
            (Number::Int32(a), Number::Int32(b)) => a.cmp(b),
            (Number::Int64(a), Number::Int64(b)) => a.cmp(b),
            (Number::Decimal(a), Number::Decimal(b)) => a.cmp(b),
            (Number::Float(a), Number::Float(b)) => a.total_cmp(b),
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int32(n) => write!(f, "{}", n),
            Number::Int64(n) => write!(f, "{}", n),
            Number::Double(n) => write!(f, "{}", n),
            Number::Float(n) => write!(f, "{}", n),
            Number::Decimal(d) => write!(f, "{}", d),
        }
    }
}

/// Running state of one numeric aggregation.
pub struct Accumulator {
    aggregate: NumericAggregate,
    kind: NumericKind,
    selector: Option<Selector>,
    total: Option<Number>,
    count: u64,
}

impl Accumulator {
    pub fn new(aggregate: NumericAggregate, kind: NumericKind, selector: Option<Selector>) -> Self {
        Accumulator {
            aggregate,
            kind,
            selector,
            total: None,
            count: 0,
        }
    }

    pub fn accept(&mut self, item: &Value) -> QueryResult<()> {
        let selected;
        let value = match &self.selector {
            Some(selector) => {
                selected = selector(item);
                &selected
            }
            None => item,
        };
        let Some(number) = Number::from_value(value, self.kind)? else {
            return Ok(());
        };
        self.count += 1;

        self.total = Some(match (self.aggregate, self.total) {
            (_, None) => self.widen(number),
            (NumericAggregate::Sum, Some(total)) => total.checked_add(number, "Sum")?,
            (NumericAggregate::Average, Some(total)) => total.checked_add(self.widen(number), "Average")?,
            (NumericAggregate::Min, Some(total)) => {
                if number.compare(&total) == Ordering::Less { number } else { total }
            }
            (NumericAggregate::Max, Some(total)) => {
                if number.compare(&total) == Ordering::Greater { number } else { total }
            }
        });
        Ok(())
    }

    /// Int32 averages accumulate in 64 bits.
    fn widen(&self, number: Number) -> Number {
        match (self.aggregate, number) {
            (NumericAggregate::Average, Number::Int32(n)) => Number::Int64(n as i64),
            _ => number,
        }
    }

    pub fn finish(self) -> QueryResult<Number> {
        let Some(total) = self.total else {
            return match self.aggregate {
                NumericAggregate::Sum => Ok(Number::zero(self.kind)),
                _ => Err(LogicalError::NoElements.into()),
            };
        };

        if self.aggregate != NumericAggregate::Average {
            return Ok(total);
        }
        let count = self.count as f64;
        Ok(match total {
            Number::Int32(n) => Number::Double(n as f64 / count),
            Number::Int64(n) => Number::Double(n as f64 / count),
            Number::Double(n) => Number::Double(n / count),
            Number::Float(n) => Number::Float((n as f64 / count) as f32),
            Number::Decimal(d) => {
                let divisor = Decimal::from_u64(self.count).unwrap_or(Decimal::ONE);
                Number::Decimal(d.checked_div(divisor).ok_or(LogicalError::Overflow("Average"))?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::QueryError;

    fn run(aggregate: NumericAggregate, kind: NumericKind, items: &[Value]) -> QueryResult<Number> {
        let mut acc = Accumulator::new(aggregate, kind, Some(Arc::new(|v: &Value| v.clone())));
        for item in items {
            acc.accept(item)?;
        }
        acc.finish()
    }

    #[test]
    fn test_empty_sum_is_zero_of_kind() {
        assert_eq!(run(NumericAggregate::Sum, NumericKind::Int32, &[]).unwrap(), Number::Int32(0));
        assert_eq!(
            run(NumericAggregate::Sum, NumericKind::Decimal, &[]).unwrap(),
            Number::Decimal(Decimal::ZERO)
        );
    }

    #[test]
    fn test_empty_min_max_average_fail() {
        for aggregate in [NumericAggregate::Min, NumericAggregate::Max, NumericAggregate::Average] {
            let err = run(aggregate, NumericKind::Int64, &[]).unwrap_err();
            assert!(matches!(err, QueryError::Logical(LogicalError::NoElements)));
        }
    }

    #[test]
    fn test_int32_sum_overflow() {
        let items = [Value::Integer(i32::MAX as i64), Value::Integer(1)];
        let err = run(NumericAggregate::Sum, NumericKind::Int32, &items).unwrap_err();
        assert!(matches!(err, QueryError::Logical(LogicalError::Overflow("Sum"))));
        // Same values fit once declared as Int64
        let sum = run(NumericAggregate::Sum, NumericKind::Int64, &items).unwrap();
        assert_eq!(sum, Number::Int64(i32::MAX as i64 + 1));
    }

    #[test]
    fn test_nulls_are_ignored() {
        let items = [Value::Integer(2), Value::Null, Value::Integer(4)];
        let avg = run(NumericAggregate::Average, NumericKind::Int32, &items).unwrap();
        assert_eq!(avg, Number::Double(3.0));
    }

    #[test]
    fn test_decimal_sum_is_exact() {
        let items = [Value::Float(0.1), Value::Float(0.2)];
        let sum = run(NumericAggregate::Sum, NumericKind::Decimal, &items).unwrap();
        assert_eq!(sum.to_value(), Value::Float(0.3));
    }

    #[test]
    fn test_type_mismatch() {
        let err = run(NumericAggregate::Max, NumericKind::Int64, &[Value::from("x")]).unwrap_err();
        assert!(matches!(err, QueryError::Logical(LogicalError::TypeError(_))));
    }
}
