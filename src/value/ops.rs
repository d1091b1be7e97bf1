//! Comparison and arithmetic over the value domain. Comparisons produce
//! a `Ternary`; any Null operand yields UNKNOWN (Null for arithmetic).

use std::cmp::Ordering;

use super::{parse_float64, Datetime, Ternary, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

enum Numeric {
    Integer(i64),
    Float(f64),
}

fn to_numeric(value: &Value) -> Option<Numeric> {
    match value {
        Value::Integer(i) => Some(Numeric::Integer(*i)),
        Value::Float(f) => Some(Numeric::Float(*f)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Some(Numeric::Integer(i));
            }
            trimmed.parse::<f64>().ok().map(Numeric::Float)
        }
        _ => None,
    }
}

fn to_comparable_datetime(value: &Value, offset_secs: i32, formats: &[String]) -> Option<Datetime> {
    match value.to_datetime(offset_secs, formats) {
        Value::Datetime(d) => Some(d),
        _ => None,
    }
}

/// Orders two values with automatic widening: integer against float,
/// string against number when the string parses, string against datetime
/// when the other side is a datetime. Returns None when the pair is not
/// comparable.
pub fn order_values(
    left: &Value,
    right: &Value,
    offset_secs: i32,
    formats: &[String],
) -> Option<Ordering> {
    match (left, right) {
        (Value::Datetime(_), _) | (_, Value::Datetime(_)) => {
            let l = to_comparable_datetime(left, offset_secs, formats)?;
            let r = to_comparable_datetime(right, offset_secs, formats)?;
            Some(l.cmp(&r))
        }
        (Value::String(l), Value::String(r)) => Some(l.trim().cmp(r.trim())),
        (Value::Boolean(_) | Value::Ternary(_), _) | (_, Value::Boolean(_) | Value::Ternary(_)) => {
            None
        }
        _ => {
            let l = to_numeric(left)?;
            let r = to_numeric(right)?;
            match (l, r) {
                (Numeric::Integer(a), Numeric::Integer(b)) => Some(a.cmp(&b)),
                (a, b) => {
                    let af = match a {
                        Numeric::Integer(i) => i as f64,
                        Numeric::Float(f) => f,
                    };
                    let bf = match b {
                        Numeric::Integer(i) => i as f64,
                        Numeric::Float(f) => f,
                    };
                    af.partial_cmp(&bf)
                }
            }
        }
    }
}

pub fn compare(
    left: &Value,
    op: ComparisonOp,
    right: &Value,
    offset_secs: i32,
    formats: &[String],
) -> Ternary {
    if left.is_null() || right.is_null() {
        return Ternary::Unknown;
    }
    if op == ComparisonOp::Equal || op == ComparisonOp::NotEqual {
        let eq = equal(left, right, offset_secs, formats);
        return if op == ComparisonOp::Equal { eq } else { eq.not() };
    }
    match order_values(left, right, offset_secs, formats) {
        Some(ord) => Ternary::from_bool(match op {
            ComparisonOp::Less => ord == Ordering::Less,
            ComparisonOp::LessOrEqual => ord != Ordering::Greater,
            ComparisonOp::Greater => ord == Ordering::Greater,
            ComparisonOp::GreaterOrEqual => ord != Ordering::Less,
            ComparisonOp::Equal | ComparisonOp::NotEqual => unreachable!(),
        }),
        None => Ternary::Unknown,
    }
}

/// SQL equality. Boolean-like values compare by truth value; everything
/// else goes through `order_values`.
pub fn equal(left: &Value, right: &Value, offset_secs: i32, formats: &[String]) -> Ternary {
    if left.is_null() || right.is_null() {
        return Ternary::Unknown;
    }
    match (left, right) {
        (Value::Boolean(_) | Value::Ternary(_), _) | (_, Value::Boolean(_) | Value::Ternary(_)) => {
            let l = left.ternary();
            let r = right.ternary();
            if l == Ternary::Unknown || r == Ternary::Unknown {
                Ternary::Unknown
            } else {
                Ternary::from_bool(l == r)
            }
        }
        _ => match order_values(left, right, offset_secs, formats) {
            Some(ord) => Ternary::from_bool(ord == Ordering::Equal),
            None => Ternary::Unknown,
        },
    }
}

/// The `<=>` operator: total over Null. Two Nulls are identical; a Null
/// against anything else is not.
pub fn identical(left: &Value, right: &Value, offset_secs: i32, formats: &[String]) -> Ternary {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ternary::True,
        (true, false) | (false, true) => Ternary::False,
        (false, false) => match equal(left, right, offset_secs, formats) {
            Ternary::True => Ternary::True,
            _ => Ternary::False,
        },
    }
}

/// Numeric arithmetic. Integer pairs stay integral where the operator
/// allows it; division falls back to Float on a remainder; overflow
/// widens to Float. Non-numeric operands and Null propagate as Null.
pub fn calculate(left: &Value, op: ArithmeticOp, right: &Value) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    let (l, r) = match (to_numeric(left), to_numeric(right)) {
        (Some(l), Some(r)) => (l, r),
        _ => return Value::Null,
    };
    if let (Numeric::Integer(a), Numeric::Integer(b)) = (&l, &r) {
        let (a, b) = (*a, *b);
        match op {
            ArithmeticOp::Add => {
                if let Some(v) = a.checked_add(b) {
                    return Value::Integer(v);
                }
            }
            ArithmeticOp::Subtract => {
                if let Some(v) = a.checked_sub(b) {
                    return Value::Integer(v);
                }
            }
            ArithmeticOp::Multiply => {
                if let Some(v) = a.checked_mul(b) {
                    return Value::Integer(v);
                }
            }
            ArithmeticOp::Divide => {
                if b != 0 && a % b == 0 {
                    return Value::Integer(a / b);
                }
            }
            ArithmeticOp::Modulo => {
                if b == 0 {
                    return Value::Null;
                }
                return Value::Integer(a % b);
            }
        }
    }
    let a = match l {
        Numeric::Integer(i) => i as f64,
        Numeric::Float(f) => f,
    };
    let b = match r {
        Numeric::Integer(i) => i as f64,
        Numeric::Float(f) => f,
    };
    let result = match op {
        ArithmeticOp::Add => a + b,
        ArithmeticOp::Subtract => a - b,
        ArithmeticOp::Multiply => a * b,
        ArithmeticOp::Divide => a / b,
        ArithmeticOp::Modulo => a % b,
    };
    if result.is_nan() || result.is_infinite() {
        Value::Null
    } else {
        parse_float64(result)
    }
}

/// The `||` operator. Any Null operand nullifies the result.
pub fn concat(values: &[Value]) -> Value {
    let mut out = String::new();
    for value in values {
        if value.is_null() {
            return Value::Null;
        }
        out.push_str(&value.to_text());
    }
    Value::String(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(l: Value, op: ComparisonOp, r: Value) -> Ternary {
        compare(&l, op, &r, 0, &[])
    }

    #[test]
    fn null_comparisons_are_unknown() {
        for op in [
            ComparisonOp::Equal,
            ComparisonOp::NotEqual,
            ComparisonOp::Less,
            ComparisonOp::GreaterOrEqual,
        ] {
            assert_eq!(cmp(Value::Null, op, Value::Integer(1)), Ternary::Unknown);
            assert_eq!(cmp(Value::Integer(1), op, Value::Null), Ternary::Unknown);
        }
    }

    #[test]
    fn identical_is_total() {
        assert_eq!(identical(&Value::Null, &Value::Null, 0, &[]), Ternary::True);
        assert_eq!(
            identical(&Value::Null, &Value::Integer(1), 0, &[]),
            Ternary::False
        );
        assert_eq!(
            identical(&Value::Integer(1), &Value::Integer(1), 0, &[]),
            Ternary::True
        );
    }

    #[test]
    fn strings_widen_to_numbers() {
        assert_eq!(
            cmp(
                Value::String("10".into()),
                ComparisonOp::Greater,
                Value::Integer(9)
            ),
            Ternary::True
        );
        assert_eq!(
            cmp(
                Value::String("1.5".into()),
                ComparisonOp::Equal,
                Value::Float(1.5)
            ),
            Ternary::True
        );
    }

    #[test]
    fn incomparable_pairs_are_unknown() {
        assert_eq!(
            cmp(
                Value::String("abc".into()),
                ComparisonOp::Less,
                Value::Integer(1)
            ),
            Ternary::Unknown
        );
        assert_eq!(
            cmp(
                Value::Boolean(true),
                ComparisonOp::Less,
                Value::Boolean(false)
            ),
            Ternary::Unknown
        );
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(
            calculate(&Value::Integer(6), ArithmeticOp::Divide, &Value::Integer(3)),
            Value::Integer(2)
        );
        assert_eq!(
            calculate(&Value::Integer(7), ArithmeticOp::Divide, &Value::Integer(2)),
            Value::Float(3.5)
        );
        assert_eq!(
            calculate(&Value::Integer(7), ArithmeticOp::Modulo, &Value::Integer(2)),
            Value::Integer(1)
        );
    }

    #[test]
    fn overflow_widens_to_float() {
        let result = calculate(
            &Value::Integer(i64::MAX),
            ArithmeticOp::Add,
            &Value::Integer(1),
        );
        assert_eq!(result, Value::Float(i64::MAX as f64 + 1.0));
    }

    #[test]
    fn division_by_zero_is_null() {
        assert_eq!(
            calculate(&Value::Integer(1), ArithmeticOp::Divide, &Value::Integer(0)),
            Value::Null
        );
        assert_eq!(
            calculate(&Value::Integer(1), ArithmeticOp::Modulo, &Value::Integer(0)),
            Value::Null
        );
    }

    #[test]
    fn arithmetic_null_propagation() {
        for op in [
            ArithmeticOp::Add,
            ArithmeticOp::Subtract,
            ArithmeticOp::Multiply,
            ArithmeticOp::Divide,
            ArithmeticOp::Modulo,
        ] {
            assert_eq!(calculate(&Value::Null, op, &Value::Integer(3)), Value::Null);
            assert_eq!(calculate(&Value::Integer(3), op, &Value::Null), Value::Null);
        }
    }

    #[test]
    fn concat_joins_text_and_propagates_null() {
        assert_eq!(
            concat(&[Value::String("a".into()), Value::Integer(1)]),
            Value::String("a1".into())
        );
        assert_eq!(concat(&[Value::String("a".into()), Value::Null]), Value::Null);
    }
}
