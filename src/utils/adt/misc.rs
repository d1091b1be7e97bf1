//! Small shared helpers: number formatting with custom separators and
//! scalar coercion guards used across the function catalog.

use crate::value::{format_float, Value};

/// Formats a number with grouping and separator overrides. A negative
/// precision keeps the value's own digits.
pub fn format_number(
    value: f64,
    precision: i32,
    decimal_point: &str,
    thousands_separator: &str,
    decimal_separator: &str,
) -> String {
    let text = if precision < 0 {
        format_float(value)
    } else {
        format!("{value:.*}", precision as usize)
    };
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let mut grouped = String::new();
    let digits: Vec<char> = int_part.chars().collect();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push_str(thousands_separator);
        }
        grouped.push(*c);
    }
    let mut out = format!("{sign}{grouped}");
    if let Some(frac) = frac_part {
        out.push_str(decimal_point);
        if decimal_separator.is_empty() {
            out.push_str(frac);
        } else {
            let frac_digits: Vec<char> = frac.chars().collect();
            for (i, c) in frac_digits.iter().enumerate() {
                if i > 0 && i % 3 == 0 {
                    out.push_str(decimal_separator);
                }
                out.push(*c);
            }
        }
    }
    out
}

/// Unwraps a string argument, mapping the conversion result of
/// `to_string_value`; None means the argument nullifies the function.
pub fn as_text(value: &Value) -> Option<String> {
    match value.to_string_value() {
        Value::String(s) => Some(s),
        _ => None,
    }
}

pub fn as_integer(value: &Value) -> Option<i64> {
    match value.to_integer() {
        Value::Integer(i) => Some(i),
        _ => None,
    }
}

pub fn as_float(value: &Value) -> Option<f64> {
    match value.to_float() {
        Value::Float(f) => Some(f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_thousands() {
        assert_eq!(format_number(1234567.0, -1, ".", ",", ""), "1,234,567");
        assert_eq!(format_number(-1234.5, -1, ".", ",", ""), "-1,234.5");
        assert_eq!(format_number(123.0, -1, ".", ",", ""), "123");
    }

    #[test]
    fn fixed_precision_and_custom_separators() {
        assert_eq!(format_number(1234.5, 2, ",", ".", ""), "1.234,50");
        assert_eq!(
            format_number(0.123456, 6, ".", ",", " "),
            "0.123 456"
        );
    }

    #[test]
    fn scalar_guards() {
        assert_eq!(as_integer(&Value::String("42".into())), Some(42));
        assert_eq!(as_integer(&Value::String("x".into())), None);
        assert_eq!(as_float(&Value::Integer(2)), Some(2.0));
        assert_eq!(as_text(&Value::Null), None);
    }
}
