//! The dynamically typed value domain. Every conversion is total: failures
//! come back as `Value::Null`, never as an error, so the evaluator has no
//! exceptional control flow for type mismatches.

pub mod datetime;
mod ops;

pub use datetime::{CivilFields, Datetime};
pub use ops::{
    calculate, compare, concat, equal, identical, order_values, ArithmeticOp, ComparisonOp,
};

use std::fmt;

/// Three-valued truth domain used by the SQL logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ternary {
    True,
    False,
    Unknown,
}

impl Ternary {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Self::True
        } else {
            Self::False
        }
    }

    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, Self::True) => Self::True,
            _ => Self::Unknown,
        }
    }

    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            _ => Self::Unknown,
        }
    }

    pub fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }

    pub fn is_true(self) -> bool {
        self == Self::True
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRUE" | "T" | "1" | "ON" | "YES" => Some(Self::True),
            "FALSE" | "F" | "0" | "OFF" | "NO" => Some(Self::False),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Ternary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Unknown => "UNKNOWN",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Ternary(Ternary),
    Integer(i64),
    Float(f64),
    Datetime(Datetime),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truth interpretation used by IF()/WHILE and logical operators.
    pub fn ternary(&self) -> Ternary {
        match self {
            Self::Null => Ternary::Unknown,
            Self::Boolean(b) => Ternary::from_bool(*b),
            Self::Ternary(t) => *t,
            Self::Integer(i) => match i {
                0 => Ternary::False,
                1 => Ternary::True,
                _ => Ternary::Unknown,
            },
            Self::Float(f) => {
                if *f == 0.0 {
                    Ternary::False
                } else if *f == 1.0 {
                    Ternary::True
                } else {
                    Ternary::Unknown
                }
            }
            Self::String(s) => Ternary::parse(s).unwrap_or(Ternary::Unknown),
            Self::Datetime(_) => Ternary::Unknown,
        }
    }

    pub fn to_integer(&self) -> Value {
        match self {
            Self::Integer(i) => Self::Integer(*i),
            Self::Float(f) => {
                if f.fract() == 0.0
                    && f.is_finite()
                    && *f >= i64::MIN as f64
                    && *f <= i64::MAX as f64
                {
                    Self::Integer(*f as i64)
                } else {
                    Self::Null
                }
            }
            Self::String(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Self::Integer(i);
                }
                if let Ok(f) = trimmed.parse::<f64>() {
                    if f.fract() == 0.0 && f.is_finite() {
                        return Self::Integer(f as i64);
                    }
                }
                Self::Null
            }
            _ => Self::Null,
        }
    }

    pub fn to_float(&self) -> Value {
        match self {
            Self::Integer(i) => Self::Float(*i as f64),
            Self::Float(f) => Self::Float(*f),
            Self::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Self::Float(f),
                Err(_) => Self::Null,
            },
            _ => Self::Null,
        }
    }

    /// String conversion for functions that require text input. Only
    /// numbers and strings convert; the STRING() coercion function widens
    /// this for booleans, ternaries and datetimes.
    pub fn to_string_value(&self) -> Value {
        match self {
            Self::Integer(i) => Self::String(i.to_string()),
            Self::Float(f) => Self::String(format_float(*f)),
            Self::String(s) => Self::String(s.clone()),
            _ => Self::Null,
        }
    }

    pub fn to_boolean(&self) -> Value {
        match self {
            Self::Boolean(b) => Self::Boolean(*b),
            Self::Ternary(Ternary::True) => Self::Boolean(true),
            Self::Ternary(Ternary::False) => Self::Boolean(false),
            Self::Integer(0) => Self::Boolean(false),
            Self::Integer(1) => Self::Boolean(true),
            Self::Float(f) if *f == 0.0 => Self::Boolean(false),
            Self::Float(f) if *f == 1.0 => Self::Boolean(true),
            Self::String(s) => match Ternary::parse(s) {
                Some(Ternary::True) => Self::Boolean(true),
                Some(Ternary::False) => Self::Boolean(false),
                _ => Self::Null,
            },
            _ => Self::Null,
        }
    }

    /// Datetime conversion: strings are parsed against the session formats,
    /// numbers are read as Unix seconds.
    pub fn to_datetime(&self, offset_secs: i32, formats: &[String]) -> Value {
        match self {
            Self::Datetime(d) => Self::Datetime(*d),
            Self::String(s) => match datetime_parse::parse_datetime(s, offset_secs, formats) {
                Some(d) => Self::Datetime(d),
                None => Self::Null,
            },
            Self::Integer(i) => Self::Datetime(Datetime::from_unix_seconds(*i, offset_secs)),
            Self::Float(f) => {
                if !f.is_finite() {
                    return Self::Null;
                }
                let nanos = (*f * 1e9).round();
                if nanos >= i64::MIN as f64 && nanos <= i64::MAX as f64 {
                    Self::Datetime(Datetime::from_nanos(nanos as i64, offset_secs))
                } else {
                    Self::Null
                }
            }
            _ => Self::Null,
        }
    }

    /// Display text for output encoding and concatenation. Null renders
    /// empty; callers that must distinguish check `is_null` first.
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Boolean(b) => b.to_string(),
            Self::Ternary(t) => t.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::Datetime(d) => d.format_rfc3339(),
            Self::String(s) => s.clone(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Ternary(_) => "TERNARY",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Datetime(_) => "DATETIME",
            Self::String(_) => "STRING",
        }
    }
}

/// Shortest decimal text for a float, Go-style: whole numbers print
/// without a decimal point.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    let mut s = format!("{f}");
    if let Some(stripped) = s.strip_suffix(".0") {
        s = stripped.to_string();
    }
    s
}

/// Builds a Float when the result has a fraction and an Integer otherwise,
/// the way numeric literals are read back from text.
pub fn parse_float64(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::Integer(f as i64)
    } else {
        Value::Float(f)
    }
}

/// Converts a raw text cell into the narrowest value: integer, float, or
/// string. Empty text is handled by the codec layer (Null unless
/// `without_null`).
pub fn from_cell_text(s: &str) -> Value {
    let trimmed = s.trim();
    if !trimmed.is_empty() && trimmed.len() == s.len() {
        if let Ok(i) = s.parse::<i64>() {
            return Value::Integer(i);
        }
        if looks_numeric(s) {
            if let Ok(f) = s.parse::<f64>() {
                return Value::Float(f);
            }
        }
    }
    Value::String(s.to_string())
}

fn looks_numeric(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
}

pub(crate) mod datetime_parse {
    use super::datetime::{parse_offset, CivilFields, Datetime};

    /// Tries the session's `datetime_format` list first, then RFC 3339
    /// style layouts. Date-only input is midnight.
    pub fn parse_datetime(s: &str, default_offset: i32, formats: &[String]) -> Option<Datetime> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return None;
        }
        for fmt in formats {
            if let Some(d) = parse_with_format(trimmed, fmt, default_offset) {
                return Some(d);
            }
        }
        parse_standard(trimmed, default_offset)
    }

    fn parse_standard(s: &str, default_offset: i32) -> Option<Datetime> {
        let bytes = s.as_bytes();
        if bytes.len() < 10 || (bytes[4] != b'-' && bytes[4] != b'/') {
            return None;
        }
        let sep = bytes[4];
        if bytes[7] != sep {
            return None;
        }
        let year: i64 = s[0..4].parse().ok()?;
        let month: u32 = s[5..7].parse().ok()?;
        let day: u32 = s[8..10].parse().ok()?;
        if month == 0 || month > 12 || day == 0 || day > super::datetime::days_in_month(year, month)
        {
            return None;
        }
        let mut fields = CivilFields {
            year,
            month,
            day,
            hour: 0,
            minute: 0,
            second: 0,
            nanosecond: 0,
        };
        let mut offset = default_offset;
        if s.len() > 10 {
            let rest = &s[10..];
            let rest = rest
                .strip_prefix('T')
                .or_else(|| rest.strip_prefix(' '))
                .or_else(|| rest.strip_prefix('t'))?;
            let (time_part, offset_part) = split_offset(rest);
            parse_time(time_part, &mut fields)?;
            if let Some(off) = offset_part {
                offset = parse_offset(off)?;
            }
        }
        Some(Datetime::from_civil(fields, offset))
    }

    fn split_offset(s: &str) -> (&str, Option<&str>) {
        if let Some(stripped) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
            return (stripped, Some("Z"));
        }
        if s.len() > 6 {
            let tail = &s[s.len() - 6..];
            if (tail.starts_with('+') || tail.starts_with('-')) && tail.as_bytes()[3] == b':' {
                return (&s[..s.len() - 6], Some(tail));
            }
        }
        (s, None)
    }

    fn parse_time(s: &str, fields: &mut CivilFields) -> Option<()> {
        let (hms, frac) = match s.find('.') {
            Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
            None => (s, None),
        };
        let mut parts = hms.split(':');
        fields.hour = parts.next()?.parse().ok()?;
        fields.minute = parts.next()?.parse().ok()?;
        fields.second = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() || fields.hour > 23 || fields.minute > 59 || fields.second > 60 {
            return None;
        }
        if let Some(frac) = frac {
            if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let mut digits = frac.to_string();
            while digits.len() < 9 {
                digits.push('0');
            }
            fields.nanosecond = digits.parse().ok()?;
        }
        Some(())
    }

    /// Matches against a `%Y-%m-%d`-style format string. Directives: %Y %y
    /// %m %d %H %i %s %f %Z and literal passthrough.
    fn parse_with_format(s: &str, format: &str, default_offset: i32) -> Option<Datetime> {
        let mut fields = CivilFields {
            year: 1970,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            nanosecond: 0,
        };
        let mut offset = default_offset;
        let mut input = s;
        let mut fmt_chars = format.chars().peekable();
        while let Some(c) = fmt_chars.next() {
            if c != '%' {
                input = input.strip_prefix(c)?;
                continue;
            }
            match fmt_chars.next()? {
                'Y' => fields.year = take_digits(&mut input, 4)? as i64,
                'y' => fields.year = 2000 + take_digits(&mut input, 2)? as i64,
                'm' => fields.month = take_digits(&mut input, 2)? as u32,
                'd' => fields.day = take_digits(&mut input, 2)? as u32,
                'H' => fields.hour = take_digits(&mut input, 2)? as u32,
                'i' => fields.minute = take_digits(&mut input, 2)? as u32,
                's' => fields.second = take_digits(&mut input, 2)? as u32,
                'f' => {
                    let len = input.bytes().take_while(|b| b.is_ascii_digit()).count();
                    if len == 0 || len > 9 {
                        return None;
                    }
                    let mut digits = input[..len].to_string();
                    input = &input[len..];
                    while digits.len() < 9 {
                        digits.push('0');
                    }
                    fields.nanosecond = digits.parse().ok()?;
                }
                'Z' => {
                    let (rest, off) = if let Some(r) = input.strip_prefix('Z') {
                        (r, 0)
                    } else if input.len() >= 6 {
                        (&input[6..], parse_offset(&input[..6])?)
                    } else {
                        return None;
                    };
                    input = rest;
                    offset = off;
                }
                '%' => input = input.strip_prefix('%')?,
                _ => return None,
            }
        }
        if !input.is_empty()
            || fields.month == 0
            || fields.month > 12
            || fields.day == 0
            || fields.day > super::datetime::days_in_month(fields.year, fields.month)
            || fields.hour > 23
        {
            return None;
        }
        Some(Datetime::from_civil(fields, offset))
    }

    fn take_digits(input: &mut &str, max: usize) -> Option<u64> {
        let len = input
            .bytes()
            .take(max)
            .take_while(|b| b.is_ascii_digit())
            .count();
        if len == 0 {
            return None;
        }
        let value = input[..len].parse().ok()?;
        *input = &input[len..];
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ternary_truth_tables() {
        use Ternary::{False as F, True as T, Unknown as U};
        let all = [T, F, U];
        for &a in &all {
            assert_eq!(a.and(F), F);
            assert_eq!(F.and(a), F);
            assert_eq!(a.or(T), T);
            assert_eq!(T.or(a), T);
        }
        assert_eq!(T.and(T), T);
        assert_eq!(T.and(U), U);
        assert_eq!(U.and(U), U);
        assert_eq!(F.or(F), F);
        assert_eq!(F.or(U), U);
        assert_eq!(U.or(U), U);
        assert_eq!(T.not(), F);
        assert_eq!(F.not(), T);
        assert_eq!(U.not(), U);
    }

    #[test]
    fn conversions_return_null_on_failure() {
        assert_eq!(Value::String("abc".into()).to_integer(), Value::Null);
        assert_eq!(Value::Boolean(true).to_float(), Value::Null);
        assert_eq!(Value::String(" 42 ".into()).to_integer(), Value::Integer(42));
        assert_eq!(Value::String("42.0".into()).to_integer(), Value::Integer(42));
        assert_eq!(Value::Float(1.5).to_integer(), Value::Null);
    }

    #[test]
    fn float_text_is_shortest_form() {
        assert_eq!(format_float(1.0), "1");
        assert_eq!(format_float(1.25), "1.25");
        assert_eq!(format_float(-0.5), "-0.5");
    }

    #[test]
    fn cell_text_narrows_numbers() {
        assert_eq!(from_cell_text("12"), Value::Integer(12));
        assert_eq!(from_cell_text("1.5"), Value::Float(1.5));
        assert_eq!(from_cell_text("1e3"), Value::Float(1000.0));
        assert_eq!(from_cell_text("louis"), Value::String("louis".into()));
        // Leading space keeps the cell textual.
        assert_eq!(from_cell_text(" 12"), Value::String(" 12".into()));
    }

    #[test]
    fn datetime_parsing_accepts_rfc3339_and_date_only() {
        let d = Value::String("2024-06-01T10:30:00+09:00".into()).to_datetime(0, &[]);
        match d {
            Value::Datetime(d) => assert_eq!(d.offset_secs(), 9 * 3600),
            other => panic!("expected datetime, got {other:?}"),
        }
        let date_only = Value::String("2024-06-01".into()).to_datetime(0, &[]);
        match date_only {
            Value::Datetime(d) => {
                let f = d.fields();
                assert_eq!((f.hour, f.minute), (0, 0));
            }
            other => panic!("expected datetime, got {other:?}"),
        }
        assert_eq!(Value::String("June 1".into()).to_datetime(0, &[]), Value::Null);
    }

    #[test]
    fn datetime_parsing_honors_session_formats() {
        let formats = vec!["%d/%m/%Y".to_string()];
        let d = Value::String("01/06/2024".into()).to_datetime(0, &formats);
        match d {
            Value::Datetime(d) => {
                let f = d.fields();
                assert_eq!((f.year, f.month, f.day), (2024, 6, 1));
            }
            other => panic!("expected datetime, got {other:?}"),
        }
    }

    #[test]
    fn value_ternary_interpretation() {
        assert_eq!(Value::Integer(1).ternary(), Ternary::True);
        assert_eq!(Value::Integer(7).ternary(), Ternary::Unknown);
        assert_eq!(Value::String("yes".into()).ternary(), Ternary::True);
        assert_eq!(Value::Null.ternary(), Ternary::Unknown);
    }
}
