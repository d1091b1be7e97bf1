//! Scalar built-in dispatch: one name-keyed match with uniform
//! `(name, args) -> Result<Value>` arms. Null propagation is handled per
//! function, following the catalog semantics.

use rand::Rng;

use crate::error::{
    function_argument_length, function_invalid_argument, EngineError, EngineResult, ErrorKind,
};
use crate::storage::file_info::Encoding;
use crate::utils::adt::datetime as dt;
use crate::utils::adt::json::{json_to_value, query_json};
use crate::utils::adt::math_functions::{eval_ceil, eval_floor, eval_round, finite_or_null};
use crate::utils::adt::misc::{as_float, as_integer, as_text, format_number};
use crate::utils::adt::string_functions as strfn;
use crate::utils::format::format_values;
use crate::value::{Datetime, Ternary, Value};

/// Ambient evaluation state a handful of functions need: the statement's
/// frozen clock and the session datetime settings.
#[derive(Debug, Clone)]
pub struct FunctionContext {
    pub now: Datetime,
    pub offset_secs: i32,
    pub formats: Vec<String>,
}

impl FunctionContext {
    fn to_datetime(&self, value: &Value) -> Value {
        value.to_datetime(self.offset_secs, &self.formats)
    }
}

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name.to_ascii_uppercase().as_str())
}

const BUILTIN_NAMES: &[&str] = &[
    "COALESCE", "IF", "IFNULL", "NULLIF", "CEIL", "FLOOR", "ROUND", "ABS", "ACOS", "ASIN", "ATAN",
    "ATAN2", "COS", "SIN", "TAN", "EXP", "EXP2", "EXPM1", "LOG", "LOG10", "LOG2", "LOG1P", "SQRT",
    "POW", "BIN_TO_DEC", "OCT_TO_DEC", "HEX_TO_DEC", "ENOTATION_TO_DEC", "BIN", "OCT", "HEX",
    "ENOTATION", "NUMBER_FORMAT", "RAND", "TRIM", "LTRIM", "RTRIM", "UPPER", "LOWER",
    "BASE64_ENCODE", "BASE64_DECODE", "HEX_ENCODE", "HEX_DECODE", "LEN", "BYTE_LEN", "WIDTH",
    "LPAD", "RPAD", "SUBSTR", "INSTR", "LIST_ELEM", "REPLACE", "FORMAT", "JSON_VALUE", "MD5",
    "SHA1", "SHA256", "SHA512", "MD5_HMAC", "SHA1_HMAC", "SHA256_HMAC", "SHA512_HMAC",
    "DATETIME_FORMAT", "YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "SECOND", "MILLISECOND",
    "MICROSECOND", "NANOSECOND", "WEEKDAY", "UNIX_TIME", "UNIX_NANO_TIME", "DAY_OF_YEAR",
    "WEEK_OF_YEAR", "ADD_YEAR", "ADD_MONTH", "ADD_DAY", "ADD_HOUR", "ADD_MINUTE", "ADD_SECOND",
    "ADD_MILLI", "ADD_MICRO", "ADD_NANO", "TRUNC_MONTH", "TRUNC_DAY", "TRUNC_TIME", "TRUNC_HOUR",
    "TRUNC_MINUTE", "TRUNC_SECOND", "TRUNC_MILLI", "TRUNC_MICRO", "TRUNC_NANO", "DATE_DIFF",
    "TIME_DIFF", "TIME_NANO_DIFF", "UTC", "NOW", "STRING", "INTEGER", "FLOAT", "BOOLEAN",
    "TERNARY", "DATETIME", "CALL",
];

fn arity(name: &str, args: &[Value], expected: usize) -> EngineResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(function_argument_length(
            name,
            &format!("exactly {expected} arguments"),
        ))
    }
}

fn arity_range(name: &str, args: &[Value], min: usize, max: usize) -> EngineResult<()> {
    if args.len() >= min && args.len() <= max {
        Ok(())
    } else {
        Err(function_argument_length(
            name,
            &format!("{min} to {max} arguments"),
        ))
    }
}

fn math1(name: &str, args: &[Value], f: impl Fn(f64) -> f64) -> EngineResult<Value> {
    arity(name, args, 1)?;
    match as_float(&args[0]) {
        Some(x) => Ok(finite_or_null(f(x))),
        None => Ok(Value::Null),
    }
}

fn math2(name: &str, args: &[Value], f: impl Fn(f64, f64) -> f64) -> EngineResult<Value> {
    arity(name, args, 2)?;
    match (as_float(&args[0]), as_float(&args[1])) {
        (Some(x), Some(y)) => Ok(finite_or_null(f(x, y))),
        _ => Ok(Value::Null),
    }
}

fn round_args(name: &str, args: &[Value]) -> EngineResult<Option<(f64, f64)>> {
    arity_range(name, args, 1, 2)?;
    let Some(number) = as_float(&args[0]) else {
        return Ok(None);
    };
    let place = if args.len() == 2 {
        match as_integer(&args[1]) {
            Some(i) => i as f64,
            None => return Ok(None),
        }
    } else {
        0.0
    };
    Ok(Some((number, place)))
}

fn string1(name: &str, args: &[Value], f: impl Fn(&str) -> String) -> EngineResult<Value> {
    arity(name, args, 1)?;
    match as_text(&args[0]) {
        Some(s) => Ok(Value::String(f(&s))),
        None => Ok(Value::Null),
    }
}

fn trim_fn(name: &str, args: &[Value], mode: strfn::TrimMode) -> EngineResult<Value> {
    arity_range(name, args, 1, 2)?;
    let Some(s) = as_text(&args[0]) else {
        return Ok(Value::Null);
    };
    let cutset = if args.len() == 2 {
        match as_text(&args[1]) {
            Some(c) => c,
            None => return Ok(Value::Null),
        }
    } else {
        String::new()
    };
    Ok(Value::String(strfn::trim_text(&s, &cutset, mode)))
}

fn parse_radix(name: &str, args: &[Value], radix: u32) -> EngineResult<Value> {
    arity(name, args, 1)?;
    let Some(s) = as_text(&args[0]) else {
        return Ok(Value::Null);
    };
    let digits = if radix == 16 {
        s.trim().trim_start_matches("0x").to_string()
    } else {
        s.trim().to_string()
    };
    Ok(match i64::from_str_radix(&digits, radix) {
        Ok(i) => Value::Integer(i),
        Err(_) => Value::Null,
    })
}

fn format_radix(name: &str, args: &[Value], radix: u32) -> EngineResult<Value> {
    arity(name, args, 1)?;
    let Some(i) = as_integer(&args[0]) else {
        return Ok(Value::Null);
    };
    Ok(Value::String(match radix {
        2 => format!("{i:b}"),
        8 => format!("{i:o}"),
        _ => format!("{i:x}"),
    }))
}

fn datetime_to_int(
    name: &str,
    args: &[Value],
    ctx: &FunctionContext,
    f: impl Fn(&Datetime) -> i64,
) -> EngineResult<Value> {
    arity(name, args, 1)?;
    match ctx.to_datetime(&args[0]) {
        Value::Datetime(d) => Ok(Value::Integer(f(&d))),
        _ => Ok(Value::Null),
    }
}

fn datetime_add(
    name: &str,
    args: &[Value],
    ctx: &FunctionContext,
    f: impl Fn(&Datetime, i64) -> Datetime,
) -> EngineResult<Value> {
    arity(name, args, 2)?;
    let d = match ctx.to_datetime(&args[0]) {
        Value::Datetime(d) => d,
        _ => return Ok(Value::Null),
    };
    match as_integer(&args[1]) {
        Some(n) => Ok(Value::Datetime(f(&d, n))),
        None => Ok(Value::Null),
    }
}

fn datetime_trunc(
    name: &str,
    args: &[Value],
    ctx: &FunctionContext,
    unit: dt::TruncUnit,
) -> EngineResult<Value> {
    arity(name, args, 1)?;
    match ctx.to_datetime(&args[0]) {
        Value::Datetime(d) => Ok(Value::Datetime(dt::truncate_to(&d, unit))),
        _ => Ok(Value::Null),
    }
}

fn datetime_pair(
    name: &str,
    args: &[Value],
    ctx: &FunctionContext,
) -> EngineResult<Option<(Datetime, Datetime)>> {
    arity(name, args, 2)?;
    let a = match ctx.to_datetime(&args[0]) {
        Value::Datetime(d) => d,
        _ => return Ok(None),
    };
    let b = match ctx.to_datetime(&args[1]) {
        Value::Datetime(d) => d,
        _ => return Ok(None),
    };
    Ok(Some((a, b)))
}

fn digest1(name: &str, args: &[Value], f: impl Fn(&str) -> String) -> EngineResult<Value> {
    arity(name, args, 1)?;
    match as_text(&args[0]) {
        Some(s) => Ok(Value::String(f(&s))),
        None => Ok(Value::Null),
    }
}

fn digest2(name: &str, args: &[Value], f: impl Fn(&str, &str) -> String) -> EngineResult<Value> {
    arity(name, args, 2)?;
    match (as_text(&args[0]), as_text(&args[1])) {
        (Some(s), Some(key)) => Ok(Value::String(f(&s, &key))),
        _ => Ok(Value::Null),
    }
}

pub fn eval_scalar_function(
    name: &str,
    args: &[Value],
    ctx: &FunctionContext,
) -> EngineResult<Value> {
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "COALESCE" => {
            if args.is_empty() {
                return Err(function_argument_length(name, "at least 1 argument"));
            }
            Ok(args
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null))
        }
        "IF" => {
            arity(name, args, 3)?;
            if args[0].ternary() == Ternary::True {
                Ok(args[1].clone())
            } else {
                Ok(args[2].clone())
            }
        }
        "IFNULL" => {
            arity(name, args, 2)?;
            if args[0].is_null() {
                Ok(args[1].clone())
            } else {
                Ok(args[0].clone())
            }
        }
        "NULLIF" => {
            arity(name, args, 2)?;
            if crate::value::equal(&args[0], &args[1], ctx.offset_secs, &ctx.formats)
                == Ternary::True
            {
                Ok(Value::Null)
            } else {
                Ok(args[0].clone())
            }
        }
        "CEIL" => Ok(round_args(name, args)?
            .map(|(n, p)| eval_ceil(n, p))
            .unwrap_or(Value::Null)),
        "FLOOR" => Ok(round_args(name, args)?
            .map(|(n, p)| eval_floor(n, p))
            .unwrap_or(Value::Null)),
        "ROUND" => Ok(round_args(name, args)?
            .map(|(n, p)| eval_round(n, p))
            .unwrap_or(Value::Null)),
        "ABS" => math1(name, args, f64::abs),
        "ACOS" => math1(name, args, f64::acos),
        "ASIN" => math1(name, args, f64::asin),
        "ATAN" => math1(name, args, f64::atan),
        "ATAN2" => math2(name, args, f64::atan2),
        "COS" => math1(name, args, f64::cos),
        "SIN" => math1(name, args, f64::sin),
        "TAN" => math1(name, args, f64::tan),
        "EXP" => math1(name, args, f64::exp),
        "EXP2" => math1(name, args, f64::exp2),
        "EXPM1" => math1(name, args, f64::exp_m1),
        "LOG" => math1(name, args, f64::ln),
        "LOG10" => math1(name, args, f64::log10),
        "LOG2" => math1(name, args, f64::log2),
        "LOG1P" => math1(name, args, f64::ln_1p),
        "SQRT" => math1(name, args, f64::sqrt),
        "POW" => math2(name, args, f64::powf),
        "BIN_TO_DEC" => parse_radix(name, args, 2),
        "OCT_TO_DEC" => parse_radix(name, args, 8),
        "HEX_TO_DEC" => parse_radix(name, args, 16),
        "ENOTATION_TO_DEC" => {
            arity(name, args, 1)?;
            let Some(s) = as_text(&args[0]) else {
                return Ok(Value::Null);
            };
            Ok(match s.trim().parse::<f64>() {
                Ok(f) => crate::value::parse_float64(f),
                Err(_) => Value::Null,
            })
        }
        "BIN" => format_radix(name, args, 2),
        "OCT" => format_radix(name, args, 8),
        "HEX" => format_radix(name, args, 16),
        "ENOTATION" => {
            arity(name, args, 1)?;
            match as_float(&args[0]) {
                Some(f) => Ok(Value::String(format!("{f:e}"))),
                None => Ok(Value::Null),
            }
        }
        "NUMBER_FORMAT" => {
            arity_range(name, args, 1, 5)?;
            let Some(number) = as_float(&args[0]) else {
                return Ok(Value::Null);
            };
            let precision = args
                .get(1)
                .and_then(as_integer)
                .map(|i| i as i32)
                .unwrap_or(-1);
            let point = args
                .get(2)
                .and_then(as_text)
                .unwrap_or_else(|| ".".to_string());
            let thousands = args
                .get(3)
                .and_then(as_text)
                .unwrap_or_else(|| ",".to_string());
            let decimal_sep = args.get(4).and_then(as_text).unwrap_or_default();
            Ok(Value::String(format_number(
                number,
                precision,
                &point,
                &thousands,
                &decimal_sep,
            )))
        }
        "RAND" => {
            if !args.is_empty() && args.len() != 2 {
                return Err(function_argument_length(name, "0 or 2 arguments"));
            }
            let mut rng = rand::thread_rng();
            if args.is_empty() {
                return Ok(Value::Float(rng.gen::<f64>()));
            }
            let low = as_integer(&args[0]).ok_or_else(|| {
                function_invalid_argument(name, "the first argument must be an integer")
            })?;
            let high = as_integer(&args[1]).ok_or_else(|| {
                function_invalid_argument(name, "the second argument must be an integer")
            })?;
            if high <= low {
                return Err(function_invalid_argument(
                    name,
                    "the second argument must be greater than the first argument",
                ));
            }
            Ok(Value::Integer(rng.gen_range(low..=high)))
        }
        "TRIM" => trim_fn(name, args, strfn::TrimMode::Both),
        "LTRIM" => trim_fn(name, args, strfn::TrimMode::Left),
        "RTRIM" => trim_fn(name, args, strfn::TrimMode::Right),
        "UPPER" => string1(name, args, |s| s.to_uppercase()),
        "LOWER" => string1(name, args, |s| s.to_lowercase()),
        "BASE64_ENCODE" => string1(name, args, strfn::base64_encode),
        "BASE64_DECODE" => string1(name, args, strfn::base64_decode),
        "HEX_ENCODE" => string1(name, args, strfn::hex_encode),
        "HEX_DECODE" => string1(name, args, strfn::hex_decode),
        "LEN" => {
            arity(name, args, 1)?;
            match as_text(&args[0]) {
                Some(s) => Ok(Value::Integer(strfn::rune_len(&s) as i64)),
                None => Ok(Value::Null),
            }
        }
        "BYTE_LEN" => {
            arity_range(name, args, 1, 2)?;
            let Some(s) = as_text(&args[0]) else {
                return Ok(Value::Null);
            };
            let encoding = parse_encoding_arg(name, args.get(1))?;
            Ok(Value::Integer(strfn::byte_len(&s, encoding) as i64))
        }
        "WIDTH" => {
            arity(name, args, 1)?;
            match as_text(&args[0]) {
                Some(s) => Ok(Value::Integer(strfn::display_width(&s) as i64)),
                None => Ok(Value::Null),
            }
        }
        "LPAD" => pad_fn(name, args, true),
        "RPAD" => pad_fn(name, args, false),
        "SUBSTR" => {
            arity_range(name, args, 2, 3)?;
            let Some(s) = as_text(&args[0]) else {
                return Ok(Value::Null);
            };
            let Some(start) = as_integer(&args[1]) else {
                return Ok(Value::Null);
            };
            let length = match args.get(2) {
                Some(v) => match as_integer(v) {
                    Some(l) => Some(l),
                    None => return Ok(Value::Null),
                },
                None => None,
            };
            Ok(strfn::substr(&s, start, length))
        }
        "INSTR" => {
            arity(name, args, 2)?;
            match (as_text(&args[0]), as_text(&args[1])) {
                (Some(s), Some(sub)) => Ok(strfn::instr(&s, &sub)),
                _ => Ok(Value::Null),
            }
        }
        "LIST_ELEM" => {
            arity(name, args, 3)?;
            match (as_text(&args[0]), as_text(&args[1]), as_integer(&args[2])) {
                (Some(s), Some(sep), Some(i)) => Ok(strfn::list_elem(&s, &sep, i)),
                _ => Ok(Value::Null),
            }
        }
        "REPLACE" => {
            arity(name, args, 3)?;
            match (as_text(&args[0]), as_text(&args[1]), as_text(&args[2])) {
                (Some(s), Some(old), Some(new)) => Ok(Value::String(s.replace(&old, &new))),
                _ => Ok(Value::Null),
            }
        }
        "FORMAT" => {
            if args.is_empty() {
                return Err(function_argument_length(name, "at least 1 argument"));
            }
            let Some(format) = as_text(&args[0]) else {
                return Err(function_invalid_argument(
                    name,
                    "the first argument must be a string",
                ));
            };
            format_values(&format, &args[1..]).map(Value::String)
        }
        "JSON_VALUE" => {
            arity(name, args, 2)?;
            let (Some(query), Some(text)) = (as_text(&args[0]), as_text(&args[1])) else {
                return Ok(Value::Null);
            };
            let document: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| function_invalid_argument(name, &format!("json parse error: {e}")))?;
            Ok(json_to_value(query_json(&query, &document)?))
        }
        "MD5" => digest1(name, args, strfn::md5_hex),
        "SHA1" => digest1(name, args, strfn::sha1_hex),
        "SHA256" => digest1(name, args, strfn::sha256_hex),
        "SHA512" => digest1(name, args, strfn::sha512_hex),
        "MD5_HMAC" => digest2(name, args, strfn::md5_hmac_hex),
        "SHA1_HMAC" => digest2(name, args, strfn::sha1_hmac_hex),
        "SHA256_HMAC" => digest2(name, args, strfn::sha256_hmac_hex),
        "SHA512_HMAC" => digest2(name, args, strfn::sha512_hmac_hex),
        "DATETIME_FORMAT" => {
            arity(name, args, 2)?;
            let d = match ctx.to_datetime(&args[0]) {
                Value::Datetime(d) => d,
                _ => return Ok(Value::Null),
            };
            match as_text(&args[1]) {
                Some(f) => Ok(Value::String(dt::format_datetime(&d, &f))),
                None => Ok(Value::Null),
            }
        }
        "YEAR" => datetime_to_int(name, args, ctx, dt::extract_year),
        "MONTH" => datetime_to_int(name, args, ctx, dt::extract_month),
        "DAY" => datetime_to_int(name, args, ctx, dt::extract_day),
        "HOUR" => datetime_to_int(name, args, ctx, dt::extract_hour),
        "MINUTE" => datetime_to_int(name, args, ctx, dt::extract_minute),
        "SECOND" => datetime_to_int(name, args, ctx, dt::extract_second),
        "MILLISECOND" => datetime_to_int(name, args, ctx, dt::extract_millisecond),
        "MICROSECOND" => datetime_to_int(name, args, ctx, dt::extract_microsecond),
        "NANOSECOND" => datetime_to_int(name, args, ctx, dt::extract_nanosecond),
        "WEEKDAY" => datetime_to_int(name, args, ctx, |d| i64::from(d.weekday())),
        "UNIX_TIME" => datetime_to_int(name, args, ctx, Datetime::unix_seconds),
        "UNIX_NANO_TIME" => datetime_to_int(name, args, ctx, Datetime::unix_nanos),
        "DAY_OF_YEAR" => datetime_to_int(name, args, ctx, |d| i64::from(d.day_of_year())),
        "WEEK_OF_YEAR" => datetime_to_int(name, args, ctx, |d| i64::from(d.iso_week())),
        "ADD_YEAR" => datetime_add(name, args, ctx, |d, n| d.add_years(n)),
        "ADD_MONTH" => datetime_add(name, args, ctx, |d, n| d.add_months(n)),
        "ADD_DAY" => datetime_add(name, args, ctx, |d, n| d.add_days(n)),
        "ADD_HOUR" => datetime_add(name, args, ctx, |d, n| d.add_nanos(n.saturating_mul(3_600_000_000_000))),
        "ADD_MINUTE" => datetime_add(name, args, ctx, |d, n| d.add_nanos(n.saturating_mul(60_000_000_000))),
        "ADD_SECOND" => datetime_add(name, args, ctx, |d, n| d.add_nanos(n.saturating_mul(1_000_000_000))),
        "ADD_MILLI" => datetime_add(name, args, ctx, |d, n| d.add_nanos(n.saturating_mul(1_000_000))),
        "ADD_MICRO" => datetime_add(name, args, ctx, |d, n| d.add_nanos(n.saturating_mul(1_000))),
        "ADD_NANO" => datetime_add(name, args, ctx, |d, n| d.add_nanos(n)),
        "TRUNC_MONTH" => datetime_trunc(name, args, ctx, dt::TruncUnit::Month),
        "TRUNC_DAY" => datetime_trunc(name, args, ctx, dt::TruncUnit::Day),
        // TRUNC_HOUR is an alias of TRUNC_TIME: both drop the time part.
        "TRUNC_TIME" | "TRUNC_HOUR" => datetime_trunc(name, args, ctx, dt::TruncUnit::Time),
        "TRUNC_MINUTE" => datetime_trunc(name, args, ctx, dt::TruncUnit::Minute),
        "TRUNC_SECOND" => datetime_trunc(name, args, ctx, dt::TruncUnit::Second),
        "TRUNC_MILLI" => datetime_trunc(name, args, ctx, dt::TruncUnit::Milli),
        "TRUNC_MICRO" => datetime_trunc(name, args, ctx, dt::TruncUnit::Micro),
        "TRUNC_NANO" => datetime_trunc(name, args, ctx, dt::TruncUnit::Nano),
        "DATE_DIFF" => Ok(datetime_pair(name, args, ctx)?
            .map(|(a, b)| Value::Integer(dt::date_diff(&a, &b)))
            .unwrap_or(Value::Null)),
        "TIME_DIFF" => Ok(datetime_pair(name, args, ctx)?
            .map(|(a, b)| dt::time_diff_seconds(&a, &b))
            .unwrap_or(Value::Null)),
        "TIME_NANO_DIFF" => Ok(datetime_pair(name, args, ctx)?
            .map(|(a, b)| Value::Integer(dt::time_diff_nanos(&a, &b)))
            .unwrap_or(Value::Null)),
        "UTC" => {
            arity(name, args, 1)?;
            match ctx.to_datetime(&args[0]) {
                Value::Datetime(d) => Ok(Value::Datetime(d.to_utc())),
                _ => Ok(Value::Null),
            }
        }
        "NOW" => {
            arity(name, args, 0)?;
            Ok(Value::Datetime(ctx.now))
        }
        "STRING" => {
            arity(name, args, 1)?;
            Ok(match &args[0] {
                Value::Boolean(b) => Value::String(b.to_string()),
                Value::Ternary(t) => Value::String(t.to_string()),
                Value::Datetime(d) => Value::String(d.format_rfc3339()),
                other => other.to_string_value(),
            })
        }
        "INTEGER" => {
            arity(name, args, 1)?;
            Ok(match &args[0] {
                Value::Datetime(d) => Value::Integer(d.unix_seconds()),
                Value::Float(f) => {
                    let rounded = crate::utils::adt::math_functions::round_half_away(*f, 0.0);
                    if rounded.is_finite() {
                        Value::Integer(rounded as i64)
                    } else {
                        Value::Null
                    }
                }
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(f) if f.is_finite() => Value::Integer(
                        crate::utils::adt::math_functions::round_half_away(f, 0.0) as i64,
                    ),
                    _ => Value::Null,
                },
                other => other.to_integer(),
            })
        }
        "FLOAT" => {
            arity(name, args, 1)?;
            Ok(match &args[0] {
                Value::Datetime(d) => {
                    Value::Float(d.unix_seconds() as f64 + f64::from(d.fields().nanosecond) / 1e9)
                }
                other => other.to_float(),
            })
        }
        "BOOLEAN" => {
            arity(name, args, 1)?;
            Ok(args[0].to_boolean())
        }
        "TERNARY" => {
            arity(name, args, 1)?;
            Ok(Value::Ternary(args[0].ternary()))
        }
        "DATETIME" => {
            arity(name, args, 1)?;
            Ok(ctx.to_datetime(&args[0]))
        }
        "CALL" => {
            if args.is_empty() {
                return Err(function_argument_length(name, "at least 1 argument"));
            }
            let argv: Vec<String> = args.iter().map(|v| v.to_text()).collect();
            let output = std::process::Command::new(&argv[0])
                .args(&argv[1..])
                .output()
                .map_err(|e| {
                    EngineError::new(ErrorKind::ExternalCommand, format!("command failed: {e}"))
                })?;
            if !output.status.success() {
                return Err(EngineError::new(
                    ErrorKind::ExternalCommand,
                    format!("command {} exited with an error", argv[0]),
                ));
            }
            Ok(Value::String(
                String::from_utf8_lossy(&output.stdout).into_owned(),
            ))
        }
        _ => Err(crate::error::undefined_function(name)),
    }
}

fn parse_encoding_arg(name: &str, arg: Option<&Value>) -> EngineResult<Encoding> {
    match arg {
        None => Ok(Encoding::Utf8),
        Some(value) => match as_text(value) {
            None => Ok(Encoding::Utf8),
            Some(text) => Encoding::parse(&text)
                .ok_or_else(|| function_invalid_argument(name, "unknown encoding")),
        },
    }
}

fn pad_fn(name: &str, args: &[Value], left: bool) -> EngineResult<Value> {
    arity_range(name, args, 3, 5)?;
    let Some(s) = as_text(&args[0]) else {
        return Ok(Value::Null);
    };
    let Some(length) = as_integer(&args[1]) else {
        return Ok(Value::Null);
    };
    let Some(pad) = as_text(&args[2]) else {
        return Ok(Value::Null);
    };
    let metric = match args.get(3) {
        None => strfn::PaddingMetric::RuneCount,
        Some(v) => match as_text(v) {
            None => strfn::PaddingMetric::RuneCount,
            Some(text) => strfn::PaddingMetric::parse(&text).ok_or_else(|| {
                function_invalid_argument(name, "padding type must be one of LEN|BYTE|WIDTH")
            })?,
        },
    };
    let encoding = parse_encoding_arg(name, args.get(4))?;
    strfn::pad_string(name, &s, length.max(0) as usize, &pad, left, metric, encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> FunctionContext {
        FunctionContext {
            now: Datetime::from_unix_seconds(1_700_000_000, 0),
            offset_secs: 0,
            formats: Vec::new(),
        }
    }

    fn call(name: &str, args: &[Value]) -> Value {
        eval_scalar_function(name, args, &ctx()).unwrap()
    }

    #[test]
    fn conditional_functions() {
        assert_eq!(
            call("COALESCE", &[Value::Null, Value::Integer(2)]),
            Value::Integer(2)
        );
        assert_eq!(
            call("IF", &[Value::Boolean(false), Value::Integer(1), Value::Integer(2)]),
            Value::Integer(2)
        );
        assert_eq!(
            call("NULLIF", &[Value::Integer(3), Value::Integer(3)]),
            Value::Null
        );
        assert_eq!(
            call("IFNULL", &[Value::Null, Value::String("x".into())]),
            Value::String("x".into())
        );
    }

    #[test]
    fn math_collapses_inf_and_nan_to_null() {
        assert_eq!(call("LOG", &[Value::Integer(0)]), Value::Null);
        assert_eq!(call("SQRT", &[Value::Integer(-1)]), Value::Null);
        assert_eq!(call("ABS", &[Value::Integer(-3)]), Value::Integer(3));
        assert_eq!(call("POW", &[Value::Integer(2), Value::Integer(10)]), Value::Integer(1024));
    }

    #[test]
    fn radix_functions() {
        assert_eq!(call("BIN", &[Value::Integer(5)]), Value::String("101".into()));
        assert_eq!(call("HEX_TO_DEC", &[Value::String("0xff".into())]), Value::Integer(255));
        assert_eq!(call("OCT_TO_DEC", &[Value::String("8".into())]), Value::Null);
    }

    #[test]
    fn rand_range_is_inclusive_and_validated() {
        for _ in 0..20 {
            match call("RAND", &[Value::Integer(1), Value::Integer(3)]) {
                Value::Integer(i) => assert!((1..=3).contains(&i)),
                other => panic!("expected integer, got {other:?}"),
            }
        }
        let err = eval_scalar_function("RAND", &[Value::Integer(3), Value::Integer(3)], &ctx())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FunctionInvalidArgument);
    }

    #[test]
    fn string_functions_propagate_null() {
        assert_eq!(call("UPPER", &[Value::Null]), Value::Null);
        assert_eq!(call("LEN", &[Value::String("héllo".into())]), Value::Integer(5));
        assert_eq!(call("BYTE_LEN", &[Value::String("héllo".into())]), Value::Integer(6));
        assert_eq!(
            call("REPLACE", &[
                Value::String("aXbX".into()),
                Value::String("X".into()),
                Value::String("-".into())
            ]),
            Value::String("a-b-".into())
        );
    }

    #[test]
    fn base64_encode_known_vector() {
        assert_eq!(
            call("BASE64_ENCODE", &[Value::String("foo".into())]),
            Value::String("Zm9v".into())
        );
    }

    #[test]
    fn datetime_functions_follow_the_clock() {
        let d = Value::String("2024-06-01T10:30:00Z".into());
        assert_eq!(call("YEAR", &[d.clone()]), Value::Integer(2024));
        assert_eq!(call("WEEKDAY", &[d.clone()]), Value::Integer(6));
        assert_eq!(call("DAY_OF_YEAR", &[d.clone()]), Value::Integer(153));
        assert_eq!(
            call("DATETIME_FORMAT", &[d.clone(), Value::String("%Y/%m/%d".into())]),
            Value::String("2024/06/01".into())
        );
        let shifted = call("ADD_MONTH", &[d, Value::Integer(1)]);
        assert_eq!(call("MONTH", &[shifted]), Value::Integer(7));
    }

    #[test]
    fn trunc_hour_is_an_alias_of_trunc_time() {
        let d = Value::String("2024-06-01T10:30:45Z".into());
        assert_eq!(
            call("TRUNC_HOUR", &[d.clone()]),
            call("TRUNC_TIME", &[d])
        );
    }

    #[test]
    fn date_diff_counts_whole_days() {
        assert_eq!(
            call(
                "DATE_DIFF",
                &[
                    Value::String("2024-06-03".into()),
                    Value::String("2024-06-01T23:59:59Z".into())
                ]
            ),
            Value::Integer(2)
        );
    }

    #[test]
    fn coercion_functions() {
        assert_eq!(call("INTEGER", &[Value::Float(2.5)]), Value::Integer(3));
        assert_eq!(call("INTEGER", &[Value::Float(-2.5)]), Value::Integer(-3));
        assert_eq!(call("STRING", &[Value::Boolean(true)]), Value::String("true".into()));
        assert_eq!(call("TERNARY", &[Value::Integer(1)]), Value::Ternary(Ternary::True));
        assert_eq!(call("BOOLEAN", &[Value::String("on".into())]), Value::Boolean(true));
    }

    #[test]
    fn now_uses_the_frozen_clock() {
        let now = call("NOW", &[]);
        assert_eq!(
            now,
            Value::Datetime(Datetime::from_unix_seconds(1_700_000_000, 0))
        );
    }

    #[test]
    fn unknown_function_errors() {
        let err = eval_scalar_function("NO_SUCH_FN", &[], &ctx()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedFunction);
    }
}
