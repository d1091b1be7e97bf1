//! Process-wide session flags. Reads and writes go through the accessor
//! functions so every caller sees one consistent instance.

use std::sync::{OnceLock, RwLock};

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::storage::file_info::{Encoding, Format, JsonEscape, LineBreak};
use crate::value::datetime::parse_offset;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Flags {
    pub repository: String,
    pub timezone: String,
    pub datetime_format: Vec<String>,
    pub wait_timeout: f64,
    pub delimiter: u8,
    pub delimiter_positions: Option<Vec<usize>>,
    pub json_query: String,
    pub encoding: Encoding,
    pub no_header: bool,
    pub without_null: bool,
    pub format: Format,
    pub write_encoding: Encoding,
    pub write_delimiter: u8,
    pub without_header: bool,
    pub line_break: LineBreak,
    pub enclose_all: bool,
    pub json_escape: JsonEscape,
    pub pretty_print: bool,
    pub east_asian_encoding: bool,
    pub count_diacritical_sign: bool,
    pub count_format_code: bool,
    pub color: bool,
    pub quiet: bool,
    pub cpu: usize,
    pub stats: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            repository: String::new(),
            timezone: "Local".to_string(),
            datetime_format: Vec::new(),
            wait_timeout: 10.0,
            delimiter: b',',
            delimiter_positions: None,
            json_query: String::new(),
            encoding: Encoding::Utf8,
            no_header: false,
            without_null: false,
            format: Format::Text,
            write_encoding: Encoding::Utf8,
            write_delimiter: b',',
            without_header: false,
            line_break: LineBreak::Lf,
            enclose_all: false,
            json_escape: JsonEscape::Backslash,
            pretty_print: false,
            east_asian_encoding: false,
            count_diacritical_sign: false,
            count_format_code: false,
            color: false,
            quiet: false,
            cpu: default_cpu(),
            stats: false,
        }
    }
}

fn default_cpu() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

impl Flags {
    /// Resolved UTC offset in seconds for the timezone flag. `Local` uses
    /// a fixed-offset TZ environment value when present, UTC otherwise.
    pub fn timezone_offset_secs(&self) -> i32 {
        match self.timezone.to_ascii_uppercase().as_str() {
            "UTC" => 0,
            "LOCAL" => std::env::var("TZ")
                .ok()
                .and_then(|tz| parse_offset(&tz))
                .unwrap_or(0),
            _ => parse_offset(&self.timezone).unwrap_or(0),
        }
    }
}

static FLAGS: OnceLock<RwLock<Flags>> = OnceLock::new();

fn flags_lock() -> &'static RwLock<Flags> {
    FLAGS.get_or_init(|| RwLock::new(Flags::default()))
}

pub fn with_flags_read<T>(f: impl FnOnce(&Flags) -> T) -> T {
    let guard = flags_lock().read().unwrap_or_else(|e| e.into_inner());
    f(&guard)
}

pub fn with_flags_write<T>(f: impl FnOnce(&mut Flags) -> T) -> T {
    let mut guard = flags_lock().write().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
}

pub fn reset_flags_for_tests() {
    with_flags_write(|flags| *flags = Flags::default());
}

fn flag_error(name: &str, message: &str) -> EngineError {
    EngineError::new(
        ErrorKind::FunctionInvalidArgument,
        format!("@@{name}: {message}"),
    )
}

fn expect_bool(name: &str, value: &Value) -> EngineResult<bool> {
    match value.to_boolean() {
        Value::Boolean(b) => Ok(b),
        _ => Err(flag_error(name, "value must be a boolean")),
    }
}

fn expect_text(name: &str, value: &Value) -> EngineResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => match other.to_string_value() {
            Value::String(s) => Ok(s),
            _ => Err(flag_error(name, "value must be a string")),
        },
    }
}

fn expect_delimiter(name: &str, value: &Value) -> EngineResult<u8> {
    let text = expect_text(name, value)?;
    let unescaped = match text.as_str() {
        "\\t" => "\t".to_string(),
        other => other.to_string(),
    };
    let mut bytes = unescaped.bytes();
    match (bytes.next(), bytes.next()) {
        (Some(b), None) => Ok(b),
        _ => Err(flag_error(name, "delimiter must be one character")),
    }
}

/// Parses `SPACES` or a comma-separated byte position list for
/// fixed-length files.
fn expect_positions(name: &str, value: &Value) -> EngineResult<Option<Vec<usize>>> {
    let text = expect_text(name, value)?;
    if text.trim().eq_ignore_ascii_case("SPACES") {
        return Ok(None);
    }
    let trimmed = text.trim().trim_start_matches('[').trim_end_matches(']');
    let mut positions = Vec::new();
    for part in trimmed.split(',') {
        let n: usize = part
            .trim()
            .parse()
            .map_err(|_| flag_error(name, "positions must be integers"))?;
        positions.push(n);
    }
    Ok(Some(positions))
}

/// SET @@NAME TO value. Unknown names and malformed values are errors.
pub fn set_flag(name: &str, value: &Value) -> EngineResult<()> {
    let upper = name.to_ascii_uppercase();
    with_flags_write(|flags| -> EngineResult<()> {
        match upper.as_str() {
            "REPOSITORY" => flags.repository = expect_text(name, value)?,
            "TIMEZONE" => flags.timezone = expect_text(name, value)?,
            "DATETIME_FORMAT" => flags.datetime_format = vec![expect_text(name, value)?],
            "WAIT_TIMEOUT" => {
                flags.wait_timeout = match value.to_float() {
                    Value::Float(f) if f >= 0.0 => f,
                    _ => return Err(flag_error(name, "value must be a non-negative number")),
                }
            }
            "DELIMITER" => flags.delimiter = expect_delimiter(name, value)?,
            "DELIMITER_POSITIONS" => flags.delimiter_positions = expect_positions(name, value)?,
            "JSON_QUERY" => flags.json_query = expect_text(name, value)?,
            "ENCODING" => {
                flags.encoding = Encoding::parse(&expect_text(name, value)?)
                    .ok_or_else(|| flag_error(name, "encoding must be UTF8, UTF8M or SJIS"))?
            }
            "NO_HEADER" => flags.no_header = expect_bool(name, value)?,
            "WITHOUT_NULL" => flags.without_null = expect_bool(name, value)?,
            "FORMAT" => {
                flags.format = Format::parse(&expect_text(name, value)?)
                    .ok_or_else(|| flag_error(name, "unknown format"))?
            }
            "WRITE_ENCODING" => {
                flags.write_encoding = Encoding::parse(&expect_text(name, value)?)
                    .ok_or_else(|| flag_error(name, "encoding must be UTF8, UTF8M or SJIS"))?
            }
            "WRITE_DELIMITER" => flags.write_delimiter = expect_delimiter(name, value)?,
            "WITHOUT_HEADER" => flags.without_header = expect_bool(name, value)?,
            "LINE_BREAK" => {
                flags.line_break = LineBreak::parse(&expect_text(name, value)?)
                    .ok_or_else(|| flag_error(name, "line break must be LF, CR or CRLF"))?
            }
            "ENCLOSE_ALL" => flags.enclose_all = expect_bool(name, value)?,
            "JSON_ESCAPE" => {
                flags.json_escape = JsonEscape::parse(&expect_text(name, value)?)
                    .ok_or_else(|| flag_error(name, "escape must be BACKSLASH, HEX or HEXALL"))?
            }
            "PRETTY_PRINT" => flags.pretty_print = expect_bool(name, value)?,
            "EAST_ASIAN_ENCODING" => flags.east_asian_encoding = expect_bool(name, value)?,
            "COUNT_DIACRITICAL_SIGN" => flags.count_diacritical_sign = expect_bool(name, value)?,
            "COUNT_FORMAT_CODE" => flags.count_format_code = expect_bool(name, value)?,
            "COLOR" => flags.color = expect_bool(name, value)?,
            "QUIET" => flags.quiet = expect_bool(name, value)?,
            "CPU" => {
                flags.cpu = match value.to_integer() {
                    Value::Integer(i) if i >= 1 => i as usize,
                    _ => return Err(flag_error(name, "value must be a positive integer")),
                }
            }
            "STATS" => flags.stats = expect_bool(name, value)?,
            _ => {
                return Err(EngineError::new(
                    ErrorKind::FunctionInvalidArgument,
                    format!("@@{name} is an unknown flag"),
                ))
            }
        }
        Ok(())
    })
}

/// ADD value TO @@NAME for list-valued flags.
pub fn add_flag_element(name: &str, value: &Value) -> EngineResult<()> {
    match name.to_ascii_uppercase().as_str() {
        "DATETIME_FORMAT" => {
            let text = expect_text(name, value)?;
            with_flags_write(|flags| flags.datetime_format.push(text));
            Ok(())
        }
        _ => Err(EngineError::new(
            ErrorKind::FunctionInvalidArgument,
            format!("@@{name} is not a list flag"),
        )),
    }
}

/// REMOVE value FROM @@NAME for list-valued flags.
pub fn remove_flag_element(name: &str, value: &Value) -> EngineResult<()> {
    match name.to_ascii_uppercase().as_str() {
        "DATETIME_FORMAT" => {
            let text = expect_text(name, value)?;
            with_flags_write(|flags| flags.datetime_format.retain(|f| f != &text));
            Ok(())
        }
        _ => Err(EngineError::new(
            ErrorKind::FunctionInvalidArgument,
            format!("@@{name} is not a list flag"),
        )),
    }
}

/// Current value of a flag as display text.
pub fn show_flag(name: &str) -> EngineResult<String> {
    let upper = name.to_ascii_uppercase();
    with_flags_read(|flags| {
        let text = match upper.as_str() {
            "REPOSITORY" => flags.repository.clone(),
            "TIMEZONE" => flags.timezone.clone(),
            "DATETIME_FORMAT" => format!("[{}]", flags.datetime_format.join(", ")),
            "WAIT_TIMEOUT" => flags.wait_timeout.to_string(),
            "DELIMITER" => (flags.delimiter as char).to_string(),
            "DELIMITER_POSITIONS" => match &flags.delimiter_positions {
                Some(positions) => format!("{positions:?}"),
                None => "SPACES".to_string(),
            },
            "JSON_QUERY" => flags.json_query.clone(),
            "ENCODING" => flags.encoding.name().to_string(),
            "NO_HEADER" => flags.no_header.to_string(),
            "WITHOUT_NULL" => flags.without_null.to_string(),
            "FORMAT" => flags.format.name().to_string(),
            "WRITE_ENCODING" => flags.write_encoding.name().to_string(),
            "WRITE_DELIMITER" => (flags.write_delimiter as char).to_string(),
            "WITHOUT_HEADER" => flags.without_header.to_string(),
            "LINE_BREAK" => flags.line_break.name().to_string(),
            "ENCLOSE_ALL" => flags.enclose_all.to_string(),
            "JSON_ESCAPE" => flags.json_escape.name().to_string(),
            "PRETTY_PRINT" => flags.pretty_print.to_string(),
            "EAST_ASIAN_ENCODING" => flags.east_asian_encoding.to_string(),
            "COUNT_DIACRITICAL_SIGN" => flags.count_diacritical_sign.to_string(),
            "COUNT_FORMAT_CODE" => flags.count_format_code.to_string(),
            "COLOR" => flags.color.to_string(),
            "QUIET" => flags.quiet.to_string(),
            "CPU" => flags.cpu.to_string(),
            "STATS" => flags.stats.to_string(),
            _ => {
                return Err(EngineError::new(
                    ErrorKind::FunctionInvalidArgument,
                    format!("@@{name} is an unknown flag"),
                ))
            }
        };
        Ok(format!("@@{upper}: {text}"))
    })
}

/// Current value of a flag as an engine value, for `@@NAME` expressions.
pub fn flag_value(name: &str) -> EngineResult<Value> {
    let upper = name.to_ascii_uppercase();
    with_flags_read(|flags| {
        let value = match upper.as_str() {
            "REPOSITORY" => Value::String(flags.repository.clone()),
            "TIMEZONE" => Value::String(flags.timezone.clone()),
            "DATETIME_FORMAT" => Value::String(flags.datetime_format.join(",")),
            "WAIT_TIMEOUT" => Value::Float(flags.wait_timeout),
            "DELIMITER" => Value::String((flags.delimiter as char).to_string()),
            "DELIMITER_POSITIONS" => match &flags.delimiter_positions {
                Some(positions) => Value::String(format!("{positions:?}")),
                None => Value::String("SPACES".to_string()),
            },
            "JSON_QUERY" => Value::String(flags.json_query.clone()),
            "ENCODING" => Value::String(flags.encoding.name().to_string()),
            "NO_HEADER" => Value::Boolean(flags.no_header),
            "WITHOUT_NULL" => Value::Boolean(flags.without_null),
            "FORMAT" => Value::String(flags.format.name().to_string()),
            "WRITE_ENCODING" => Value::String(flags.write_encoding.name().to_string()),
            "WRITE_DELIMITER" => Value::String((flags.write_delimiter as char).to_string()),
            "WITHOUT_HEADER" => Value::Boolean(flags.without_header),
            "LINE_BREAK" => Value::String(flags.line_break.name().to_string()),
            "ENCLOSE_ALL" => Value::Boolean(flags.enclose_all),
            "JSON_ESCAPE" => Value::String(flags.json_escape.name().to_string()),
            "PRETTY_PRINT" => Value::Boolean(flags.pretty_print),
            "EAST_ASIAN_ENCODING" => Value::Boolean(flags.east_asian_encoding),
            "COUNT_DIACRITICAL_SIGN" => Value::Boolean(flags.count_diacritical_sign),
            "COUNT_FORMAT_CODE" => Value::Boolean(flags.count_format_code),
            "COLOR" => Value::Boolean(flags.color),
            "QUIET" => Value::Boolean(flags.quiet),
            "CPU" => Value::Integer(flags.cpu as i64),
            "STATS" => Value::Boolean(flags.stats),
            _ => {
                return Err(EngineError::new(
                    ErrorKind::FunctionInvalidArgument,
                    format!("@@{name} is an unknown flag"),
                ))
            }
        };
        Ok(value)
    })
}

pub const FLAG_NAMES: &[&str] = &[
    "REPOSITORY",
    "TIMEZONE",
    "DATETIME_FORMAT",
    "WAIT_TIMEOUT",
    "DELIMITER",
    "DELIMITER_POSITIONS",
    "JSON_QUERY",
    "ENCODING",
    "NO_HEADER",
    "WITHOUT_NULL",
    "FORMAT",
    "WRITE_ENCODING",
    "WRITE_DELIMITER",
    "WITHOUT_HEADER",
    "LINE_BREAK",
    "ENCLOSE_ALL",
    "JSON_ESCAPE",
    "PRETTY_PRINT",
    "EAST_ASIAN_ENCODING",
    "COUNT_DIACRITICAL_SIGN",
    "COUNT_FORMAT_CODE",
    "COLOR",
    "QUIET",
    "CPU",
    "STATS",
];

/// Serializes tests that mutate the process-wide flags.
pub fn with_flags_test_lock<T>(f: impl FnOnce() -> T) -> T {
    static GUARD: OnceLock<std::sync::Mutex<()>> = OnceLock::new();
    let _lock = GUARD
        .get_or_init(|| std::sync::Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_show_round_trip() {
        with_flags_test_lock(|| {
        reset_flags_for_tests();
        set_flag("wait_timeout", &Value::Integer(15)).unwrap();
        assert_eq!(show_flag("WAIT_TIMEOUT").unwrap(), "@@WAIT_TIMEOUT: 15");
        set_flag("delimiter", &Value::String("\\t".into())).unwrap();
        assert_eq!(with_flags_read(|f| f.delimiter), b'\t');
        reset_flags_for_tests();
        });
    }

    #[test]
    fn rejects_unknown_flag_and_bad_values() {
        with_flags_test_lock(|| {
        reset_flags_for_tests();
        assert!(set_flag("no_such_flag", &Value::Integer(1)).is_err());
        assert!(set_flag("encoding", &Value::String("latin1".into())).is_err());
        assert!(set_flag("cpu", &Value::Integer(0)).is_err());
        reset_flags_for_tests();
        });
    }

    #[test]
    fn datetime_format_list_add_remove() {
        with_flags_test_lock(|| {
        reset_flags_for_tests();
        add_flag_element("DATETIME_FORMAT", &Value::String("%d/%m/%Y".into())).unwrap();
        add_flag_element("DATETIME_FORMAT", &Value::String("%Y%m%d".into())).unwrap();
        assert_eq!(with_flags_read(|f| f.datetime_format.len()), 2);
        remove_flag_element("DATETIME_FORMAT", &Value::String("%Y%m%d".into())).unwrap();
        assert_eq!(with_flags_read(|f| f.datetime_format.len()), 1);
        reset_flags_for_tests();
        });
    }

    #[test]
    fn timezone_offsets() {
        let mut flags = Flags::default();
        flags.timezone = "UTC".to_string();
        assert_eq!(flags.timezone_offset_secs(), 0);
        flags.timezone = "+09:00".to_string();
        assert_eq!(flags.timezone_offset_secs(), 9 * 3600);
    }
}
