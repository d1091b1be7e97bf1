//! JSON bridging: value conversion in both directions, the dotted path
//! query language, and the escape styles used when writing JSON output.

use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::storage::file_info::JsonEscape;
use crate::value::{parse_float64, Value};

/// JSON scalar to engine value. Objects and arrays come back as their
/// serialized text.
pub fn json_to_value(json: &JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                parse_float64(f)
            } else {
                Value::Null
            }
        }
        JsonValue::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Engine value to JSON. Datetimes serialize as RFC 3339 strings;
/// ternaries fold to booleans where determinate.
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Ternary(t) => match t {
            crate::value::Ternary::True => JsonValue::Bool(true),
            crate::value::Ternary::False => JsonValue::Bool(false),
            crate::value::Ternary::Unknown => JsonValue::Null,
        },
        Value::Integer(i) => JsonValue::Number((*i).into()),
        Value::Float(f) => JsonNumber::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Datetime(d) => JsonValue::String(d.format_rfc3339()),
        Value::String(s) => JsonValue::String(s.clone()),
    }
}

/// Evaluates a dotted/indexed path (`data.users[0].name`) against a JSON
/// document. The empty path selects the document itself.
pub fn query_json<'a>(path: &str, document: &'a JsonValue) -> EngineResult<&'a JsonValue> {
    let mut current = document;
    for segment in parse_path(path)? {
        current = match segment {
            PathSegment::Key(key) => current.get(key.as_str()).ok_or_else(|| {
                EngineError::new(
                    ErrorKind::FunctionInvalidArgument,
                    format!("json path element {key} does not exist"),
                )
            })?,
            PathSegment::Index(idx) => current.get(idx).ok_or_else(|| {
                EngineError::new(
                    ErrorKind::FunctionInvalidArgument,
                    format!("json array index {idx} is out of range"),
                )
            })?,
        };
    }
    Ok(current)
}

enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> EngineResult<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Ok(segments);
    }
    for part in trimmed.split('.') {
        let mut rest = part;
        // Leading key text before any bracket.
        if let Some(open) = rest.find('[') {
            if open > 0 {
                segments.push(PathSegment::Key(rest[..open].to_string()));
            }
            rest = &rest[open..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']').ok_or_else(|| {
                    EngineError::new(
                        ErrorKind::FunctionInvalidArgument,
                        format!("json path {path} is malformed"),
                    )
                })?;
                let index: usize = stripped[..close].trim().parse().map_err(|_| {
                    EngineError::new(
                        ErrorKind::FunctionInvalidArgument,
                        format!("json path {path} is malformed"),
                    )
                })?;
                segments.push(PathSegment::Index(index));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(EngineError::new(
                    ErrorKind::FunctionInvalidArgument,
                    format!("json path {path} is malformed"),
                ));
            }
        } else {
            if rest.is_empty() {
                return Err(EngineError::new(
                    ErrorKind::FunctionInvalidArgument,
                    format!("json path {path} is malformed"),
                ));
            }
            segments.push(PathSegment::Key(rest.to_string()));
        }
    }
    Ok(segments)
}

/// Rows of a tabular JSON document: an array of objects, a single
/// object, or an array of scalars (one column named `c1`).
pub fn rows_from_json(document: &JsonValue) -> EngineResult<(Vec<String>, Vec<Vec<Value>>)> {
    match document {
        JsonValue::Array(items) => {
            let mut header: Vec<String> = Vec::new();
            let mut objects = true;
            for item in items {
                match item {
                    JsonValue::Object(map) => {
                        for key in map.keys() {
                            if !header.iter().any(|h| h == key) {
                                header.push(key.clone());
                            }
                        }
                    }
                    _ => {
                        objects = false;
                        break;
                    }
                }
            }
            if !objects {
                let rows = items.iter().map(|item| vec![json_to_value(item)]).collect();
                return Ok((vec!["c1".to_string()], rows));
            }
            let rows = items
                .iter()
                .map(|item| {
                    header
                        .iter()
                        .map(|key| {
                            item.get(key.as_str())
                                .map(json_to_value)
                                .unwrap_or(Value::Null)
                        })
                        .collect()
                })
                .collect();
            Ok((header, rows))
        }
        JsonValue::Object(map) => {
            let header: Vec<String> = map.keys().cloned().collect();
            let row = map.values().map(json_to_value).collect();
            Ok((header, vec![row]))
        }
        _ => Err(EngineError::new(
            ErrorKind::ReadFile,
            "json document is not tabular",
        )),
    }
}

/// Serializes a recordset as an array of objects honoring the escape
/// style and pretty printing.
pub fn rows_to_json(
    header: &[String],
    rows: &[Vec<Value>],
    escape: JsonEscape,
    pretty: bool,
) -> String {
    let array: Vec<JsonValue> = rows
        .iter()
        .map(|row| {
            let mut map = JsonMap::new();
            for (key, value) in header.iter().zip(row.iter()) {
                map.insert(key.clone(), value_to_json(value));
            }
            JsonValue::Object(map)
        })
        .collect();
    let document = JsonValue::Array(array);
    let text = if pretty {
        serde_json::to_string_pretty(&document).unwrap_or_else(|_| "[]".to_string())
    } else {
        serde_json::to_string(&document).unwrap_or_else(|_| "[]".to_string())
    };
    apply_escape(&text, escape)
}

/// Re-escapes non-ASCII characters after serde's backslash escaping.
fn apply_escape(text: &str, escape: JsonEscape) -> String {
    match escape {
        JsonEscape::Backslash => text.to_string(),
        JsonEscape::Hex | JsonEscape::HexAll => {
            let mut out = String::with_capacity(text.len());
            for c in text.chars() {
                let escape_it = match escape {
                    JsonEscape::HexAll => !c.is_ascii() || c.is_ascii_control(),
                    _ => c.is_ascii_control(),
                };
                if escape_it {
                    let mut buf = [0u16; 2];
                    for unit in c.encode_utf16(&mut buf) {
                        out.push_str(&format!("\\u{unit:04x}"));
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_query_walks_keys_and_indexes() {
        let doc = json!({"data": {"users": [{"name": "Louis"}, {"name": "Sean"}]}});
        let found = query_json("data.users[1].name", &doc).unwrap();
        assert_eq!(found, &json!("Sean"));
        assert!(query_json("data.missing", &doc).is_err());
        assert_eq!(query_json("", &doc).unwrap(), &doc);
    }

    #[test]
    fn tabular_rows_from_array_of_objects() {
        let doc = json!([{"id": 1, "name": "Louis"}, {"id": 2, "city": "NY"}]);
        let (header, rows) = rows_from_json(&doc).unwrap();
        assert_eq!(header, vec!["id", "name", "city"]);
        assert_eq!(rows[1][1], Value::Null);
        assert_eq!(rows[1][2], Value::String("NY".into()));
    }

    #[test]
    fn scalar_array_becomes_single_column() {
        let (header, rows) = rows_from_json(&json!([1, 2, 3])).unwrap();
        assert_eq!(header, vec!["c1"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Value::Integer(1));
    }

    #[test]
    fn hexall_escapes_non_ascii() {
        let out = rows_to_json(
            &["s".to_string()],
            &[vec![Value::String("été".into())]],
            JsonEscape::HexAll,
            false,
        );
        assert!(out.contains("\\u00e9"));
        assert!(!out.contains('é'));
    }

    #[test]
    fn numbers_stay_numeric_through_round_trip() {
        assert_eq!(json_to_value(&json!(7)), Value::Integer(7));
        assert_eq!(json_to_value(&json!(1.5)), Value::Float(1.5));
        assert_eq!(value_to_json(&Value::Integer(7)), json!(7));
        assert_eq!(value_to_json(&Value::Null), JsonValue::Null);
    }
}
