//! The `%` formatter behind PRINTF/FORMAT and the tabular output
//! renderers for query results.

use unicode_width::UnicodeWidthStr;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::storage::codec;
use crate::storage::file_info::{FileInfo, Format};
use crate::utils::adt::json::rows_to_json;
use crate::value::{format_float, Value};

/// Formats `format` with `%` directives against `args`:
/// `%s %q %d %i %f %e %b %o %x %T %t %%` with optional `width[.precision]`.
pub fn format_values(format: &str, args: &[Value]) -> EngineResult<String> {
    let mut out = String::new();
    let mut arg_index = 0usize;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        // width[.precision]
        let mut width = String::new();
        let mut precision = String::new();
        let mut in_precision = false;
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() || (next == '-' && width.is_empty() && !in_precision) {
                if in_precision {
                    precision.push(next);
                } else {
                    width.push(next);
                }
                chars.next();
            } else if next == '.' && !in_precision {
                in_precision = true;
                chars.next();
            } else {
                break;
            }
        }
        let directive = chars.next().ok_or_else(|| {
            EngineError::new(ErrorKind::FunctionInvalidArgument, "format string ends with %")
        })?;
        let arg = args.get(arg_index).ok_or_else(|| {
            EngineError::new(
                ErrorKind::FunctionArgumentLength,
                "format string has more placeholders than arguments",
            )
        })?;
        arg_index += 1;
        let rendered = render_directive(directive, arg, &precision)?;
        out.push_str(&pad_to_width(&rendered, &width));
    }
    if arg_index < args.len() {
        return Err(EngineError::new(
            ErrorKind::FunctionArgumentLength,
            "format string has fewer placeholders than arguments",
        ));
    }
    Ok(out)
}

fn render_directive(directive: char, arg: &Value, precision: &str) -> EngineResult<String> {
    let text = match directive {
        's' => match arg {
            Value::Null => "NULL".to_string(),
            other => other.to_text(),
        },
        'q' => match arg {
            Value::Null => "NULL".to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            other => other.to_text(),
        },
        'd' | 'i' => match arg.to_integer() {
            Value::Integer(i) => i.to_string(),
            _ => "NULL".to_string(),
        },
        'f' => match arg.to_float() {
            Value::Float(f) => match precision.parse::<usize>() {
                Ok(p) => format!("{f:.p$}"),
                Err(_) => format_float(f),
            },
            _ => "NULL".to_string(),
        },
        'e' => match arg.to_float() {
            Value::Float(f) => format!("{f:e}"),
            _ => "NULL".to_string(),
        },
        'b' => match arg.to_integer() {
            Value::Integer(i) => format!("{i:b}"),
            _ => "NULL".to_string(),
        },
        'o' => match arg.to_integer() {
            Value::Integer(i) => format!("{i:o}"),
            _ => "NULL".to_string(),
        },
        'x' => match arg.to_integer() {
            Value::Integer(i) => format!("{i:x}"),
            _ => "NULL".to_string(),
        },
        'T' => arg.type_name().to_string(),
        't' => arg.ternary().to_string(),
        other => {
            return Err(EngineError::new(
                ErrorKind::FunctionInvalidArgument,
                format!("format directive %{other} is unknown"),
            ))
        }
    };
    Ok(text)
}

fn pad_to_width(text: &str, width: &str) -> String {
    let left_align = width.starts_with('-');
    let digits = width.trim_start_matches('-');
    let Ok(target) = digits.parse::<usize>() else {
        return text.to_string();
    };
    let current = UnicodeWidthStr::width(text);
    if current >= target {
        return text.to_string();
    }
    let padding = " ".repeat(target - current);
    if left_align {
        format!("{text}{padding}")
    } else {
        format!("{padding}{text}")
    }
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Integer(_) | Value::Float(_))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        other => other.to_text(),
    }
}

/// Renders a result set in the session's output format.
pub fn render_result(
    header: &[String],
    rows: &[Vec<Value>],
    format: Format,
    info: &FileInfo,
) -> EngineResult<String> {
    match format {
        Format::Text => Ok(render_box_table(header, rows)),
        Format::Gfm => Ok(render_gfm_table(header, rows)),
        Format::Org => Ok(render_org_table(header, rows)),
        Format::Json => Ok(rows_to_json(
            header,
            rows,
            info.json_escape,
            info.pretty_print,
        ) + "\n"),
        Format::Csv | Format::Tsv | Format::Ltsv | Format::Fixed => {
            let bytes = codec::encode(info, header, rows)?;
            String::from_utf8(bytes).map_err(|_| {
                EngineError::new(ErrorKind::WriteFile, "output is not valid utf-8")
            })
        }
    }
}

fn column_widths(header: &[String], rows: &[Vec<Value>]) -> Vec<usize> {
    let mut widths: Vec<usize> = header.iter().map(|h| UnicodeWidthStr::width(h.as_str())).collect();
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            let w = UnicodeWidthStr::width(cell_text(value).as_str());
            if i < widths.len() && widths[i] < w {
                widths[i] = w;
            }
        }
    }
    widths
}

/// ASCII box table with numbers right-aligned.
fn render_box_table(header: &[String], rows: &[Vec<Value>]) -> String {
    if header.is_empty() {
        return String::new();
    }
    let widths = column_widths(header, rows);
    let rule = {
        let mut line = String::from("+");
        for w in &widths {
            line.push_str(&"-".repeat(w + 2));
            line.push('+');
        }
        line.push('\n');
        line
    };
    let mut out = rule.clone();
    out.push('|');
    for (name, w) in header.iter().zip(widths.iter()) {
        out.push_str(&format!(" {} |", pad_cell(name, *w, false)));
    }
    out.push('\n');
    out.push_str(&rule);
    for row in rows {
        out.push('|');
        for (i, w) in widths.iter().enumerate() {
            let value = row.get(i).unwrap_or(&Value::Null);
            let text = cell_text(value);
            out.push_str(&format!(" {} |", pad_cell(&text, *w, is_number(value))));
        }
        out.push('\n');
    }
    out.push_str(&rule);
    out
}

fn pad_cell(text: &str, width: usize, right_align: bool) -> String {
    let current = UnicodeWidthStr::width(text);
    let padding = " ".repeat(width.saturating_sub(current));
    if right_align {
        format!("{padding}{text}")
    } else {
        format!("{text}{padding}")
    }
}

fn render_gfm_table(header: &[String], rows: &[Vec<Value>]) -> String {
    if header.is_empty() {
        return String::new();
    }
    let widths = column_widths(header, rows);
    let mut out = String::from("|");
    for (name, w) in header.iter().zip(widths.iter()) {
        out.push_str(&format!(" {} |", pad_cell(name, *w, false)));
    }
    out.push_str("\n|");
    for w in &widths {
        out.push_str(&format!(" {} |", "-".repeat(*w)));
    }
    out.push('\n');
    for row in rows {
        out.push('|');
        for (i, w) in widths.iter().enumerate() {
            let value = row.get(i).unwrap_or(&Value::Null);
            out.push_str(&format!(" {} |", pad_cell(&cell_text(value), *w, is_number(value))));
        }
        out.push('\n');
    }
    out
}

fn render_org_table(header: &[String], rows: &[Vec<Value>]) -> String {
    if header.is_empty() {
        return String::new();
    }
    let widths = column_widths(header, rows);
    let rule = {
        let mut line = String::from("|");
        for (i, w) in widths.iter().enumerate() {
            line.push_str(&"-".repeat(w + 2));
            line.push(if i == widths.len() - 1 { '|' } else { '+' });
        }
        line.push('\n');
        line
    };
    let mut out = String::from("|");
    for (name, w) in header.iter().zip(widths.iter()) {
        out.push_str(&format!(" {} |", pad_cell(name, *w, false)));
    }
    out.push('\n');
    out.push_str(&rule);
    for row in rows {
        out.push('|');
        for (i, w) in widths.iter().enumerate() {
            let value = row.get(i).unwrap_or(&Value::Null);
            out.push_str(&format!(" {} |", pad_cell(&cell_text(value), *w, is_number(value))));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn formatter_directives() {
        let out = format_values(
            "%s=%d (%T) %q %t",
            &[
                Value::String("a".into()),
                Value::Integer(7),
                Value::Float(1.5),
                Value::String("it's".into()),
                Value::Boolean(true),
            ],
        )
        .unwrap();
        assert_eq!(out, "a=7 (FLOAT) 'it''s' TRUE");
    }

    #[test]
    fn formatter_width_and_precision() {
        assert_eq!(
            format_values("%8.3f|", &[Value::Float(3.14159)]).unwrap(),
            "   3.142|"
        );
        assert_eq!(
            format_values("%-4d|", &[Value::Integer(7)]).unwrap(),
            "7   |"
        );
    }

    #[test]
    fn formatter_argument_count_must_match() {
        assert!(format_values("%s %s", &[Value::Integer(1)]).is_err());
        assert!(format_values("%s", &[Value::Integer(1), Value::Integer(2)]).is_err());
        assert_eq!(format_values("50%%", &[]).unwrap(), "50%");
    }

    #[test]
    fn box_table_aligns_numbers_right() {
        let out = render_box_table(
            &["id".to_string(), "name".to_string()],
            &[
                vec![Value::Integer(1), Value::String("Louis".into())],
                vec![Value::Integer(2), Value::String("Sean".into())],
            ],
        );
        let expected = "\
+----+-------+
| id | name  |
+----+-------+
|  1 | Louis |
|  2 | Sean  |
+----+-------+
";
        assert_eq!(out, expected);
    }

    #[test]
    fn gfm_table_shape() {
        let out = render_gfm_table(
            &["a".to_string()],
            &[vec![Value::Integer(1)]],
        );
        assert_eq!(out, "| a |\n| - |\n| 1 |\n");
    }

    #[test]
    fn csv_render_goes_through_codec() {
        let info = FileInfo::new(PathBuf::from("out.csv"), Format::Csv);
        let out = render_result(
            &["a".to_string(), "b".to_string()],
            &[vec![Value::Integer(1), Value::String("x".into())]],
            Format::Csv,
            &info,
        )
        .unwrap();
        assert_eq!(out, "a,b\n1,x\n");
    }
}
