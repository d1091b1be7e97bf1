//! Built-in command surface: result output, PRINT family, SHOW family,
//! and environment manipulation helpers used by the dispatcher.

use std::path::PathBuf;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::executor::scope::Filter;
use crate::session::flags::{show_flag, with_flags_read, FLAG_NAMES};
use crate::session::Session;
use crate::storage::file_info::{FileInfo, Format};
use crate::utils::format::render_result;
use crate::value::Value;
use crate::view::View;

/// Output descriptor honoring the write-side flags.
pub fn output_file_info() -> (Format, FileInfo) {
    with_flags_read(|flags| {
        let mut info = FileInfo::new(PathBuf::from("stdout"), flags.format);
        info.delimiter = flags.write_delimiter;
        if flags.format == Format::Tsv {
            info.delimiter = b'\t';
        }
        info.encoding = flags.write_encoding;
        info.line_break = flags.line_break;
        info.no_header = flags.without_header;
        info.enclose_all = flags.enclose_all;
        info.json_escape = flags.json_escape;
        info.pretty_print = flags.pretty_print;
        (flags.format, info)
    })
}

/// Renders a select result to the session writer in the session format.
pub fn write_select_result(session: &mut Session, view: &View) -> EngineResult<()> {
    if view.field_len() == 0 {
        return Ok(());
    }
    let (format, info) = output_file_info();
    let text = render_result(
        &view.header.column_names(),
        &view.all_values(),
        format,
        &info,
    )?;
    session.write(&text);
    Ok(())
}

/// PRINT renders values the way literals are written: strings quoted,
/// Null as NULL.
pub fn print_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_text(),
    }
}

pub fn show_objects_tables(session: &Session) -> String {
    let keys = session.cache.keys();
    if keys.is_empty() {
        return "No table is loaded".to_string();
    }
    let mut out = String::from("Loaded Tables\n");
    for key in keys {
        let dirty = if session.uncommitted.is_dirty(&key) {
            " *"
        } else {
            ""
        };
        out.push_str(&format!("    {key}{dirty}\n"));
    }
    out.trim_end().to_string()
}

pub fn show_objects_views(filter: &Filter, session: &Session) -> String {
    let names = filter.view_names();
    if names.is_empty() {
        return "No view is declared".to_string();
    }
    let mut out = String::from("Views\n");
    for name in names {
        let dirty = if session.uncommitted.is_dirty(&name) {
            " *"
        } else {
            ""
        };
        out.push_str(&format!("    {name}{dirty}\n"));
    }
    out.trim_end().to_string()
}

pub fn show_objects_cursors(filter: &Filter) -> String {
    let names = filter.cursor_names();
    if names.is_empty() {
        return "No cursor is declared".to_string();
    }
    let mut out = String::from("Cursors\n");
    for name in names {
        let status = match filter.cursor(&name) {
            Ok(cursor) if cursor.is_open() => "open",
            _ => "closed",
        };
        out.push_str(&format!("    {name} ({status})\n"));
    }
    out.trim_end().to_string()
}

pub fn show_objects_functions(filter: &Filter) -> String {
    let names = filter.function_names();
    if names.is_empty() {
        return "No function is declared".to_string();
    }
    let mut out = String::from("Functions\n");
    for name in names {
        out.push_str(&format!("    {name}\n"));
    }
    out.trim_end().to_string()
}

pub fn show_all_flags() -> String {
    let mut out = String::new();
    for name in FLAG_NAMES {
        if let Ok(line) = show_flag(name) {
            out.push_str(&format!(" {line}\n"));
        }
    }
    out.trim_end().to_string()
}

pub fn show_env() -> String {
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort();
    let mut out = String::new();
    for (name, value) in vars {
        out.push_str(&format!(" @%{name}: {value}\n"));
    }
    out.trim_end().to_string()
}

pub fn show_runtime_info(session: &Session) -> String {
    let working_dir = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    format!(
        " @#VERSION: {}\n @#WORKING_DIRECTORY: {}\n @#LOADED_TABLES: {}\n @#UNCOMMITTED: {}",
        env!("CARGO_PKG_VERSION"),
        working_dir,
        session.cache.keys().len(),
        session.uncommitted.count() > 0
    )
}

/// Lists field names of a table for SHOW FIELDS, numbered in column
/// order.
pub fn show_fields(name: &str, view: &View) -> String {
    let mut out = format!("Fields in {name}\n");
    for (i, column) in view.header.column_names().iter().enumerate() {
        out.push_str(&format!("    {}. {}\n", i + 1, column));
    }
    out.trim_end().to_string()
}

pub fn chdir(path: &str) -> EngineResult<()> {
    std::env::set_current_dir(path).map_err(|e| {
        EngineError::new(ErrorKind::PathError, format!("directory {path}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Ternary;

    #[test]
    fn print_quotes_strings_only() {
        assert_eq!(print_text(&Value::String("it's".into())), "'it''s'");
        assert_eq!(print_text(&Value::Integer(7)), "7");
        assert_eq!(print_text(&Value::Null), "NULL");
        assert_eq!(print_text(&Value::Ternary(Ternary::Unknown)), "UNKNOWN");
    }

    #[test]
    fn show_fields_numbers_columns() {
        let view = View::new(crate::view::Header::new(
            "users",
            &["id".to_string(), "name".to_string()],
        ));
        let out = show_fields("users", &view);
        assert!(out.contains("1. id"));
        assert!(out.contains("2. name"));
    }
}
