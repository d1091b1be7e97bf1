//! Text codecs: byte stream to rows of values on load, recordset to byte
//! stream on commit. Formats: CSV/TSV, LTSV, fixed-length, JSON.

use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use encoding_rs::SHIFT_JIS;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::storage::file_info::{Encoding, FileInfo, Format};
use crate::utils::adt::json::{query_json, rows_from_json, rows_to_json};
use crate::value::{from_cell_text, Value};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decoded table: column names plus rows of values.
pub struct DecodedTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub fn decode_bytes_to_text(bytes: &[u8], encoding: Encoding) -> EngineResult<String> {
    match encoding {
        Encoding::Utf8 | Encoding::Utf8m => {
            let stripped = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
            String::from_utf8(stripped.to_vec())
                .map_err(|_| EngineError::new(ErrorKind::ReadFile, "file is not valid utf-8"))
        }
        Encoding::Sjis => {
            let (text, _, _) = SHIFT_JIS.decode(bytes);
            Ok(text.into_owned())
        }
    }
}

pub fn encode_text_to_bytes(text: &str, encoding: Encoding) -> Vec<u8> {
    match encoding {
        Encoding::Utf8 => text.as_bytes().to_vec(),
        Encoding::Utf8m => {
            let mut out = UTF8_BOM.to_vec();
            out.extend_from_slice(text.as_bytes());
            out
        }
        Encoding::Sjis => {
            let (bytes, _, _) = SHIFT_JIS.encode(text);
            bytes.into_owned()
        }
    }
}

fn cell_value(text: &str, without_null: bool) -> Value {
    if text.is_empty() {
        if without_null {
            Value::String(String::new())
        } else {
            Value::Null
        }
    } else {
        from_cell_text(text)
    }
}

fn synthesized_header(width: usize) -> Vec<String> {
    (1..=width).map(|i| format!("c{i}")).collect()
}

/// Decodes a file's bytes according to its `FileInfo`. `without_null`
/// keeps empty cells as empty strings.
pub fn decode(info: &FileInfo, bytes: &[u8], without_null: bool) -> EngineResult<DecodedTable> {
    let text = decode_bytes_to_text(bytes, info.encoding)?;
    match info.format {
        Format::Csv | Format::Tsv => decode_delimited(info, &text, without_null),
        Format::Ltsv => decode_ltsv(&text, without_null),
        Format::Fixed => decode_fixed(info, &text, without_null),
        Format::Json => decode_json(info, &text),
        other => Err(EngineError::new(
            ErrorKind::ReadFile,
            format!("{} is an output-only format", other.name()),
        )),
    }
}

fn decode_delimited(info: &FileInfo, text: &str, without_null: bool) -> EngineResult<DecodedTable> {
    let mut reader = ReaderBuilder::new()
        .delimiter(info.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            EngineError::new(ErrorKind::ReadFile, format!("csv parse error: {e}"))
        })?;
        raw_rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    let width = raw_rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let header = if info.no_header {
        synthesized_header(width)
    } else if raw_rows.is_empty() {
        Vec::new()
    } else {
        raw_rows.remove(0)
    };
    let width = header.len().max(width);
    let rows = raw_rows
        .into_iter()
        .map(|raw| {
            let mut row: Vec<Value> = raw
                .iter()
                .map(|cell| cell_value(cell, without_null))
                .collect();
            row.resize(width, Value::Null);
            row
        })
        .collect();
    Ok(DecodedTable { header, rows })
}

fn decode_ltsv(text: &str, without_null: bool) -> EngineResult<DecodedTable> {
    let mut header: Vec<String> = Vec::new();
    let mut labeled_rows: Vec<Vec<(String, String)>> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let mut row = Vec::new();
        for field in line.split('\t') {
            let (label, value) = field.split_once(':').ok_or_else(|| {
                EngineError::new(
                    ErrorKind::ReadFile,
                    format!("ltsv field {field} has no label"),
                )
            })?;
            if !header.iter().any(|h| h == label) {
                header.push(label.to_string());
            }
            row.push((label.to_string(), value.to_string()));
        }
        labeled_rows.push(row);
    }
    let rows = labeled_rows
        .into_iter()
        .map(|labeled| {
            header
                .iter()
                .map(|column| {
                    labeled
                        .iter()
                        .find(|(label, _)| label == column)
                        .map(|(_, value)| cell_value(value, without_null))
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect();
    Ok(DecodedTable { header, rows })
}

fn decode_fixed(info: &FileInfo, text: &str, without_null: bool) -> EngineResult<DecodedTable> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    match &info.delimiter_positions {
        Some(positions) => {
            for line in &lines {
                let bytes = line.as_bytes();
                let mut row = Vec::new();
                let mut start = 0usize;
                for &end in positions {
                    let end = end.min(bytes.len());
                    let cell = std::str::from_utf8(&bytes[start.min(bytes.len())..end])
                        .map_err(|_| {
                            EngineError::new(
                                ErrorKind::ReadFile,
                                "fixed-length positions split a multi-byte character",
                            )
                        })?;
                    row.push(cell.trim().to_string());
                    start = end;
                }
                raw_rows.push(row);
            }
        }
        None => {
            for line in &lines {
                raw_rows.push(line.split_whitespace().map(|s| s.to_string()).collect());
            }
        }
    }
    let width = raw_rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let header = if info.no_header {
        synthesized_header(width)
    } else if raw_rows.is_empty() {
        Vec::new()
    } else {
        raw_rows.remove(0)
    };
    let width = header.len().max(width);
    let rows = raw_rows
        .into_iter()
        .map(|raw| {
            let mut row: Vec<Value> = raw
                .iter()
                .map(|cell| cell_value(cell, without_null))
                .collect();
            row.resize(width, Value::Null);
            row
        })
        .collect();
    Ok(DecodedTable { header, rows })
}

fn decode_json(info: &FileInfo, text: &str) -> EngineResult<DecodedTable> {
    let document: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| EngineError::new(ErrorKind::ReadFile, format!("json parse error: {e}")))?;
    let selected = query_json(&info.json_query, &document)?;
    let (header, rows) = rows_from_json(selected)?;
    Ok(DecodedTable { header, rows })
}

/// Encodes a recordset for the file described by `info`. The inverse of
/// `decode` for every rewritable format.
pub fn encode(info: &FileInfo, header: &[String], rows: &[Vec<Value>]) -> EngineResult<Vec<u8>> {
    let text = match info.format {
        Format::Csv | Format::Tsv => encode_delimited(info, header, rows)?,
        Format::Ltsv => encode_ltsv(info, header, rows),
        Format::Fixed => encode_fixed(info, header, rows),
        Format::Json => rows_to_json(header, rows, info.json_escape, info.pretty_print),
        other => {
            return Err(EngineError::new(
                ErrorKind::WriteFile,
                format!("{} cannot back a table file", other.name()),
            ))
        }
    };
    Ok(encode_text_to_bytes(&text, info.encoding))
}

fn terminator(info: &FileInfo) -> Terminator {
    match info.line_break.text() {
        "\r\n" => Terminator::CRLF,
        "\r" => Terminator::Any(b'\r'),
        _ => Terminator::Any(b'\n'),
    }
}

fn encode_delimited(
    info: &FileInfo,
    header: &[String],
    rows: &[Vec<Value>],
) -> EngineResult<String> {
    let mut writer = WriterBuilder::new()
        .delimiter(info.delimiter)
        .terminator(terminator(info))
        .quote_style(if info.enclose_all {
            QuoteStyle::NonNumeric
        } else {
            QuoteStyle::Necessary
        })
        .from_writer(Vec::new());
    let io_err =
        |e: csv::Error| EngineError::new(ErrorKind::WriteFile, format!("csv write error: {e}"));
    if !info.no_header {
        writer.write_record(header).map_err(io_err)?;
    }
    for row in rows {
        let cells: Vec<String> = row.iter().map(|v| v.to_text()).collect();
        writer.write_record(&cells).map_err(io_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| EngineError::new(ErrorKind::WriteFile, format!("csv write error: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|_| EngineError::new(ErrorKind::WriteFile, "encoded csv is not valid utf-8"))
}

fn encode_ltsv(info: &FileInfo, header: &[String], rows: &[Vec<Value>]) -> String {
    let mut out = String::new();
    for row in rows {
        let line: Vec<String> = header
            .iter()
            .zip(row.iter())
            .map(|(label, value)| format!("{label}:{}", value.to_text()))
            .collect();
        out.push_str(&line.join("\t"));
        out.push_str(info.line_break.text());
    }
    out
}

fn encode_fixed(info: &FileInfo, header: &[String], rows: &[Vec<Value>]) -> String {
    // Without explicit positions, columns are padded to their widest cell.
    let positions = info.delimiter_positions.clone().unwrap_or_else(|| {
        let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, value) in row.iter().enumerate() {
                let len = value.to_text().len();
                if i < widths.len() && widths[i] < len {
                    widths[i] = len;
                }
            }
        }
        let mut positions = Vec::with_capacity(widths.len());
        let mut total = 0;
        for w in widths {
            total += w + 1;
            positions.push(total);
        }
        positions
    });
    let mut out = String::new();
    let mut write_line = |cells: Vec<String>| {
        let mut line = String::new();
        let mut start = 0usize;
        for (cell, &end) in cells.iter().zip(positions.iter()) {
            let width = end.saturating_sub(start);
            let mut text = cell.clone();
            if text.len() > width {
                text.truncate(width);
            }
            line.push_str(&text);
            // Shorter fields are space-padded on write.
            for _ in text.len()..width {
                line.push(' ');
            }
            start = end;
        }
        out.push_str(line.trim_end());
        out.push_str(info.line_break.text());
    };
    if !info.no_header {
        write_line(header.to_vec());
    }
    for row in rows {
        write_line(row.iter().map(|v| v.to_text()).collect());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn csv_info() -> FileInfo {
        FileInfo::new(PathBuf::from("test.csv"), Format::Csv)
    }

    #[test]
    fn decodes_csv_with_header() {
        let table = decode(&csv_info(), b"id,name\n1,Louis\n2,Sean\n", false).unwrap();
        assert_eq!(table.header, vec!["id", "name"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][0], Value::Integer(1));
        assert_eq!(table.rows[1][1], Value::String("Sean".into()));
    }

    #[test]
    fn no_header_synthesizes_column_names() {
        let mut info = csv_info();
        info.no_header = true;
        let table = decode(&info, b"1,Louis\n", false).unwrap();
        assert_eq!(table.header, vec!["c1", "c2"]);
    }

    #[test]
    fn empty_cells_are_null_unless_without_null() {
        let table = decode(&csv_info(), b"a,b\n1,\n", false).unwrap();
        assert_eq!(table.rows[0][1], Value::Null);
        let table = decode(&csv_info(), b"a,b\n1,\n", true).unwrap();
        assert_eq!(table.rows[0][1], Value::String(String::new()));
    }

    #[test]
    fn csv_round_trip_is_byte_stable() {
        let info = csv_info();
        let source = b"id,name\n1,Louis\n2,Sean\n";
        let table = decode(&info, source, false).unwrap();
        let encoded = encode(&info, &table.header, &table.rows).unwrap();
        assert_eq!(encoded, source);
    }

    #[test]
    fn ragged_rows_are_padded_with_null() {
        let table = decode(&csv_info(), b"a,b,c\n1,2\n", false).unwrap();
        assert_eq!(table.rows[0].len(), 3);
        assert_eq!(table.rows[0][2], Value::Null);
    }

    #[test]
    fn decodes_and_encodes_ltsv() {
        let mut info = FileInfo::new(PathBuf::from("log.ltsv"), Format::Ltsv);
        info.format = Format::Ltsv;
        let table = decode(&info, b"host:a\ttime:10\nhost:b\tuser:x\n", false).unwrap();
        assert_eq!(table.header, vec!["host", "time", "user"]);
        assert_eq!(table.rows[1][1], Value::Null);
        let encoded = encode(&info, &table.header, &table.rows).unwrap();
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.starts_with("host:a\ttime:10\tuser:"));
    }

    #[test]
    fn decodes_fixed_with_positions() {
        let mut info = FileInfo::new(PathBuf::from("data.dat"), Format::Fixed);
        info.delimiter_positions = Some(vec![3, 9]);
        let table = decode(&info, b"id name\n1  Louis\n", false).unwrap();
        assert_eq!(table.header, vec!["id", "name"]);
        assert_eq!(table.rows[0][1], Value::String("Louis".into()));
    }

    #[test]
    fn decodes_json_with_query() {
        let mut info = FileInfo::new(PathBuf::from("data.json"), Format::Json);
        info.json_query = "data".to_string();
        let table = decode(
            &info,
            br#"{"data": [{"id": 1}, {"id": 2}]}"#,
            false,
        )
        .unwrap();
        assert_eq!(table.header, vec!["id"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn sjis_round_trip() {
        let text = "名前,値\nたろう,1\n";
        let bytes = encode_text_to_bytes(text, Encoding::Sjis);
        assert_ne!(bytes, text.as_bytes());
        assert_eq!(decode_bytes_to_text(&bytes, Encoding::Sjis).unwrap(), text);
    }

    #[test]
    fn utf8m_strips_and_writes_bom() {
        let bytes = encode_text_to_bytes("a,b\n", Encoding::Utf8m);
        assert!(bytes.starts_with(UTF8_BOM));
        assert_eq!(decode_bytes_to_text(&bytes, Encoding::Utf8m).unwrap(), "a,b\n");
    }

    #[test]
    fn crlf_line_break_on_write() {
        let mut info = csv_info();
        info.line_break = crate::storage::file_info::LineBreak::Crlf;
        let encoded = encode(&info, &["a".to_string()], &[vec![Value::Integer(1)]]).unwrap();
        assert_eq!(encoded, b"a\r\n1\r\n");
    }
}
