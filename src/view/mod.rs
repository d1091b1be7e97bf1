//! In-memory table model: header fields with reference-qualified
//! resolution, records of cells, and the `View` the pipeline operators
//! transform.

use crate::error::{field_ambiguous, field_not_exist, EngineResult};
use crate::storage::codec::DecodedTable;
use crate::storage::file_info::FileInfo;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderField {
    /// Reference (table or alias) the column belongs to; empty for
    /// computed columns.
    pub view: String,
    pub column: String,
    pub aliases: Vec<String>,
    /// Whether the column came from a loaded table (wildcard expansion
    /// keeps only these).
    pub from_table: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    fields: Vec<HeaderField>,
}

impl Header {
    pub fn new(view: &str, columns: &[String]) -> Self {
        Self {
            fields: columns
                .iter()
                .map(|column| HeaderField {
                    view: view.to_string(),
                    column: column.clone(),
                    aliases: Vec::new(),
                    from_table: true,
                })
                .collect(),
        }
    }

    pub fn from_fields(fields: Vec<HeaderField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.column.clone()).collect()
    }

    pub fn push(&mut self, field: HeaderField) {
        self.fields.push(field);
    }

    pub fn remove(&mut self, index: usize) {
        self.fields.remove(index);
    }

    pub fn insert(&mut self, index: usize, field: HeaderField) {
        self.fields.insert(index, field);
    }

    pub fn field_mut(&mut self, index: usize) -> &mut HeaderField {
        &mut self.fields[index]
    }

    /// Renames every field's reference, after aliasing a table.
    pub fn set_view_name(&mut self, name: &str) {
        for field in &mut self.fields {
            field.view = name.to_string();
        }
    }

    fn matches(field: &HeaderField, view: Option<&str>, column: &str) -> bool {
        if let Some(view) = view {
            if !field.view.eq_ignore_ascii_case(view) {
                return false;
            }
        }
        field.column.eq_ignore_ascii_case(column)
            || field
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(column))
    }

    /// Resolves a possibly qualified column to its index.
    pub fn field_index(&self, view: Option<&str>, column: &str) -> EngineResult<usize> {
        let mut found: Option<usize> = None;
        for (i, field) in self.fields.iter().enumerate() {
            if Self::matches(field, view, column) {
                if found.is_some() {
                    return Err(field_ambiguous(&qualified_name(view, column)));
                }
                found = Some(i);
            }
        }
        found.ok_or_else(|| field_not_exist(&qualified_name(view, column)))
    }

    pub fn contains(&self, view: Option<&str>, column: &str) -> bool {
        self.fields
            .iter()
            .filter(|f| Self::matches(f, view, column))
            .count()
            == 1
    }

    /// Indices expanded by a wildcard: all table columns, optionally
    /// restricted to one reference.
    pub fn wildcard_indices(&self, view: Option<&str>) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| {
                let in_view = match view {
                    Some(view) => f.view.eq_ignore_ascii_case(view),
                    None => true,
                };
                in_view && f.from_table
            })
            .map(|(i, _)| i)
            .collect()
    }
}

fn qualified_name(view: Option<&str>, column: &str) -> String {
    match view {
        Some(view) => format!("{view}.{column}"),
        None => column.to_string(),
    }
}

/// One cell: a value plus the per-group payload aggregates consume after
/// GROUP BY.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: Value,
    pub group: Option<Vec<Value>>,
}

impl Cell {
    pub fn new(value: Value) -> Self {
        Self { value, group: None }
    }

    pub fn grouped(values: Vec<Value>) -> Self {
        Self {
            value: values.first().cloned().unwrap_or(Value::Null),
            group: Some(values),
        }
    }
}

pub type Record = Vec<Cell>;

pub fn record_from_values(values: Vec<Value>) -> Record {
    values.into_iter().map(Cell::new).collect()
}

#[derive(Debug, Clone, Default)]
pub struct View {
    pub header: Header,
    pub records: Vec<Record>,
    pub file_info: Option<FileInfo>,
}

impl View {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            records: Vec::new(),
            file_info: None,
        }
    }

    pub fn from_decoded(name: &str, table: DecodedTable, info: FileInfo) -> Self {
        let header = Header::new(name, &table.header);
        let records = table.rows.into_iter().map(record_from_values).collect();
        Self {
            header,
            records,
            file_info: Some(info),
        }
    }

    /// A single borderless record, the implicit FROM of `SELECT 1`.
    pub fn unit() -> Self {
        Self {
            header: Header::default(),
            records: vec![Vec::new()],
            file_info: None,
        }
    }

    pub fn field_len(&self) -> usize {
        self.header.len()
    }

    pub fn record_len(&self) -> usize {
        self.records.len()
    }

    /// Raw values of one record, without grouping payloads.
    pub fn record_values(&self, index: usize) -> Vec<Value> {
        self.records[index]
            .iter()
            .map(|cell| cell.value.clone())
            .collect()
    }

    pub fn all_values(&self) -> Vec<Vec<Value>> {
        (0..self.records.len())
            .map(|i| self.record_values(i))
            .collect()
    }

    /// Appends records row by row; each row must match the header width.
    pub fn insert_values(&mut self, rows: Vec<Vec<Value>>, column_indices: &[usize]) {
        let width = self.field_len();
        for row in rows {
            let mut record: Record = (0..width).map(|_| Cell::new(Value::Null)).collect();
            for (value, &index) in row.into_iter().zip(column_indices.iter()) {
                record[index] = Cell::new(value);
            }
            self.records.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn header() -> Header {
        let mut h = Header::new("users", &["id".to_string(), "name".to_string()]);
        h.push(HeaderField {
            view: "orders".to_string(),
            column: "id".to_string(),
            aliases: Vec::new(),
            from_table: true,
        });
        h
    }

    #[test]
    fn qualified_resolution_breaks_ties() {
        let h = header();
        assert_eq!(h.field_index(Some("users"), "id").unwrap(), 0);
        assert_eq!(h.field_index(Some("orders"), "id").unwrap(), 2);
        let err = h.field_index(None, "id").unwrap_err();
        assert_eq!(err.kind, ErrorKind::FieldAmbiguous);
    }

    #[test]
    fn missing_field_is_an_error() {
        let err = header().field_index(None, "age").unwrap_err();
        assert_eq!(err.kind, ErrorKind::FieldNotExist);
    }

    #[test]
    fn aliases_resolve_case_insensitively() {
        let mut h = Header::new("t", &["count".to_string()]);
        h.field_mut(0).aliases.push("n".to_string());
        assert_eq!(h.field_index(None, "N").unwrap(), 0);
        assert_eq!(h.field_index(None, "COUNT").unwrap(), 0);
    }

    #[test]
    fn wildcard_skips_computed_columns() {
        let mut h = Header::new("t", &["a".to_string()]);
        h.push(HeaderField {
            view: String::new(),
            column: "a+1".to_string(),
            aliases: Vec::new(),
            from_table: false,
        });
        assert_eq!(h.wildcard_indices(None), vec![0]);
    }

    #[test]
    fn insert_fills_unlisted_columns_with_null() {
        let mut view = View::new(Header::new("t", &["a".to_string(), "b".to_string()]));
        view.insert_values(vec![vec![Value::Integer(1)]], &[1]);
        assert_eq!(view.records[0][0].value, Value::Null);
        assert_eq!(view.records[0][1].value, Value::Integer(1));
    }
}
