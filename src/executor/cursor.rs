//! Cursors: positional iterators over a materialized select query, plus
//! the pseudo-cursors user-defined aggregates read their payload through.

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::parser::ast::{FetchPosition, SelectQuery};
use crate::value::Value;
use crate::view::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Closed,
    Open,
    OpenExhausted,
}

#[derive(Debug, Clone)]
pub struct Cursor {
    pub name: String,
    /// Absent for aggregate pseudo-cursors, which are born open.
    pub query: Option<SelectQuery>,
    view: Option<View>,
    /// Fetched row index; None until the first fetch.
    pointer: Option<i64>,
    state: CursorState,
}

impl Cursor {
    pub fn declared(name: &str, query: SelectQuery) -> Self {
        Self {
            name: name.to_string(),
            query: Some(query),
            view: None,
            pointer: None,
            state: CursorState::Closed,
        }
    }

    /// A single-column cursor over in-memory values, already open.
    pub fn over_values(name: &str, values: Vec<Value>) -> Self {
        let mut view = View::new(crate::view::Header::new(name, &["value".to_string()]));
        view.records = values
            .into_iter()
            .map(|v| vec![crate::view::Cell::new(v)])
            .collect();
        Self {
            name: name.to_string(),
            query: None,
            view: Some(view),
            pointer: None,
            state: CursorState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state != CursorState::Closed
    }

    pub fn open(&mut self, view: View) -> EngineResult<()> {
        if self.is_open() {
            return Err(EngineError::new(
                ErrorKind::CursorOutOfRange,
                format!("cursor {} is already open", self.name),
            ));
        }
        self.view = Some(view);
        self.pointer = None;
        self.state = CursorState::Open;
        Ok(())
    }

    pub fn close(&mut self) {
        self.view = None;
        self.pointer = None;
        self.state = CursorState::Closed;
    }

    /// Moves the pointer and returns the row, or None past either end.
    pub fn fetch(
        &mut self,
        position: FetchPosition,
        number: i64,
    ) -> EngineResult<Option<Vec<Value>>> {
        if !self.is_open() {
            return Err(EngineError::new(
                ErrorKind::CursorClosed,
                format!("cursor {} is closed", self.name),
            ));
        }
        let view = self.view.as_ref().ok_or_else(|| {
            EngineError::new(
                ErrorKind::CursorNotOpen,
                format!("cursor {} is not open", self.name),
            )
        })?;
        let len = view.record_len() as i64;
        let target = match position {
            FetchPosition::Next => self.pointer.map(|p| p + 1).unwrap_or(0),
            FetchPosition::Prior => self.pointer.map(|p| p - 1).unwrap_or(-1),
            FetchPosition::First => 0,
            FetchPosition::Last => len - 1,
            FetchPosition::Absolute => number,
            FetchPosition::Relative => self.pointer.map(|p| p + number).unwrap_or(number),
        };
        if target < 0 || target >= len {
            // The pointer parks just past the end it ran off.
            self.pointer = Some(target.clamp(-1, len));
            self.state = CursorState::OpenExhausted;
            return Ok(None);
        }
        self.pointer = Some(target);
        self.state = CursorState::Open;
        Ok(Some(view.record_values(target as usize)))
    }

    /// TRUE when the pointer is on a record, FALSE when it ran past an
    /// end, Null before the first fetch.
    pub fn in_range(&self) -> EngineResult<Value> {
        if !self.is_open() {
            return Err(EngineError::new(
                ErrorKind::CursorClosed,
                format!("cursor {} is closed", self.name),
            ));
        }
        Ok(match self.pointer {
            None => Value::Null,
            Some(_) => Value::Boolean(self.state == CursorState::Open),
        })
    }

    pub fn count(&self) -> EngineResult<i64> {
        match &self.view {
            Some(view) => Ok(view.record_len() as i64),
            None => Err(EngineError::new(
                ErrorKind::CursorClosed,
                format!("cursor {} is closed", self.name),
            )),
        }
    }

    /// 1-based position of the fetched row.
    pub fn row_number(&self) -> EngineResult<i64> {
        if !self.is_open() {
            return Err(EngineError::new(
                ErrorKind::CursorClosed,
                format!("cursor {} is closed", self.name),
            ));
        }
        match (self.pointer, self.state) {
            (Some(p), CursorState::Open) => Ok(p + 1),
            _ => Err(EngineError::new(
                ErrorKind::CursorOutOfRange,
                format!("cursor {} is not pointing at a record", self.name),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_cursor(rows: Vec<i64>) -> Cursor {
        let mut cursor = Cursor::over_values(
            "cur",
            rows.into_iter().map(Value::Integer).collect(),
        );
        cursor.name = "cur".to_string();
        cursor
    }

    #[test]
    fn next_walks_rows_in_order_then_exhausts() {
        let mut cur = open_cursor(vec![1, 2]);
        assert_eq!(
            cur.fetch(FetchPosition::Next, 0).unwrap(),
            Some(vec![Value::Integer(1)])
        );
        assert_eq!(
            cur.fetch(FetchPosition::Next, 0).unwrap(),
            Some(vec![Value::Integer(2)])
        );
        assert_eq!(cur.fetch(FetchPosition::Next, 0).unwrap(), None);
        assert_eq!(cur.in_range().unwrap(), Value::Boolean(false));
    }

    #[test]
    fn absolute_and_relative_positioning() {
        let mut cur = open_cursor(vec![10, 20, 30]);
        assert_eq!(
            cur.fetch(FetchPosition::Absolute, 2).unwrap(),
            Some(vec![Value::Integer(30)])
        );
        assert_eq!(
            cur.fetch(FetchPosition::Relative, -2).unwrap(),
            Some(vec![Value::Integer(10)])
        );
        assert_eq!(cur.row_number().unwrap(), 1);
    }

    #[test]
    fn fetch_on_closed_cursor_fails() {
        let mut cur = Cursor::declared(
            "cur",
            crate::parser::parse("SELECT 1;")
                .ok()
                .and_then(|mut stmts| match stmts.remove(0) {
                    crate::parser::ast::Statement::SelectQuery(q) => Some(q),
                    _ => None,
                })
                .unwrap(),
        );
        let err = cur.fetch(FetchPosition::Next, 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CursorClosed);
    }

    #[test]
    fn in_range_is_null_before_first_fetch() {
        let cur = open_cursor(vec![1]);
        assert_eq!(cur.in_range().unwrap(), Value::Null);
    }
}
