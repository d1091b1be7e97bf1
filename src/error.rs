use std::fmt;

/// Position of the token that produced an error, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    UndefinedVariable,
    UndefinedCursor,
    UndefinedFunction,
    FieldNotExist,
    FieldAmbiguous,
    TableNotLoaded,
    DuplicateFieldName,
    DuplicateDeclaration,
    FunctionArgumentLength,
    FunctionInvalidArgument,
    RowValueLengthMismatch,
    InvalidValueExpression,
    ScalarSubquery,
    CursorClosed,
    CursorNotOpen,
    CursorOutOfRange,
    CursorFetchLength,
    ViewNotLoaded,
    FileNotExist,
    FileAlreadyExist,
    ReadFile,
    WriteFile,
    LockTimeout,
    PathError,
    ExternalCommand,
    Trigger(i32),
    ForcedExit(i32),
    Internal,
}

impl ErrorKind {
    /// Numeric code reported to the shell on termination.
    pub fn code(&self) -> i32 {
        match self {
            Self::Syntax => 4,
            Self::UndefinedVariable => 10,
            Self::UndefinedCursor => 11,
            Self::UndefinedFunction => 12,
            Self::FieldNotExist => 13,
            Self::FieldAmbiguous => 14,
            Self::TableNotLoaded => 15,
            Self::DuplicateFieldName => 16,
            Self::DuplicateDeclaration => 17,
            Self::FunctionArgumentLength => 20,
            Self::FunctionInvalidArgument => 21,
            Self::RowValueLengthMismatch => 22,
            Self::InvalidValueExpression => 23,
            Self::ScalarSubquery => 24,
            Self::CursorClosed => 30,
            Self::CursorNotOpen => 31,
            Self::CursorOutOfRange => 32,
            Self::CursorFetchLength => 33,
            Self::ViewNotLoaded => 34,
            Self::FileNotExist => 40,
            Self::FileAlreadyExist => 41,
            Self::ReadFile => 42,
            Self::WriteFile => 43,
            Self::LockTimeout => 44,
            Self::PathError => 45,
            Self::ExternalCommand => 46,
            Self::Trigger(code) => *code,
            Self::ForcedExit(code) => *code,
            Self::Internal => 1,
        }
    }
}

/// Uniform error for every stage of the engine. Statement errors unwind to
/// the nearest user-function frame or to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "[L:{} C:{}] {}", loc.line, loc.column, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

pub(crate) fn undefined_variable(name: &str) -> EngineError {
    EngineError::new(
        ErrorKind::UndefinedVariable,
        format!("variable @{name} is undeclared"),
    )
}

pub(crate) fn undefined_cursor(name: &str) -> EngineError {
    EngineError::new(
        ErrorKind::UndefinedCursor,
        format!("cursor {name} is undeclared"),
    )
}

pub(crate) fn undefined_function(name: &str) -> EngineError {
    EngineError::new(
        ErrorKind::UndefinedFunction,
        format!("function {name} does not exist"),
    )
}

pub(crate) fn field_not_exist(name: &str) -> EngineError {
    EngineError::new(ErrorKind::FieldNotExist, format!("field {name} does not exist"))
}

pub(crate) fn field_ambiguous(name: &str) -> EngineError {
    EngineError::new(ErrorKind::FieldAmbiguous, format!("field {name} is ambiguous"))
}

pub(crate) fn function_argument_length(name: &str, expected: &str) -> EngineError {
    EngineError::new(
        ErrorKind::FunctionArgumentLength,
        format!("function {name} takes {expected}"),
    )
}

pub(crate) fn function_invalid_argument(name: &str, message: &str) -> EngineError {
    EngineError::new(
        ErrorKind::FunctionInvalidArgument,
        format!("function {name}: {message}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location_when_present() {
        let err = EngineError::new(ErrorKind::FieldNotExist, "field id does not exist")
            .with_location(SourceLocation::new(3, 14));
        assert_eq!(err.to_string(), "[L:3 C:14] field id does not exist");
    }

    #[test]
    fn display_without_location_is_bare_message() {
        let err = EngineError::new(ErrorKind::LockTimeout, "file data.csv: lock timeout");
        assert_eq!(err.to_string(), "file data.csv: lock timeout");
    }

    #[test]
    fn with_location_keeps_the_first_position() {
        let err = EngineError::new(ErrorKind::Syntax, "unexpected token")
            .with_location(SourceLocation::new(1, 2))
            .with_location(SourceLocation::new(9, 9));
        assert_eq!(err.location, Some(SourceLocation::new(1, 2)));
    }

    #[test]
    fn trigger_and_exit_carry_user_codes() {
        assert_eq!(ErrorKind::Trigger(73).code(), 73);
        assert_eq!(ErrorKind::ForcedExit(2).code(), 2);
    }
}
