//! The statement dispatcher: control flow, declarations, DML against
//! file-backed and temporary views, cursor verbs, transactions and the
//! built-in commands.

use crate::commands;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::executor::cursor::Cursor;
use crate::executor::exec_expr::{eval, eval_ternary};
use crate::executor::exec_query::{execute_select, load_table_expr, reference_name};
use crate::executor::scope::{Filter, UserFunction};
use crate::parser::ast::{
    ColumnDefault, ColumnPosition, Expr, FetchPosition, InsertSource, SelectQuery, ShowObjectType,
    Statement, TableExpr,
};
use crate::session::flags::{
    add_flag_element, remove_flag_element, set_flag, show_flag, with_flags_read,
};
use crate::session::Session;
use crate::storage::file_info::{absolute_path, FileInfo, Format};
use crate::storage::lock::LockType;
use crate::txn;
use crate::utils::format::format_values;
use crate::value::{Datetime, Ternary, Value};
use crate::view::{Cell, Header, HeaderField, View};

/// Control flow bubbled up the dispatcher stack. Loops consume Continue
/// and Break; Exit and Return pass through to their owners.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Continue,
    Break,
    Exit(i32),
    Return(Value),
}

pub struct Procedure {
    pub filter: Filter,
    pub session: Session,
}

/// Current wall-clock instant in the session timezone.
pub fn system_now() -> Datetime {
    let offset = with_flags_read(|f| f.timezone_offset_secs());
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0);
    Datetime::from_nanos(nanos, offset)
}

impl Procedure {
    pub fn new(session: Session) -> Self {
        Self {
            filter: Filter::new(system_now()),
            session,
        }
    }

    /// Runs top-level statements in order. The clock freezes per
    /// statement.
    pub fn execute(&mut self, statements: &[Statement]) -> EngineResult<Flow> {
        for statement in statements {
            self.filter.now = system_now();
            match execute_statement(statement, &mut self.filter, &mut self.session)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }
}

pub fn execute_statements(
    statements: &[Statement],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    for statement in statements {
        match execute_statement(statement, filter, session)? {
            Flow::Normal => {}
            other => return Ok(other),
        }
    }
    Ok(Flow::Normal)
}

pub fn execute_statement(
    statement: &Statement,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    match statement {
        Statement::SelectQuery(query) => {
            let view = execute_select(query, filter, session)?;
            commands::write_select_result(session, &view)?;
            Ok(Flow::Normal)
        }
        Statement::Insert {
            table,
            columns,
            source,
        } => execute_insert(table, columns, source, filter, session),
        Statement::Update {
            table,
            assignments,
            where_clause,
        } => execute_update(table, assignments, where_clause, filter, session),
        Statement::Delete {
            table,
            where_clause,
        } => execute_delete(table, where_clause, filter, session),
        Statement::CreateTable {
            table,
            columns,
            query,
            loc,
        } => execute_create_table(table, columns, query.as_ref(), filter, session)
            .map_err(|e| e.with_location(*loc)),
        Statement::AddColumns {
            table,
            columns,
            position,
            reference,
        } => execute_add_columns(table, columns, *position, reference, filter, session),
        Statement::DropColumns { table, columns } => {
            execute_drop_columns(table, columns, filter, session)
        }
        Statement::RenameColumn { table, old, new } => {
            execute_rename_column(table, old, new, filter, session)
        }
        Statement::VariableDeclaration(assignments) => {
            for assignment in assignments {
                let value = match &assignment.expr {
                    Some(expr) => eval(expr, filter, session)?,
                    None => Value::Null,
                };
                filter.declare_variable(&assignment.name, value)?;
            }
            Ok(Flow::Normal)
        }
        Statement::VariableSubstitution { name, expr, loc } => {
            let value = eval(expr, filter, session)?;
            filter
                .substitute_variable(name, value)
                .map_err(|e| e.with_location(*loc))?;
            Ok(Flow::Normal)
        }
        Statement::DisposeVariable(name) => {
            filter.dispose_variable(name)?;
            Ok(Flow::Normal)
        }
        Statement::DisposeCursor(name) => {
            filter.dispose_cursor(name)?;
            Ok(Flow::Normal)
        }
        Statement::DisposeFunction(name) => {
            filter.dispose_function(name)?;
            Ok(Flow::Normal)
        }
        Statement::DisposeView(name) => {
            filter.dispose_view(name)?;
            session.uncommitted.discard(name);
            Ok(Flow::Normal)
        }
        Statement::CursorDeclaration { name, query } => {
            filter.declare_cursor(Cursor::declared(name, query.clone()))?;
            Ok(Flow::Normal)
        }
        Statement::OpenCursor(name) => {
            let query = filter.cursor_query(name)?;
            let view = execute_select(&query, filter, session)?;
            filter.cursor_mut(name)?.open(view)?;
            Ok(Flow::Normal)
        }
        Statement::CloseCursor(name) => {
            filter.cursor_mut(name)?.close();
            Ok(Flow::Normal)
        }
        Statement::Fetch {
            cursor,
            position,
            number,
            variables,
            loc,
        } => execute_fetch(cursor, *position, number, variables, filter, session)
            .map_err(|e| e.with_location(*loc)),
        Statement::ViewDeclaration {
            name,
            columns,
            query,
        } => {
            let view = match query {
                Some(query) => {
                    let mut view = execute_select(query, filter, session)?;
                    if !columns.is_empty() {
                        if columns.len() != view.field_len() {
                            return Err(EngineError::new(
                                ErrorKind::RowValueLengthMismatch,
                                format!("view {name} has a mismatched column list"),
                            ));
                        }
                        view.header = Header::new(name, columns);
                    } else {
                        view.header.set_view_name(name);
                        for i in 0..view.header.len() {
                            view.header.field_mut(i).from_table = true;
                        }
                    }
                    view
                }
                None => View::new(Header::new(name, columns)),
            };
            filter.declare_view(name, view)?;
            Ok(Flow::Normal)
        }
        Statement::FunctionDeclaration {
            name,
            parameters,
            body,
        } => {
            filter.declare_function(UserFunction {
                name: name.clone(),
                parameters: parameters.clone(),
                body: body.clone(),
                cursor: None,
            })?;
            Ok(Flow::Normal)
        }
        Statement::AggregateDeclaration {
            name,
            cursor,
            parameters,
            body,
        } => {
            filter.declare_function(UserFunction {
                name: name.clone(),
                parameters: parameters.clone(),
                body: body.clone(),
                cursor: Some(cursor.clone()),
            })?;
            Ok(Flow::Normal)
        }
        Statement::If {
            branches,
            else_block,
        } => {
            for (condition, block) in branches {
                if eval_ternary(condition, filter, session)? == Ternary::True {
                    return execute_statements(block, filter, session);
                }
            }
            execute_statements(else_block, filter, session)
        }
        Statement::While { condition, body } => {
            while eval_ternary(condition, filter, session)? == Ternary::True {
                match execute_statements(body, filter, session)? {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break => break,
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        }
        Statement::WhileInCursor {
            variables,
            cursor,
            body,
            loc,
        } => {
            loop {
                let row = filter
                    .cursor_mut(cursor)
                    .and_then(|c| c.fetch(FetchPosition::Next, 0))
                    .map_err(|e| e.with_location(*loc))?;
                let Some(values) = row else {
                    break;
                };
                if values.len() != variables.len() {
                    return Err(EngineError::new(
                        ErrorKind::CursorFetchLength,
                        format!(
                            "cursor {cursor} returns {} values for {} variables",
                            values.len(),
                            variables.len()
                        ),
                    )
                    .with_location(*loc));
                }
                for (name, value) in variables.iter().zip(values.into_iter()) {
                    filter
                        .substitute_variable(name, value)
                        .map_err(|e| e.with_location(*loc))?;
                }
                match execute_statements(body, filter, session)? {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break => break,
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        }
        Statement::Continue => Ok(Flow::Continue),
        Statement::Break => Ok(Flow::Break),
        Statement::Exit(code) => Ok(Flow::Exit(code.map(|c| c as i32).unwrap_or(0))),
        Statement::Return(expr) => {
            let value = match expr {
                Some(expr) => eval(expr, filter, session)?,
                None => Value::Null,
            };
            Ok(Flow::Return(value))
        }
        Statement::Commit => {
            txn::commit(session)?;
            Ok(Flow::Normal)
        }
        Statement::Rollback => {
            txn::rollback(session);
            Ok(Flow::Normal)
        }
        Statement::Source(path_expr) => {
            let path = expect_text(path_expr, filter, session, "SOURCE")?;
            let base = std::env::current_dir().unwrap_or_default();
            let path = absolute_path(std::path::Path::new(&path), &base)?;
            let text = std::fs::read_to_string(&path).map_err(|e| {
                EngineError::new(
                    ErrorKind::ReadFile,
                    format!("file {}: {e}", path.display()),
                )
            })?;
            let statements = crate::parser::parse(&text)?;
            execute_statements(&statements, filter, session)
        }
        Statement::Execute { format, args } => {
            let template = expect_text(format, filter, session, "EXECUTE")?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, filter, session)?);
            }
            let source = format_values(&template, &values)?;
            let statements = crate::parser::parse(&source)?;
            // EXECUTE runs in a nested scope of its own.
            filter.push_scope();
            let result = execute_statements(&statements, filter, session);
            filter.pop_scope();
            result
        }
        Statement::TriggerError { code, message } => {
            let text = match message {
                Some(expr) => eval(expr, filter, session)?.to_text(),
                None => "triggered error".to_string(),
            };
            Err(EngineError::new(
                ErrorKind::Trigger(code.map(|c| c as i32).unwrap_or(1)),
                text,
            ))
        }
        Statement::Print(expr) => {
            let value = eval(expr, filter, session)?;
            let text = commands::print_text(&value);
            session.write_line(&text);
            Ok(Flow::Normal)
        }
        Statement::Printf { format, args } => {
            let template = expect_text(format, filter, session, "PRINTF")?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, filter, session)?);
            }
            let text = format_values(&template, &values)?;
            session.write_line(&text);
            Ok(Flow::Normal)
        }
        Statement::Echo(expr) => {
            let value = eval(expr, filter, session)?;
            session.write_line(&value.to_text());
            Ok(Flow::Normal)
        }
        Statement::SetFlag { name, value, loc } => {
            let value = eval(value, filter, session)?;
            set_flag(name, &value).map_err(|e| e.with_location(*loc))?;
            Ok(Flow::Normal)
        }
        Statement::AddFlagElement { value, flag, loc } => {
            let value = eval(value, filter, session)?;
            add_flag_element(flag, &value).map_err(|e| e.with_location(*loc))?;
            Ok(Flow::Normal)
        }
        Statement::RemoveFlagElement { value, flag, loc } => {
            let value = eval(value, filter, session)?;
            remove_flag_element(flag, &value).map_err(|e| e.with_location(*loc))?;
            Ok(Flow::Normal)
        }
        Statement::ShowFlag(name) => {
            let text = show_flag(name)?;
            session.write_line(&format!(" {text}"));
            Ok(Flow::Normal)
        }
        Statement::ShowObjects(kind) => {
            let text = match kind {
                ShowObjectType::Tables => commands::show_objects_tables(session),
                ShowObjectType::Views => commands::show_objects_views(filter, session),
                ShowObjectType::Cursors => commands::show_objects_cursors(filter),
                ShowObjectType::Functions => commands::show_objects_functions(filter),
                ShowObjectType::Flags => commands::show_all_flags(),
                ShowObjectType::Env => commands::show_env(),
                ShowObjectType::RuntimeInfo => commands::show_runtime_info(session),
            };
            session.write_line(&text);
            Ok(Flow::Normal)
        }
        Statement::ShowFields(table) => {
            let view = load_table_expr(table, filter, session)?;
            let name = match table {
                TableExpr::Table { name, .. } => name.clone(),
                _ => String::new(),
            };
            let text = commands::show_fields(&name, &view);
            session.write_line(&text);
            Ok(Flow::Normal)
        }
        Statement::SetEnvVar { name, value } => {
            let value = eval(value, filter, session)?;
            std::env::set_var(name, value.to_text());
            Ok(Flow::Normal)
        }
        Statement::UnsetEnvVar(name) => {
            std::env::remove_var(name);
            Ok(Flow::Normal)
        }
        Statement::Chdir(path) => {
            let path = expect_text(path, filter, session, "CHDIR")?;
            commands::chdir(&path)?;
            Ok(Flow::Normal)
        }
        Statement::Pwd => {
            let cwd = std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            session.write_line(&cwd);
            Ok(Flow::Normal)
        }
        Statement::Reload => {
            let config = crate::session::load_env_config()?;
            crate::session::apply_env_config(&config);
            Ok(Flow::Normal)
        }
    }
}

fn expect_text(
    expr: &Expr,
    filter: &mut Filter,
    session: &mut Session,
    clause: &str,
) -> EngineResult<String> {
    match eval(expr, filter, session)? {
        Value::String(s) => Ok(s),
        other => match other.to_string_value() {
            Value::String(s) => Ok(s),
            _ => Err(EngineError::new(
                ErrorKind::InvalidValueExpression,
                format!("{clause} requires a string"),
            )),
        },
    }
}

// ---- user-defined functions ----

pub fn call_user_function(
    function: &UserFunction,
    args: Vec<Value>,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Value> {
    if function.is_aggregate() {
        return Err(EngineError::new(
            ErrorKind::InvalidValueExpression,
            format!("aggregate function {} requires a grouped context", function.name),
        ));
    }
    let mut child = bind_parameters(function, args, filter, session)?;
    finish_function(function, &mut child, session)
}

/// Aggregate bodies read their payload through the implicit cursor named
/// in the declaration.
pub fn call_user_aggregate(
    function: &UserFunction,
    values: Vec<Value>,
    extra_args: Vec<Value>,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Value> {
    let cursor_name = function.cursor.clone().ok_or_else(|| {
        EngineError::new(
            ErrorKind::InvalidValueExpression,
            format!("function {} is not an aggregate", function.name),
        )
    })?;
    let mut child = bind_parameters(function, extra_args, filter, session)?;
    child.declare_cursor(Cursor::over_values(&cursor_name, values))?;
    finish_function(function, &mut child, session)
}

fn bind_parameters(
    function: &UserFunction,
    args: Vec<Value>,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Filter> {
    let required = function
        .parameters
        .iter()
        .filter(|p| p.default.is_none())
        .count();
    if args.len() < required || args.len() > function.parameters.len() {
        return Err(crate::error::function_argument_length(
            &function.name,
            &if required == function.parameters.len() {
                format!("exactly {required} arguments")
            } else {
                format!("{required} to {} arguments", function.parameters.len())
            },
        ));
    }
    let mut child = filter.child_for_function();
    for (i, parameter) in function.parameters.iter().enumerate() {
        let value = match args.get(i) {
            Some(value) => value.clone(),
            None => match &parameter.default {
                Some(expr) => eval(expr, &mut child, session)?,
                None => Value::Null,
            },
        };
        child.declare_variable(&parameter.name, value)?;
    }
    Ok(child)
}

fn finish_function(
    function: &UserFunction,
    child: &mut Filter,
    session: &mut Session,
) -> EngineResult<Value> {
    match execute_statements(&function.body, child, session)? {
        Flow::Return(value) => Ok(value),
        Flow::Exit(code) => Err(EngineError::new(
            ErrorKind::ForcedExit(code),
            format!("exit with code {code}"),
        )),
        _ => Ok(Value::Null),
    }
}

// ---- cursors ----

fn execute_fetch(
    cursor: &str,
    position: FetchPosition,
    number: &Option<Expr>,
    variables: &[String],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    let number = match number {
        Some(expr) => match eval(expr, filter, session)?.to_integer() {
            Value::Integer(i) => i,
            _ => {
                return Err(EngineError::new(
                    ErrorKind::InvalidValueExpression,
                    "fetch position must be an integer",
                ))
            }
        },
        None => 0,
    };
    let row = filter.cursor_mut(cursor)?.fetch(position, number)?;
    match row {
        Some(values) => {
            if values.len() != variables.len() {
                return Err(EngineError::new(
                    ErrorKind::CursorFetchLength,
                    format!(
                        "cursor {cursor} returns {} values for {} variables",
                        values.len(),
                        variables.len()
                    ),
                ));
            }
            for (name, value) in variables.iter().zip(values.into_iter()) {
                filter.substitute_variable(name, value)?;
            }
        }
        None => {
            for name in variables {
                filter.substitute_variable(name, Value::Null)?;
            }
        }
    }
    Ok(Flow::Normal)
}

// ---- DML ----

enum Target {
    Temp(String),
    File { key: String, name: String },
}

/// Resolves a DML target to a working copy plus where to write it back.
fn resolve_target(
    table: &TableExpr,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<(Target, View)> {
    let TableExpr::Table { name, .. } = table else {
        return Err(EngineError::new(
            ErrorKind::InvalidValueExpression,
            "target table is not updatable",
        ));
    };
    if filter.view(name).is_some() {
        let view = load_table_expr(table, filter, session)?;
        return Ok((Target::Temp(name.clone()), view));
    }
    let view = load_table_expr(table, filter, session)?;
    let info = view.file_info.clone().ok_or_else(|| {
        EngineError::new(
            ErrorKind::ViewNotLoaded,
            format!("table {name} has no backing file"),
        )
    })?;
    Ok((
        Target::File {
            key: info.key(),
            name: name.clone(),
        },
        view,
    ))
}

/// Stores the mutated working copy and marks it dirty. File targets hold
/// their exclusive lock from here until commit or rollback.
fn store_target(
    target: Target,
    mut view: View,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<()> {
    match target {
        Target::Temp(name) => {
            view.header.set_view_name(&name);
            let slot = filter.view_mut(&name).ok_or_else(|| {
                EngineError::new(
                    ErrorKind::ViewNotLoaded,
                    format!("view {name} is undeclared"),
                )
            })?;
            *slot = view;
            session.uncommitted.mark_temp_dirty(&name);
            Ok(())
        }
        Target::File { key, .. } => {
            let wait_timeout = with_flags_read(|f| f.wait_timeout);
            if let Some(handler) = session.cache.take_handler(&key) {
                let handler = if handler.lock_type() == LockType::Shared {
                    handler.upgrade(wait_timeout)?
                } else {
                    handler
                };
                session.cache.set_handler(&key, handler);
            }
            if let Some(info) = &view.file_info {
                view.header.set_view_name(&reference_name(&info.path));
            }
            let entry = session.cache.get_mut(&key).ok_or_else(|| {
                EngineError::new(
                    ErrorKind::ViewNotLoaded,
                    format!("table {key} is not loaded"),
                )
            })?;
            entry.view = view;
            session.uncommitted.mark_updated(&key);
            Ok(())
        }
    }
}

fn execute_insert(
    table: &TableExpr,
    columns: &[String],
    source: &InsertSource,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    let (target, mut view) = resolve_target(table, filter, session)?;
    let column_indices: Vec<usize> = if columns.is_empty() {
        (0..view.field_len()).collect()
    } else {
        let mut indices = Vec::with_capacity(columns.len());
        for column in columns {
            indices.push(view.header.field_index(None, column)?);
        }
        indices
    };
    let rows: Vec<Vec<Value>> = match source {
        InsertSource::Values(rows) => {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() != column_indices.len() {
                    return Err(EngineError::new(
                        ErrorKind::RowValueLengthMismatch,
                        format!(
                            "row value has {} values for {} fields",
                            row.len(),
                            column_indices.len()
                        ),
                    ));
                }
                let mut values = Vec::with_capacity(row.len());
                for expr in row {
                    values.push(eval(expr, filter, session)?);
                }
                out.push(values);
            }
            out
        }
        InsertSource::Query(query) => {
            let source_view = execute_select(query, filter, session)?;
            if source_view.field_len() != column_indices.len() {
                return Err(EngineError::new(
                    ErrorKind::RowValueLengthMismatch,
                    "select query returns a mismatched number of fields",
                ));
            }
            source_view.all_values()
        }
    };
    let count = rows.len();
    view.insert_values(rows, &column_indices);
    store_target(target, view, filter, session)?;
    session.notice(&format!("{count} records inserted"));
    Ok(Flow::Normal)
}

fn execute_update(
    table: &TableExpr,
    assignments: &[(Expr, Expr)],
    where_clause: &Option<Expr>,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    let (target, mut view) = resolve_target(table, filter, session)?;
    let mut indices = Vec::with_capacity(assignments.len());
    for (field, _) in assignments {
        let Expr::FieldReference { view: v, column, .. } = field else {
            return Err(EngineError::new(
                ErrorKind::InvalidValueExpression,
                "update target must be a field",
            ));
        };
        indices.push(view.header.field_index(v.as_deref(), column)?);
    }
    let mut count = 0usize;
    for row in 0..view.records.len() {
        filter.push_record(view.header.clone(), view.records[row].clone());
        let result = (|| -> EngineResult<Option<Vec<Value>>> {
            let matched = match where_clause {
                Some(condition) => eval_ternary(condition, filter, session)? == Ternary::True,
                None => true,
            };
            if !matched {
                return Ok(None);
            }
            let mut values = Vec::with_capacity(assignments.len());
            for (_, expr) in assignments {
                values.push(eval(expr, filter, session)?);
            }
            Ok(Some(values))
        })();
        filter.pop_record();
        if let Some(values) = result? {
            for (index, value) in indices.iter().zip(values.into_iter()) {
                view.records[row][*index] = Cell::new(value);
            }
            count += 1;
        }
    }
    store_target(target, view, filter, session)?;
    session.notice(&format!("{count} records updated"));
    Ok(Flow::Normal)
}

fn execute_delete(
    table: &TableExpr,
    where_clause: &Option<Expr>,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    let (target, mut view) = resolve_target(table, filter, session)?;
    let mut kept = Vec::with_capacity(view.records.len());
    let mut count = 0usize;
    for record in std::mem::take(&mut view.records) {
        let matched = match where_clause {
            Some(condition) => {
                filter.push_record(view.header.clone(), record.clone());
                let result = eval_ternary(condition, filter, session);
                filter.pop_record();
                result? == Ternary::True
            }
            None => true,
        };
        if matched {
            count += 1;
        } else {
            kept.push(record);
        }
    }
    view.records = kept;
    store_target(target, view, filter, session)?;
    session.notice(&format!("{count} records deleted"));
    Ok(Flow::Normal)
}

fn execute_create_table(
    table: &str,
    columns: &[String],
    query: Option<&SelectQuery>,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    let (repository, flags_format) = with_flags_read(|f| (f.repository.clone(), f.format));
    let base = if repository.is_empty() {
        std::env::current_dir().map_err(|e| {
            EngineError::new(ErrorKind::PathError, format!("working directory: {e}"))
        })?
    } else {
        std::path::PathBuf::from(repository)
    };
    let path = absolute_path(std::path::Path::new(table), &base)?;
    let format = Format::from_extension(&path).unwrap_or(match flags_format {
        Format::Text | Format::Gfm | Format::Org => Format::Csv,
        other => other,
    });
    let info = FileInfo::new(path.clone(), format);
    let key = info.key();
    if path.exists() || session.cache.contains(&key) {
        return Err(EngineError::new(
            ErrorKind::FileAlreadyExist,
            format!("file {} already exists", path.display()),
        ));
    }
    let name = reference_name(&path);
    let mut view = match query {
        Some(query) => {
            let mut view = execute_select(query, filter, session)?;
            if !columns.is_empty() {
                if columns.len() != view.field_len() {
                    return Err(EngineError::new(
                        ErrorKind::RowValueLengthMismatch,
                        format!("table {table} has a mismatched column list"),
                    ));
                }
                view.header = Header::new(&name, columns);
            } else {
                view.header.set_view_name(&name);
                for i in 0..view.header.len() {
                    view.header.field_mut(i).from_table = true;
                }
            }
            view
        }
        None => View::new(Header::new(&name, columns)),
    };
    view.file_info = Some(info);
    session.cache.insert(key.clone(), view, None);
    session.uncommitted.mark_created(&key);
    session.notice(&format!("file {} is created", path.display()));
    Ok(Flow::Normal)
}

fn execute_add_columns(
    table: &TableExpr,
    columns: &[ColumnDefault],
    position: ColumnPosition,
    reference: &Option<Expr>,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    let (target, mut view) = resolve_target(table, filter, session)?;
    let mut insert_at = match position {
        ColumnPosition::First => 0,
        ColumnPosition::Last => view.field_len(),
        ColumnPosition::After | ColumnPosition::Before => {
            let Some(Expr::FieldReference { view: v, column, .. }) = reference else {
                return Err(EngineError::new(
                    ErrorKind::InvalidValueExpression,
                    "column position requires a field reference",
                ));
            };
            let index = view.header.field_index(v.as_deref(), column)?;
            if position == ColumnPosition::After {
                index + 1
            } else {
                index
            }
        }
    };
    let view_name = view
        .header
        .fields()
        .first()
        .map(|f| f.view.clone())
        .unwrap_or_default();
    for column in columns {
        if view.header.contains(None, &column.column) {
            return Err(EngineError::new(
                ErrorKind::DuplicateFieldName,
                format!("field {} already exists", column.column),
            ));
        }
        view.header.insert(
            insert_at,
            HeaderField {
                view: view_name.clone(),
                column: column.column.clone(),
                aliases: Vec::new(),
                from_table: true,
            },
        );
        for row in 0..view.records.len() {
            view.records[row].insert(insert_at, Cell::new(Value::Null));
        }
        if let Some(default) = &column.default {
            for row in 0..view.records.len() {
                filter.push_record(view.header.clone(), view.records[row].clone());
                let value = eval(default, filter, session);
                filter.pop_record();
                view.records[row][insert_at] = Cell::new(value?);
            }
        }
        insert_at += 1;
    }
    let count = columns.len();
    store_target(target, view, filter, session)?;
    session.notice(&format!("{count} fields added"));
    Ok(Flow::Normal)
}

fn execute_drop_columns(
    table: &TableExpr,
    columns: &[Expr],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    let (target, mut view) = resolve_target(table, filter, session)?;
    let mut indices = Vec::with_capacity(columns.len());
    for column in columns {
        let Expr::FieldReference { view: v, column, .. } = column else {
            return Err(EngineError::new(
                ErrorKind::InvalidValueExpression,
                "drop target must be a field",
            ));
        };
        indices.push(view.header.field_index(v.as_deref(), column)?);
    }
    indices.sort_unstable();
    indices.dedup();
    for &index in indices.iter().rev() {
        view.header.remove(index);
        for record in &mut view.records {
            record.remove(index);
        }
    }
    let count = indices.len();
    store_target(target, view, filter, session)?;
    session.notice(&format!("{count} fields dropped"));
    Ok(Flow::Normal)
}

fn execute_rename_column(
    table: &TableExpr,
    old: &Expr,
    new: &str,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Flow> {
    let (target, mut view) = resolve_target(table, filter, session)?;
    let Expr::FieldReference { view: v, column, .. } = old else {
        return Err(EngineError::new(
            ErrorKind::InvalidValueExpression,
            "rename target must be a field",
        ));
    };
    let index = view.header.field_index(v.as_deref(), column)?;
    if view.header.contains(None, new) {
        return Err(EngineError::new(
            ErrorKind::DuplicateFieldName,
            format!("field {new} already exists"),
        ));
    }
    view.header.field_mut(index).column = new.to_string();
    store_target(target, view, filter, session)?;
    session.notice("1 field renamed");
    Ok(Flow::Normal)
}
