//! Select-query execution: table loading, joins, filtering, grouping,
//! projection, set operations and ordering. Each stage consumes a view
//! and produces a view.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::executor::exec_expr::{datetime_settings, eval, eval_ternary};
use crate::executor::scope::Filter;
use crate::executor::window::eval_window_values;
use crate::parser::ast::{
    Expr, JoinType, NullsPosition, OrderItem, QueryExpr, SelectBody, SelectItem, SelectQuery,
    SetOperator, SortDirection, TableExpr,
};
use crate::session::flags::with_flags_read;
use crate::session::Session;
use crate::storage::codec;
use crate::storage::file_info::{absolute_path, canonical_key, FileInfo, Format};
use crate::storage::lock::FileHandler;
use crate::value::{Ternary, Value};
use crate::view::{record_from_values, Cell, Header, HeaderField, Record, View};

/// Executes a full select query under the current scope.
pub fn execute_select(
    query: &SelectQuery,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let scoped = !query.with.is_empty();
    if scoped {
        filter.push_scope();
        for cte in &query.with {
            let mut view = execute_select(&cte.query, filter, session)?;
            if !cte.columns.is_empty() {
                if cte.columns.len() != view.field_len() {
                    filter.pop_scope();
                    return Err(EngineError::new(
                        ErrorKind::RowValueLengthMismatch,
                        format!("common table {} has a mismatched column list", cte.name),
                    ));
                }
                view.header = Header::new(&cte.name, &cte.columns);
            } else {
                view.header.set_view_name(&cte.name);
                for i in 0..view.header.len() {
                    view.header.field_mut(i).from_table = true;
                }
            }
            if let Err(err) = filter.declare_view(&cte.name, view) {
                filter.pop_scope();
                return Err(err);
            }
        }
    }
    let result = execute_query_body(query, filter, session);
    if scoped {
        filter.pop_scope();
    }
    result
}

fn execute_query_body(
    query: &SelectQuery,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let mut view = execute_query_expr(&query.body, filter, session)?;
    if !query.order_by.is_empty() {
        view = apply_order_by(view, &query.order_by, filter, session)?;
    }
    if query.offset.is_some() || query.limit.is_some() {
        view = apply_limit_offset(view, query, filter, session)?;
    }
    Ok(view)
}

fn execute_query_expr(
    expr: &QueryExpr,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    match expr {
        QueryExpr::Select(body) => execute_select_body(body, filter, session),
        QueryExpr::SetOperation {
            op,
            all,
            left,
            right,
        } => {
            let left_view = execute_query_expr(left, filter, session)?;
            let right_view = execute_query_expr(right, filter, session)?;
            apply_set_operation(*op, *all, left_view, right_view)
        }
    }
}

fn execute_select_body(
    body: &SelectBody,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let mut view = load_from_clause(&body.from, filter, session)?;
    if let Some(condition) = &body.where_clause {
        view = apply_where(view, condition, filter, session)?;
    }
    let needs_grouping = !body.group_by.is_empty() || items_contain_aggregate(&body.items, filter);
    if needs_grouping {
        view = apply_group_by(view, &body.group_by, filter, session)?;
    }
    if let Some(condition) = &body.having {
        view = apply_where(view, condition, filter, session)?;
    }
    let mut projected = apply_select(view, &body.items, filter, session)?;
    if body.distinct {
        projected = apply_distinct(projected);
    }
    Ok(projected)
}

// ---- FROM ----

fn load_from_clause(
    from: &[TableExpr],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    if from.is_empty() {
        return Ok(View::unit());
    }
    let mut view = load_table_expr(&from[0], filter, session)?;
    for table in &from[1..] {
        let right = load_table_expr(table, filter, session)?;
        view = cross_join(view, right);
    }
    Ok(view)
}

pub fn load_table_expr(
    table: &TableExpr,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    match table {
        TableExpr::Dual => Ok(View::unit()),
        TableExpr::Table { name, alias, loc } => {
            let mut view = load_named_table(name, filter, session)
                .map_err(|e| e.with_location(*loc))?;
            if let Some(alias) = alias {
                view.header.set_view_name(alias);
            }
            Ok(view)
        }
        TableExpr::Subquery { query, alias, .. } => {
            let mut view = execute_select(query, filter, session)?;
            if let Some(alias) = alias {
                view.header.set_view_name(alias);
            }
            // Derived-table columns are all wildcard-expandable.
            for i in 0..view.header.len() {
                view.header.field_mut(i).from_table = true;
            }
            Ok(view)
        }
        TableExpr::Values { rows, alias } => {
            let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
            let name = alias.clone().unwrap_or_default();
            let columns: Vec<String> = (1..=width).map(|i| format!("c{i}")).collect();
            let mut view = View::new(Header::new(&name, &columns));
            for row in rows {
                if row.len() != width {
                    return Err(EngineError::new(
                        ErrorKind::RowValueLengthMismatch,
                        "row value lengths do not match",
                    ));
                }
                let mut values = Vec::with_capacity(width);
                for expr in row {
                    values.push(eval(expr, filter, session)?);
                }
                view.records.push(record_from_values(values));
            }
            Ok(view)
        }
        TableExpr::Stdin { alias } => {
            let text = session.stdin_text.clone().ok_or_else(|| {
                EngineError::new(ErrorKind::TableNotLoaded, "stdin is empty")
            })?;
            let (delimiter, no_header, without_null) =
                with_flags_read(|f| (f.delimiter, f.no_header, f.without_null));
            let mut info = FileInfo::new(PathBuf::from("stdin"), Format::Csv);
            info.delimiter = delimiter;
            info.no_header = no_header;
            let table = codec::decode(&info, text.as_bytes(), without_null)?;
            let name = alias.clone().unwrap_or_else(|| "stdin".to_string());
            Ok(View::from_decoded(&name, table, info))
        }
        TableExpr::Join {
            left,
            right,
            join_type,
            natural,
            condition,
            using,
        } => {
            let left_view = load_table_expr(left, filter, session)?;
            execute_join(
                left_view, right, *join_type, *natural, condition, using, filter, session,
            )
        }
    }
}

/// Loads a table reference: temporary views first, then the file cache,
/// then disk under a shared lock.
fn load_named_table(
    name: &str,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    if let Some(view) = filter.view(name) {
        let mut view = view.clone();
        view.header.set_view_name(name);
        return Ok(view);
    }
    // Created-but-uncommitted tables exist only in the cache.
    for candidate in table_candidates(name)? {
        let key = canonical_key(&candidate);
        if let Some(cached) = session.cache.get(&key) {
            let mut view = cached.view.clone();
            view.header.set_view_name(&reference_name(&candidate));
            return Ok(view);
        }
    }
    let (path, info) = resolve_table_file(name)?;
    let key = canonical_key(&path);
    let wait_timeout = with_flags_read(|f| f.wait_timeout);
    let handler = FileHandler::for_read(&path, wait_timeout)?;
    let bytes = std::fs::read(&path).map_err(|e| {
        EngineError::new(ErrorKind::ReadFile, format!("file {}: {e}", path.display()))
    })?;
    let without_null = with_flags_read(|f| f.without_null);
    let table = codec::decode(&info, &bytes, without_null)?;
    let view = View::from_decoded(&reference_name(&path), table, info);
    session.cache.insert(key, view.clone(), Some(handler));
    Ok(view)
}

/// Base name without extension: the default reference name of a loaded
/// file.
pub fn reference_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Candidate absolute paths for a table name: as written, then with the
/// import extensions when none is given.
fn table_candidates(name: &str) -> EngineResult<Vec<PathBuf>> {
    let repository = with_flags_read(|f| f.repository.clone());
    let base = if repository.is_empty() {
        std::env::current_dir().map_err(|e| {
            EngineError::new(ErrorKind::PathError, format!("working directory: {e}"))
        })?
    } else {
        PathBuf::from(repository)
    };
    let raw = PathBuf::from(name);
    let mut candidates = vec![absolute_path(&raw, &base)?];
    if raw.extension().is_none() {
        for ext in ["csv", "tsv", "json", "ltsv"] {
            candidates.push(absolute_path(&raw.with_extension(ext), &base)?);
        }
    }
    Ok(candidates)
}

/// Maps a table name to a file path plus codec attributes, trying the
/// repository directory and the import extensions.
pub fn resolve_table_file(name: &str) -> EngineResult<(PathBuf, FileInfo)> {
    let flags_info = with_flags_read(|f| {
        (
            f.delimiter,
            f.delimiter_positions.clone(),
            f.encoding,
            f.no_header,
            f.json_query.clone(),
        )
    });
    let candidates = table_candidates(name)?;
    for candidate in &candidates {
        if candidate.is_file() {
            let format = Format::from_extension(candidate).unwrap_or(Format::Csv);
            let mut info = FileInfo::new(candidate.clone(), format);
            let (delimiter, positions, encoding, no_header, json_query) = flags_info.clone();
            if format == Format::Csv {
                info.delimiter = delimiter;
            }
            info.delimiter_positions = positions;
            info.encoding = encoding;
            info.no_header = no_header;
            info.json_query = json_query;
            return Ok((candidate.clone(), info));
        }
    }
    Err(EngineError::new(
        ErrorKind::FileNotExist,
        format!("file {name} does not exist"),
    ))
}

// ---- joins ----

fn merge_headers(left: &Header, right: &Header, drop_right: &[usize]) -> Header {
    let mut fields: Vec<HeaderField> = left.fields().to_vec();
    for (i, field) in right.fields().iter().enumerate() {
        if !drop_right.contains(&i) {
            fields.push(field.clone());
        }
    }
    Header::from_fields(fields)
}

fn merge_records(left: &Record, right: &Record, drop_right: &[usize]) -> Record {
    let mut record = left.clone();
    for (i, cell) in right.iter().enumerate() {
        if !drop_right.contains(&i) {
            record.push(cell.clone());
        }
    }
    record
}

fn null_record(len: usize) -> Record {
    (0..len).map(|_| Cell::new(Value::Null)).collect()
}

fn cross_join(left: View, right: View) -> View {
    let header = merge_headers(&left.header, &right.header, &[]);
    let mut view = View::new(header);
    for l in &left.records {
        for r in &right.records {
            view.records.push(merge_records(l, r, &[]));
        }
    }
    view
}

#[allow(clippy::too_many_arguments)]
fn execute_join(
    left_view: View,
    right_expr: &TableExpr,
    join_type: JoinType,
    natural: bool,
    condition: &Option<Expr>,
    using: &[String],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let lateral = matches!(right_expr, TableExpr::Subquery { lateral: true, .. });
    if lateral {
        return execute_lateral_join(left_view, right_expr, join_type, condition, filter, session);
    }
    let right_view = load_table_expr(right_expr, filter, session)?;
    if join_type == JoinType::Cross {
        return Ok(cross_join(left_view, right_view));
    }

    // NATURAL and USING pair same-named columns and drop the right copy.
    let mut key_pairs: Vec<(usize, usize)> = Vec::new();
    if natural {
        for (li, field) in left_view.header.fields().iter().enumerate() {
            if let Ok(ri) = right_view.header.field_index(None, &field.column) {
                key_pairs.push((li, ri));
            }
        }
    } else {
        for column in using {
            let li = left_view.header.field_index(None, column)?;
            let ri = right_view.header.field_index(None, column)?;
            key_pairs.push((li, ri));
        }
    }
    let drop_right: Vec<usize> = key_pairs.iter().map(|(_, ri)| *ri).collect();
    let header = merge_headers(&left_view.header, &right_view.header, &drop_right);
    let (offset, formats) = datetime_settings();

    let mut view = View::new(header.clone());
    let mut right_matched = vec![false; right_view.records.len()];
    for l in &left_view.records {
        let mut matched = false;
        for (ri, r) in right_view.records.iter().enumerate() {
            let pair_matches = if key_pairs.is_empty() {
                let combined = merge_records(l, r, &drop_right);
                match condition {
                    Some(condition) => {
                        filter.push_record(header.clone(), combined.clone());
                        let result = eval_ternary(condition, filter, session);
                        filter.pop_record();
                        result? == Ternary::True
                    }
                    None => true,
                }
            } else {
                key_pairs.iter().all(|(li, ri)| {
                    crate::value::equal(&l[*li].value, &r[*ri].value, offset, &formats)
                        == Ternary::True
                })
            };
            if pair_matches {
                matched = true;
                right_matched[ri] = true;
                view.records.push(merge_records(l, r, &drop_right));
            }
        }
        if !matched && matches!(join_type, JoinType::Left | JoinType::Full) {
            let filler = null_record(right_view.field_len());
            view.records.push(merge_records(l, &filler, &drop_right));
        }
    }
    if matches!(join_type, JoinType::Right | JoinType::Full) {
        for (ri, r) in right_view.records.iter().enumerate() {
            if !right_matched[ri] {
                let filler = null_record(left_view.field_len());
                view.records.push(merge_records(&filler, r, &drop_right));
            }
        }
    }
    Ok(view)
}

/// LATERAL re-runs the right-hand subquery for every left row with the
/// left record in scope.
fn execute_lateral_join(
    left_view: View,
    right_expr: &TableExpr,
    join_type: JoinType,
    condition: &Option<Expr>,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let TableExpr::Subquery { query, alias, .. } = right_expr else {
        return Err(EngineError::new(
            ErrorKind::Internal,
            "lateral join requires a subquery",
        ));
    };
    let mut view: Option<View> = None;
    for l in &left_view.records {
        filter.push_record(left_view.header.clone(), l.clone());
        let result = execute_select(query, filter, session);
        filter.pop_record();
        let mut right_view = result?;
        if let Some(alias) = alias {
            right_view.header.set_view_name(alias);
        }
        let header = merge_headers(&left_view.header, &right_view.header, &[]);
        let target = view.get_or_insert_with(|| View::new(header.clone()));
        let mut matched = false;
        for r in &right_view.records {
            let combined = merge_records(l, r, &[]);
            let keep = match condition {
                Some(condition) => {
                    filter.push_record(header.clone(), combined.clone());
                    let result = eval_ternary(condition, filter, session);
                    filter.pop_record();
                    result? == Ternary::True
                }
                None => true,
            };
            if keep {
                matched = true;
                target.records.push(combined);
            }
        }
        if !matched && join_type == JoinType::Left {
            let filler = null_record(right_view.field_len());
            target.records.push(merge_records(l, &filler, &[]));
        }
    }
    match view {
        Some(view) => Ok(view),
        None => {
            // No left rows: synthesize the header by running the subquery once.
            let mut right_view = execute_select(query, filter, session)?;
            if let Some(alias) = alias {
                right_view.header.set_view_name(alias);
            }
            Ok(View::new(merge_headers(
                &left_view.header,
                &right_view.header,
                &[],
            )))
        }
    }
}

// ---- WHERE / HAVING ----

fn apply_where(
    view: View,
    condition: &Expr,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let mut out = View::new(view.header.clone());
    out.file_info = view.file_info.clone();
    for record in view.records {
        filter.push_record(view.header.clone(), record.clone());
        let keep = eval_ternary(condition, filter, session);
        filter.pop_record();
        if keep? == Ternary::True {
            out.records.push(record);
        }
    }
    Ok(out)
}

// ---- GROUP BY ----

fn items_contain_aggregate(items: &[SelectItem], filter: &Filter) -> bool {
    items.iter().any(|item| expr_has_aggregate(&item.expr, filter))
}

fn expr_has_aggregate(expr: &Expr, filter: &Filter) -> bool {
    let mut found = false;
    walk_expr(expr, &mut |e| {
        if let Expr::Function { name, over, .. } = e {
            if over.is_none()
                && (crate::executor::aggregate::is_aggregate(name)
                    || filter
                        .function(name)
                        .map(|f| f.is_aggregate())
                        .unwrap_or(false))
            {
                found = true;
            }
        }
    });
    found
}

/// Structural walk over subexpressions, skipping subqueries.
fn walk_expr(expr: &Expr, visit: &mut impl FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::Parens(inner) | Expr::Unary { expr: inner, .. } => walk_expr(inner, visit),
        Expr::VariableSubstitution { expr: inner, .. } => walk_expr(inner, visit),
        Expr::Binary { left, right, .. } | Expr::Comparison { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::And(left, right) | Expr::Or(left, right) => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::Is { expr: subject, value, .. } => {
            walk_expr(subject, visit);
            walk_expr(value, visit);
        }
        Expr::Like { expr: subject, pattern, .. } => {
            walk_expr(subject, visit);
            walk_expr(pattern, visit);
        }
        Expr::Between {
            expr: subject,
            low,
            high,
            ..
        } => {
            walk_expr(subject, visit);
            walk_expr(low, visit);
            walk_expr(high, visit);
        }
        Expr::In { expr: subject, list, .. } => {
            walk_expr(subject, visit);
            if let crate::parser::ast::InList::Values(values) = list {
                for value in values {
                    walk_expr(value, visit);
                }
            }
        }
        Expr::Case {
            subject,
            branches,
            else_expr,
        } => {
            if let Some(subject) = subject {
                walk_expr(subject, visit);
            }
            for (condition, result) in branches {
                walk_expr(condition, visit);
                walk_expr(result, visit);
            }
            if let Some(else_expr) = else_expr {
                walk_expr(else_expr, visit);
            }
        }
        Expr::Function { args, .. } => {
            for arg in args {
                walk_expr(arg, visit);
            }
        }
        _ => {}
    }
}

/// Serialization key for grouping, DISTINCT and set operations. Numbers
/// normalize so 2 and 2.0 land in the same bucket.
pub fn row_key(values: &[Value]) -> String {
    let mut key = String::new();
    for value in values {
        match value {
            Value::Null => key.push_str("N|"),
            Value::Boolean(b) => key.push_str(if *b { "T:1|" } else { "T:0|" }),
            Value::Ternary(t) => {
                key.push_str("T:");
                key.push_str(&format!("{t}|"));
            }
            Value::Integer(i) => key.push_str(&format!("F:{}|", *i as f64)),
            Value::Float(f) => key.push_str(&format!("F:{f}|")),
            Value::Datetime(d) => key.push_str(&format!("D:{}|", d.unix_nanos())),
            Value::String(s) => key.push_str(&format!("S:{}|", s.trim())),
        }
    }
    key
}

fn apply_group_by(
    view: View,
    keys: &[Expr],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let mut group_order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, record) in view.records.iter().enumerate() {
        let key = if keys.is_empty() {
            String::new()
        } else {
            filter.push_record(view.header.clone(), record.clone());
            let mut key_values = Vec::with_capacity(keys.len());
            let mut key_err = None;
            for key_expr in keys {
                match eval(key_expr, filter, session) {
                    Ok(value) => key_values.push(value),
                    Err(err) => {
                        key_err = Some(err);
                        break;
                    }
                }
            }
            filter.pop_record();
            if let Some(err) = key_err {
                return Err(err);
            }
            row_key(&key_values)
        };
        groups.entry(key.clone()).or_insert_with(|| {
            group_order.push(key.clone());
            Vec::new()
        });
        if let Some(rows) = groups.get_mut(&key) {
            rows.push(i);
        }
    }
    // An aggregate query over an empty set still yields one group.
    if view.records.is_empty() && keys.is_empty() {
        let mut out = View::new(view.header.clone());
        out.records.push(
            (0..view.field_len())
                .map(|_| Cell::grouped(Vec::new()))
                .collect(),
        );
        return Ok(out);
    }
    let mut out = View::new(view.header.clone());
    for key in group_order {
        let rows = &groups[&key];
        let mut record: Record = Vec::with_capacity(view.field_len());
        for column in 0..view.field_len() {
            let values: Vec<Value> = rows
                .iter()
                .map(|&row| view.records[row][column].value.clone())
                .collect();
            record.push(Cell::grouped(values));
        }
        out.records.push(record);
    }
    Ok(out)
}

// ---- SELECT / projection ----

fn apply_select(
    view: View,
    items: &[SelectItem],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    // Expand wildcards into concrete header positions first.
    enum Plan {
        Column(usize),
        Expr(usize),
        Window(usize),
    }
    let mut plans: Vec<(Plan, Option<String>)> = Vec::new();
    let mut exprs: Vec<&SelectItem> = Vec::new();
    for item in items {
        match &item.expr {
            Expr::Wildcard { view: target } => {
                let indices = view.header.wildcard_indices(target.as_deref());
                if indices.is_empty() {
                    return Err(EngineError::new(
                        ErrorKind::FieldNotExist,
                        "wildcard matched no fields",
                    ));
                }
                for index in indices {
                    plans.push((Plan::Column(index), None));
                }
            }
            Expr::Function { over: Some(_), .. } => {
                plans.push((Plan::Window(exprs.len()), item.alias.clone()));
                exprs.push(item);
            }
            _ => {
                plans.push((Plan::Expr(exprs.len()), item.alias.clone()));
                exprs.push(item);
            }
        }
    }

    // Window columns are computed over the whole rowset up front.
    let mut window_columns: HashMap<usize, Vec<Value>> = HashMap::new();
    for (i, item) in exprs.iter().enumerate() {
        if let Expr::Function {
            name,
            args,
            distinct,
            wildcard,
            over: Some(spec),
            ..
        } = &item.expr
        {
            let values =
                eval_window_values(name, args, *distinct, *wildcard, spec, &view, filter, session)?;
            window_columns.insert(i, values);
        }
    }

    let mut header_fields: Vec<HeaderField> = Vec::new();
    for (plan, alias) in &plans {
        match plan {
            Plan::Column(index) => {
                let mut field = view.header.fields()[*index].clone();
                if let Some(alias) = alias {
                    field.aliases.push(alias.clone());
                }
                header_fields.push(field);
            }
            Plan::Expr(i) | Plan::Window(i) => {
                let item = exprs[*i];
                let (view_name, column) = match &item.expr {
                    Expr::FieldReference { view, column, .. } => {
                        (view.clone().unwrap_or_default(), column.clone())
                    }
                    other => (String::new(), other.field_name()),
                };
                let column = item.alias.clone().unwrap_or(if column.is_empty() {
                    format!("c{}", header_fields.len() + 1)
                } else {
                    column
                });
                header_fields.push(HeaderField {
                    view: view_name,
                    column,
                    aliases: Vec::new(),
                    from_table: false,
                });
            }
        }
    }
    let header = Header::from_fields(header_fields);

    let mut out = View::new(header);
    for (row, record) in view.records.iter().enumerate() {
        let mut cells: Record = Vec::with_capacity(plans.len());
        filter.push_record(view.header.clone(), record.clone());
        let mut failure = None;
        for (plan, _) in &plans {
            let value = match plan {
                Plan::Column(index) => Ok(record[*index].value.clone()),
                Plan::Expr(i) => eval(&exprs[*i].expr, filter, session),
                Plan::Window(i) => Ok(window_columns[i][row].clone()),
            };
            match value {
                Ok(value) => cells.push(Cell::new(value)),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        filter.pop_record();
        match failure {
            Some(err) => return Err(err),
            None => out.records.push(cells),
        }
    }
    Ok(out)
}

fn apply_distinct(view: View) -> View {
    let mut seen = HashSet::new();
    let mut out = View::new(view.header.clone());
    for record in view.records {
        let key = row_key(&record.iter().map(|c| c.value.clone()).collect::<Vec<_>>());
        if seen.insert(key) {
            out.records.push(record);
        }
    }
    out
}

// ---- ORDER BY / LIMIT ----

fn apply_order_by(
    view: View,
    items: &[OrderItem],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let mut keys: Vec<Vec<Value>> = Vec::with_capacity(view.records.len());
    for record in &view.records {
        filter.push_record(view.header.clone(), record.clone());
        let mut row_keys = Vec::with_capacity(items.len());
        let mut failure = None;
        for item in items {
            match eval(&item.expr, filter, session) {
                Ok(value) => row_keys.push(value),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        filter.pop_record();
        if let Some(err) = failure {
            return Err(err);
        }
        keys.push(row_keys);
    }
    let (offset, formats) = datetime_settings();
    let mut indices: Vec<usize> = (0..view.records.len()).collect();
    indices.sort_by(|&a, &b| compare_order_keys(&keys[a], &keys[b], items, offset, &formats));
    let mut out = View::new(view.header.clone());
    out.file_info = view.file_info.clone();
    for index in indices {
        out.records.push(view.records[index].clone());
    }
    Ok(out)
}

/// Key comparison with per-key direction and NULLS placement. Ties keep
/// input order through the stable sort.
pub fn compare_order_keys(
    a: &[Value],
    b: &[Value],
    items: &[OrderItem],
    offset: i32,
    formats: &[String],
) -> Ordering {
    for (i, item) in items.iter().enumerate() {
        let (x, y) = (&a[i], &b[i]);
        let nulls_first = match item.nulls {
            NullsPosition::First => true,
            NullsPosition::Last => false,
            NullsPosition::Default => item.direction == SortDirection::Ascending,
        };
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if nulls_first {
                    return Ordering::Less;
                }
                return Ordering::Greater;
            }
            (false, true) => {
                if nulls_first {
                    return Ordering::Greater;
                }
                return Ordering::Less;
            }
            (false, false) => {
                let natural =
                    crate::value::order_values(x, y, offset, formats).unwrap_or(Ordering::Equal);
                match item.direction {
                    SortDirection::Ascending => natural,
                    SortDirection::Descending => natural.reverse(),
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn apply_limit_offset(
    view: View,
    query: &SelectQuery,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<View> {
    let offset = match &query.offset {
        Some(expr) => expect_non_negative(expr, "OFFSET", filter, session)?,
        None => 0,
    };
    let limit = match &query.limit {
        Some(expr) => Some(expect_non_negative(expr, "LIMIT", filter, session)?),
        None => None,
    };
    let mut out = View::new(view.header.clone());
    out.file_info = view.file_info.clone();
    let records = view.records.into_iter().skip(offset);
    out.records = match limit {
        Some(limit) => records.take(limit).collect(),
        None => records.collect(),
    };
    Ok(out)
}

fn expect_non_negative(
    expr: &Expr,
    clause: &str,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<usize> {
    match eval(expr, filter, session)?.to_integer() {
        Value::Integer(i) if i >= 0 => Ok(i as usize),
        _ => Err(EngineError::new(
            ErrorKind::InvalidValueExpression,
            format!("{clause} must be a non-negative integer"),
        )),
    }
}

// ---- set operations ----

fn record_key(record: &Record) -> String {
    row_key(&record.iter().map(|c| c.value.clone()).collect::<Vec<_>>())
}

/// Set operations. Without ALL the output is deduplicated; with ALL,
/// INTERSECT and EXCEPT follow multiset arithmetic: each value appears
/// min(l, r) respectively max(l - r, 0) times, consuming right-side
/// counts as left rows are emitted.
fn apply_set_operation(
    op: SetOperator,
    all: bool,
    left: View,
    right: View,
) -> EngineResult<View> {
    if left.field_len() != right.field_len() {
        return Err(EngineError::new(
            ErrorKind::RowValueLengthMismatch,
            "set operands have different numbers of fields",
        ));
    }
    let mut right_counts: HashMap<String, usize> = HashMap::new();
    for record in &right.records {
        *right_counts.entry(record_key(record)).or_insert(0) += 1;
    }
    let mut out = View::new(left.header.clone());
    let mut seen = HashSet::new();
    match op {
        SetOperator::Union => {
            if all {
                out.records = left.records;
                out.records.extend(right.records);
            } else {
                for record in left.records.into_iter().chain(right.records) {
                    if seen.insert(record_key(&record)) {
                        out.records.push(record);
                    }
                }
            }
        }
        SetOperator::Intersect => {
            for record in left.records {
                let key = record_key(&record);
                if all {
                    if let Some(count) = right_counts.get_mut(&key) {
                        if *count > 0 {
                            *count -= 1;
                            out.records.push(record);
                        }
                    }
                } else if right_counts.contains_key(&key) && seen.insert(key) {
                    out.records.push(record);
                }
            }
        }
        SetOperator::Except => {
            for record in left.records {
                let key = record_key(&record);
                if all {
                    // The first r matching occurrences cancel out.
                    match right_counts.get_mut(&key) {
                        Some(count) if *count > 0 => *count -= 1,
                        _ => out.records.push(record),
                    }
                } else if !right_counts.contains_key(&key) && seen.insert(key) {
                    out.records.push(record);
                }
            }
        }
    }
    Ok(out)
}

