//! Expression evaluation against the current filter scope: field
//! resolution over records-in-scope, subqueries, predicates, function
//! dispatch and aggregate folding.

use crate::error::{
    field_not_exist, undefined_function, EngineError, EngineResult, ErrorKind,
};
use crate::executor::aggregate::{eval_aggregate, is_aggregate};
use crate::executor::exec_query::execute_select;
use crate::executor::scope::Filter;
use crate::parser::ast::{
    BinaryOp, ComparisonOp as AstComparisonOp, CursorProbe, Expr, InList, UnaryOp,
};
use crate::session::flags::{flag_value, with_flags_read};
use crate::session::Session;
use crate::utils::fmgr::{eval_scalar_function, is_builtin, FunctionContext};
use crate::value::{
    calculate, compare, concat, equal, identical, ArithmeticOp, ComparisonOp, Ternary, Value,
};

/// Snapshot of the ambient settings function evaluation needs.
pub fn function_context(filter: &Filter) -> FunctionContext {
    with_flags_read(|flags| FunctionContext {
        now: filter.now,
        offset_secs: flags.timezone_offset_secs(),
        formats: flags.datetime_format.clone(),
    })
}

pub fn datetime_settings() -> (i32, Vec<String>) {
    with_flags_read(|flags| (flags.timezone_offset_secs(), flags.datetime_format.clone()))
}

pub fn eval(expr: &Expr, filter: &mut Filter, session: &mut Session) -> EngineResult<Value> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Boolean(b) => Ok(Value::Boolean(*b)),
        Expr::Ternary(t) => Ok(Value::Ternary(*t)),
        Expr::Integer(i) => Ok(Value::Integer(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::String(s) => Ok(Value::String(s.clone())),
        Expr::Parens(inner) => eval(inner, filter, session),
        Expr::FieldReference { view, column, loc } => {
            resolve_field(view.as_deref(), column, filter)
                .map_err(|e| e.with_location(*loc))
        }
        Expr::Wildcard { .. } => Err(EngineError::new(
            ErrorKind::InvalidValueExpression,
            "wildcard is not a value",
        )),
        Expr::Variable { name, loc } => filter
            .variable_value(name)
            .map_err(|e| e.with_location(*loc)),
        Expr::VariableSubstitution { name, expr, loc } => {
            let value = eval(expr, filter, session)?;
            filter
                .substitute_variable(name, value.clone())
                .map_err(|e| e.with_location(*loc))?;
            Ok(value)
        }
        Expr::EnvVar { name } => Ok(match std::env::var(name) {
            Ok(value) => Value::String(value),
            Err(_) => Value::String(String::new()),
        }),
        Expr::RuntimeInfo { name, loc } => {
            runtime_info(name, session).map_err(|e| e.with_location(*loc))
        }
        Expr::Flag { name, loc } => flag_value(name).map_err(|e| e.with_location(*loc)),
        Expr::Unary { op, expr } => {
            let value = eval(expr, filter, session)?;
            Ok(match op {
                UnaryOp::Not => Value::Ternary(value.ternary().not()),
                UnaryOp::Minus => calculate(&Value::Integer(-1), ArithmeticOp::Multiply, &value),
                UnaryOp::Plus => calculate(&Value::Integer(1), ArithmeticOp::Multiply, &value),
            })
        }
        Expr::Binary { left, op, right } => {
            let l = eval(left, filter, session)?;
            let r = eval(right, filter, session)?;
            Ok(match op {
                BinaryOp::Add => calculate(&l, ArithmeticOp::Add, &r),
                BinaryOp::Subtract => calculate(&l, ArithmeticOp::Subtract, &r),
                BinaryOp::Multiply => calculate(&l, ArithmeticOp::Multiply, &r),
                BinaryOp::Divide => calculate(&l, ArithmeticOp::Divide, &r),
                BinaryOp::Modulo => calculate(&l, ArithmeticOp::Modulo, &r),
                BinaryOp::Concat => concat(&[l, r]),
            })
        }
        Expr::Comparison { left, op, right } => {
            let l = eval(left, filter, session)?;
            let r = eval(right, filter, session)?;
            let (offset, formats) = datetime_settings();
            Ok(Value::Ternary(match op {
                AstComparisonOp::Identical => identical(&l, &r, offset, &formats),
                other => compare(&l, to_value_op(*other), &r, offset, &formats),
            }))
        }
        Expr::And(left, right) => {
            // Short-circuit on FALSE, matching the ternary truth table.
            let l = eval_ternary(left, filter, session)?;
            if l == Ternary::False {
                return Ok(Value::Ternary(Ternary::False));
            }
            let r = eval_ternary(right, filter, session)?;
            Ok(Value::Ternary(l.and(r)))
        }
        Expr::Or(left, right) => {
            let l = eval_ternary(left, filter, session)?;
            if l == Ternary::True {
                return Ok(Value::Ternary(Ternary::True));
            }
            let r = eval_ternary(right, filter, session)?;
            Ok(Value::Ternary(l.or(r)))
        }
        Expr::Is {
            negated,
            expr,
            value,
        } => {
            let subject = eval(expr, filter, session)?;
            let target = eval(value, filter, session)?;
            let result = match target {
                Value::Null => Ternary::from_bool(subject.is_null()),
                other => {
                    let t = other.ternary();
                    Ternary::from_bool(subject.ternary() == t)
                }
            };
            Ok(Value::Ternary(if *negated { result.not() } else { result }))
        }
        Expr::Like {
            negated,
            expr,
            pattern,
        } => {
            let subject = eval(expr, filter, session)?;
            let pattern = eval(pattern, filter, session)?;
            if subject.is_null() || pattern.is_null() {
                return Ok(Value::Ternary(Ternary::Unknown));
            }
            let (s, p) = match (subject.to_string_value(), pattern.to_string_value()) {
                (Value::String(s), Value::String(p)) => (s, p),
                _ => return Ok(Value::Ternary(Ternary::Unknown)),
            };
            let matched = like_match(&s.to_lowercase(), &p.to_lowercase());
            Ok(Value::Ternary(Ternary::from_bool(matched != *negated)))
        }
        Expr::Between {
            negated,
            expr,
            low,
            high,
        } => {
            let subject = eval(expr, filter, session)?;
            let low = eval(low, filter, session)?;
            let high = eval(high, filter, session)?;
            let (offset, formats) = datetime_settings();
            let result = compare(&subject, ComparisonOp::GreaterOrEqual, &low, offset, &formats)
                .and(compare(
                    &subject,
                    ComparisonOp::LessOrEqual,
                    &high,
                    offset,
                    &formats,
                ));
            Ok(Value::Ternary(if *negated { result.not() } else { result }))
        }
        Expr::In {
            negated,
            expr,
            list,
        } => {
            let subject = eval(expr, filter, session)?;
            let values = match list {
                InList::Values(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(eval(item, filter, session)?);
                    }
                    values
                }
                InList::Subquery(query) => {
                    let view = execute_select(query, filter, session)?;
                    if view.field_len() != 1 {
                        return Err(EngineError::new(
                            ErrorKind::RowValueLengthMismatch,
                            "subquery for IN must return one column",
                        ));
                    }
                    view.all_values().into_iter().map(|mut row| row.remove(0)).collect()
                }
            };
            let (offset, formats) = datetime_settings();
            let mut result = Ternary::False;
            for value in &values {
                result = result.or(equal(&subject, value, offset, &formats));
                if result == Ternary::True {
                    break;
                }
            }
            Ok(Value::Ternary(if *negated { result.not() } else { result }))
        }
        Expr::Exists(query) => {
            let view = execute_select(query, filter, session)?;
            Ok(Value::Ternary(Ternary::from_bool(view.record_len() > 0)))
        }
        Expr::Subquery(query) => {
            let view = execute_select(query, filter, session)?;
            if view.field_len() != 1 {
                return Err(EngineError::new(
                    ErrorKind::ScalarSubquery,
                    "scalar subquery must return one column",
                ));
            }
            match view.record_len() {
                0 => Ok(Value::Null),
                1 => Ok(view.record_values(0).remove(0)),
                _ => Err(EngineError::new(
                    ErrorKind::ScalarSubquery,
                    "scalar subquery returned more than one row",
                )),
            }
        }
        Expr::Case {
            subject,
            branches,
            else_expr,
        } => {
            let subject_value = match subject {
                Some(expr) => Some(eval(expr, filter, session)?),
                None => None,
            };
            let (offset, formats) = datetime_settings();
            for (condition, result) in branches {
                let matched = match &subject_value {
                    Some(subject) => {
                        let candidate = eval(condition, filter, session)?;
                        equal(subject, &candidate, offset, &formats) == Ternary::True
                    }
                    None => eval_ternary(condition, filter, session)? == Ternary::True,
                };
                if matched {
                    return eval(result, filter, session);
                }
            }
            match else_expr {
                Some(expr) => eval(expr, filter, session),
                None => Ok(Value::Null),
            }
        }
        Expr::Function {
            name,
            args,
            distinct,
            wildcard,
            over,
            loc,
        } => {
            if over.is_some() {
                return Err(EngineError::new(
                    ErrorKind::InvalidValueExpression,
                    format!("analytic function {name} is only allowed in select fields"),
                )
                .with_location(*loc));
            }
            eval_function(name, args, *distinct, *wildcard, filter, session)
                .map_err(|e| e.with_location(*loc))
        }
        Expr::CursorStatus { cursor, probe, loc } => {
            cursor_status(cursor, *probe, filter).map_err(|e| e.with_location(*loc))
        }
    }
}

pub fn eval_ternary(
    expr: &Expr,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Ternary> {
    Ok(eval(expr, filter, session)?.ternary())
}

fn to_value_op(op: AstComparisonOp) -> ComparisonOp {
    match op {
        AstComparisonOp::Equal => ComparisonOp::Equal,
        AstComparisonOp::NotEqual => ComparisonOp::NotEqual,
        AstComparisonOp::Less => ComparisonOp::Less,
        AstComparisonOp::LessOrEqual => ComparisonOp::LessOrEqual,
        AstComparisonOp::Greater => ComparisonOp::Greater,
        AstComparisonOp::GreaterOrEqual => ComparisonOp::GreaterOrEqual,
        AstComparisonOp::Identical => ComparisonOp::Equal,
    }
}

/// Walks records-in-scope from the innermost context outward. The first
/// context able to resolve the name wins; ambiguity within a context is
/// an error.
fn resolve_field(view: Option<&str>, column: &str, filter: &mut Filter) -> EngineResult<Value> {
    let group_index = filter.group_index;
    for context in filter.records.iter().rev() {
        match context.header.field_index(view, column) {
            Ok(index) => {
                let cell = &context.record[index];
                return Ok(match (group_index, &cell.group) {
                    (Some(g), Some(group)) => group.get(g).cloned().unwrap_or(Value::Null),
                    _ => cell.value.clone(),
                });
            }
            Err(err) if err.kind == ErrorKind::FieldAmbiguous => return Err(err),
            Err(_) => continue,
        }
    }
    Err(field_not_exist(&match view {
        Some(view) => format!("{view}.{column}"),
        None => column.to_string(),
    }))
}

fn runtime_info(name: &str, session: &mut Session) -> EngineResult<Value> {
    match name.to_ascii_uppercase().as_str() {
        "WORKING_DIRECTORY" => Ok(Value::String(
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )),
        "VERSION" => Ok(Value::String(env!("CARGO_PKG_VERSION").to_string())),
        "UNCOMMITTED" => Ok(Value::Boolean(session.uncommitted.count() > 0)),
        "CREATED" => Ok(Value::Integer(session.uncommitted.created_keys().len() as i64)),
        "UPDATED" => Ok(Value::Integer(session.uncommitted.updated_keys().len() as i64)),
        "UPDATED_VIEWS" => Ok(Value::Integer(
            session.uncommitted.temp_dirty_keys().len() as i64
        )),
        "LOADED_TABLES" => Ok(Value::Integer(session.cache.keys().len() as i64)),
        "FORMAT" => Ok(with_flags_read(|f| Value::String(f.format.name().to_string()))),
        "LINE_BREAK" => Ok(with_flags_read(|f| {
            Value::String(f.line_break.name().to_string())
        })),
        _ => Err(EngineError::new(
            ErrorKind::InvalidValueExpression,
            format!("@#{name} is an unknown runtime information"),
        )),
    }
}

fn cursor_status(name: &str, probe: CursorProbe, filter: &mut Filter) -> EngineResult<Value> {
    match probe {
        CursorProbe::IsOpen { negated } => {
            let open = filter.cursor(name)?.is_open();
            Ok(Value::Ternary(Ternary::from_bool(open != negated)))
        }
        CursorProbe::IsInRange { negated } => {
            let in_range = filter.cursor(name)?.in_range()?;
            Ok(match in_range {
                Value::Boolean(b) => Value::Ternary(Ternary::from_bool(b != negated)),
                _ => Value::Ternary(Ternary::Unknown),
            })
        }
        CursorProbe::Count => Ok(Value::Integer(filter.cursor(name)?.count()?)),
        CursorProbe::RowNumber => Ok(Value::Integer(filter.cursor(name)?.row_number()?)),
    }
}

/// `%` matches any run, `_` one character, `\` escapes. Case folding is
/// applied by the caller.
pub fn like_match(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    like_match_at(&s, 0, &p, 0)
}

fn like_match_at(s: &[char], si: usize, p: &[char], pi: usize) -> bool {
    if pi == p.len() {
        return si == s.len();
    }
    match p[pi] {
        '%' => {
            for next in si..=s.len() {
                if like_match_at(s, next, p, pi + 1) {
                    return true;
                }
            }
            false
        }
        '_' => si < s.len() && like_match_at(s, si + 1, p, pi + 1),
        '\\' if pi + 1 < p.len() => {
            si < s.len() && s[si] == p[pi + 1] && like_match_at(s, si + 1, p, pi + 2)
        }
        c => si < s.len() && s[si] == c && like_match_at(s, si + 1, p, pi + 1),
    }
}

fn eval_function(
    name: &str,
    args: &[Expr],
    distinct: bool,
    wildcard: bool,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Value> {
    let user_function = filter.function(name);
    let user_aggregate = user_function
        .as_ref()
        .map(|f| f.is_aggregate())
        .unwrap_or(false);

    if is_aggregate(name) || user_aggregate {
        return eval_aggregate_call(name, args, distinct, wildcard, filter, session);
    }
    if wildcard {
        return Err(EngineError::new(
            ErrorKind::FunctionInvalidArgument,
            format!("function {name} does not take a wildcard"),
        ));
    }
    if let Some(function) = user_function {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(eval(arg, filter, session)?);
        }
        return crate::procedure::call_user_function(&function, values, filter, session);
    }
    if !is_builtin(name) {
        return Err(undefined_function(name));
    }
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, filter, session)?);
    }
    let ctx = function_context(filter);
    eval_scalar_function(name, &values, &ctx)
}

/// Aggregates read the grouping payload of the innermost record context.
fn eval_aggregate_call(
    name: &str,
    args: &[Expr],
    distinct: bool,
    wildcard: bool,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Value> {
    if filter.group_index.is_some() {
        return Err(EngineError::new(
            ErrorKind::InvalidValueExpression,
            format!("aggregate function {name} cannot be nested"),
        ));
    }
    let group_len = filter
        .records
        .last()
        .and_then(|context| {
            context
                .record
                .iter()
                .find_map(|cell| cell.group.as_ref().map(|g| g.len()))
        })
        .ok_or_else(|| {
            EngineError::new(
                ErrorKind::InvalidValueExpression,
                format!("aggregate function {name} is not allowed here"),
            )
        })?;

    if wildcard {
        // COUNT(*) counts rows, nulls included.
        return Ok(Value::Integer(group_len as i64));
    }
    if args.is_empty() {
        return Err(crate::error::function_argument_length(
            name,
            "at least 1 argument",
        ));
    }

    let mut values = Vec::with_capacity(group_len);
    for g in 0..group_len {
        filter.group_index = Some(g);
        let value = eval(&args[0], filter, session);
        filter.group_index = None;
        values.push(value?);
    }
    let mut extra = Vec::new();
    for arg in &args[1..] {
        extra.push(eval(arg, filter, session)?);
    }

    if let Some(function) = filter.function(name) {
        if function.is_aggregate() {
            let values = if distinct {
                dedupe(values)
            } else {
                values
            };
            return crate::procedure::call_user_aggregate(
                &function, values, extra, filter, session,
            );
        }
    }
    let (offset, formats) = datetime_settings();
    eval_aggregate(name, values, distinct, &extra, offset, &formats)
}

fn dedupe(values: Vec<Value>) -> Vec<Value> {
    let (offset, formats) = datetime_settings();
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        let duplicate = out
            .iter()
            .any(|seen| equal(seen, &value, offset, &formats) == Ternary::True);
        if !duplicate {
            out.push(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use crate::value::Datetime;
    use crate::view::{Cell, Header};

    fn eval_src(src: &str) -> EngineResult<Value> {
        let expr = parse_expression(src).unwrap();
        let mut filter = Filter::new(Datetime::from_unix_seconds(0, 0));
        let mut session = Session::captured();
        eval(&expr, &mut filter, &mut session)
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval_src("1 + 2 * 3").unwrap(), Value::Integer(7));
        assert_eq!(eval_src("(1 + 2) * 3").unwrap(), Value::Integer(9));
        assert_eq!(eval_src("7 / 2").unwrap(), Value::Float(3.5));
        assert_eq!(eval_src("'a' || 1 || NULL").unwrap(), Value::Null);
    }

    #[test]
    fn ternary_logic_and_null() {
        assert_eq!(
            eval_src("NULL AND TRUE").unwrap(),
            Value::Ternary(Ternary::Unknown)
        );
        assert_eq!(
            eval_src("NULL OR TRUE").unwrap(),
            Value::Ternary(Ternary::True)
        );
        assert_eq!(
            eval_src("NOT UNKNOWN").unwrap(),
            Value::Ternary(Ternary::Unknown)
        );
        assert_eq!(
            eval_src("1 = NULL").unwrap(),
            Value::Ternary(Ternary::Unknown)
        );
        assert_eq!(
            eval_src("NULL <=> NULL").unwrap(),
            Value::Ternary(Ternary::True)
        );
    }

    #[test]
    fn predicates() {
        assert_eq!(
            eval_src("'abcde' LIKE 'a%e'").unwrap(),
            Value::Ternary(Ternary::True)
        );
        assert_eq!(
            eval_src("'abc' LIKE 'a_c'").unwrap(),
            Value::Ternary(Ternary::True)
        );
        assert_eq!(
            eval_src("'a%c' LIKE 'a\\%c'").unwrap(),
            Value::Ternary(Ternary::True)
        );
        assert_eq!(
            eval_src("'abc' LIKE 'a\\%c'").unwrap(),
            Value::Ternary(Ternary::False)
        );
        assert_eq!(
            eval_src("2 BETWEEN 1 AND 3").unwrap(),
            Value::Ternary(Ternary::True)
        );
        assert_eq!(
            eval_src("2 IN (1, 2, 3)").unwrap(),
            Value::Ternary(Ternary::True)
        );
        assert_eq!(
            eval_src("5 NOT IN (1, NULL)").unwrap(),
            Value::Ternary(Ternary::Unknown)
        );
        assert_eq!(
            eval_src("NULL IS NULL").unwrap(),
            Value::Ternary(Ternary::True)
        );
    }

    #[test]
    fn case_expressions() {
        assert_eq!(
            eval_src("CASE WHEN FALSE THEN 1 WHEN TRUE THEN 2 ELSE 3 END").unwrap(),
            Value::Integer(2)
        );
        assert_eq!(
            eval_src("CASE 2 WHEN 1 THEN 'a' WHEN 2 THEN 'b' END").unwrap(),
            Value::String("b".into())
        );
        assert_eq!(eval_src("CASE WHEN FALSE THEN 1 END").unwrap(), Value::Null);
    }

    #[test]
    fn variables_substitute_in_place() {
        let mut filter = Filter::new(Datetime::from_unix_seconds(0, 0));
        let mut session = Session::captured();
        filter.declare_variable("id", Value::Integer(0)).unwrap();
        let expr = parse_expression("@id := @id + 1").unwrap();
        assert_eq!(
            eval(&expr, &mut filter, &mut session).unwrap(),
            Value::Integer(1)
        );
        assert_eq!(filter.variable_value("id").unwrap(), Value::Integer(1));
    }

    #[test]
    fn field_resolution_uses_record_scope() {
        let mut filter = Filter::new(Datetime::from_unix_seconds(0, 0));
        let mut session = Session::captured();
        let header = Header::new("users", &["id".to_string(), "name".to_string()]);
        filter.push_record(
            header,
            vec![
                Cell::new(Value::Integer(7)),
                Cell::new(Value::String("Louis".into())),
            ],
        );
        let expr = parse_expression("users.id + 1").unwrap();
        assert_eq!(
            eval(&expr, &mut filter, &mut session).unwrap(),
            Value::Integer(8)
        );
        let missing = parse_expression("age").unwrap();
        let err = eval(&missing, &mut filter, &mut session).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FieldNotExist);
    }

    #[test]
    fn aggregates_read_group_payloads() {
        let mut filter = Filter::new(Datetime::from_unix_seconds(0, 0));
        let mut session = Session::captured();
        let header = Header::new("t", &["n".to_string()]);
        filter.push_record(
            header,
            vec![Cell::grouped(vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Null,
            ])],
        );
        assert_eq!(
            eval(&parse_expression("SUM(n)").unwrap(), &mut filter, &mut session).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            eval(&parse_expression("COUNT(n)").unwrap(), &mut filter, &mut session).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(
            eval(&parse_expression("COUNT(*)").unwrap(), &mut filter, &mut session).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            eval(&parse_expression("AVG(n * 10)").unwrap(), &mut filter, &mut session).unwrap(),
            Value::Integer(15)
        );
    }

    #[test]
    fn aggregate_without_group_context_fails() {
        let err = eval_src("SUM(1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidValueExpression);
    }

    #[test]
    fn builtin_function_dispatch() {
        assert_eq!(eval_src("UPPER('abc')").unwrap(), Value::String("ABC".into()));
        assert_eq!(eval_src("no_such_fn()").unwrap_err().kind, ErrorKind::UndefinedFunction);
    }
}
