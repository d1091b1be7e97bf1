//! Analytic function evaluation: partition, order, then compute one
//! value per input row. The default frame is the ordered partition up to
//! the current row; without ORDER BY the frame is the whole partition.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{
    function_argument_length, function_invalid_argument, EngineError, EngineResult, ErrorKind,
};
use crate::executor::aggregate::{eval_aggregate, is_aggregate};
use crate::executor::exec_expr::{datetime_settings, eval};
use crate::executor::exec_query::{compare_order_keys, row_key};
use crate::executor::scope::Filter;
use crate::parser::ast::{Expr, WindowSpec};
use crate::session::Session;
use crate::value::{parse_float64, Value};
use crate::view::View;

#[allow(clippy::too_many_arguments)]
pub fn eval_window_values(
    name: &str,
    args: &[Expr],
    distinct: bool,
    wildcard: bool,
    spec: &WindowSpec,
    view: &View,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Vec<Value>> {
    let record_count = view.record_len();
    let mut results = vec![Value::Null; record_count];

    // Partition rows, preserving first-seen order.
    let mut partition_order: Vec<String> = Vec::new();
    let mut partitions: HashMap<String, Vec<usize>> = HashMap::new();
    for row in 0..record_count {
        let key = if spec.partition_by.is_empty() {
            String::new()
        } else {
            let values = eval_per_row(&spec.partition_by, view, row, filter, session)?;
            row_key(&values)
        };
        if !partitions.contains_key(&key) {
            partition_order.push(key.clone());
        }
        partitions.entry(key).or_default().push(row);
    }

    let (offset, formats) = datetime_settings();
    for key in partition_order {
        let mut rows = partitions.remove(&key).unwrap_or_default();
        let ordered = !spec.order_by.is_empty();
        let mut order_keys: HashMap<usize, Vec<Value>> = HashMap::new();
        if ordered {
            for &row in &rows {
                let exprs: Vec<Expr> =
                    spec.order_by.iter().map(|item| item.expr.clone()).collect();
                let values = eval_per_row(&exprs, view, row, filter, session)?;
                order_keys.insert(row, values);
            }
            rows.sort_by(|&a, &b| {
                compare_order_keys(&order_keys[&a], &order_keys[&b], &spec.order_by, offset, &formats)
            });
        }
        let peers = |a: usize, b: usize| -> bool {
            if !ordered {
                return true;
            }
            compare_order_keys(&order_keys[&a], &order_keys[&b], &spec.order_by, offset, &formats)
                == Ordering::Equal
        };
        compute_partition(
            name, args, distinct, wildcard, view, &rows, ordered, &peers, filter, session,
            &mut results,
        )?;
    }
    Ok(results)
}

fn eval_per_row(
    exprs: &[Expr],
    view: &View,
    row: usize,
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Vec<Value>> {
    filter.push_record(view.header.clone(), view.records[row].clone());
    let mut values = Vec::with_capacity(exprs.len());
    let mut failure = None;
    for expr in exprs {
        match eval(expr, filter, session) {
            Ok(value) => values.push(value),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    filter.pop_record();
    match failure {
        Some(err) => Err(err),
        None => Ok(values),
    }
}

fn eval_arg_column(
    args: &[Expr],
    view: &View,
    rows: &[usize],
    filter: &mut Filter,
    session: &mut Session,
) -> EngineResult<Vec<Value>> {
    let expr = args.first().ok_or_else(|| {
        function_argument_length("window function", "at least 1 argument")
    })?;
    let mut values = Vec::with_capacity(rows.len());
    for &row in rows {
        values.push(eval_per_row(std::slice::from_ref(expr), view, row, filter, session)?.remove(0));
    }
    Ok(values)
}

#[allow(clippy::too_many_arguments)]
fn compute_partition(
    name: &str,
    args: &[Expr],
    distinct: bool,
    wildcard: bool,
    view: &View,
    rows: &[usize],
    ordered: bool,
    peers: &dyn Fn(usize, usize) -> bool,
    filter: &mut Filter,
    session: &mut Session,
    results: &mut [Value],
) -> EngineResult<()> {
    let n = rows.len();
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "ROW_NUMBER" => {
            for (i, &row) in rows.iter().enumerate() {
                results[row] = Value::Integer(i as i64 + 1);
            }
        }
        "RANK" | "DENSE_RANK" => {
            let mut rank = 0i64;
            let mut dense = 0i64;
            for (i, &row) in rows.iter().enumerate() {
                if i == 0 || !peers(rows[i - 1], row) {
                    rank = i as i64 + 1;
                    dense += 1;
                }
                results[row] = Value::Integer(if upper == "RANK" { rank } else { dense });
            }
        }
        "CUME_DIST" => {
            // Position of the last peer over the partition size.
            for (i, &row) in rows.iter().enumerate() {
                let mut last = i;
                while last + 1 < n && peers(row, rows[last + 1]) {
                    last += 1;
                }
                results[row] = parse_float64((last + 1) as f64 / n as f64);
            }
        }
        "PERCENT_RANK" => {
            let mut rank = 0usize;
            for (i, &row) in rows.iter().enumerate() {
                if i == 0 || !peers(rows[i - 1], row) {
                    rank = i + 1;
                }
                let value = if n <= 1 {
                    0.0
                } else {
                    (rank - 1) as f64 / (n - 1) as f64
                };
                results[row] = parse_float64(value);
            }
        }
        "NTILE" => {
            let expr = args.first().ok_or_else(|| {
                function_argument_length(name, "exactly 1 argument")
            })?;
            let buckets = match eval(expr, filter, session)?.to_integer() {
                Value::Integer(i) if i > 0 => i as usize,
                _ => {
                    return Err(function_invalid_argument(
                        name,
                        "the number of groups must be a positive integer",
                    ))
                }
            };
            let base = n / buckets;
            let remainder = n % buckets;
            let mut index = 0usize;
            for bucket in 0..buckets {
                let size = base + usize::from(bucket < remainder);
                for _ in 0..size {
                    if index >= n {
                        break;
                    }
                    results[rows[index]] = Value::Integer(bucket as i64 + 1);
                    index += 1;
                }
            }
        }
        "FIRST_VALUE" | "LAST_VALUE" | "NTH_VALUE" => {
            let values = eval_arg_column(args, view, rows, filter, session)?;
            let nth = if upper == "NTH_VALUE" {
                let expr = args.get(1).ok_or_else(|| {
                    function_argument_length(name, "exactly 2 arguments")
                })?;
                match eval(expr, filter, session)?.to_integer() {
                    Value::Integer(i) if i > 0 => Some(i as usize),
                    _ => {
                        return Err(function_invalid_argument(
                            name,
                            "the position must be a positive integer",
                        ))
                    }
                }
            } else {
                None
            };
            for (i, &row) in rows.iter().enumerate() {
                let frame_end = if ordered { i } else { n - 1 };
                let value = match upper.as_str() {
                    "FIRST_VALUE" => values.first().cloned(),
                    "LAST_VALUE" => values.get(frame_end).cloned(),
                    _ => nth.and_then(|nth| {
                        if nth - 1 <= frame_end {
                            values.get(nth - 1).cloned()
                        } else {
                            None
                        }
                    }),
                };
                results[row] = value.unwrap_or(Value::Null);
            }
        }
        "LAG" | "LEAD" => {
            let values = eval_arg_column(args, view, rows, filter, session)?;
            let distance = match args.get(1) {
                Some(expr) => match eval(expr, filter, session)?.to_integer() {
                    Value::Integer(i) => i,
                    _ => {
                        return Err(function_invalid_argument(
                            name,
                            "the offset must be an integer",
                        ))
                    }
                },
                None => 1,
            };
            let default = match args.get(2) {
                Some(expr) => eval(expr, filter, session)?,
                None => Value::Null,
            };
            for (i, &row) in rows.iter().enumerate() {
                let target = if upper == "LAG" {
                    i as i64 - distance
                } else {
                    i as i64 + distance
                };
                results[row] = if target >= 0 && (target as usize) < n {
                    values[target as usize].clone()
                } else {
                    default.clone()
                };
            }
        }
        _ => {
            // Aggregates in analytic position: cumulative when ordered.
            let user_aggregate = filter
                .function(name)
                .filter(|f| f.is_aggregate());
            if !is_aggregate(name) && user_aggregate.is_none() {
                return Err(EngineError::new(
                    ErrorKind::UndefinedFunction,
                    format!("function {name} cannot be used as an analytic function"),
                ));
            }
            let values = if wildcard {
                vec![Value::Integer(1); n]
            } else {
                eval_arg_column(args, view, rows, filter, session)?
            };
            let mut extra = Vec::new();
            for arg in args.iter().skip(1) {
                extra.push(eval(arg, filter, session)?);
            }
            let (offset, formats) = datetime_settings();
            for (i, &row) in rows.iter().enumerate() {
                let frame_end = if ordered { i } else { n - 1 };
                let frame: Vec<Value> = values[..=frame_end].to_vec();
                results[row] = if wildcard {
                    Value::Integer(frame.len() as i64)
                } else if let Some(function) = &user_aggregate {
                    let frame = if distinct {
                        dedupe_frame(frame, offset, &formats)
                    } else {
                        frame
                    };
                    crate::procedure::call_user_aggregate(
                        function,
                        frame,
                        extra.clone(),
                        filter,
                        session,
                    )?
                } else {
                    eval_aggregate(name, frame, distinct, &extra, offset, &formats)?
                };
            }
        }
    }
    Ok(())
}

fn dedupe_frame(values: Vec<Value>, offset: i32, formats: &[String]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        let duplicate = out.iter().any(|seen| {
            crate::value::equal(seen, &value, offset, formats) == crate::value::Ternary::True
        });
        if !duplicate {
            out.push(value);
        }
    }
    out
}
