//! Aggregate folds over grouping payloads. Null inputs are skipped for
//! every aggregate except COUNT(*), which the caller handles.

use crate::error::{function_argument_length, EngineResult};
use crate::utils::adt::json::value_to_json;
use crate::value::{order_values, parse_float64, Value};

pub fn is_aggregate(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "COUNT" | "MIN" | "MAX" | "SUM" | "AVG" | "MEDIAN" | "STDEV" | "VAR" | "LISTAGG"
            | "JSON_AGG"
    )
}

fn non_null(values: Vec<Value>) -> Vec<Value> {
    values.into_iter().filter(|v| !v.is_null()).collect()
}

fn distinct_values(values: Vec<Value>, offset_secs: i32, formats: &[String]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        let duplicate = out.iter().any(|seen| {
            crate::value::equal(seen, &value, offset_secs, formats) == crate::value::Ternary::True
        });
        if !duplicate {
            out.push(value);
        }
    }
    out
}

fn numeric_inputs(values: &[Value]) -> Option<Vec<f64>> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value.to_float() {
            Value::Float(f) => out.push(f),
            _ => return None,
        }
    }
    Some(out)
}

/// Folds one aggregate over its evaluated argument list.
pub fn eval_aggregate(
    name: &str,
    values: Vec<Value>,
    distinct: bool,
    extra_args: &[Value],
    offset_secs: i32,
    formats: &[String],
) -> EngineResult<Value> {
    let upper = name.to_ascii_uppercase();
    let mut values = non_null(values);
    if distinct {
        values = distinct_values(values, offset_secs, formats);
    }
    match upper.as_str() {
        "COUNT" => Ok(Value::Integer(values.len() as i64)),
        "MIN" => Ok(extremum(values, offset_secs, formats, true)),
        "MAX" => Ok(extremum(values, offset_secs, formats, false)),
        "SUM" => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            match numeric_inputs(&values) {
                Some(numbers) => Ok(parse_float64(numbers.iter().sum())),
                None => Ok(Value::Null),
            }
        }
        "AVG" => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            match numeric_inputs(&values) {
                Some(numbers) => {
                    Ok(parse_float64(numbers.iter().sum::<f64>() / numbers.len() as f64))
                }
                None => Ok(Value::Null),
            }
        }
        "MEDIAN" => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            match numeric_inputs(&values) {
                Some(mut numbers) => {
                    numbers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    let mid = numbers.len() / 2;
                    let median = if numbers.len() % 2 == 1 {
                        numbers[mid]
                    } else {
                        (numbers[mid - 1] + numbers[mid]) / 2.0
                    };
                    Ok(parse_float64(median))
                }
                None => Ok(Value::Null),
            }
        }
        "STDEV" => variance(values).map(|v| match v {
            Value::Float(f) => parse_float64(f.sqrt()),
            other => other,
        }),
        "VAR" => variance(values),
        "LISTAGG" => {
            let separator = match extra_args.first() {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_text(),
                None => String::new(),
            };
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let parts: Vec<String> = values.iter().map(|v| v.to_text()).collect();
            Ok(Value::String(parts.join(&separator)))
        }
        "JSON_AGG" => {
            let array: Vec<serde_json::Value> = values.iter().map(value_to_json).collect();
            Ok(Value::String(serde_json::Value::Array(array).to_string()))
        }
        _ => Err(function_argument_length(name, "a known aggregate")),
    }
}

fn extremum(values: Vec<Value>, offset_secs: i32, formats: &[String], min: bool) -> Value {
    let mut best: Option<Value> = None;
    for value in values {
        match &best {
            None => best = Some(value),
            Some(current) => {
                if let Some(ord) = order_values(&value, current, offset_secs, formats) {
                    let replace = if min {
                        ord == std::cmp::Ordering::Less
                    } else {
                        ord == std::cmp::Ordering::Greater
                    };
                    if replace {
                        best = Some(value);
                    }
                }
            }
        }
    }
    best.unwrap_or(Value::Null)
}

/// Sample variance (n - 1 denominator); Null with fewer than two inputs.
fn variance(values: Vec<Value>) -> EngineResult<Value> {
    if values.len() < 2 {
        return Ok(Value::Null);
    }
    match numeric_inputs(&values) {
        Some(numbers) => {
            let n = numbers.len() as f64;
            let mean = numbers.iter().sum::<f64>() / n;
            let sum_sq = numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>();
            Ok(Value::Float(sum_sq / (n - 1.0)))
        }
        None => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(name: &str, values: Vec<Value>) -> Value {
        eval_aggregate(name, values, false, &[], 0, &[]).unwrap()
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&i| Value::Integer(i)).collect()
    }

    #[test]
    fn count_skips_nulls() {
        assert_eq!(
            agg("COUNT", vec![Value::Integer(1), Value::Null, Value::Integer(2)]),
            Value::Integer(2)
        );
    }

    #[test]
    fn sum_avg_median() {
        assert_eq!(agg("SUM", ints(&[1, 2, 3])), Value::Integer(6));
        assert_eq!(agg("AVG", ints(&[1, 2, 4])), Value::Float(7.0 / 3.0));
        assert_eq!(agg("MEDIAN", ints(&[5, 1, 3])), Value::Integer(3));
        assert_eq!(agg("MEDIAN", ints(&[1, 2, 3, 4])), Value::Float(2.5));
        assert_eq!(agg("SUM", vec![]), Value::Null);
    }

    #[test]
    fn min_max_work_on_mixed_orderables() {
        assert_eq!(agg("MIN", ints(&[3, 1, 2])), Value::Integer(1));
        assert_eq!(
            agg(
                "MAX",
                vec![Value::String("b".into()), Value::String("a".into())]
            ),
            Value::String("b".into())
        );
    }

    #[test]
    fn stdev_and_var_use_sample_denominator() {
        assert_eq!(agg("VAR", ints(&[1, 2, 3, 4])), Value::Float(5.0 / 3.0));
        assert_eq!(agg("STDEV", ints(&[2, 2, 2])), Value::Integer(0));
        assert_eq!(agg("VAR", ints(&[1])), Value::Null);
    }

    #[test]
    fn distinct_dedupes_before_folding() {
        let result = eval_aggregate("COUNT", ints(&[1, 1, 2]), true, &[], 0, &[]).unwrap();
        assert_eq!(result, Value::Integer(2));
    }

    #[test]
    fn listagg_joins_with_separator() {
        let result = eval_aggregate(
            "LISTAGG",
            vec![Value::String("a".into()), Value::String("b".into())],
            false,
            &[Value::String(",".into())],
            0,
            &[],
        )
        .unwrap();
        assert_eq!(result, Value::String("a,b".into()));
    }

    #[test]
    fn json_agg_serializes_values() {
        assert_eq!(
            agg("JSON_AGG", ints(&[1, 2])),
            Value::String("[1,2]".into())
        );
    }
}
