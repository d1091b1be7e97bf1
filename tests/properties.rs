//! Property checks for the value domain: ternary laws, null
//! propagation, comparison totality for `<=>`.

use proptest::prelude::*;

use csvql::value::{
    calculate, compare, equal, identical, ArithmeticOp, ComparisonOp, Ternary, Value,
};

fn ternary_strategy() -> impl Strategy<Value = Ternary> {
    prop_oneof![
        Just(Ternary::True),
        Just(Ternary::False),
        Just(Ternary::Unknown),
    ]
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        any::<i32>().prop_map(|i| Value::Integer(i as i64)),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-z0-9 ]{0,8}".prop_map(Value::String),
    ]
}

proptest! {
    #[test]
    fn and_or_are_commutative(a in ternary_strategy(), b in ternary_strategy()) {
        prop_assert_eq!(a.and(b), b.and(a));
        prop_assert_eq!(a.or(b), b.or(a));
    }

    #[test]
    fn de_morgan_holds(a in ternary_strategy(), b in ternary_strategy()) {
        prop_assert_eq!(a.and(b).not(), a.not().or(b.not()));
        prop_assert_eq!(a.or(b).not(), a.not().and(b.not()));
    }

    #[test]
    fn double_negation(a in ternary_strategy()) {
        prop_assert_eq!(a.not().not(), a);
    }

    #[test]
    fn arithmetic_null_propagates(v in value_strategy()) {
        for op in [
            ArithmeticOp::Add,
            ArithmeticOp::Subtract,
            ArithmeticOp::Multiply,
            ArithmeticOp::Divide,
            ArithmeticOp::Modulo,
        ] {
            prop_assert_eq!(calculate(&Value::Null, op, &v), Value::Null);
            prop_assert_eq!(calculate(&v, op, &Value::Null), Value::Null);
        }
    }

    #[test]
    fn comparison_with_null_is_unknown(v in value_strategy()) {
        for op in [
            ComparisonOp::Equal,
            ComparisonOp::NotEqual,
            ComparisonOp::Less,
            ComparisonOp::LessOrEqual,
            ComparisonOp::Greater,
            ComparisonOp::GreaterOrEqual,
        ] {
            prop_assert_eq!(compare(&Value::Null, op, &v, 0, &[]), Ternary::Unknown);
            prop_assert_eq!(compare(&v, op, &Value::Null, 0, &[]), Ternary::Unknown);
        }
    }

    #[test]
    fn identical_is_total_and_reflexive(v in value_strategy()) {
        // <=> never yields UNKNOWN.
        prop_assert_ne!(identical(&v, &Value::Null, 0, &[]), Ternary::Unknown);
        prop_assert_ne!(identical(&Value::Null, &v, 0, &[]), Ternary::Unknown);
        if !matches!(v, Value::Float(f) if f.is_nan()) {
            prop_assert_eq!(identical(&v, &v, 0, &[]), Ternary::True);
        }
    }

    #[test]
    fn equality_is_symmetric(a in value_strategy(), b in value_strategy()) {
        prop_assert_eq!(equal(&a, &b, 0, &[]), equal(&b, &a, 0, &[]));
    }

    #[test]
    fn addition_is_commutative(a in any::<i32>(), b in any::<i32>()) {
        let x = Value::Integer(a as i64);
        let y = Value::Integer(b as i64);
        prop_assert_eq!(
            calculate(&x, ArithmeticOp::Add, &y),
            calculate(&y, ArithmeticOp::Add, &x)
        );
    }
}

#[test]
fn ternary_tables_are_exhaustive() {
    use Ternary::{False as F, True as T, Unknown as U};
    let and_table = [
        (T, T, T),
        (T, F, F),
        (T, U, U),
        (F, T, F),
        (F, F, F),
        (F, U, F),
        (U, T, U),
        (U, F, F),
        (U, U, U),
    ];
    for (a, b, expected) in and_table {
        assert_eq!(a.and(b), expected, "{a:?} AND {b:?}");
    }
    let or_table = [
        (T, T, T),
        (T, F, T),
        (T, U, T),
        (F, T, T),
        (F, F, F),
        (F, U, U),
        (U, T, T),
        (U, F, U),
        (U, U, U),
    ];
    for (a, b, expected) in or_table {
        assert_eq!(a.or(b), expected, "{a:?} OR {b:?}");
    }
}
