use criterion::{criterion_group, criterion_main, Criterion};

use csvql::parser::parse;
use csvql::procedure::Procedure;
use csvql::session::Session;

fn run(proc: &mut Procedure, sql: &str) {
    let statements = parse(sql).expect("benchmark statement should parse");
    proc.execute(&statements).expect("benchmark statement should execute");
    proc.session.take_captured_output();
}

fn bench_simple_select(c: &mut Criterion) {
    let mut proc = Procedure::new(Session::captured());
    c.bench_function("simple_select", |b| {
        b.iter(|| run(&mut proc, "SELECT 1;"));
    });
}

fn bench_expression_eval(c: &mut Criterion) {
    let mut proc = Procedure::new(Session::captured());
    run(&mut proc, "VAR @i := 0;");
    c.bench_function("variable_arithmetic", |b| {
        b.iter(|| run(&mut proc, "@i := @i + 1;"));
    });
}

fn bench_group_by(c: &mut Criterion) {
    let mut proc = Procedure::new(Session::captured());
    run(
        &mut proc,
        "DECLARE nums VIEW (n) AS \
         SELECT 1 UNION ALL SELECT 2 UNION ALL SELECT 3 UNION ALL SELECT 4;",
    );
    c.bench_function("group_by_modulo", |b| {
        b.iter(|| {
            run(
                &mut proc,
                "SELECT n % 2 AS k, COUNT(*), SUM(n) FROM nums GROUP BY n % 2;",
            );
        });
    });
}

criterion_group!(
    benches,
    bench_simple_select,
    bench_expression_eval,
    bench_group_by
);
criterion_main!(benches);
