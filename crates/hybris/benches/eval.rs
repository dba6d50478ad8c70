//! Evaluator micro-benchmarks.
//!
//! Grounded on `examples/parcadei-ouros/crates/ouros/benches/arithmetic_non_foldable.rs`:
//! same non-foldable shape (locals mutated across loop iterations, rather than
//! a constant expression a peephole pass could fold away), same `criterion`
//! harness. There is no second-language comparison target here (no
//! CPython-equivalent reference interpreter for Hybris), so this benchmarks
//! `hybris` alone against itself across commits.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hybris::heap::GcLimits;
use hybris::vm::Vm;
use hybris::{eval, extern_abi};

fn run_source(code: &str) -> i64 {
    let program = hybris_syntax::parse(code).unwrap_or_else(|err| panic!("parse error: {err}"));
    let mut vm = Vm::new(GcLimits::default()).with_print(Box::new(hybris::io::NoPrint));
    extern_abi::install_stdlib(&mut vm);
    let result = eval::run_program(&mut vm, &program).unwrap_or_else(|err| panic!("eval error: {err}"));
    match vm.heap.get(result) {
        hybris::heap::HeapData::Integer(n) => *n,
        other => panic!("expected an integer result, got {other:?}"),
    }
}

/// Two locals added at runtime; avoids any constant-folding shortcut.
const ADD_TWO_LOCALS: &str = "
x = 1;
y = 2;
x + y;
";

/// Tight arithmetic loop over local integers, 1000 iterations.
const ADD_TWO_LOOP_1000: &str = "
x = 1;
y = 2;
total = 0;
for (i = 0; i < 1000; i = i + 1) {
    total = total + x + y;
}
total;
";

/// A class method call in a loop, exercising frame push/pop and attribute
/// dispatch rather than bare arithmetic.
const METHOD_CALL_LOOP_1000: &str = "
class Counter {
    public n = 0;
    method bump() { me->n = me->n + 1; return me->n; }
}
c = new Counter();
total = 0;
for (i = 0; i < 1000; i = i + 1) {
    total = c->bump();
}
total;
";

fn bench_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluator");
    group.bench_function("add_two_locals", |b| {
        assert_eq!(run_source(ADD_TWO_LOCALS), 3);
        b.iter(|| black_box(run_source(ADD_TWO_LOCALS)));
    });
    group.bench_function("add_two_loop_1000", |b| {
        assert_eq!(run_source(ADD_TWO_LOOP_1000), 3000);
        b.iter(|| black_box(run_source(ADD_TWO_LOOP_1000)));
    });
    group.bench_function("method_call_loop_1000", |b| {
        assert_eq!(run_source(METHOD_CALL_LOOP_1000), 1000);
        b.iter(|| black_box(run_source(METHOD_CALL_LOOP_1000)));
    });
    group.finish();
}

criterion_group!(benches, bench_arithmetic);
criterion_main!(benches);
