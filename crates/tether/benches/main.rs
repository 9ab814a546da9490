use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};
use tether::{NoLimitTracker, NoPrint, RunProgress, TetherObject, TetherRun};

/// Compiles once, then benchmarks repeated execution.
fn run_tether(bench: &mut Bencher, code: &str, expected: i64) {
    let program = TetherRun::new(code.to_owned(), "test.py", vec![], vec![]).unwrap();
    let r = program.run_no_limits(vec![]).unwrap();
    assert_eq!(i64::try_from(&r).unwrap(), expected);

    bench.iter(|| {
        let r = program.run(vec![], NoLimitTracker, &mut NoPrint).unwrap();
        black_box(i64::try_from(&r).unwrap());
    });
}

const ADD_TWO: &str = "1 + 2";

const LOOP_MOD_13: &str = "
v = ''
for i in range(1_000):
    if i % 13 == 0:
        v += 'x'
len(v)
";

/// Code is shared with test_cases/bench__kitchen_sink.py
const KITCHEN_SINK: &str = include_str!("../test_cases/bench__kitchen_sink.py");

const FUNC_CALL_KWARGS: &str = "
def add(a, b=2):
    return a + b

add(a=1)
";

const LIST_APPEND_STR: &str = "
a = []
for i in range(100_000):
    a.append(str(i))
len(a)
";

const FIB_25: &str = "
def fib(n):
    if n <= 1:
        return n
    return fib(n - 1) + fib(n - 2)

fib(25)
";

const LIST_COMP: &str = "len([x * 2 for x in range(1000)])";

/// 500 unique keys, `i // 2` deduplicates pairs.
const DICT_COMP: &str = "len({i // 2: i * 2 for i in range(1000)})";

const PAIR_TUPLES: &str = "len([(i, i + 1) for i in range(100_000)])";

/// One external call per iteration, answered by the host.
const EXTERNAL_CALLS: &str = "
total = 0
for i in range(100):
    total += get(i)
total
";

/// Parsing and compiling inside the loop.
fn end_to_end(bench: &mut Bencher) {
    bench.iter(|| {
        let program = TetherRun::new(black_box("1 + 2").to_owned(), "test.py", vec![], vec![]).unwrap();
        let r = program.run(vec![], NoLimitTracker, &mut NoPrint).unwrap();
        black_box(r);
    });
}

fn suspend_resume(bench: &mut Bencher) {
    let program = TetherRun::new(EXTERNAL_CALLS.to_owned(), "test.py", vec![], vec!["get".to_owned()]).unwrap();
    bench.iter(|| {
        let mut progress = program.clone().start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
        loop {
            progress = match progress {
                RunProgress::FunctionCall { args, state, .. } => {
                    let value = args.into_iter().next().unwrap_or(TetherObject::None);
                    state.run(value, &mut NoPrint).unwrap()
                }
                RunProgress::Complete(value) => break black_box(value),
                RunProgress::ResolveFutures(_) => unreachable!("no deferred calls"),
            };
        }
    });
}

/// Dumps and loads the state at the first external call.
fn dump_load(bench: &mut Bencher) {
    let program = TetherRun::new(KITCHEN_SINK.to_owned() + "\nget(0)", "test.py", vec![], vec!["get".to_owned()]).unwrap();
    let progress = program.start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    bench.iter(|| {
        let bytes = progress.dump().unwrap();
        black_box(RunProgress::<NoLimitTracker>::load(&bytes).unwrap());
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("add_two", |b| run_tether(b, ADD_TWO, 3));
    c.bench_function("loop_mod_13", |b| run_tether(b, LOOP_MOD_13, 77));
    c.bench_function("end_to_end", end_to_end);
    c.bench_function("kitchen_sink", |b| run_tether(b, KITCHEN_SINK, 213));
    c.bench_function("func_call_kwargs", |b| run_tether(b, FUNC_CALL_KWARGS, 3));
    c.bench_function("list_append_str", |b| run_tether(b, LIST_APPEND_STR, 100_000));
    c.bench_function("fib", |b| run_tether(b, FIB_25, 75_025));
    c.bench_function("list_comp", |b| run_tether(b, LIST_COMP, 1000));
    c.bench_function("dict_comp", |b| run_tether(b, DICT_COMP, 500));
    c.bench_function("pair_tuples", |b| run_tether(b, PAIR_TUPLES, 100_000));
    c.bench_function("suspend_resume", suspend_resume);
    c.bench_function("dump_load", dump_load);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
