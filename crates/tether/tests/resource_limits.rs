/// Tests for resource limits and garbage collection.
///
/// Limits are enforced at safepoints while the program runs; a breach stops the run
/// with a `Resource` error that the program itself cannot catch.
use std::time::{Duration, Instant};

use tether::{
    ErrorKind, Execution, ExecutionStatus, LimitedTracker, NoPrint, ResourceError, ResourceLimits, TetherError,
    TetherObject, TetherRun,
};

fn run_limited(code: &str, limits: ResourceLimits) -> Result<TetherObject, TetherError> {
    let program = TetherRun::new(code.to_owned(), "test.py", vec![], vec![]).unwrap();
    program.run(vec![], LimitedTracker::new(limits), &mut NoPrint)
}

fn resource_error(result: Result<TetherObject, TetherError>) -> ResourceError {
    match result {
        Err(TetherError::Resource(err)) => err,
        other => panic!("expected a resource error, got: {other:?}"),
    }
}

#[test]
fn allocation_limit_exceeded() {
    let code = "
result = []
for i in range(11):
    result.append(str(i))
result
";
    let err = resource_error(run_limited(code, ResourceLimits::new().max_allocations(4)));
    assert!(matches!(err, ResourceError::Allocation { limit: 4, .. }), "{err}");
    assert!(err.to_string().starts_with("allocation limit exceeded: "), "{err}");
}

#[test]
fn allocation_limit_not_exceeded() {
    let code = "
result = []
for i in range(9):
    result.append(str(i))
len(result)
";
    let result = run_limited(code, ResourceLimits::new().max_allocations(50));
    assert_eq!(result.unwrap(), TetherObject::Int(9));
}

#[test]
fn time_limit_stops_infinite_loops() {
    let code = "
x = 0
while True:
    x += 1
";
    let start = Instant::now();
    let err = resource_error(run_limited(code, ResourceLimits::new().max_duration(Duration::from_millis(50))));
    assert!(matches!(err, ResourceError::Time { .. }));
    assert!(err.to_string().starts_with("time limit exceeded: "), "{err}");
    assert!(start.elapsed() < Duration::from_secs(5), "loop should stop promptly");
}

#[test]
fn time_limit_in_fractional_seconds() {
    let code = "
def spin(n):
    while n > 0:
        n = n + 1
spin(1)
";
    let err = resource_error(run_limited(code, ResourceLimits::new().max_duration_secs(0.05)));
    assert!(matches!(err, ResourceError::Time { .. }));
}

#[test]
fn memory_limit_exceeded() {
    let code = "
parts = []
for i in range(10000):
    parts.append('x' * 100)
len(parts)
";
    let err = resource_error(run_limited(code, ResourceLimits::new().max_memory(10_000)));
    assert!(matches!(err, ResourceError::Memory { limit: 10_000, .. }), "{err}");
}

#[test]
fn garbage_collection_returns_memory() {
    // every iteration drops the previous string, so live memory stays small
    let code = "
s = ''
for i in range(5000):
    s = 'y' * 200
len(s)
";
    let limits = ResourceLimits::new().max_memory(100_000).gc_interval(100);
    assert_eq!(run_limited(code, limits).unwrap(), TetherObject::Int(200));
}

#[test]
fn recursion_limit() {
    let code = "
def down(n):
    return down(n + 1)
down(0)
";
    let err = resource_error(run_limited(code, ResourceLimits::new().max_recursion_depth(Some(50))));
    assert_eq!(err, ResourceError::Recursion { limit: 50, depth: 51 });
    assert_eq!(err.to_string(), "recursion limit exceeded: depth 51 (limit: 50)");
}

#[test]
fn resource_errors_cannot_be_caught() {
    let code = "
try:
    while True:
        pass
except Exception:
    result = 'caught'
result
";
    let err = run_limited(code, ResourceLimits::new().max_duration(Duration::from_millis(20))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
}

#[test]
fn clock_restarts_on_resume() {
    let code = "a = wait()\nb = wait()\na + b";
    let program = TetherRun::new(code.to_owned(), "test.py", vec![], vec!["wait".to_owned()]).unwrap();
    let tracker = LimitedTracker::new(ResourceLimits::new().max_duration(Duration::from_millis(200)));
    let mut execution = Execution::new(program, tracker);
    execution.start(vec![], &mut NoPrint).unwrap();

    // the host takes longer than the limit, which is not charged to the program
    std::thread::sleep(Duration::from_millis(250));
    execution.resume(TetherObject::Int(1), &mut NoPrint).unwrap();
    std::thread::sleep(Duration::from_millis(250));
    execution.resume(TetherObject::Int(2), &mut NoPrint).unwrap();
    assert_eq!(execution.state(), ExecutionStatus::Complete);
    assert_eq!(execution.result(), Some(&TetherObject::Int(3)));
}

#[test]
fn breach_fails_the_execution() {
    let program = TetherRun::new("while True:\n    pass".to_owned(), "test.py", vec![], vec![]).unwrap();
    let tracker = LimitedTracker::new(ResourceLimits::new().max_duration(Duration::from_millis(20)));
    let mut execution = Execution::new(program, tracker);
    let err = execution.start(vec![], &mut NoPrint).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(execution.state(), ExecutionStatus::Failed);
}

#[test]
fn huge_integer_power_fails_before_the_deadline() {
    let start = Instant::now();
    let err = run_limited(
        "x = 3 ** 4000000000",
        ResourceLimits::new().max_duration(Duration::from_millis(200)),
    )
    .unwrap_err();
    let TetherError::Runtime(exc) = err else {
        panic!("expected an OverflowError, got: {err:?}");
    };
    assert_eq!(exc.exc_type(), tether::ExcType::OverflowError);
    assert!(start.elapsed() < Duration::from_secs(5), "a single power must not outlive the limit");
}

#[test]
fn huge_repeat_without_limits_is_a_memory_error() {
    let program = TetherRun::new("'ab' * (10 ** 18)".to_owned(), "test.py", vec![], vec![]).unwrap();
    let err = program.run_no_limits(vec![]).unwrap_err();
    let TetherError::Runtime(exc) = err else {
        panic!("expected a MemoryError, got: {err:?}");
    };
    assert_eq!(exc.summary(), "MemoryError: cannot build a sequence of 2000000000000000000 bytes (limit: 134217728)");
}
