/// End to end checks of the public entry points on small, complete programs.
use tether::{
    CapturedRun, ErrorKind, ExcType, Execution, NoLimitTracker, NoPrint, Progress, RunProgress, TetherError,
    TetherObject, TetherRun,
};

fn compile(code: &str, inputs: &[&str], externals: &[&str]) -> TetherRun {
    TetherRun::new(
        code.to_owned(),
        "test.py",
        inputs.iter().map(|s| (*s).to_owned()).collect(),
        externals.iter().map(|s| (*s).to_owned()).collect(),
    )
    .unwrap()
}

#[test]
fn inputs_are_bound_in_order() {
    let program = compile("x + y", &["x", "y"], &[]);
    let result = program
        .run(vec![TetherObject::Int(1), TetherObject::Int(2)], NoLimitTracker, &mut NoPrint)
        .unwrap();
    assert_eq!(result, TetherObject::Int(3));
}

#[test]
fn print_output_is_captured() {
    let program = compile("print('hi')\n42", &[], &[]);
    let CapturedRun { result, output } = program.run_capturing(vec![], NoLimitTracker);
    assert_eq!(result.unwrap(), TetherObject::Int(42));
    assert_eq!(output, "hi\n");
}

#[test]
fn output_is_kept_when_the_run_fails() {
    let program = compile("print('before', 1, sep='-')\nraise ValueError('nope')", &[], &[]);
    let captured = program.run_capturing(vec![], NoLimitTracker);
    assert_eq!(captured.output, "before-1\n");
    assert_eq!(captured.result.unwrap_err().summary(), "ValueError: nope");
}

#[test]
fn external_call_round_trip() {
    let program = compile("fetch('u')", &[], &["fetch"]);
    let progress = program.start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (call, state) = progress.into_function_call().expect("function call");
    assert_eq!(call.function_name, "fetch");
    assert_eq!(call.args, vec![TetherObject::String("u".to_owned())]);
    assert!(call.kwargs.is_empty());

    let progress = state.run(TetherObject::String("R".to_owned()), &mut NoPrint).unwrap();
    assert_eq!(progress.into_complete(), Some(TetherObject::String("R".to_owned())));
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let program = compile("1/0", &[], &[]);
    let err = program.run(vec![], NoLimitTracker, &mut NoPrint).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    let exc = err.exception().expect("runtime errors carry an exception");
    assert_eq!(exc.exc_type(), ExcType::ZeroDivisionError);
    assert_eq!(exc.message(), Some("division by zero"));
    assert_eq!(exc.traceback().len(), 1);
    assert_eq!(exc.traceback()[0].start.line, 1);
}

#[test]
fn malformed_source_is_a_syntax_error() {
    let err = TetherRun::new("def !!!".to_owned(), "bad.py", vec![], vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    let exc = err.exception().unwrap();
    assert_eq!(exc.exc_type(), ExcType::SyntaxError);
    assert_eq!(exc.traceback()[0].filename, "bad.py");
}

#[test]
fn exception_types_survive_to_the_host() {
    let program = compile("d = {'a': 1}\nd['b']", &[], &[]);
    let err = program.run(vec![], NoLimitTracker, &mut NoPrint).unwrap_err();
    assert_eq!(err.summary(), "KeyError: 'b'");
    assert_eq!(err.kind().to_string(), "RuntimeError");
}

#[test]
fn traceback_lists_every_frame() {
    let code = "def inner(x):
    return x[5]

def outer():
    return inner([1, 2])

outer()";
    let program = compile(code, &[], &[]);
    let TetherError::Runtime(exc) = program.run(vec![], NoLimitTracker, &mut NoPrint).unwrap_err() else {
        panic!("expected a runtime error");
    };
    let rendered = exc.to_string();
    assert_eq!(
        rendered,
        "Traceback (most recent call last):
  File \"test.py\", line 7, in <module>
    outer()
  File \"test.py\", line 5, in outer
    return inner([1, 2])
  File \"test.py\", line 2, in inner
    return x[5]
IndexError: list index out of range"
    );
}

#[test]
fn compilation_is_deterministic() {
    let code = "def f(a, b=2):\n    return [a * i for i in range(b)]\nf(x)";
    let first = compile(code, &["x"], &["ext"]).dump().unwrap();
    let second = compile(code, &["x"], &["ext"]).dump().unwrap();
    assert_eq!(first, second);
}

#[test]
fn program_can_run_many_times() {
    let program = compile("total = 0\nfor i in range(n):\n    total += i\ntotal", &["n"], &[]);
    for n in [0, 1, 10] {
        let expected = (0..n).sum::<i64>();
        let result = program.run_no_limits(vec![TetherObject::Int(n)]).unwrap();
        assert_eq!(result, TetherObject::Int(expected));
    }
}

#[test]
fn run_rejects_external_calls() {
    let program = compile("fetch(1)", &[], &["fetch"]);
    let err = program.run(vec![], NoLimitTracker, &mut NoPrint).unwrap_err();
    let exc = err.exception().unwrap();
    assert_eq!(exc.exc_type(), ExcType::NotImplementedError);
}

#[test]
fn execution_start_consumes() {
    let program = compile("fetch('u')", &[], &["fetch"]);
    let mut execution = Execution::new(program, NoLimitTracker);
    assert!(!execution.is_consumed());

    let Progress::Call(call) = execution.start(vec![], &mut NoPrint).unwrap() else {
        panic!("expected a call");
    };
    assert_eq!(call.call_id, 0);
    assert!(execution.is_consumed());

    let err = execution.start(vec![], &mut NoPrint).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consumed);
    let err = execution.run(vec![], &mut NoPrint).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consumed);

    let progress = execution.resume(TetherObject::String("R".to_owned()), &mut NoPrint).unwrap();
    assert_eq!(progress, Progress::Complete(TetherObject::String("R".to_owned())));
    assert_eq!(execution.run(vec![], &mut NoPrint).unwrap_err().kind(), ErrorKind::Consumed);
}

#[test]
fn fresh_execution_can_run_repeatedly() {
    let program = compile("x * 2", &["x"], &[]);
    let execution = Execution::new(program, NoLimitTracker);
    for x in 1..4 {
        let result = execution.run(vec![TetherObject::Int(x)], &mut NoPrint).unwrap();
        assert_eq!(result, TetherObject::Int(x * 2));
    }
    assert!(!execution.is_consumed());
}

#[test]
fn start_with_no_calls_completes_immediately() {
    let program = compile("[1, 2][-1]", &[], &[]);
    let progress = program.start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    assert!(matches!(progress, RunProgress::Complete(TetherObject::Int(2))));
}
