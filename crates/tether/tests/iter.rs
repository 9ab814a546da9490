use tether::{
    CollectStringPrint, ExcType, ExternalResult, NoLimitTracker, NoPrint, RunProgress, TetherException,
    TetherObject, TetherRun,
};

fn program(code: &str, externals: &[&str]) -> TetherRun {
    TetherRun::new(
        code.to_owned(),
        "test.py",
        vec![],
        externals.iter().map(|s| (*s).to_owned()).collect(),
    )
    .unwrap()
}

/// Drives the program, answering every call with `answer`, and records the calls in order.
fn drive(
    program: TetherRun,
    mut answer: impl FnMut(&str, &[TetherObject]) -> TetherObject,
) -> (Vec<(u32, String, Vec<TetherObject>)>, TetherObject) {
    let mut calls = Vec::new();
    let mut progress = program.start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    loop {
        match progress {
            RunProgress::Complete(value) => return (calls, value),
            RunProgress::FunctionCall {
                function_name,
                args,
                call_id,
                state,
                ..
            } => {
                let result = answer(&function_name, &args);
                calls.push((call_id, function_name, args));
                progress = state.run(result, &mut NoPrint).unwrap();
            }
            RunProgress::ResolveFutures(_) => panic!("unexpected futures"),
        }
    }
}

#[test]
fn calls_surface_one_at_a_time_in_program_order() {
    let code = "
a = first(1)
b = second(a + 1)
c = [first(i) for i in range(2)]
(a, b, c)
";
    let (calls, result) = drive(program(code, &["first", "second"]), |name, args| {
        let n = i64::try_from(&args[0]).unwrap();
        match name {
            "first" => TetherObject::Int(n * 10),
            _ => TetherObject::Int(n + 100),
        }
    });
    let summary: Vec<(u32, &str)> = calls.iter().map(|(id, name, _)| (*id, name.as_str())).collect();
    assert_eq!(summary, vec![(0, "first"), (1, "second"), (2, "first"), (3, "first")]);
    assert_eq!(calls[1].2, vec![TetherObject::Int(11)]);
    assert_eq!(result.py_repr(), "(10, 111, [0, 10])");
}

#[test]
fn later_expressions_wait_for_the_call() {
    let code = "
log = []
def note(x):
    log.append(x)
    return x
note(1) + fetch(note(2)) + note(3)
log
";
    let program = program(code, &["fetch"]);
    let progress = program.start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (request, state) = progress.into_function_call().unwrap();
    assert_eq!(request.args, vec![TetherObject::Int(2)]);
    let result = state.run(TetherObject::Int(0), &mut NoPrint).unwrap().into_complete().unwrap();
    assert_eq!(result.py_repr(), "[1, 2, 3]");
}

#[test]
fn keyword_arguments_are_reported_separately() {
    let program = program("fetch('a', 2, timeout=1.5, verbose=True)", &["fetch"]);
    let progress = program.start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let RunProgress::FunctionCall { args, kwargs, .. } = progress else {
        panic!("expected a call");
    };
    assert_eq!(args, vec![TetherObject::from("a"), TetherObject::Int(2)]);
    assert_eq!(
        kwargs,
        vec![
            ("timeout".to_owned(), TetherObject::Float(1.5)),
            ("verbose".to_owned(), TetherObject::Bool(true)),
        ]
    );
}

#[test]
fn host_errors_can_be_caught() {
    let code = "
try:
    fetch('x')
except RuntimeError as e:
    result = 'caught: ' + str(e)
result
";
    let progress = program(code, &["fetch"]).start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (_, state) = progress.into_function_call().unwrap();
    let result = state.resume_with_error("connection refused", &mut NoPrint).unwrap();
    assert_eq!(
        result.into_complete(),
        Some(TetherObject::from("caught: connection refused"))
    );
}

#[test]
fn host_exceptions_keep_their_type() {
    let code = "
try:
    fetch('x')
except KeyError as e:
    result = e.args
result
";
    let progress = program(code, &["fetch"]).start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (_, state) = progress.into_function_call().unwrap();
    let exc = TetherException::new(ExcType::KeyError, Some("missing".to_owned()));
    let result = state.run(exc, &mut NoPrint).unwrap().into_complete().unwrap();
    assert_eq!(result.py_repr(), "('missing',)");
}

#[test]
fn uncaught_host_error_fails_the_run() {
    let progress = program("fetch('x')", &["fetch"]).start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (_, state) = progress.into_function_call().unwrap();
    let err = state.resume_with_error("boom", &mut NoPrint).unwrap_err();
    assert_eq!(err.summary(), "RuntimeError: boom");
}

#[test]
fn run_with_externals_services_calls() {
    let code = "
total = 0
for name in ['a', 'bb', 'ccc']:
    total += size(name)
print('total', total)
total
";
    let program = program(code, &["size"]);
    let mut print = CollectStringPrint::new();
    let mut seen = Vec::new();
    let result = program
        .run_with_externals(
            vec![],
            NoLimitTracker,
            |request| {
                seen.push(request.call_id);
                let name = String::try_from(&request.args[0]).unwrap();
                ExternalResult::Return(TetherObject::Int(name.len() as i64))
            },
            &mut print,
        )
        .unwrap();
    assert_eq!(result, TetherObject::Int(6));
    assert_eq!(seen, vec![0, 1, 2]);
    assert_eq!(print.output(), "total 6\n");
}

#[test]
fn deferred_calls_resolve_out_of_order() {
    let code = "
a = fetch('a')
b = fetch('b')
x = await b
y = await a
x + y
";
    let program = program(code, &["fetch"]);
    let progress = program.start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (first, state) = progress.into_function_call().unwrap();
    assert_eq!(first.call_id, 0);
    let progress = state.run_pending(&mut NoPrint).unwrap();
    let (second, state) = progress.into_function_call().unwrap();
    assert_eq!(second.call_id, 1);
    let progress = state.run(ExternalResult::Future, &mut NoPrint).unwrap();

    let RunProgress::ResolveFutures(futures) = progress else {
        panic!("expected pending futures");
    };
    assert_eq!(futures.pending_call_ids(), &[0, 1]);

    // resolving only the one not awaited yet keeps the program suspended
    let progress = futures
        .resume(vec![(0, TetherObject::from("A").into())], &mut NoPrint)
        .unwrap();
    let RunProgress::ResolveFutures(futures) = progress else {
        panic!("expected pending futures");
    };
    assert_eq!(futures.pending_call_ids(), &[1]);

    let progress = futures
        .resume(vec![(1, TetherObject::from("B").into())], &mut NoPrint)
        .unwrap();
    assert_eq!(progress.into_complete(), Some(TetherObject::from("BA")));
}

#[test]
fn failed_future_raises_at_await() {
    let code = "
f = fetch()
try:
    await f
except ValueError as e:
    out = 'failed: ' + str(e)
out
";
    let progress = program(code, &["fetch"]).start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (_, state) = progress.into_function_call().unwrap();
    let RunProgress::ResolveFutures(futures) = state.run_pending(&mut NoPrint).unwrap() else {
        panic!("expected pending futures");
    };
    let exc = TetherException::new(ExcType::ValueError, Some("bad".to_owned()));
    let progress = futures.resume(vec![(0, exc.into())], &mut NoPrint).unwrap();
    assert_eq!(progress.into_complete(), Some(TetherObject::from("failed: bad")));
}

#[test]
fn unknown_future_ids_are_rejected() {
    let progress = program("await fetch()", &["fetch"]).start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (_, state) = progress.into_function_call().unwrap();
    let RunProgress::ResolveFutures(futures) = state.run_pending(&mut NoPrint).unwrap() else {
        panic!("expected pending futures");
    };
    let err = futures
        .resume(vec![(7, TetherObject::None.into())], &mut NoPrint)
        .unwrap_err();
    assert!(err.to_string().contains("external call 7 is not pending"), "{err}");
}

#[test]
fn await_on_a_plain_value_is_a_type_error() {
    let program = program("await 3", &[]);
    let err = program.run_no_limits(vec![]).unwrap_err();
    assert_eq!(err.exception().unwrap().exc_type(), ExcType::TypeError);
}
