/// Dumping and loading programs and paused executions.
use tether::{
    ErrorKind, Execution, ExecutionStatus, FORMAT_VERSION, LimitedTracker, NoLimitTracker, NoPrint, Progress,
    ResourceLimits, RunProgress, TetherObject, TetherRun,
};

const PIPELINE: &str = "
def scale(values, factor=2):
    return [v * factor for v in values]

items = scale(load('a'))
extra = load('b')
counts = {}
for item in items + extra:
    counts[item % 3] = counts.get(item % 3, 0) + 1
(items, extra, counts)
";

fn pipeline() -> TetherRun {
    TetherRun::new(PIPELINE.to_owned(), "pipeline.py", vec![], vec!["load".to_owned()]).unwrap()
}

fn answer(call: u32) -> TetherObject {
    match call {
        0 => TetherObject::from(vec![1_i64, 2, 3]),
        _ => TetherObject::from(vec![10_i64]),
    }
}

#[test]
fn loaded_program_behaves_like_the_original() {
    let program = TetherRun::new("f'{x:>5}|'".to_owned(), "fmt.py", vec!["x".to_owned()], vec![]).unwrap();
    let bytes = program.dump().unwrap();
    let loaded = TetherRun::load(&bytes).unwrap();
    assert_eq!(loaded.code(), program.code());
    assert_eq!(loaded.script_name(), "fmt.py");
    assert_eq!(loaded.input_names(), &["x".to_owned()]);
    let result = loaded.run_no_limits(vec![TetherObject::from("ab")]).unwrap();
    assert_eq!(result, TetherObject::from("   ab|"));
}

#[test]
fn paused_progress_resumes_identically_after_load() {
    // straight through
    let progress = pipeline().start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let (_, state) = progress.into_function_call().unwrap();
    let (_, state) = state.run(answer(0), &mut NoPrint).unwrap().into_function_call().unwrap();
    let expected = state.run(answer(1), &mut NoPrint).unwrap().into_complete().unwrap();

    // dumping at every suspension point
    let progress = pipeline().start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let bytes = progress.dump().unwrap();
    let progress = RunProgress::<NoLimitTracker>::load(&bytes).unwrap();
    let (request, state) = progress.into_function_call().unwrap();
    assert_eq!(request.args, vec![TetherObject::from("a")]);

    let progress = state.run(answer(0), &mut NoPrint).unwrap();
    let bytes = progress.dump().unwrap();
    let progress = RunProgress::<NoLimitTracker>::load(&bytes).unwrap();
    let (request, state) = progress.into_function_call().unwrap();
    assert_eq!(request.call_id, 1);

    let result = state.run(answer(1), &mut NoPrint).unwrap().into_complete().unwrap();
    assert_eq!(result, expected);
    assert_eq!(result.py_repr(), "([2, 4, 6], [10], {2: 1, 1: 2, 0: 1})");
}

#[test]
fn a_loaded_snapshot_is_independent_of_the_original() {
    let progress = pipeline().start(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    let bytes = progress.dump().unwrap();

    // the same bytes can be loaded and driven any number of times
    for _ in 0..2 {
        let (_, state) = RunProgress::<NoLimitTracker>::load(&bytes)
            .unwrap()
            .into_function_call()
            .unwrap();
        let (_, state) = state.run(answer(0), &mut NoPrint).unwrap().into_function_call().unwrap();
        let result = state.run(answer(1), &mut NoPrint).unwrap().into_complete();
        assert!(result.is_some());
    }
}

#[test]
fn fresh_execution_round_trips() {
    let execution = Execution::new(pipeline(), NoLimitTracker);
    let mut loaded = Execution::<NoLimitTracker>::load(&execution.dump().unwrap()).unwrap();
    assert_eq!(loaded.state(), ExecutionStatus::Fresh);
    assert!(!loaded.is_consumed());

    let Progress::Call(call) = loaded.start(vec![], &mut NoPrint).unwrap() else {
        panic!("expected a call");
    };
    assert_eq!(call.function_name, "load");
}

#[test]
fn suspended_execution_keeps_its_pending_call_and_consumption() {
    let mut execution = Execution::new(pipeline(), NoLimitTracker);
    execution.start(vec![], &mut NoPrint).unwrap();
    execution.resume(answer(0), &mut NoPrint).unwrap();

    let bytes = execution.dump().unwrap();
    let mut loaded = Execution::<NoLimitTracker>::load(&bytes).unwrap();
    assert_eq!(loaded.state(), ExecutionStatus::SuspendedOnCall);
    assert!(loaded.is_consumed());
    assert_eq!(loaded.pending_call(), execution.pending_call());
    assert_eq!(loaded.pending_call().unwrap().args, vec![TetherObject::from("b")]);
    assert_eq!(loaded.start(vec![], &mut NoPrint).unwrap_err().kind(), ErrorKind::Consumed);

    let from_loaded = loaded.resume(answer(1), &mut NoPrint).unwrap();
    let from_original = execution.resume(answer(1), &mut NoPrint).unwrap();
    assert_eq!(from_loaded, from_original);
}

#[test]
fn execution_waiting_on_futures_survives_repeated_dumps() {
    let code = "a = fetch(20)\nb = fetch(22)\n(await a) + (await b)";
    let program = TetherRun::new(code.to_owned(), "futures.py", vec![], vec!["fetch".to_owned()]).unwrap();
    let mut execution = Execution::new(program, NoLimitTracker);
    execution.start(vec![], &mut NoPrint).unwrap();
    execution.defer(&mut NoPrint).unwrap();
    let Progress::PendingFutures { requests } = execution.defer(&mut NoPrint).unwrap() else {
        panic!("expected pending futures");
    };
    assert_eq!(requests.iter().map(|r| r.call_id).collect::<Vec<_>>(), vec![0, 1]);

    let mut loaded = Execution::<NoLimitTracker>::load(&execution.dump().unwrap()).unwrap();
    assert_eq!(loaded.state(), ExecutionStatus::SuspendedOnFutures);
    let Progress::PendingFutures { requests } = loaded
        .resume_futures(vec![(1, TetherObject::Int(22).into())], &mut NoPrint)
        .unwrap()
    else {
        panic!("expected the first future to still be pending");
    };
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].call_id, 0);
    assert_eq!(requests[0].args, vec![TetherObject::Int(20)]);

    let mut reloaded = Execution::<NoLimitTracker>::load(&loaded.dump().unwrap()).unwrap();
    assert_eq!(reloaded.state(), ExecutionStatus::SuspendedOnFutures);
    let progress = reloaded
        .resume_futures(vec![(0, TetherObject::Int(20).into())], &mut NoPrint)
        .unwrap();
    assert_eq!(progress, Progress::Complete(TetherObject::Int(42)));
    assert_eq!(reloaded.state(), ExecutionStatus::Complete);
}

#[test]
fn limits_survive_a_dump() {
    let code = "fetch()\nout = []\nfor i in range(100):\n    out.append([i])\nout";
    let program = TetherRun::new(code.to_owned(), "limits.py", vec![], vec!["fetch".to_owned()]).unwrap();
    let tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(20));
    let progress = program.start(vec![], tracker, &mut NoPrint).unwrap();
    let bytes = progress.dump().unwrap();

    let (_, state) = RunProgress::<LimitedTracker>::load(&bytes)
        .unwrap()
        .into_function_call()
        .unwrap();
    let err = state.run(TetherObject::None, &mut NoPrint).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
}

#[test]
fn corrupt_bytes_are_format_errors() {
    let bytes = pipeline().dump().unwrap();
    assert_eq!(&bytes[..4], b"TTHR");
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), FORMAT_VERSION);

    let truncated = TetherRun::load(&bytes[..bytes.len() / 2]).unwrap_err();
    assert_eq!(truncated.kind(), ErrorKind::Format);

    let wrong_kind = RunProgress::<NoLimitTracker>::load(&bytes).unwrap_err();
    assert_eq!(
        wrong_kind.to_string(),
        "invalid snapshot: payload kind mismatch: expected Progress, found Program"
    );

    let mut future_version = bytes.clone();
    future_version[4] = 2;
    let err = TetherRun::load(&future_version).unwrap_err();
    assert_eq!(err.to_string(), "invalid snapshot: unsupported format version 2, expected 1");

    assert_eq!(TetherRun::load(b"").unwrap_err().kind(), ErrorKind::Format);
}
