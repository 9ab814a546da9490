use std::{error::Error, fs, path::Path};

use tether::{ExternalResult, FunctionCallRequest, NoLimitTracker, NoPrint, TetherError, TetherObject, TetherRun};

/// Represents the expected outcome of a test fixture
#[derive(Debug, Clone)]
enum Expectation {
    /// Expect exception with specific repr, e.g. `ValueError('bad')`
    Raise(String),
    /// Expect a syntax error with this message
    ParseError(String),
    /// Expect successful execution, check str() output
    ReturnStr(String),
    /// Expect successful execution, check py_repr() output
    Return(String),
    /// Expect successful execution, check type_name() output
    ReturnType(String),
    /// Expect successful execution without raising an exception (no return value check).
    /// Used for tests that rely on asserts or just verify code runs.
    NoException,
}

/// Parse a Python fixture file into code, expected outcome and whether to run it iteratively.
///
/// The file may start with a `# mode: iter` comment, in which case the fixture is run
/// through `start`/`resume` with the external functions in [`ITER_EXT_FUNCTIONS`].
///
/// The file may have an expectation comment as the LAST line:
/// - `# Raise=ExceptionType('message')` - Exception format
/// - `# ParseError=message` - Syntax error message
/// - `# Return.str=value` - Check str() output
/// - `# Return=value` - Check py_repr() output
/// - `# Return.type=typename` - Check type_name() output
///
/// If no expectation comment is present, the test just verifies the code runs without exception.
fn parse_fixture(content: &str) -> (String, Expectation, bool) {
    let lines: Vec<&str> = content.lines().collect();
    assert!(!lines.is_empty(), "Empty fixture file");

    let iter_mode = lines[0].starts_with('#') && lines[0].contains("mode: iter");
    let code_start = usize::from(iter_mode);

    if let Some(first_code_line) = lines.get(code_start) {
        assert!(
            !(first_code_line.starts_with("# Return")
                || first_code_line.starts_with("# Raise")
                || first_code_line.starts_with("# ParseError")),
            "Expectation comment must be on the LAST line, not the first line"
        );
    }

    let last_line = lines[lines.len() - 1];
    let with_expectation = &lines[code_start..lines.len() - 1];
    // more specific prefixes first
    let (expectation, code_lines) = if let Some(expected) = last_line.strip_prefix("# Return.str=") {
        (Expectation::ReturnStr(expected.to_owned()), with_expectation)
    } else if let Some(expected) = last_line.strip_prefix("# Return.type=") {
        (Expectation::ReturnType(expected.to_owned()), with_expectation)
    } else if let Some(expected) = last_line.strip_prefix("# Return=") {
        (Expectation::Return(expected.to_owned()), with_expectation)
    } else if let Some(expected) = last_line.strip_prefix("# Raise=") {
        (Expectation::Raise(expected.to_owned()), with_expectation)
    } else if let Some(expected) = last_line.strip_prefix("# ParseError=") {
        (Expectation::ParseError(expected.to_owned()), with_expectation)
    } else {
        (Expectation::NoException, &lines[code_start..])
    };

    (code_lines.join("\n"), expectation, iter_mode)
}

/// External functions available to `# mode: iter` fixtures.
const ITER_EXT_FUNCTIONS: &[&str] = &[
    "add_ints",       // (a, b) -> a + b (integers)
    "concat_strings", // (a, b) -> a + b (strings)
    "return_value",   // (x) -> x (identity)
    "fail",           // (msg) -> raises RuntimeError(msg)
    "deferred",       // (x) -> future resolving to x
];

fn dispatch_external_call(request: &FunctionCallRequest) -> ExternalResult {
    let args = &request.args;
    match request.function_name.as_str() {
        "add_ints" => {
            assert!(args.len() == 2, "add_ints requires 2 arguments");
            let a = i64::try_from(&args[0]).expect("add_ints: first arg must be int");
            let b = i64::try_from(&args[1]).expect("add_ints: second arg must be int");
            TetherObject::Int(a + b).into()
        }
        "concat_strings" => {
            assert!(args.len() == 2, "concat_strings requires 2 arguments");
            let a = String::try_from(&args[0]).expect("concat_strings: first arg must be str");
            let b = String::try_from(&args[1]).expect("concat_strings: second arg must be str");
            TetherObject::String(a + &b).into()
        }
        "return_value" => {
            assert!(args.len() == 1, "return_value requires 1 argument");
            args[0].clone().into()
        }
        "fail" => {
            let msg = String::try_from(&args[0]).expect("fail: arg must be str");
            ExternalResult::Error(tether::TetherException::runtime_error(msg))
        }
        "deferred" => ExternalResult::Future,
        name => panic!("Unknown external function: {name}"),
    }
}

/// Runs the fixture iteratively, resolving deferred calls with their first argument.
fn run_iter_loop(program: TetherRun) -> Result<TetherObject, TetherError> {
    let mut deferred: Vec<(u32, TetherObject)> = Vec::new();
    let mut progress = program.start(vec![], NoLimitTracker, &mut NoPrint)?;
    loop {
        progress = match progress {
            tether::RunProgress::Complete(result) => return Ok(result),
            tether::RunProgress::FunctionCall {
                function_name,
                args,
                kwargs,
                call_id,
                state,
            } => {
                let request = FunctionCallRequest {
                    call_id,
                    function_name,
                    args,
                    kwargs,
                };
                let result = dispatch_external_call(&request);
                if matches!(result, ExternalResult::Future) {
                    deferred.push((call_id, request.args[0].clone()));
                }
                state.run(result, &mut NoPrint)?
            }
            tether::RunProgress::ResolveFutures(state) => {
                // resolve in reverse call order to exercise out of order completion
                let pending = state.pending_call_ids().to_vec();
                let results = deferred
                    .iter()
                    .rev()
                    .filter(|(id, _)| pending.contains(id))
                    .map(|(id, value)| (*id, ExternalResult::Return(value.clone())))
                    .collect();
                deferred.retain(|(id, _)| !pending.contains(id));
                state.resume(results, &mut NoPrint)?
            }
        };
    }
}

fn run_test(path: &Path, code: &str, expectation: Expectation, iter_mode: bool) {
    let test_name = path.strip_prefix("test_cases/").unwrap_or(path).display().to_string();
    let externals = if iter_mode {
        ITER_EXT_FUNCTIONS.iter().copied().map(str::to_owned).collect()
    } else {
        vec![]
    };

    let program = match TetherRun::new(code.to_owned(), "test.py", vec![], externals) {
        Ok(program) => program,
        Err(err) => {
            if let Expectation::ParseError(expected) = &expectation {
                let exc = err.exception().expect("syntax errors carry an exception");
                assert_eq!(exc.message().unwrap_or_default(), expected, "[{test_name}] Parse error mismatch");
                return;
            }
            panic!("[{test_name}] Unexpected parse error:\n{err}");
        }
    };

    let result = if iter_mode {
        run_iter_loop(program)
    } else {
        program.run(vec![], NoLimitTracker, &mut NoPrint)
    };

    match result {
        Ok(obj) => match expectation {
            Expectation::ReturnStr(expected) => {
                assert_eq!(obj.to_string(), expected, "[{test_name}] str() mismatch");
            }
            Expectation::Return(expected) => {
                assert_eq!(obj.py_repr(), expected, "[{test_name}] py_repr() mismatch");
            }
            Expectation::ReturnType(expected) => {
                assert_eq!(obj.type_name(), expected, "[{test_name}] type_name() mismatch");
            }
            Expectation::NoException => {}
            Expectation::Raise(_) => panic!("[{test_name}] Expected exception but code completed normally"),
            Expectation::ParseError(_) => panic!("[{test_name}] Expected parse error but code compiled"),
        },
        Err(err) => {
            if let Expectation::Raise(expected) = expectation {
                let output = match &err {
                    TetherError::Runtime(exc) => exc.py_repr(),
                    other => other.to_string(),
                };
                assert_eq!(output, expected, "[{test_name}] Exception mismatch");
            } else {
                panic!("[{test_name}] Unexpected error:\n{err}");
            }
        }
    }
}

/// Test function that runs each fixture
fn run_test_cases(path: &Path) -> Result<(), Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    let (code, expectation, iter_mode) = parse_fixture(&content);
    run_test(path, &code, expectation, iter_mode);
    Ok(())
}

datatest_stable::harness!(run_test_cases, "test_cases", r"^.*\.py$");
