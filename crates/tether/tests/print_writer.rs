use tether::{CollectStringPrint, NoLimitTracker, NoPrint, PrintWriter, TetherObject, TetherRun};

fn printed(code: &str) -> String {
    let program = TetherRun::new(code.to_owned(), "test.py", vec![], vec![]).unwrap();
    let mut writer = CollectStringPrint::new();
    program.run(vec![], NoLimitTracker, &mut writer).unwrap();
    writer.into_output()
}

#[test]
fn print_single_string() {
    assert_eq!(printed("print('hello')"), "hello\n");
}

#[test]
fn print_multiple_args() {
    assert_eq!(printed("print('hello', 'world')"), "hello world\n");
}

#[test]
fn print_multiple_statements() {
    assert_eq!(printed("print('one')\nprint('two')\nprint('three')"), "one\ntwo\nthree\n");
}

#[test]
fn print_empty() {
    assert_eq!(printed("print()"), "\n");
}

#[test]
fn print_mixed_types() {
    assert_eq!(printed("print('count:', 42, True, None, [1, 'a'])"), "count: 42 True None [1, 'a']\n");
}

#[test]
fn print_sep_and_end() {
    assert_eq!(printed("print(1, 2, sep=', ', end='!')\nprint('x', end='')"), "1, 2!x");
}

#[test]
fn print_in_loop_and_function() {
    let code = "
def show(n):
    print(f'n={n}')
for i in range(3):
    show(i)
";
    assert_eq!(printed(code), "n=0\nn=1\nn=2\n");
}

#[test]
fn no_print_discards_output() {
    let program = TetherRun::new("print('ignored')\n1".to_owned(), "test.py", vec![], vec![]).unwrap();
    let result = program.run(vec![], NoLimitTracker, &mut NoPrint).unwrap();
    assert_eq!(result, TetherObject::Int(1));
}

/// Records the individual writes, to check how `print()` splits its output.
#[derive(Default)]
struct Recorder {
    writes: Vec<String>,
}

impl PrintWriter for Recorder {
    fn stdout_write(&mut self, output: std::borrow::Cow<'_, str>) {
        self.writes.push(output.into_owned());
    }

    fn stdout_push(&mut self, end: char) {
        self.writes.push(end.to_string());
    }
}

#[test]
fn custom_writer_receives_pieces() {
    let program = TetherRun::new("print('a', 2)".to_owned(), "test.py", vec![], vec![]).unwrap();
    let mut recorder = Recorder::default();
    program.run(vec![], NoLimitTracker, &mut recorder).unwrap();
    assert_eq!(recorder.writes, vec!["a", " ", "2", "\n"]);
}

#[test]
fn output_survives_across_resumes() {
    let code = "print('before')\nx = fetch()\nprint('after', x)";
    let program = TetherRun::new(code.to_owned(), "test.py", vec![], vec!["fetch".to_owned()]).unwrap();
    let mut writer = CollectStringPrint::new();
    let progress = program.start(vec![], NoLimitTracker, &mut writer).unwrap();
    assert_eq!(writer.output(), "before\n");
    let (_, state) = progress.into_function_call().unwrap();
    state.run(TetherObject::Int(7), &mut writer).unwrap();
    assert_eq!(writer.output(), "before\nafter 7\n");
}
