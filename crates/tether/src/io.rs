use std::borrow::Cow;

/// Destination for the output of the `print()` builtin.
///
/// The interpreter never touches stdout directly; every run takes a writer so a host can
/// capture, forward or discard what a program prints.
pub trait PrintWriter {
    /// Called once for each formatted argument passed to `print()`.
    ///
    /// Writes only the argument's text; separators and the line terminator arrive through
    /// [`PrintWriter::stdout_push`] or as further `stdout_write` calls when they are longer
    /// than one character.
    fn stdout_write(&mut self, output: Cow<'_, str>);

    /// Adds a single character, generally a space or a newline.
    fn stdout_push(&mut self, end: char);
}

impl<W: PrintWriter + ?Sized> PrintWriter for &mut W {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        (**self).stdout_write(output);
    }

    fn stdout_push(&mut self, end: char) {
        (**self).stdout_push(end);
    }
}

/// Writes to the process stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        print!("{output}");
    }

    fn stdout_push(&mut self, end: char) {
        print!("{end}");
    }
}

/// Collects all output into a string.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        self.0.push_str(&output);
    }

    fn stdout_push(&mut self, end: char) {
        self.0.push(end);
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) {}

    fn stdout_push(&mut self, _end: char) {}
}
