//! Destinations for text produced by the `print()` builtin.

use std::io::{self, Write as _};

use crate::{exception_private::ExcType, exception_public::Exception};

/// Receives the output of `print()`.
///
/// Each `print()` call is rendered in full (arguments, separators and the
/// terminator) and handed over as a single chunk.
pub trait PrintWriter {
    fn write_output(&mut self, text: &str) -> Result<(), Exception>;
}

impl<P: PrintWriter + ?Sized> PrintWriter for &mut P {
    fn write_output(&mut self, text: &str) -> Result<(), Exception> {
        (**self).write_output(text)
    }
}

/// Writes to the process's stdout, flushing whenever a chunk ends a line.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write_output(&mut self, text: &str) -> Result<(), Exception> {
        let mut stdout = io::stdout().lock();
        let written = stdout
            .write_all(text.as_bytes())
            .and_then(|()| if text.ends_with('\n') { stdout.flush() } else { Ok(()) });
        written.map_err(|err| Exception::new(ExcType::RuntimeError, format!("failed to write output: {err}")))
    }
}

/// Accumulates everything printed into a `String`.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_output(&mut self, text: &str) -> Result<(), Exception> {
        self.0.push_str(text);
        Ok(())
    }
}

/// Discards output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_output(&mut self, _text: &str) -> Result<(), Exception> {
        Ok(())
    }
}
