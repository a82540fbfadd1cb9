use std::fmt;

use crate::{
    exception_private::{ExcTriple, ExcType, RunError, SimpleException},
    value::Value,
};

/// One entry of a traceback: the code unit's name and the line being executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StackFrame {
    pub name: String,
    pub line: u32,
}

/// An exception that escaped the program and reached the host.
///
/// Preserves the raised type and value so the host can inspect them, plus the
/// traceback collected while the exception unwound through frames.
#[derive(Debug, Clone)]
pub struct Exception {
    exc_type: Value,
    value: Value,
    /// Innermost frame first.
    traceback: Vec<StackFrame>,
    uncatchable: bool,
}

impl Exception {
    /// Creates an exception of a built-in type with a message.
    ///
    /// Host functions return this to raise into the running program.
    #[must_use]
    pub fn new(exc_type: ExcType, msg: impl fmt::Display) -> Self {
        Self::from_triple(SimpleException::new_msg(exc_type, msg).into_triple(), false)
    }

    pub(crate) fn from_triple(triple: ExcTriple, uncatchable: bool) -> Self {
        Self {
            exc_type: triple.exc_type,
            value: triple.value,
            traceback: triple.traceback,
            uncatchable,
        }
    }

    pub(crate) fn into_triple(self) -> ExcTriple {
        ExcTriple {
            exc_type: self.exc_type,
            value: self.value,
            traceback: self.traceback,
        }
    }

    /// The raised type: an exception type, a user class, or the type of an arbitrary value.
    #[must_use]
    pub fn exc_type(&self) -> &Value {
        &self.exc_type
    }

    /// The raised value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Traceback entries, innermost frame first.
    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        &self.traceback
    }

    /// The name of the raised type, e.g. `ValueError` or a user class name.
    #[must_use]
    pub fn type_name(&self) -> String {
        self.exc_type.type_display_name()
    }

    /// The exception message, rendered the way `str(exc)` would.
    #[must_use]
    pub fn message(&self) -> String {
        self.value.exception_message()
    }

    /// Returns true if the raised type is (a subclass of) the given built-in type.
    #[must_use]
    pub fn is(&self, exc_type: ExcType) -> bool {
        self.exc_type.exc_type_base().is_some_and(|base| base.is_subclass_of(exc_type))
    }

    /// Returns true if the exception came from a resource limit and skipped every handler.
    #[must_use]
    pub fn is_uncatchable(&self) -> bool {
        self.uncatchable
    }
}

impl From<RunError> for Exception {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Exc(triple) => Self::from_triple(*triple, false),
            RunError::Uncatchable(triple) => Self::from_triple(*triple, true),
            RunError::Internal(msg) => Self::new(ExcType::SystemError, format!("internal error in coil: {msg}")),
        }
    }
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        Self::Exc(Box::new(exc.into_triple()))
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.traceback.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for frame in self.traceback.iter().rev() {
                writeln!(f, "  line {}, in {}", frame.line, frame.name)?;
            }
        }
        let message = self.message();
        if message.is_empty() {
            write!(f, "{}", self.type_name())
        } else {
            write!(f, "{}: {message}", self.type_name())
        }
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn display_renders_outermost_frame_first() {
        let mut exc = Exception::new(ExcType::ValueError, "bad value");
        exc.traceback.push(StackFrame {
            name: "inner".to_owned(),
            line: 7,
        });
        exc.traceback.push(StackFrame {
            name: "<module>".to_owned(),
            line: 2,
        });
        assert_eq!(
            exc.to_string(),
            "Traceback (most recent call last):\n  line 2, in <module>\n  line 7, in inner\nValueError: bad value"
        );
    }

    #[test]
    fn internal_errors_surface_as_system_error() {
        let exc = Exception::from(RunError::internal("stack underflow"));
        assert!(exc.is(ExcType::SystemError));
        assert_eq!(exc.message(), "internal error in coil: stack underflow");
    }
}
