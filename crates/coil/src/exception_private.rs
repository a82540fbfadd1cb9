use std::{
    borrow::Cow,
    cell::RefCell,
    fmt::{self, Display},
    rc::Rc,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{exception_public::StackFrame, value::Value};

pub type RunResult<T> = Result<T, RunError>;

/// Exception classes known to the VM without any user code. The variant name is
/// the class name as the running program sees it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum ExcType {
    BaseException,
    /// Sent into a generator by `close()`; sits outside `Exception`.
    GeneratorExit,
    Exception,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    LookupError,
    IndexError,
    KeyError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    NameError,
    UnboundLocalError,
    AssertionError,
    AttributeError,
    ImportError,
    MemoryError,
    StopIteration,
    SystemError,
    TimeoutError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// Direct base class; `BaseException` has none.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::GeneratorExit | Self::Exception => Some(Self::BaseException),
            Self::OverflowError | Self::ZeroDivisionError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::NotImplementedError | Self::RecursionError => Some(Self::RuntimeError),
            Self::UnboundLocalError => Some(Self::NameError),
            _ => Some(Self::Exception),
        }
    }

    /// Whether `except handler_type` catches this type.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        std::iter::successors(Some(self), |exc_type| exc_type.parent()).any(|exc_type| exc_type == handler_type)
    }

    fn raise(self, msg: impl Display) -> RunError {
        SimpleException::new_msg(self, msg).into()
    }

    pub(crate) fn attribute_error(type_name: impl Display, attr: &str) -> RunError {
        Self::AttributeError.raise(format_args!("'{type_name}' object has no attribute '{attr}'"))
    }

    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.raise(format_args!("name '{name}' is not defined"))
    }

    /// A closure cell read while still empty.
    pub(crate) fn name_error_free(name: &str) -> RunError {
        Self::NameError.raise(format_args!(
            "free variable '{name}' referenced before assignment in enclosing scope"
        ))
    }

    pub(crate) fn unbound_local(name: &str) -> RunError {
        Self::UnboundLocalError.raise(format_args!("local variable '{name}' referenced before assignment"))
    }

    /// `op` is the operator symbol, e.g. `"+"` or `"<<"`.
    pub(crate) fn binary_type_error(op: &str, lhs_type: &str, rhs_type: &str) -> RunError {
        Self::TypeError.raise(format_args!(
            "unsupported operand type(s) for {op}: '{lhs_type}' and '{rhs_type}'"
        ))
    }

    pub(crate) fn compare_type_error(op: &str, lhs_type: &str, rhs_type: &str) -> RunError {
        Self::TypeError.raise(format_args!(
            "'{op}' not supported between instances of '{lhs_type}' and '{rhs_type}'"
        ))
    }

    pub(crate) fn not_callable(type_name: &str) -> RunError {
        Self::TypeError.raise(format_args!("'{type_name}' object is not callable"))
    }

    pub(crate) fn not_iterable(type_name: &str) -> RunError {
        Self::TypeError.raise(format_args!("'{type_name}' object is not iterable"))
    }

    pub(crate) fn type_error_unhashable(type_name: &str) -> RunError {
        Self::TypeError.raise(format_args!("unhashable type: '{type_name}'"))
    }

    /// Wrong argument count for a builtin.
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        match expected {
            1 => Self::TypeError.raise(format_args!("{name}() takes exactly one argument ({actual} given)")),
            _ => Self::TypeError.raise(format_args!("{name} expected {expected} arguments, got {actual}")),
        }
    }

    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::TypeError.raise(format_args!("{name}() takes no keyword arguments"))
    }

    pub(crate) fn type_error_missing_positional(name: &str, missing_names: &[&str]) -> RunError {
        let count = missing_names.len();
        let noun = plural(count, "argument", "arguments");
        let names = format_param_names(missing_names);
        Self::TypeError.raise(format_args!("{name}() missing {count} required positional {noun}: {names}"))
    }

    pub(crate) fn type_error_too_many_positional(name: &str, max: usize, actual: usize) -> RunError {
        let noun = plural(max, "argument", "arguments");
        let verb = plural(actual, "was", "were");
        Self::TypeError.raise(format_args!("{name}() takes {max} positional {noun} but {actual} {verb} given"))
    }

    pub(crate) fn type_error_multiple_values(name: &str, key: &str) -> RunError {
        Self::TypeError.raise(format_args!("{name}() got multiple values for argument '{key}'"))
    }

    pub(crate) fn type_error_unexpected_keyword(name: &str, key: &str) -> RunError {
        Self::TypeError.raise(format_args!("{name}() got an unexpected keyword argument '{key}'"))
    }

    /// `StopIteration` for a finished generator; a `None` return value gives empty args.
    pub(crate) fn stop_iteration(value: Value) -> RunError {
        let args = match value {
            Value::None => Vec::new(),
            value => vec![value],
        };
        SimpleException::new(Self::StopIteration, args).into()
    }
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 { one } else { many }
}

/// Formats parameter names as `'a'`, `'a' and 'b'` or `'a', 'b', and 'c'`.
fn format_param_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => format!("'{one}'"),
        [first, second] => format!("'{first}' and '{second}'"),
        [init @ .., last] => {
            let head: Vec<String> = init.iter().map(|name| format!("'{name}'")).collect();
            format!("{}, and '{last}'", head.join(", "))
        }
    }
}

/// A raised instance of an [`ExcType`]. Instances of user exception classes are
/// ordinary instances with an `args` attribute instead.
#[derive(Debug)]
pub struct SimpleException {
    exc_type: ExcType,
    args: Vec<Value>,
    /// `raise X from Y` stores `Y` here.
    cause: RefCell<Option<Value>>,
}

impl SimpleException {
    #[must_use]
    pub fn new(exc_type: ExcType, args: Vec<Value>) -> Self {
        Self {
            exc_type,
            args,
            cause: RefCell::new(None),
        }
    }

    #[must_use]
    pub fn new_msg(exc_type: ExcType, msg: impl Display) -> Self {
        Self::new(exc_type, vec![Value::Str(msg.to_string().into())])
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    #[must_use]
    pub fn cause(&self) -> Option<Value> {
        self.cause.borrow().clone()
    }

    pub(crate) fn set_cause(&self, cause: Value) {
        *self.cause.borrow_mut() = Some(cause);
    }

    #[must_use]
    pub(crate) fn into_triple(self) -> ExcTriple {
        ExcTriple::from_value(Value::Exception(Rc::new(self)))
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(Box::new(exc.into_triple()))
    }
}

/// An exception in flight. Frames join `traceback` as the exception leaves
/// them, so the innermost frame comes first.
#[derive(Debug, Clone)]
pub struct ExcTriple {
    pub exc_type: Value,
    pub value: Value,
    pub traceback: Vec<StackFrame>,
}

impl ExcTriple {
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self {
            exc_type: value.type_value(),
            value,
            traceback: Vec::new(),
        }
    }

    /// True when the exception's class derives from the built-in `exc_type`.
    #[must_use]
    pub fn is(&self, exc_type: ExcType) -> bool {
        self.exc_type.exc_type_base().is_some_and(|base| base.is_subclass_of(exc_type))
    }

    pub(crate) fn push_frame(&mut self, name: &Rc<str>, line: u32) {
        self.traceback.push(StackFrame {
            name: name.to_string(),
            line,
        });
    }
}

/// Why an instruction did not complete.
#[derive(Debug)]
pub enum RunError {
    /// Malformed bytecode or a VM bug; never visible to `except`.
    Internal(Cow<'static, str>),
    /// An exception the unwinder routes to `except`/`finally` blocks.
    Exc(Box<ExcTriple>),
    /// A blown budget. It still records a traceback, but unwinds straight past
    /// every handler.
    Uncatchable(Box<ExcTriple>),
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    #[must_use]
    pub fn is_exc(&self, exc_type: ExcType) -> bool {
        matches!(self, Self::Exc(triple) if triple.is(exc_type))
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Exc(triple) | Self::Uncatchable(triple) => {
                write!(f, "{}: {}", triple.exc_type.type_display_name(), triple.value.exception_message())
            }
        }
    }
}
