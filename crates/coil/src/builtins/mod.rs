//! Builtin functions, types, and exception constructors.
//!
//! Only the builtins the execution model itself relies on are provided. Each
//! non-trivial builtin lives in its own submodule.

mod isinstance;
mod iter;
mod print;
mod type_;

use strum::{Display, EnumIter, IntoStaticStr, IntoEnumIterator};

pub(crate) use iter::{collect_items, get_iter, not_an_iterator};
pub(crate) use type_::call_type;

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, SimpleException},
    io::PrintWriter,
    namespace::Namespace,
    resource::{LARGE_RESULT_THRESHOLD, ResourceTracker},
    types::Type,
    value::Value,
};

/// Enumerates every interpreter-native builtin function.
///
/// All variants serialize to lowercase (e.g., `IsInstance` -> "isinstance").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinFunction {
    Range,
    Len,
    Iter,
    /// Generators are advanced by the VM; this variant handles plain iterators.
    Next,
    IsInstance,
    Print,
    Repr,
}

impl BuiltinFunction {
    /// Calls this builtin with the given arguments.
    ///
    /// # Arguments
    /// * `args` - The arguments to pass to the builtin
    /// * `print` - The writer for print output
    pub(crate) fn call(self, args: ArgValues, print: &mut impl PrintWriter) -> RunResult<Value> {
        match self {
            Self::Range => iter::builtin_range(args),
            Self::Len => builtin_len(args),
            Self::Iter => get_iter(args.get_one_arg("iter")?),
            Self::Next => iter::builtin_next(args),
            Self::IsInstance => {
                let (obj, classinfo) = args.get_two_args("isinstance")?;
                isinstance::isinstance(&obj, &classinfo).map(Value::Bool)
            }
            Self::Print => print::builtin_print(args, print),
            Self::Repr => Ok(Value::from(args.get_one_arg("repr")?.py_repr())),
        }
    }
}

/// Methods of generator objects, bound as `Value::GeneratorMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum GeneratorMethod {
    Send,
    Throw,
    Close,
}

impl GeneratorMethod {
    /// Resolves an attribute name on a generator.
    pub(crate) fn from_attr(name: &str) -> Option<Self> {
        match name {
            "send" => Some(Self::Send),
            "throw" => Some(Self::Throw),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

/// Builds the builtins namespace: functions, constructor types and every
/// builtin exception type, each bound under its own name.
pub(crate) fn builtins_namespace() -> Namespace {
    let functions = BuiltinFunction::iter().map(|b| (<&'static str>::from(b), Value::Builtin(b)));
    let types = Type::CONSTRUCTORS.into_iter().map(|t| (t.as_str(), Value::Type(t)));
    let exceptions = ExcType::iter().map(|e| (<&'static str>::from(e), Value::ExcType(e)));
    functions.chain(types).chain(exceptions).collect()
}

fn builtin_len(args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("len")?;
    let len = match &value {
        Value::Str(s) => s.chars().count(),
        Value::Tuple(items) => items.len(),
        Value::List(items) => items.borrow().len(),
        Value::Dict(dict) => dict.borrow().len(),
        other => {
            return Err(SimpleException::new_msg(
                ExcType::TypeError,
                format!("object of type '{}' has no len()", other.py_type_name()),
            )
            .into());
        }
    };
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

/// Rejects sequence repetition results past the large-result threshold the
/// tracker enforces.
pub(crate) fn check_repeat_size(tracker: &impl ResourceTracker, item_size: usize, count: i64) -> RunResult<()> {
    let count = usize::try_from(count).unwrap_or(0);
    let estimated = item_size.saturating_mul(count);
    if estimated > LARGE_RESULT_THRESHOLD {
        tracker.check_large_result(estimated)?;
    }
    Ok(())
}
