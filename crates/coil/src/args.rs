use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    exception_private::{ExcType, RunResult, SimpleException},
    value::Value,
};

/// Keyword arguments in call-site order.
pub(crate) type KwargsValues = IndexMap<Rc<str>, Value, ahash::RandomState>;

/// Positional and keyword arguments of one call.
///
/// Most calls pass a handful of positionals, so they are kept inline.
#[derive(Debug, Default)]
pub(crate) struct ArgValues {
    pub args: SmallVec<[Value; 4]>,
    pub kwargs: KwargsValues,
}

impl ArgValues {
    pub fn new(args: impl IntoIterator<Item = Value>, kwargs: KwargsValues) -> Self {
        Self {
            args: args.into_iter().collect(),
            kwargs,
        }
    }

    /// Positional-only arguments.
    pub fn positional(args: impl IntoIterator<Item = Value>) -> Self {
        Self::new(args, KwargsValues::default())
    }

    /// Inserts a receiver in front of the positionals.
    pub fn prepend(&mut self, value: Value) {
        self.args.insert(0, value);
    }

    pub fn len(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with a TypeError if any keyword arguments were passed.
    pub fn check_no_kwargs(&self, name: &str) -> RunResult<()> {
        if self.kwargs.is_empty() {
            Ok(())
        } else {
            Err(ExcType::type_error_no_kwargs(name))
        }
    }

    /// Checks that zero arguments were passed.
    pub fn check_zero_args(&self, name: &str) -> RunResult<()> {
        self.check_no_kwargs(name)?;
        if self.args.is_empty() {
            Ok(())
        } else {
            Err(SimpleException::new_msg(
                ExcType::TypeError,
                format!("{name}() takes no arguments ({} given)", self.args.len()),
            )
            .into())
        }
    }

    /// Extracts exactly one positional argument.
    pub fn get_one_arg(self, name: &str) -> RunResult<Value> {
        self.check_no_kwargs(name)?;
        let count = self.args.len();
        let mut args = self.args.into_iter();
        match (args.next(), args.next()) {
            (Some(value), None) => Ok(value),
            _ => Err(ExcType::type_error_arg_count(name, 1, count)),
        }
    }

    /// Extracts exactly two positional arguments.
    pub fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        self.check_no_kwargs(name)?;
        let count = self.args.len();
        let mut args = self.args.into_iter();
        match (args.next(), args.next(), args.next()) {
            (Some(a), Some(b), None) => Ok((a, b)),
            _ => Err(ExcType::type_error_arg_count(name, 2, count)),
        }
    }

    /// Extracts one required and one optional positional argument.
    pub fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        self.check_no_kwargs(name)?;
        let count = self.args.len();
        let mut args = self.args.into_iter();
        match (args.next(), args.next(), args.next()) {
            (Some(a), b, None) => Ok((a, b)),
            _ => Err(SimpleException::new_msg(
                ExcType::TypeError,
                format!("{name} expected 1 or 2 arguments, got {count}"),
            )
            .into()),
        }
    }

    /// Extracts at most one positional argument.
    pub fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        self.check_no_kwargs(name)?;
        let count = self.args.len();
        let mut args = self.args.into_iter();
        match (args.next(), args.next()) {
            (first, None) => Ok(first),
            _ => Err(SimpleException::new_msg(
                ExcType::TypeError,
                format!("{name} expected at most 1 argument, got {count}"),
            )
            .into()),
        }
    }
}
