//! Iteration builtins: `iter()`, `next()` and `range()`, plus the helpers
//! `GET_ITER` and sequence unpacking share with them.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    types::ValueIter,
    value::Value,
};

/// Returns an iterator over `value`.
///
/// Iterators and generators are their own iterators. Tuples, strings and dict
/// keys are snapshotted; lists are walked live.
pub(crate) fn get_iter(value: Value) -> RunResult<Value> {
    let iter = match value {
        Value::Iterator(_) | Value::Generator(_) => return Ok(value),
        Value::Tuple(items) => ValueIter::Sequence { items, index: 0 },
        Value::List(list) => ValueIter::List { list, index: 0 },
        Value::Str(s) => ValueIter::Sequence {
            items: s.chars().map(|c| Value::from(c.to_string())).collect(),
            index: 0,
        },
        Value::Dict(dict) => ValueIter::Sequence {
            items: dict.borrow().keys().cloned().collect(),
            index: 0,
        },
        other => return Err(ExcType::not_iterable(&other.py_type_name())),
    };
    Ok(Value::new_iter(iter))
}

/// Collects the items of a built-in iterable.
///
/// Generators are not handled here; draining one needs the VM.
pub(crate) fn collect_items(value: &Value) -> RunResult<Vec<Value>> {
    match value {
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::List(items) => Ok(items.borrow().clone()),
        other => {
            let Value::Iterator(iter) = get_iter(other.clone())? else {
                return Err(ExcType::not_iterable(&other.py_type_name()));
            };
            let items: Vec<Value> = iter.borrow_mut().by_ref().collect();
            Ok(items)
        }
    }
}

/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
///
/// Returns a lazy iterator rather than a sequence object.
pub(crate) fn builtin_range(args: ArgValues) -> RunResult<Value> {
    args.check_no_kwargs("range")?;
    let ints = args
        .args
        .iter()
        .map(|arg| {
            arg.as_int().ok_or_else(|| {
                SimpleException::new_msg(
                    ExcType::TypeError,
                    format!("'{}' object cannot be interpreted as an integer", arg.py_type_name()),
                )
                .into()
            })
        })
        .collect::<RunResult<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(SimpleException::new_msg(
                ExcType::TypeError,
                format!("range expected at most 3 arguments, got {}", ints.len()),
            )
            .into());
        }
    };
    if step == 0 {
        return Err(SimpleException::new_msg(ExcType::ValueError, "range() arg 3 must not be zero").into());
    }
    Ok(Value::new_iter(ValueIter::range(start, stop, step)))
}

/// `next(iterator[, default])` for built-in iterators.
pub(crate) fn builtin_next(args: ArgValues) -> RunResult<Value> {
    let (iterator, default) = args.get_one_two_args("next")?;
    let Value::Iterator(iter) = &iterator else {
        return Err(not_an_iterator(&iterator));
    };
    let item = iter.borrow_mut().next();
    match (item, default) {
        (Some(item), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ExcType::stop_iteration(Value::None)),
    }
}

pub(crate) fn not_an_iterator(value: &Value) -> RunError {
    SimpleException::new_msg(
        ExcType::TypeError,
        format!("'{}' object is not an iterator", value.py_type_name()),
    )
    .into()
}
