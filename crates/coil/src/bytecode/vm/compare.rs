//! `COMPARE_OP`: rich comparisons, membership, identity and exception matching.

use std::cmp::Ordering;

use super::{Vm, exceptions::exception_matches};
use crate::{
    builtins::collect_items,
    bytecode::CompareOp,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    pub(super) fn exec_compare(&mut self, arg: u16) -> RunResult<()> {
        let op = u8::try_from(arg)
            .ok()
            .and_then(CompareOp::from_repr)
            .ok_or_else(|| RunError::internal(format!("invalid comparison {arg}")))?;
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = compare(op, &lhs, &rhs)?;
        self.push(Value::Bool(result));
        Ok(())
    }
}

/// Evaluates `lhs <op> rhs`.
pub(super) fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<bool> {
    Ok(match op {
        CompareOp::Eq => lhs.py_eq(rhs),
        CompareOp::Ne => !lhs.py_eq(rhs),
        CompareOp::Is => lhs.is(rhs),
        CompareOp::IsNot => !lhs.is(rhs),
        CompareOp::In => contains(rhs, lhs)?,
        CompareOp::NotIn => !contains(rhs, lhs)?,
        CompareOp::ExceptionMatch => exception_matches(lhs, rhs),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = py_cmp(lhs, rhs).ok_or_else(|| {
                ExcType::compare_type_error(&op.to_string(), &lhs.py_type_name(), &rhs.py_type_name())
            })?;
            // `None` inside means unordered floats (NaN): every ordering test is false
            match (op, ordering) {
                (_, None) => false,
                (CompareOp::Lt, Some(ord)) => ord == Ordering::Less,
                (CompareOp::Le, Some(ord)) => ord != Ordering::Greater,
                (CompareOp::Gt, Some(ord)) => ord == Ordering::Greater,
                (_, Some(ord)) => ord != Ordering::Less,
            }
        }
    })
}

/// Orders two values; the outer `None` means the types are not orderable.
fn py_cmp(lhs: &Value, rhs: &Value) -> Option<Option<Ordering>> {
    if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
        return Some(Some(a.cmp(&b)));
    }
    if let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) {
        return Some(a.partial_cmp(&b));
    }
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(Some(a.cmp(b))),
        (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b),
        (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
        _ => None,
    }
}

/// Lexicographic ordering decided by the first unequal pair.
fn seq_cmp(a: &[Value], b: &[Value]) -> Option<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return py_cmp(x, y);
        }
    }
    Some(Some(a.len().cmp(&b.len())))
}

/// `item in container`.
fn contains(container: &Value, item: &Value) -> RunResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(SimpleException::new_msg(
                ExcType::TypeError,
                format!("'in <string>' requires string as left operand, not {}", other.py_type_name()),
            )
            .into()),
        },
        Value::Tuple(items) => Ok(items.iter().any(|x| x.py_eq(item))),
        Value::List(items) => Ok(items.borrow().iter().any(|x| x.py_eq(item))),
        Value::Dict(dict) => dict.borrow().contains(item),
        other => Ok(collect_items(other)?.iter().any(|x| x.py_eq(item))),
    }
}
