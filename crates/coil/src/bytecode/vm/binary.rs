//! Unary, binary and subscript operators.

use strum::Display;

use super::Vm;
use crate::{
    builtins::{check_repeat_size, collect_items},
    bytecode::Opcode,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// Binary operators, rendered with their source symbol for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(super) enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    TrueDiv,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "|")]
    Or,
    #[strum(serialize = "^")]
    Xor,
}

impl BinaryOp {
    /// Maps a binary or in-place opcode to its operator; the flag is true for in-place forms.
    fn from_opcode(opcode: Opcode) -> Option<(Self, bool)> {
        Some(match opcode {
            Opcode::BinaryAdd => (Self::Add, false),
            Opcode::BinarySubtract => (Self::Sub, false),
            Opcode::BinaryMultiply => (Self::Mul, false),
            Opcode::BinaryTrueDivide => (Self::TrueDiv, false),
            Opcode::BinaryFloorDivide => (Self::FloorDiv, false),
            Opcode::BinaryModulo => (Self::Mod, false),
            Opcode::BinaryPower => (Self::Pow, false),
            Opcode::BinaryLshift => (Self::LShift, false),
            Opcode::BinaryRshift => (Self::RShift, false),
            Opcode::BinaryAnd => (Self::And, false),
            Opcode::BinaryOr => (Self::Or, false),
            Opcode::BinaryXor => (Self::Xor, false),
            Opcode::InplaceAdd => (Self::Add, true),
            Opcode::InplaceSubtract => (Self::Sub, true),
            Opcode::InplaceMultiply => (Self::Mul, true),
            Opcode::InplaceTrueDivide => (Self::TrueDiv, true),
            Opcode::InplaceFloorDivide => (Self::FloorDiv, true),
            Opcode::InplaceModulo => (Self::Mod, true),
            Opcode::InplacePower => (Self::Pow, true),
            Opcode::InplaceLshift => (Self::LShift, true),
            Opcode::InplaceRshift => (Self::RShift, true),
            Opcode::InplaceAnd => (Self::And, true),
            Opcode::InplaceOr => (Self::Or, true),
            Opcode::InplaceXor => (Self::Xor, true),
            _ => return None,
        })
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    pub(super) fn exec_binary(&mut self, opcode: Opcode) -> RunResult<()> {
        let (op, inplace) =
            BinaryOp::from_opcode(opcode).ok_or_else(|| RunError::internal(format!("{opcode} is not a binary operator")))?;
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        // `list += iterable` extends the list in place
        if inplace
            && op == BinaryOp::Add
            && let Value::List(list) = &lhs
        {
            let items = collect_items(&rhs)?;
            list.borrow_mut().extend(items);
            self.push(lhs);
            return Ok(());
        }
        let result = binary_op(op, &lhs, &rhs, &self.tracker)?;
        self.push(result);
        Ok(())
    }

    /// `BINARY_SUBSCR`: `TOS1[TOS]`.
    pub(super) fn exec_binary_subscr(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let container = self.pop()?;
        let value = subscript(&container, &index)?;
        self.push(value);
        Ok(())
    }

    /// `STORE_SUBSCR`: `TOS1[TOS] = TOS2`.
    pub(super) fn exec_store_subscr(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let container = self.pop()?;
        let value = self.pop()?;
        match &container {
            Value::List(list) => {
                let mut list = list.borrow_mut();
                let slot = normalize_index(&index, list.len(), "list assignment")?;
                list[slot] = value;
            }
            Value::Dict(dict) => dict.borrow_mut().insert(index, value)?,
            other => {
                return Err(SimpleException::new_msg(
                    ExcType::TypeError,
                    format!("'{}' object does not support item assignment", other.py_type_name()),
                )
                .into());
            }
        }
        Ok(())
    }

    /// `DELETE_SUBSCR`: `del TOS1[TOS]`.
    pub(super) fn exec_delete_subscr(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let container = self.pop()?;
        match &container {
            Value::List(list) => {
                let mut list = list.borrow_mut();
                let slot = normalize_index(&index, list.len(), "list assignment")?;
                list.remove(slot);
            }
            Value::Dict(dict) => {
                if dict.borrow_mut().remove(&index)?.is_none() {
                    return Err(key_error(index));
                }
            }
            other => {
                return Err(SimpleException::new_msg(
                    ExcType::TypeError,
                    format!("'{}' object does not support item deletion", other.py_type_name()),
                )
                .into());
            }
        }
        Ok(())
    }
}

/// `+x`, `-x`, `not x`, `~x`.
pub(super) fn unary_op(opcode: Opcode, operand: &Value) -> RunResult<Value> {
    let (symbol, result) = match (opcode, operand) {
        (Opcode::UnaryNot, value) => return Ok(Value::Bool(!value.py_bool())),
        (Opcode::UnaryPositive, Value::Float(f)) => ("+", Some(Value::Float(*f))),
        (Opcode::UnaryNegative, Value::Float(f)) => ("-", Some(Value::Float(-f))),
        (Opcode::UnaryPositive, value) => ("+", value.as_int().map(Value::Int)),
        (Opcode::UnaryNegative, value) => match value.as_int() {
            Some(i) => ("-", Some(Value::Int(i.checked_neg().ok_or_else(overflow)?))),
            None => ("-", None),
        },
        (Opcode::UnaryInvert, value) => ("~", value.as_int().map(|i| Value::Int(!i))),
        _ => return Err(RunError::internal(format!("{opcode} is not a unary operator"))),
    };
    result.ok_or_else(|| {
        SimpleException::new_msg(
            ExcType::TypeError,
            format!("bad operand type for unary {symbol}: '{}'", operand.py_type_name()),
        )
        .into()
    })
}

/// Applies a binary operator to two values.
pub(super) fn binary_op(op: BinaryOp, lhs: &Value, rhs: &Value, tracker: &impl ResourceTracker) -> RunResult<Value> {
    if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
        return int_op(op, a, b);
    }
    if let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float())
        && !matches!(op, BinaryOp::LShift | BinaryOp::RShift | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    {
        return float_op(op, a, b);
    }
    let result = match (op, lhs, rhs) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Some(Value::from(format!("{a}{b}"))),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Some(Value::new_list(items))
        }
        (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => Some(Value::new_tuple(a.iter().chain(b.iter()).cloned().collect())),
        (BinaryOp::Mul, seq, count) | (BinaryOp::Mul, count, seq) if count.as_int().is_some() => {
            repeat(seq, count.as_int().unwrap_or_default(), tracker)?
        }
        _ => None,
    };
    result.ok_or_else(|| ExcType::binary_type_error(&op.to_string(), &lhs.py_type_name(), &rhs.py_type_name()))
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> RunResult<Value> {
    let value = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::TrueDiv => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let quotient = a.checked_div(b).ok_or_else(overflow)?;
            if (a % b != 0) && ((a < 0) != (b < 0)) { quotient - 1 } else { quotient }
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            // i64::MIN % -1 is 0; only the quotient overflows
            let rem = a.wrapping_rem(b);
            if rem != 0 && ((rem < 0) != (b < 0)) { rem + b } else { rem }
        }
        BinaryOp::Pow => {
            if b < 0 {
                return float_op(BinaryOp::Pow, a as f64, b as f64);
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinaryOp::LShift => {
            let shift = shift_count(b)?;
            if shift >= 64 || (a << shift) >> shift != a {
                if a == 0 {
                    0
                } else {
                    return Err(overflow());
                }
            } else {
                a << shift
            }
        }
        BinaryOp::RShift => {
            let shift = shift_count(b)?;
            a >> shift.min(63)
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
    };
    Ok(Value::Int(value))
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> RunResult<Value> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let rem = a % b;
            if rem != 0.0 && ((rem < 0.0) != (b < 0.0)) { rem + b } else { rem }
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
        _ => return Err(RunError::internal(format!("float operands for '{op}'"))),
    };
    Ok(Value::Float(value))
}

fn shift_count(b: i64) -> RunResult<u32> {
    if b < 0 {
        return Err(SimpleException::new_msg(ExcType::ValueError, "negative shift count").into());
    }
    Ok(u32::try_from(b).unwrap_or(u32::MAX))
}

/// `seq * n` for strings, lists and tuples; `None` for other operands.
fn repeat(seq: &Value, count: i64, tracker: &impl ResourceTracker) -> RunResult<Option<Value>> {
    let times = usize::try_from(count).unwrap_or(0);
    Ok(Some(match seq {
        Value::Str(s) => {
            check_repeat_size(tracker, s.len(), count)?;
            Value::from(s.repeat(times))
        }
        Value::List(items) => {
            let items = items.borrow();
            check_repeat_size(tracker, items.len() * size_of::<Value>(), count)?;
            Value::new_list(repeat_items(&items, times))
        }
        Value::Tuple(items) => {
            check_repeat_size(tracker, items.len() * size_of::<Value>(), count)?;
            Value::new_tuple(repeat_items(items, times))
        }
        _ => return Ok(None),
    }))
}

fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    out
}

/// `container[index]` for strings, lists, tuples and dicts.
pub(super) fn subscript(container: &Value, index: &Value) -> RunResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            Ok(items[normalize_index(index, items.len(), "list")?].clone())
        }
        Value::Tuple(items) => Ok(items[normalize_index(index, items.len(), "tuple")?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let c = chars[normalize_index(index, chars.len(), "string")?];
            Ok(Value::from(c.to_string()))
        }
        Value::Dict(dict) => dict.borrow().get(index)?.ok_or_else(|| key_error(index.clone())),
        other => Err(SimpleException::new_msg(
            ExcType::TypeError,
            format!("'{}' object is not subscriptable", other.py_type_name()),
        )
        .into()),
    }
}

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: &Value, len: usize, what: &str) -> RunResult<usize> {
    let Some(i) = index.as_int() else {
        return Err(SimpleException::new_msg(
            ExcType::TypeError,
            format!("{what} indices must be integers, not {}", index.py_type_name()),
        )
        .into());
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if i < 0 { i + len_i } else { i };
    usize::try_from(resolved)
        .ok()
        .filter(|&slot| slot < len)
        .ok_or_else(|| SimpleException::new_msg(ExcType::IndexError, format!("{what} index out of range")).into())
}

fn key_error(key: Value) -> RunError {
    SimpleException::new(ExcType::KeyError, vec![key]).into()
}

fn overflow() -> RunError {
    SimpleException::new_msg(ExcType::OverflowError, "integer result out of range").into()
}

fn zero_division(msg: &'static str) -> RunError {
    SimpleException::new_msg(ExcType::ZeroDivisionError, msg).into()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::resource::{LimitedTracker, NoLimitTracker, ResourceLimits};

    fn eval(op: BinaryOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        binary_op(op, &lhs, &rhs, &NoLimitTracker::new())
    }

    #[test]
    fn floor_division_and_modulo_follow_the_divisor_sign() {
        assert_eq!(eval(BinaryOp::FloorDiv, Value::Int(-7), Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(eval(BinaryOp::Mod, Value::Int(-7), Value::Int(2)).unwrap(), Value::Int(1));
        assert_eq!(eval(BinaryOp::Mod, Value::Int(7), Value::Int(-2)).unwrap(), Value::Int(-1));
        assert_eq!(eval(BinaryOp::Mod, Value::Float(-1.0), Value::Float(3.0)).unwrap(), Value::Float(2.0));
    }

    #[test]
    fn min_int_by_minus_one() {
        assert_eq!(eval(BinaryOp::Mod, Value::Int(i64::MIN), Value::Int(-1)).unwrap(), Value::Int(0));
        let err = eval(BinaryOp::FloorDiv, Value::Int(i64::MIN), Value::Int(-1)).unwrap_err();
        assert!(err.is_exc(ExcType::OverflowError));
    }

    #[test]
    fn arithmetic_errors() {
        assert!(eval(BinaryOp::TrueDiv, Value::Int(1), Value::Int(0)).unwrap_err().is_exc(ExcType::ZeroDivisionError));
        assert!(eval(BinaryOp::Add, Value::Int(i64::MAX), Value::Int(1)).unwrap_err().is_exc(ExcType::OverflowError));
        assert!(eval(BinaryOp::RShift, Value::Int(1), Value::Int(-1)).unwrap_err().is_exc(ExcType::ValueError));
        let err = eval(BinaryOp::Sub, Value::from("a"), Value::Int(1)).unwrap_err();
        assert!(err.is_exc(ExcType::TypeError));
    }

    #[test]
    fn mixed_numbers_promote_to_float() {
        assert_eq!(eval(BinaryOp::Add, Value::Int(1), Value::Float(0.5)).unwrap(), Value::Float(1.5));
        assert_eq!(eval(BinaryOp::Pow, Value::Int(2), Value::Int(-1)).unwrap(), Value::Float(0.5));
        assert_eq!(eval(BinaryOp::TrueDiv, Value::Int(7), Value::Int(2)).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn sequences_concatenate_and_repeat() {
        assert_eq!(eval(BinaryOp::Add, Value::from("ab"), Value::from("c")).unwrap(), Value::from("abc"));
        assert_eq!(eval(BinaryOp::Mul, Value::Int(2), Value::from("ab")).unwrap(), Value::from("abab"));
        let tuple = Value::new_tuple(vec![Value::Int(1)]);
        assert_eq!(
            eval(BinaryOp::Mul, tuple, Value::Int(3)).unwrap(),
            Value::new_tuple(vec![Value::Int(1), Value::Int(1), Value::Int(1)])
        );
    }

    #[test]
    fn huge_repetition_is_rejected_by_the_memory_limit() {
        let tracker = LimitedTracker::new(ResourceLimits::new().max_memory(1_000_000));
        let err = binary_op(BinaryOp::Mul, &Value::from("x"), &Value::Int(10_000_000), &tracker).unwrap_err();
        assert!(matches!(err, RunError::Uncatchable(_)));
    }

    #[test]
    fn subscripts_support_negative_indices() {
        let list = Value::new_list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(subscript(&list, &Value::Int(-1)).unwrap(), Value::Int(2));
        assert!(subscript(&list, &Value::Int(2)).unwrap_err().is_exc(ExcType::IndexError));
        assert_eq!(subscript(&Value::from("héllo"), &Value::Int(1)).unwrap(), Value::from("é"));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(unary_op(Opcode::UnaryNegative, &Value::Int(3)).unwrap(), Value::Int(-3));
        assert_eq!(unary_op(Opcode::UnaryInvert, &Value::Int(0)).unwrap(), Value::Int(-1));
        assert_eq!(unary_op(Opcode::UnaryNot, &Value::from("")).unwrap(), Value::Bool(true));
        assert!(unary_op(Opcode::UnaryNegative, &Value::from("a")).unwrap_err().is_exc(ExcType::TypeError));
    }
}
