//! Implementation of the isinstance() builtin function.

use crate::{
    exception_private::{ExcType, RunResult, SimpleException},
    types::Type,
    value::Value,
};

/// Checks if `obj` is an instance of a class, type, or tuple of those.
///
/// Supports:
/// - Built-in types: `isinstance(x, int)`; `bool` values count as `int`
/// - Exception types: `isinstance(err, LookupError)` walks the builtin hierarchy
/// - User classes: `isinstance(dog, Animal)` when `Dog` derives from `Animal`
/// - Nested tuples: `isinstance(x, (int, (str, float)))`
pub(crate) fn isinstance(obj: &Value, classinfo: &Value) -> RunResult<bool> {
    match classinfo {
        Value::Tuple(options) => {
            for option in options.iter() {
                if isinstance(obj, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Type(t) => Ok(match obj.py_type() {
            Some(Type::Bool) => matches!(t, Type::Bool | Type::Int),
            Some(obj_type) => obj_type == *t,
            None => false,
        }),
        Value::ExcType(exc_type) => Ok(obj.type_value().exc_type_base().is_some_and(|base| base.is_subclass_of(*exc_type))),
        Value::Class(class) => Ok(match obj {
            Value::Instance(instance) => instance.class.is_subclass_of(class),
            _ => false,
        }),
        _ => Err(SimpleException::new_msg(
            ExcType::TypeError,
            "isinstance() arg 2 must be a type or tuple of types",
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::types::{Class, Instance};

    #[test]
    fn builtin_types_and_tuples() {
        assert!(isinstance(&Value::Bool(true), &Value::Type(Type::Int)).unwrap());
        assert!(!isinstance(&Value::Int(1), &Value::Type(Type::Bool)).unwrap());
        let options = Value::new_tuple(vec![Value::Type(Type::Str), Value::Type(Type::Float)]);
        assert!(isinstance(&Value::Float(1.5), &options).unwrap());
        assert!(isinstance(&Value::Int(1), &Value::Int(2)).is_err());
    }

    #[test]
    fn exception_subclasses_match_builtin_bases() {
        let class = Rc::new(Class::new("AppError".into(), vec![Value::ExcType(ExcType::KeyError)], []));
        let err = Value::Instance(Rc::new(Instance::new(class.clone())));
        assert!(isinstance(&err, &Value::ExcType(ExcType::LookupError)).unwrap());
        assert!(isinstance(&err, &Value::Class(class)).unwrap());
        assert!(!isinstance(&err, &Value::ExcType(ExcType::TypeError)).unwrap());
    }
}
