//! Constructors of the built-in types: `int()`, `float()`, `str()`, `bool()`,
//! `tuple()`, `list()`, `dict()` and the one-argument form of `type()`.

use super::iter::collect_items;
use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult, SimpleException},
    types::{Dict, Type},
    value::Value,
};

/// Calls a built-in type as a constructor.
pub(crate) fn call_type(t: Type, args: ArgValues) -> RunResult<Value> {
    let name = t.as_str();
    if t == Type::Dict {
        return dict_new(args);
    }
    let arg = args.get_zero_one_arg(name)?;
    match (t, arg) {
        (Type::Int, None) => Ok(Value::Int(0)),
        (Type::Int, Some(value)) => int_new(&value),
        (Type::Float, None) => Ok(Value::Float(0.0)),
        (Type::Float, Some(value)) => float_new(&value),
        (Type::Str, None) => Ok(Value::from("")),
        (Type::Str, Some(value)) => Ok(Value::from(value.py_str())),
        (Type::Bool, value) => Ok(Value::Bool(value.is_some_and(|v| v.py_bool()))),
        (Type::Tuple, None) => Ok(Value::new_tuple(Vec::new())),
        (Type::Tuple, Some(value @ Value::Tuple(_))) => Ok(value),
        (Type::Tuple, Some(value)) => Ok(Value::new_tuple(collect_items(&value)?)),
        (Type::List, None) => Ok(Value::new_list(Vec::new())),
        (Type::List, Some(value)) => Ok(Value::new_list(collect_items(&value)?)),
        (Type::Type, Some(value)) => Ok(value.type_value()),
        (Type::Type, None) => Err(ExcType::type_error_arg_count("type", 1, 0)),
        (other, _) => Err(SimpleException::new_msg(
            ExcType::TypeError,
            format!("cannot create '{other}' instances"),
        )
        .into()),
    }
}

#[expect(clippy::cast_possible_truncation, reason = "checked against the i64 range first")]
fn int_new(value: &Value) -> RunResult<Value> {
    match value {
        Value::Int(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) if f.is_nan() => Err(SimpleException::new_msg(
            ExcType::ValueError,
            "cannot convert float NaN to integer",
        )
        .into()),
        Value::Float(f) if f.is_infinite() || f.trunc() >= 9.223_372_036_854_776e18 || f.trunc() < -9.223_372_036_854_776e18 => {
            Err(SimpleException::new_msg(ExcType::OverflowError, "cannot convert float to integer").into())
        }
        Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
        Value::Str(s) => s.trim().replace('_', "").parse::<i64>().map(Value::Int).map_err(|_| {
            SimpleException::new_msg(
                ExcType::ValueError,
                format!("invalid literal for int() with base 10: {}", value.py_repr()),
            )
            .into()
        }),
        other => Err(SimpleException::new_msg(
            ExcType::TypeError,
            format!(
                "int() argument must be a string or a number, not '{}'",
                other.py_type_name()
            ),
        )
        .into()),
    }
}

fn float_new(value: &Value) -> RunResult<Value> {
    if let Some(f) = value.as_float() {
        return Ok(Value::Float(f));
    }
    match value {
        Value::Str(s) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.trim_start_matches(['+', '-']) {
                "inf" | "infinity" | "nan" => text.replace("infinity", "inf").parse::<f64>(),
                _ => text.parse::<f64>(),
            };
            parsed.map(Value::Float).map_err(|_| {
                SimpleException::new_msg(
                    ExcType::ValueError,
                    format!("could not convert string to float: {}", value.py_repr()),
                )
                .into()
            })
        }
        other => Err(SimpleException::new_msg(
            ExcType::TypeError,
            format!(
                "float() argument must be a string or a number, not '{}'",
                other.py_type_name()
            ),
        )
        .into()),
    }
}

/// `dict()`, `dict(mapping)`, `dict(pairs)` and keyword entries on top.
fn dict_new(args: ArgValues) -> RunResult<Value> {
    let ArgValues { args: positional, kwargs } = args;
    if positional.len() > 1 {
        return Err(SimpleException::new_msg(
            ExcType::TypeError,
            format!("dict expected at most 1 argument, got {}", positional.len()),
        )
        .into());
    }
    let mut dict = Dict::new();
    if let Some(source) = positional.into_iter().next() {
        if let Value::Dict(other) = &source {
            for (key, value) in other.borrow().items() {
                dict.insert(key.clone(), value.clone())?;
            }
        } else {
            for (i, item) in collect_items(&source)?.into_iter().enumerate() {
                let pair = collect_items(&item)?;
                let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
                    SimpleException::new_msg(
                        ExcType::ValueError,
                        format!(
                            "dictionary update sequence element #{i} has length {}; 2 is required",
                            pair.len()
                        ),
                    )
                })?;
                dict.insert(key, value)?;
            }
        }
    }
    for (key, value) in kwargs {
        dict.insert(Value::Str(key), value)?;
    }
    Ok(Value::new_dict(dict))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn call(t: Type, args: Vec<Value>) -> RunResult<Value> {
        call_type(t, ArgValues::positional(args))
    }

    #[test]
    fn numeric_conversions() {
        assert_eq!(call(Type::Int, vec![Value::from(" 42 ")]).unwrap(), Value::Int(42));
        assert_eq!(call(Type::Int, vec![Value::Float(-2.7)]).unwrap(), Value::Int(-2));
        assert!(call(Type::Int, vec![Value::from("x")]).unwrap_err().is_exc(ExcType::ValueError));
        assert_eq!(call(Type::Float, vec![Value::from("2.5")]).unwrap(), Value::Float(2.5));
        assert_eq!(call(Type::Str, vec![Value::Float(1.0)]).unwrap(), Value::from("1.0"));
    }

    #[test]
    fn containers_from_iterables() {
        let list = call(Type::List, vec![Value::from("ab")]).unwrap();
        assert_eq!(list, Value::new_list(vec![Value::from("a"), Value::from("b")]));
        let pairs = Value::new_list(vec![Value::new_tuple(vec![Value::from("k"), Value::Int(1)])]);
        let dict = call(Type::Dict, vec![pairs]).unwrap();
        assert_eq!(dict.py_repr(), "{'k': 1}");
    }

    #[test]
    fn type_of_value() {
        assert_eq!(call(Type::Type, vec![Value::Int(1)]).unwrap(), Value::Type(Type::Int));
    }
}
