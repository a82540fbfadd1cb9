//! Implementation of the print() builtin function.

use crate::{
    args::{ArgValues, KwargsValues},
    exception_private::{ExcType, RunResult, SimpleException},
    io::PrintWriter,
    value::Value,
};

/// Implementation of the print() builtin function.
///
/// Supports the following keyword arguments:
/// - `sep`: separator between values (default: " ")
/// - `end`: string appended after the last value (default: "\n")
pub(crate) fn builtin_print(args: ArgValues, print: &mut impl PrintWriter) -> RunResult<Value> {
    let ArgValues { args: positional, kwargs } = args;
    let (sep, end) = extract_print_kwargs(kwargs)?;

    let sep = sep.as_deref().unwrap_or(" ");
    let mut line = String::new();
    for (i, value) in positional.iter().enumerate() {
        if i > 0 {
            line.push_str(sep);
        }
        line.push_str(&value.py_str());
    }
    line.push_str(end.as_deref().unwrap_or("\n"));
    print.write_output(&line)?;
    Ok(Value::None)
}

/// Extracts `sep` and `end`; `None` values select the defaults.
fn extract_print_kwargs(kwargs: KwargsValues) -> RunResult<(Option<String>, Option<String>)> {
    let mut sep = None;
    let mut end = None;
    for (key, value) in kwargs {
        let slot = match &*key {
            "sep" => &mut sep,
            "end" => &mut end,
            other => {
                return Err(SimpleException::new_msg(
                    ExcType::TypeError,
                    format!("'{other}' is an invalid keyword argument for print()"),
                )
                .into());
            }
        };
        *slot = match value {
            Value::None => None,
            Value::Str(s) => Some(s.to_string()),
            other => {
                return Err(SimpleException::new_msg(
                    ExcType::TypeError,
                    format!("{key} must be None or a string, not {}", other.py_type_name()),
                )
                .into());
            }
        };
    }
    Ok((sep, end))
}
