//! Attribute access (`LOAD_ATTR`, `STORE_ATTR`, `DELETE_ATTR`) and imports.

use std::rc::Rc;

use super::Vm;
use crate::{
    builtins::GeneratorMethod,
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// Looks up `obj.name`.
///
/// Instances check their own attributes first, then their class; functions
/// found on a class become methods, bound when looked up through an instance.
pub(super) fn load_attr(obj: &Value, name: &str) -> RunResult<Value> {
    let found = match obj {
        Value::Instance(instance) => instance.get_own(name).or_else(|| {
            instance.class.lookup(name).map(|(value, owner)| match value {
                Value::Function(function) => function.descriptor_get(Some(obj), &owner),
                other => other,
            })
        }),
        Value::Class(class) => match name {
            "__name__" => Some(Value::Str(class.name.clone())),
            _ => class.lookup(name).map(|(value, owner)| match value {
                Value::Function(function) => function.descriptor_get(None, &owner),
                other => other,
            }),
        },
        Value::Generator(generator) => match name {
            "__name__" => Some(Value::Str(generator.name.clone())),
            _ => GeneratorMethod::from_attr(name).map(|method| Value::GeneratorMethod(generator.clone(), method)),
        },
        Value::Exception(exc) => match name {
            "args" => Some(Value::new_tuple(exc.args().to_vec())),
            "__cause__" => Some(exc.cause().unwrap_or(Value::None)),
            _ => None,
        },
        Value::Module(module) => match name {
            "__name__" => Some(Value::Str(module.name.clone())),
            _ => module.namespace.get(name),
        },
        Value::Function(function) if name == "__name__" => Some(Value::Str(function.name.clone())),
        _ => None,
    };
    found.ok_or_else(|| ExcType::attribute_error(obj.py_type_name(), name))
}

/// Sets `obj.name = value` on an instance or a class.
pub(super) fn store_attr(obj: &Value, name: Rc<str>, value: Value) -> RunResult<()> {
    match obj {
        Value::Instance(instance) => instance.set_attr(name, value),
        Value::Class(class) => class.set_attr(name, value),
        Value::Module(module) => module.namespace.set(name, value),
        other => {
            return Err(SimpleException::new_msg(
                ExcType::AttributeError,
                format!("'{}' object attribute '{name}' is read-only", other.py_type_name()),
            )
            .into());
        }
    }
    Ok(())
}

/// Deletes `obj.name` from an instance or a class.
pub(super) fn delete_attr(obj: &Value, name: &str) -> RunResult<()> {
    let removed = match obj {
        Value::Instance(instance) => instance.remove_attr(name),
        Value::Class(class) => class.remove_attr(name),
        Value::Module(module) => module.namespace.remove(name),
        _ => None,
    };
    match removed {
        Some(_) => Ok(()),
        None => Err(ExcType::attribute_error(obj.py_type_name(), name)),
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    /// `IMPORT_NAME namei`: pops the fromlist and level, asks the import hook
    /// for the module and pushes it.
    pub(super) fn exec_import_name(&mut self, index: usize) -> RunResult<()> {
        let frame = self.current_frame_mut();
        let name = frame.name(index)?;
        let _fromlist = frame.pop()?;
        let _level = frame.pop()?;
        let module = match self.import_hook.as_mut() {
            Some(hook) => hook.import(&name).map_err(RunError::from)?,
            None => {
                return Err(SimpleException::new_msg(ExcType::ImportError, format!("No module named '{name}'")).into());
            }
        };
        self.push(module);
        Ok(())
    }

    /// `IMPORT_FROM namei`: pushes `TOS.name`, leaving the module on the stack.
    pub(super) fn exec_import_from(&mut self, index: usize) -> RunResult<()> {
        let frame = self.current_frame();
        let name = frame.name(index)?;
        let module = frame.peek(0)?;
        let value = load_attr(module, &name).map_err(|err| {
            if err.is_exc(ExcType::AttributeError) {
                SimpleException::new_msg(ExcType::ImportError, format!("cannot import name '{name}'")).into()
            } else {
                err
            }
        })?;
        self.push(value);
        Ok(())
    }
}
