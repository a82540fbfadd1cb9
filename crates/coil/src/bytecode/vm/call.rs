//! Callable invocation: argument binding, functions, methods, classes and the
//! definition opcodes `MAKE_FUNCTION`, `MAKE_CLOSURE` and `BUILD_CLASS`.

use std::rc::Rc;

use super::{
    ClassBodyInfo, Frame, Vm, check_init_result,
    generator::{Resume, ResumeMode, Resumed, Resolved},
    new_instance,
};
use crate::{
    args::{ArgValues, KwargsValues},
    builtins::{BuiltinFunction, call_type},
    bytecode::{Code, CodeFlags},
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    io::PrintWriter,
    namespace::Namespace,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Cell, Class, Dict, Function, Generator, Method, Type},
    value::Value,
};

/// Result of a call operation.
#[derive(Debug)]
pub(super) enum CallResult {
    /// The call completed; push the value.
    Push(Value),
    /// A frame was pushed; its result arrives when it returns.
    FramePushed,
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    /// `CALL_FUNCTION`: low byte is the positional count, high byte the number
    /// of keyword (name, value) pairs pushed after the positionals.
    pub(super) fn exec_call_function(&mut self, arg: u16) -> RunResult<CallResult> {
        let [positional, keyword] = arg.to_le_bytes();
        let frame = self.current_frame_mut();
        let keyword_items = frame.popn(usize::from(keyword) * 2)?;
        let args = frame.popn(usize::from(positional))?;
        let callable = frame.pop()?;

        let mut kwargs = KwargsValues::default();
        let mut keyword_items = keyword_items.into_iter();
        while let (Some(key), Some(value)) = (keyword_items.next(), keyword_items.next()) {
            let Value::Str(key) = key else {
                return Err(RunError::internal("keyword argument name is not a string"));
            };
            if kwargs.contains_key(&key) {
                return Err(ExcType::type_error_multiple_values(&callable_name(&callable), &key));
            }
            kwargs.insert(key, value);
        }
        self.call_value(callable, ArgValues::new(args, kwargs))
    }

    /// Calls any callable value.
    pub(super) fn call_value(&mut self, callable: Value, args: ArgValues) -> RunResult<CallResult> {
        match callable {
            Value::Function(function) => self.call_function(&function, args),
            Value::Method(method) => self.call_method(&method, args),
            Value::Builtin(builtin) => self.call_builtin(builtin, args),
            Value::HostFunction(function) => {
                args.check_no_kwargs(&function.name)?;
                let value = function.call(&args.args)?;
                Ok(CallResult::Push(value))
            }
            Value::Type(t) => self.construct_type(t, args).map(CallResult::Push),
            Value::ExcType(exc_type) => {
                args.check_no_kwargs(exc_type.into())?;
                let exc = SimpleException::new(exc_type, args.args.into_vec());
                Ok(CallResult::Push(Value::Exception(Rc::new(exc))))
            }
            Value::Class(class) => self.call_class(&class, args),
            Value::GeneratorMethod(generator, method) => self.call_generator_method(&generator, method, args),
            other => Err(ExcType::not_callable(&other.py_type_name())),
        }
    }

    /// Binds arguments and pushes a frame for a user function.
    ///
    /// Generator functions get their frame wrapped in a generator object instead.
    pub(super) fn call_function(&mut self, function: &Rc<Function>, args: ArgValues) -> RunResult<CallResult> {
        let locals = bind_arguments(function, args)?;
        let code = function.code.clone();
        let cells = frame_cells(&code, &locals, &function.closure)?;
        let frame = Frame::new(code, function.globals.clone(), locals, self.builtins.clone(), cells);
        if frame.code.is_generator() {
            let generator = Generator::new(frame);
            return Ok(CallResult::Push(Value::Generator(Rc::new(generator))));
        }
        self.push_frame(frame)?;
        Ok(CallResult::FramePushed)
    }

    fn call_method(&mut self, method: &Method, mut args: ArgValues) -> RunResult<CallResult> {
        match &method.receiver {
            Some(receiver) => {
                check_receiver(method, Some(receiver))?;
                args.prepend(receiver.clone());
            }
            None => check_receiver(method, args.args.first())?,
        }
        self.call_function(&method.function, args)
    }

    fn call_builtin(&mut self, builtin: BuiltinFunction, args: ArgValues) -> RunResult<CallResult> {
        let generator = match (builtin, args.args.first()) {
            (BuiltinFunction::Next, Some(Value::Generator(generator))) => generator.clone(),
            _ => return builtin.call(args, &mut self.print).map(CallResult::Push),
        };
        let (_, default) = args.get_one_two_args("next")?;
        match self.resume_generator(&generator, Resume::Send(Value::None), ResumeMode::Next { default })? {
            Resumed::Frame => Ok(CallResult::FramePushed),
            Resumed::Now(Resolved::Value(value)) => Ok(CallResult::Push(value)),
            Resumed::Now(_) => Err(RunError::internal("next() resolved to a loop exit")),
        }
    }

    /// Calls a built-in type; `list(gen)` and `tuple(gen)` drain generators here.
    fn construct_type(&mut self, t: Type, args: ArgValues) -> RunResult<Value> {
        let generator = match args.args.as_slice() {
            [Value::Generator(generator)] if matches!(t, Type::List | Type::Tuple) && args.kwargs.is_empty() => {
                Some(generator.clone())
            }
            _ => None,
        };
        if let Some(generator) = generator {
            let items = self.drain_generator(&generator)?;
            return Ok(if t == Type::List {
                Value::new_list(items)
            } else {
                Value::new_tuple(items)
            });
        }
        call_type(t, args)
    }

    /// Instantiates a user class and runs `__init__`.
    fn call_class(&mut self, class: &Rc<Class>, args: ArgValues) -> RunResult<CallResult> {
        let instance = new_instance(class, &args);
        let receiver = Value::Instance(instance.clone());
        match class.lookup("__init__") {
            Some((Value::Function(init), owner)) => {
                let method = init.descriptor_get(Some(&receiver), &owner);
                match self.call_value(method, args)? {
                    CallResult::FramePushed => {
                        self.current_frame_mut().init_instance = Some(instance);
                        Ok(CallResult::FramePushed)
                    }
                    // generator __init__
                    CallResult::Push(value) => {
                        check_init_result(&value)?;
                        Ok(CallResult::Push(receiver))
                    }
                }
            }
            Some((init, _)) => {
                let mut args = args;
                args.prepend(receiver.clone());
                let value = self.call_sync(init, args)?;
                check_init_result(&value)?;
                Ok(CallResult::Push(receiver))
            }
            None if class.is_exception_class() => {
                args.check_no_kwargs(&class.name)?;
                Ok(CallResult::Push(receiver))
            }
            None if args.is_empty() => Ok(CallResult::Push(receiver)),
            None => Err(SimpleException::new_msg(
                ExcType::TypeError,
                format!("{}() takes no arguments", class.name),
            )
            .into()),
        }
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// `MAKE_FUNCTION n` / `MAKE_CLOSURE n`.
    ///
    /// Stack, top first: qualified name, code, closure tuple (closures only),
    /// then `n` defaults in parameter order.
    pub(super) fn exec_make_function(&mut self, defaults_count: usize, with_closure: bool) -> RunResult<()> {
        let frame = self.frames.last_mut().expect("no active frame");
        let name = frame.pop()?;
        let code = frame.pop()?;
        let closure = if with_closure { Some(frame.pop()?) } else { None };
        let defaults = frame.popn(defaults_count)?;

        let Value::Str(name) = name else {
            return Err(RunError::internal("function name is not a string"));
        };
        let Value::Code(code) = code else {
            return Err(RunError::internal("MAKE_FUNCTION without a code object"));
        };
        let closure = match closure {
            None => Vec::new(),
            Some(Value::Tuple(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Cell(cell) => Ok(cell.clone()),
                    _ => Err(RunError::internal("closure tuple holds a non-cell")),
                })
                .collect::<RunResult<Vec<Cell>>>()?,
            Some(_) => return Err(RunError::internal("closure is not a tuple")),
        };

        self.tracer.on_make_function(closure.len(), defaults.len());
        let function = Function::new(name, code, frame.globals.clone(), defaults, closure);
        frame.push(Value::Function(Rc::new(function)));
        Ok(())
    }

    /// `BUILD_CLASS n`: stack holds the body function, the class name and `n` bases.
    ///
    /// Pushes a frame running the body with a fresh namespace; the class is
    /// created from that namespace when the body returns.
    pub(super) fn exec_build_class(&mut self, base_count: usize) -> RunResult<()> {
        let frame = self.current_frame_mut();
        let bases = frame.popn(base_count)?;
        let name = frame.pop()?;
        let body = frame.pop()?;

        let Value::Str(name) = name else {
            return Err(RunError::internal("class name is not a string"));
        };
        let Value::Function(body) = body else {
            return Err(RunError::internal("class body is not a function"));
        };
        if let Some(base) = bases.iter().find(|base| !matches!(base, Value::Class(_) | Value::ExcType(_))) {
            return Err(SimpleException::new_msg(
                ExcType::TypeError,
                format!("bases must be classes, not '{}'", base.py_type_name()),
            )
            .into());
        }

        let locals = Namespace::new();
        let cells = frame_cells(&body.code, &locals, &body.closure)?;
        let mut frame = Frame::new(body.code.clone(), body.globals.clone(), locals, self.builtins.clone(), cells);
        frame.class_body = Some(ClassBodyInfo { name, bases });
        self.push_frame(frame)
    }
}

/// Builds a frame's cells: cellvars pre-filled from bound locals, then the
/// closure's cells for the freevars.
pub(super) fn frame_cells(code: &Code, locals: &Namespace, closure: &[Cell]) -> RunResult<Vec<Cell>> {
    if closure.len() != code.freevars.len() {
        return Err(RunError::internal(format!(
            "{} expects {} closure cells, got {}",
            code.name,
            code.freevars.len(),
            closure.len()
        )));
    }
    let mut cells: Vec<Cell> = code.cellvars.iter().map(|name| Cell::new(locals.get(name))).collect();
    cells.extend(closure.iter().cloned());
    Ok(cells)
}

/// Binds call arguments to a function's parameters.
///
/// Positionals fill parameters left to right, extras go to `*args`; keywords
/// fill named parameters, extras go to `**kwargs`; trailing defaults fill
/// whatever is left.
fn bind_arguments(function: &Function, args: ArgValues) -> RunResult<Namespace> {
    let code = &function.code;
    let name = &*function.name;
    let argcount = code.argcount();
    let params = code
        .varnames
        .get(..argcount)
        .ok_or_else(|| RunError::internal(format!("{name} has fewer varnames than parameters")))?;
    let has_varargs = code.flags.contains(CodeFlags::VARARGS);
    let has_varkeywords = code.flags.contains(CodeFlags::VARKEYWORDS);

    let ArgValues { args: positional, kwargs } = args;
    let mut slots: Vec<Option<Value>> = vec![None; argcount];
    let mut positional = positional.into_iter();
    for (slot, value) in slots.iter_mut().zip(positional.by_ref()) {
        *slot = Some(value);
    }
    let extra: Vec<Value> = positional.collect();
    if !extra.is_empty() && !has_varargs {
        return Err(ExcType::type_error_too_many_positional(
            name,
            argcount,
            argcount + extra.len(),
        ));
    }

    let mut extra_kwargs = Dict::new();
    for (key, value) in kwargs {
        match params.iter().position(|param| *param == key) {
            Some(index) if slots[index].is_some() => {
                return Err(ExcType::type_error_multiple_values(name, &key));
            }
            Some(index) => slots[index] = Some(value),
            None if has_varkeywords => extra_kwargs.insert(Value::Str(key), value)?,
            None => return Err(ExcType::type_error_unexpected_keyword(name, &key)),
        }
    }

    let first_default = argcount.saturating_sub(function.defaults.len());
    for (slot, default) in slots[first_default..].iter_mut().zip(&function.defaults) {
        if slot.is_none() {
            *slot = Some(default.clone());
        }
    }
    let missing: Vec<&str> = params
        .iter()
        .zip(&slots)
        .filter(|(_, slot)| slot.is_none())
        .map(|(param, _)| &**param)
        .collect();
    if !missing.is_empty() {
        return Err(ExcType::type_error_missing_positional(name, &missing));
    }

    let locals = Namespace::new();
    for (param, value) in params.iter().zip(slots) {
        if let Some(value) = value {
            locals.set(param.clone(), value);
        }
    }
    let mut next_slot = argcount;
    if has_varargs {
        locals.set(varname(code, next_slot)?, Value::new_tuple(extra));
        next_slot += 1;
    }
    if has_varkeywords {
        locals.set(varname(code, next_slot)?, Value::new_dict(extra_kwargs));
    }
    Ok(locals)
}

fn varname(code: &Code, index: usize) -> RunResult<Rc<str>> {
    code.varnames
        .get(index)
        .cloned()
        .ok_or_else(|| RunError::internal(format!("{} is missing a varargs slot", code.name)))
}

/// Checks the receiver of a method call: bound receivers and the explicit
/// first argument of an unbound method must be instances of the defining class.
fn check_receiver(method: &Method, receiver: Option<&Value>) -> RunResult<()> {
    if let Some(Value::Instance(instance)) = receiver
        && instance.class.is_subclass_of(&method.class)
    {
        return Ok(());
    }
    let got = match receiver {
        Some(Value::Instance(instance)) => format!("{} instance", instance.class.name),
        Some(other) => format!("{} instance", other.py_type_name()),
        None => "nothing".to_owned(),
    };
    Err(SimpleException::new_msg(
        ExcType::TypeError,
        format!(
            "unbound method {}() must be called with {} instance as first argument (got {got} instead)",
            method.function.name, method.class.name
        ),
    )
    .into())
}

/// Name used in call-site error messages.
fn callable_name(callable: &Value) -> String {
    match callable {
        Value::Function(function) => function.name.to_string(),
        Value::Method(method) => method.function.name.to_string(),
        Value::Builtin(builtin) => builtin.to_string(),
        Value::Class(class) => class.name.to_string(),
        other => other.py_type_name(),
    }
}
