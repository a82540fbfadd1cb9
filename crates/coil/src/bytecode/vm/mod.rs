//! Bytecode VM for executing compiled code units.
//!
//! The VM keeps an explicit stack of [`Frame`]s. Calls, class bodies and
//! generator resumptions push a frame instead of recursing on the host stack;
//! returns, exceptions and yields come back from the dispatch loop as why-codes
//! which the unwinder resolves against the frame's block stack.
//!
//! Module organization:
//! - `frame`: activation records and block-stack bookkeeping
//! - `unwind`: why-codes and block-stack unwinding
//! - `call`: argument binding, function/method/class calls, `MAKE_FUNCTION`
//! - `generator`: resumption protocol for send/throw/close and iteration
//! - `exceptions`: `RAISE_VARARGS`, `END_FINALLY`, `POP_EXCEPT`, with-statements
//! - `attr`: attribute access and imports
//! - `binary`, `compare`, `collections`: operator and container opcodes

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;
mod frame;
mod generator;
mod unwind;

use std::rc::Rc;

use call::{CallResult, frame_cells};
pub use frame::{Block, BlockKind, Frame};
pub use generator::GeneratorIter;
use generator::{Resolved, ResumeLink, ResumeMode};
use unwind::{FrameExit, Why};
pub use unwind::WhyMarker;

use super::{Code, Opcode};
use crate::{
    args::{ArgValues, KwargsValues},
    builtins::{builtins_namespace, get_iter},
    exception_private::{ExcTriple, ExcType, RunError, RunResult, SimpleException},
    exception_public::Exception,
    io::{PrintWriter, StdPrint},
    namespace::Namespace,
    resource::ResourceTracker,
    tracer::{NoopTracer, VmTracer},
    types::{Cell, Class, Instance},
    value::Value,
};

/// Resolves module names for `IMPORT_NAME`.
///
/// The VM has no module system of its own; the host decides what a module is.
/// Closures of the matching signature implement this trait.
pub trait ImportHook {
    /// Returns the module value for `name`, or an exception (usually ImportError).
    fn import(&mut self, name: &str) -> Result<Value, Exception>;
}

impl<F: FnMut(&str) -> Result<Value, Exception>> ImportHook for F {
    fn import(&mut self, name: &str) -> Result<Value, Exception> {
        self(name)
    }
}

/// Information carried by a class-body frame.
///
/// When the frame returns, its locals become the attributes of a new class.
#[derive(Debug)]
pub(crate) struct ClassBodyInfo {
    pub name: Rc<str>,
    pub bases: Vec<Value>,
}

/// What happens with a frame's result when it exits.
#[derive(Debug, Default)]
pub(crate) enum ReturnAction {
    /// Push the result onto the frame beneath, or hand it to the host when the
    /// frame beneath belongs to an outer caller.
    #[default]
    Deliver,
    /// The frame belongs to a resumed generator.
    Resume(ResumeLink),
}

/// How [`Vm::run_until`] finished.
#[derive(Debug)]
enum Completion {
    Value(Value),
    /// A generator advanced with [`ResumeMode::Advance`] finished.
    Exhausted,
}

/// Handles the result of a call operation that returns `CallResult`.
///
/// `Push` puts the value on the caller's stack; `FramePushed` needs nothing
/// because the dispatch loop continues in the new frame.
macro_rules! handle_call_result {
    ($self:expr, $result:expr) => {
        match $result? {
            CallResult::Push(value) => $self.push(value),
            CallResult::FramePushed => {}
        }
    };
}

/// The virtual machine.
///
/// Generic over the resource tracker, the writer receiving `print()` output and
/// the tracer observing execution, so hosts only pay for the hooks they use.
pub struct Vm<T: ResourceTracker, P: PrintWriter = StdPrint, Tr: VmTracer = NoopTracer> {
    frames: Vec<Frame>,
    builtins: Namespace,
    tracker: T,
    print: P,
    tracer: Tr,
    import_hook: Option<Box<dyn ImportHook>>,
    /// A why-code raised into the top frame from outside its own instructions:
    /// an exception propagating out of a callee, or `throw()` into a generator.
    pending: Option<Why>,
}

impl<T: ResourceTracker, Tr: VmTracer> Vm<T, StdPrint, Tr> {
    /// Creates a VM printing to stdout.
    pub fn new(tracker: T, tracer: Tr) -> Self {
        Self {
            frames: Vec::new(),
            builtins: builtins_namespace(),
            tracker,
            print: StdPrint,
            tracer,
            import_hook: None,
            pending: None,
        }
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    /// Replaces the writer receiving `print()` output.
    pub fn with_print<P2: PrintWriter>(self, print: P2) -> Vm<T, P2, Tr> {
        Vm {
            frames: self.frames,
            builtins: self.builtins,
            tracker: self.tracker,
            print,
            tracer: self.tracer,
            import_hook: self.import_hook,
            pending: self.pending,
        }
    }

    /// Installs the hook resolving `IMPORT_NAME`.
    pub fn set_import_hook(&mut self, hook: impl ImportHook + 'static) {
        self.import_hook = Some(Box::new(hook));
    }

    /// The builtins namespace shared by every frame this VM creates.
    ///
    /// Hosts may add or replace entries before running code.
    #[must_use]
    pub fn builtins(&self) -> &Namespace {
        &self.builtins
    }

    #[must_use]
    pub fn print_writer(&self) -> &P {
        &self.print
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Number of frames currently on the frame stack.
    ///
    /// Zero whenever control is back with the host.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    // ========================================================================
    // Host entry points
    // ========================================================================

    /// Runs a module-level code unit to completion.
    ///
    /// `locals` defaults to `globals`, which is how module code runs.
    ///
    /// # Errors
    /// Returns the exception that escaped the code unit.
    pub fn run(&mut self, code: Rc<Code>, globals: Namespace, locals: Option<Namespace>) -> Result<Value, Exception> {
        let locals = locals.unwrap_or_else(|| globals.clone());
        let frame = self.new_frame(code, globals, locals, &[])?;
        self.run_frame(frame)
    }

    /// Builds a frame for `code` without running it.
    ///
    /// `bound_args` are stored into the locals before cells are created, so
    /// arguments captured by closures land in their cells. `locals` defaults to
    /// a fresh namespace. Free variables start as empty cells.
    ///
    /// # Errors
    /// Fails only for malformed code units.
    pub fn make_frame<K: Into<Rc<str>>>(
        &self,
        code: Rc<Code>,
        bound_args: impl IntoIterator<Item = (K, Value)>,
        globals: Namespace,
        locals: Option<Namespace>,
    ) -> Result<Frame, Exception> {
        let locals = locals.unwrap_or_default();
        for (name, value) in bound_args {
            locals.set(name, value);
        }
        let free: Vec<Cell> = std::iter::repeat_with(Cell::default).take(code.freevars.len()).collect();
        self.new_frame(code, globals, locals, &free).map_err(Exception::from)
    }

    /// Runs a frame built by [`Vm::make_frame`] to completion.
    ///
    /// # Errors
    /// Returns the exception that escaped the frame.
    pub fn run_frame(&mut self, frame: Frame) -> Result<Value, Exception> {
        let base = self.frames.len();
        self.push_frame(frame)?;
        match self.run_until(base)? {
            Completion::Value(value) => Ok(value),
            Completion::Exhausted => Err(RunError::internal("module frame reported generator exhaustion").into()),
        }
    }

    /// Calls any callable value from the host.
    ///
    /// # Errors
    /// Returns the exception raised by the call.
    pub fn call<K: Into<Rc<str>>>(
        &mut self,
        callable: &Value,
        args: impl IntoIterator<Item = Value>,
        kwargs: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Value, Exception> {
        let kwargs: KwargsValues = kwargs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Ok(self.call_sync(callable.clone(), ArgValues::new(args, kwargs))?)
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Runs until the frame stack shrinks back to `base` frames.
    ///
    /// Nested host-level calls (`call_sync`, generator resumption from the host)
    /// run their own loop with a higher base; frames beneath `base` belong to
    /// an outer loop and are never touched here.
    fn run_until(&mut self, base: usize) -> RunResult<Completion> {
        loop {
            let why = match self.pending.take() {
                Some(why) => why,
                None => match self.step() {
                    Ok(None) => continue,
                    Ok(Some(why)) => why,
                    Err(err) => self.error_to_why(err, base)?,
                },
            };
            let exit = match self.unwind(why) {
                Ok(None) => continue,
                Ok(Some(exit)) => exit,
                Err(err) => return Err(self.abandon(err, base)),
            };
            match self.leave_frame(exit, base) {
                Ok(None) => {}
                Ok(Some(completion)) => return Ok(completion),
                Err(err) => return Err(self.abandon(err, base)),
            }
        }
    }

    /// Fetches, decodes and executes one instruction of the top frame.
    fn step(&mut self) -> RunResult<Option<Why>> {
        self.tracker.on_operation()?;
        let frame_depth = self.frames.len();
        let frame = self.frames.last_mut().expect("no active frame");
        let start = frame.ip;
        let bytecode = frame.code.bytecode();
        let Some(&byte) = bytecode.get(start) else {
            return Err(RunError::internal(format!(
                "instruction pointer {start} past the end of {}",
                frame.code.name
            )));
        };
        let opcode =
            Opcode::try_from(byte).map_err(|byte| RunError::internal(format!("invalid opcode {byte} at {start}")))?;
        let arg = if opcode.has_arg() {
            match bytecode.get(start + 1..start + 3) {
                Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
                _ => return Err(RunError::internal(format!("truncated {opcode} at {start}"))),
            }
        } else {
            0
        };
        frame.instr_start = start;
        frame.ip = start + opcode.size();
        let stack_depth = frame.stack.len();
        self.tracer.on_instruction(start, opcode, stack_depth, frame_depth);
        self.execute(opcode, arg)
    }

    /// Executes one decoded instruction.
    ///
    /// Returns a why-code when the instruction leaves straight-line execution.
    fn execute(&mut self, opcode: Opcode, arg: u16) -> RunResult<Option<Why>> {
        let index = usize::from(arg);
        match opcode {
            // Stack manipulation
            Opcode::Nop => {}
            Opcode::PopTop => {
                self.pop()?;
            }
            Opcode::RotTwo => self.current_frame_mut().rotate(2)?,
            Opcode::RotThree => self.current_frame_mut().rotate(3)?,
            Opcode::DupTop => {
                let value = self.current_frame().peek(0)?.clone();
                self.push(value);
            }
            Opcode::DupTopTwo => {
                let frame = self.current_frame_mut();
                let second = frame.peek(1)?.clone();
                let top = frame.peek(0)?.clone();
                frame.push(second);
                frame.push(top);
            }

            // Operators
            Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryNot | Opcode::UnaryInvert => {
                let operand = self.pop()?;
                let result = binary::unary_op(opcode, &operand)?;
                self.push(result);
            }
            Opcode::BinaryPower
            | Opcode::BinaryMultiply
            | Opcode::BinaryModulo
            | Opcode::BinaryAdd
            | Opcode::BinarySubtract
            | Opcode::BinaryFloorDivide
            | Opcode::BinaryTrueDivide
            | Opcode::BinaryLshift
            | Opcode::BinaryRshift
            | Opcode::BinaryAnd
            | Opcode::BinaryXor
            | Opcode::BinaryOr
            | Opcode::InplaceFloorDivide
            | Opcode::InplaceTrueDivide
            | Opcode::InplaceAdd
            | Opcode::InplaceSubtract
            | Opcode::InplaceMultiply
            | Opcode::InplaceModulo
            | Opcode::InplacePower
            | Opcode::InplaceLshift
            | Opcode::InplaceRshift
            | Opcode::InplaceAnd
            | Opcode::InplaceXor
            | Opcode::InplaceOr => self.exec_binary(opcode)?,
            Opcode::BinarySubscr => self.exec_binary_subscr()?,
            Opcode::StoreSubscr => self.exec_store_subscr()?,
            Opcode::DeleteSubscr => self.exec_delete_subscr()?,
            Opcode::CompareOp => self.exec_compare(arg)?,

            // Names
            Opcode::LoadConst => {
                let frame = self.current_frame_mut();
                let value = frame
                    .code
                    .consts
                    .get(index)
                    .map(Value::from_const)
                    .ok_or_else(|| RunError::internal(format!("constant index {index} out of range")))?;
                frame.push(value);
            }
            Opcode::LoadName => {
                let frame = self.current_frame();
                let name = frame.name(index)?;
                let value = frame
                    .locals
                    .get(&name)
                    .or_else(|| frame.globals.get(&name))
                    .or_else(|| frame.builtins.get(&name))
                    .ok_or_else(|| ExcType::name_error(&name))?;
                self.push(value);
            }
            Opcode::StoreName => {
                let name = self.current_frame().name(index)?;
                let value = self.pop()?;
                self.current_frame().locals.set(name, value);
            }
            Opcode::DeleteName => {
                let frame = self.current_frame();
                let name = frame.name(index)?;
                if frame.locals.remove(&name).is_none() {
                    return Err(ExcType::name_error(&name));
                }
            }
            Opcode::LoadGlobal => {
                let frame = self.current_frame();
                let name = frame.name(index)?;
                let value = frame
                    .globals
                    .get(&name)
                    .or_else(|| frame.builtins.get(&name))
                    .ok_or_else(|| ExcType::name_error(&name))?;
                self.push(value);
            }
            Opcode::StoreGlobal => {
                let name = self.current_frame().name(index)?;
                let value = self.pop()?;
                self.current_frame().globals.set(name, value);
            }
            Opcode::DeleteGlobal => {
                let frame = self.current_frame();
                let name = frame.name(index)?;
                if frame.globals.remove(&name).is_none() {
                    return Err(ExcType::name_error(&name));
                }
            }
            Opcode::LoadFast => {
                let frame = self.current_frame();
                let name = frame.varname(index)?;
                let value = frame.locals.get(&name).ok_or_else(|| ExcType::unbound_local(&name))?;
                self.push(value);
            }
            Opcode::StoreFast => {
                let name = self.current_frame().varname(index)?;
                let value = self.pop()?;
                self.current_frame().locals.set(name, value);
            }
            Opcode::DeleteFast => {
                let frame = self.current_frame();
                let name = frame.varname(index)?;
                if frame.locals.remove(&name).is_none() {
                    return Err(ExcType::unbound_local(&name));
                }
            }

            // Cells
            Opcode::LoadClosure => {
                let cell = self.current_frame().cell(index)?.clone();
                self.push(Value::Cell(cell));
            }
            Opcode::LoadDeref => self.exec_load_deref(arg)?,
            Opcode::StoreDeref => {
                let value = self.pop()?;
                let frame = self.frames.last().expect("no active frame");
                frame.cell(index)?.set(value);
                self.tracer.on_cell_store(arg, frame.cells.len());
            }

            // Attributes and imports
            Opcode::LoadAttr => {
                let name = self.current_frame().name(index)?;
                let obj = self.pop()?;
                let value = attr::load_attr(&obj, &name)?;
                self.push(value);
            }
            Opcode::StoreAttr => {
                let name = self.current_frame().name(index)?;
                let obj = self.pop()?;
                let value = self.pop()?;
                attr::store_attr(&obj, name, value)?;
            }
            Opcode::DeleteAttr => {
                let name = self.current_frame().name(index)?;
                let obj = self.pop()?;
                attr::delete_attr(&obj, &name)?;
            }
            Opcode::ImportName => self.exec_import_name(index)?,
            Opcode::ImportFrom => self.exec_import_from(index)?,

            // Containers and iteration
            Opcode::BuildTuple => {
                let items = self.current_frame_mut().popn(index)?;
                self.push(Value::new_tuple(items));
            }
            Opcode::BuildList => {
                let items = self.current_frame_mut().popn(index)?;
                self.push(Value::new_list(items));
            }
            Opcode::BuildMap => self.exec_build_map(index)?,
            Opcode::UnpackSequence => self.exec_unpack_sequence(index)?,
            Opcode::GetIter => {
                let iterable = self.pop()?;
                self.push(get_iter(iterable)?);
            }
            Opcode::ForIter => {
                let exit = self.current_frame().ip + index;
                self.exec_for_iter(exit)?;
            }

            // Jumps
            Opcode::JumpForward => {
                let frame = self.current_frame_mut();
                frame.jump(frame.ip + index);
            }
            Opcode::JumpAbsolute => self.current_frame_mut().jump(index),
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let frame = self.current_frame_mut();
                let condition = frame.pop()?.py_bool();
                if condition == (opcode == Opcode::PopJumpIfTrue) {
                    frame.jump(index);
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let frame = self.current_frame_mut();
                let condition = frame.peek(0)?.py_bool();
                if condition == (opcode == Opcode::JumpIfTrueOrPop) {
                    frame.jump(index);
                } else {
                    frame.pop()?;
                }
            }

            // Blocks and frame exits
            Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally => {
                let kind = match opcode {
                    Opcode::SetupLoop => BlockKind::Loop,
                    Opcode::SetupExcept => BlockKind::Except,
                    _ => BlockKind::Finally,
                };
                let frame = self.frames.last_mut().expect("no active frame");
                let handler = frame.ip + index;
                let depth = frame.push_block(kind, handler);
                self.tracer.on_block_push(kind, depth);
            }
            Opcode::SetupWith => {
                let handler = self.current_frame().ip + index;
                self.exec_setup_with(handler)?;
            }
            Opcode::PopBlock => {
                let frame = self.current_frame_mut();
                let block = frame.pop_block()?;
                frame.unwind_block(&block)?;
            }
            Opcode::PopExcept => self.exec_pop_except()?,
            Opcode::EndFinally => return self.exec_end_finally(),
            Opcode::WithCleanup => self.exec_with_cleanup()?,
            Opcode::BreakLoop => return Ok(Some(Why::Break)),
            Opcode::ContinueLoop => return Ok(Some(Why::Continue(index))),
            Opcode::ReturnValue => return Ok(Some(Why::Return(self.pop()?))),
            Opcode::YieldValue => return Ok(Some(Why::Yield(self.pop()?))),
            Opcode::RaiseVarargs => return self.exec_raise(index),

            // Calls and definitions
            Opcode::CallFunction => {
                let result = self.exec_call_function(arg);
                handle_call_result!(self, result);
            }
            Opcode::MakeFunction => self.exec_make_function(index, false)?,
            Opcode::MakeClosure => self.exec_make_function(index, true)?,
            Opcode::BuildClass => self.exec_build_class(index)?,
        }
        Ok(None)
    }

    fn exec_load_deref(&mut self, arg: u16) -> RunResult<()> {
        let index = usize::from(arg);
        let frame = self.frames.last().expect("no active frame");
        let cell = frame.cell(index)?;
        self.tracer.on_cell_load(arg, frame.cells.len());
        let Some(value) = cell.get() else {
            let name = frame.code.cell_name(index).map_or("", |name| &**name);
            return Err(if index < frame.code.cellvars.len() {
                ExcType::unbound_local(name)
            } else {
                ExcType::name_error_free(name)
            });
        };
        self.push(value);
        Ok(())
    }

    // ========================================================================
    // Frame transitions
    // ========================================================================

    /// Pushes a frame after checking the recursion limit.
    fn push_frame(&mut self, frame: Frame) -> RunResult<()> {
        self.tracker.check_recursion_depth(self.frames.len())?;
        let name = frame.code.name.clone();
        self.frames.push(frame);
        self.tracer.on_call(&name, self.frames.len());
        Ok(())
    }

    /// Creates a frame whose cellvars are filled from `locals` and whose
    /// freevars are the given cells.
    fn new_frame(
        &self,
        code: Rc<Code>,
        globals: Namespace,
        locals: Namespace,
        closure: &[Cell],
    ) -> RunResult<Frame> {
        let cells = frame_cells(&code, &locals, closure)?;
        Ok(Frame::new(code, globals, locals, self.builtins.clone(), cells))
    }

    /// Pops the top frame after it exited and routes the exit to whoever is
    /// waiting for it.
    ///
    /// Returns `Some` when control goes back to the host of this loop.
    fn leave_frame(&mut self, exit: FrameExit, base: usize) -> RunResult<Option<Completion>> {
        let mut frame = self.frames.pop().ok_or_else(|| RunError::internal("frame stack underflow"))?;
        let on_return = std::mem::take(&mut frame.on_return);
        let depth = self.frames.len();
        match exit {
            FrameExit::Yield(value) => {
                let ReturnAction::Resume(link) = on_return else {
                    return Err(RunError::internal(format!("{} yielded outside a generator", frame.code.name)));
                };
                link.generator.suspend(frame);
                self.tracer.on_yield(depth);
                self.resolve_resume(link.mode, generator::Event::Yielded(value), base)
            }
            FrameExit::Return(value) => {
                self.tracer.on_return(depth);
                match on_return {
                    ReturnAction::Deliver => match finish_return(&mut frame, value) {
                        Ok(value) => self.deliver(value, base),
                        Err(RunError::Exc(triple)) => self.raise_in_caller(*triple, base),
                        Err(err) => Err(err),
                    },
                    ReturnAction::Resume(link) => {
                        link.generator.finish();
                        self.resolve_resume(link.mode, generator::Event::Returned(value), base)
                    }
                }
            }
            FrameExit::Exception(triple) => {
                self.tracer.on_return(depth);
                match on_return {
                    ReturnAction::Deliver => self.raise_in_caller(*triple, base),
                    ReturnAction::Resume(link) => {
                        link.generator.finish();
                        self.resolve_resume(link.mode, generator::Event::Raised(triple), base)
                    }
                }
            }
        }
    }

    /// Hands a result to the frame beneath, or to the host at `base`.
    fn deliver(&mut self, value: Value, base: usize) -> RunResult<Option<Completion>> {
        if self.frames.len() == base {
            return Ok(Some(Completion::Value(value)));
        }
        self.push(value);
        Ok(None)
    }

    /// Raises an exception at the current instruction of the frame beneath, or
    /// hands it to the host at `base`.
    fn raise_in_caller(&mut self, mut triple: ExcTriple, base: usize) -> RunResult<Option<Completion>> {
        if self.frames.len() == base {
            return Err(RunError::Exc(Box::new(triple)));
        }
        let frame = self.current_frame();
        triple.push_frame(&frame.code.name, frame.line_number());
        self.pending = Some(Why::Exception(Box::new(triple)));
        Ok(None)
    }

    /// Applies the outcome of a generator resumption to the frame that resumed it.
    fn resolve_resume(&mut self, mode: ResumeMode, event: generator::Event, base: usize) -> RunResult<Option<Completion>> {
        match generator::resolve(mode, event) {
            Ok(Resolved::Value(value)) => self.deliver(value, base),
            Ok(Resolved::Exhausted) if self.frames.len() == base => Ok(Some(Completion::Exhausted)),
            Ok(Resolved::Exhausted) => Err(RunError::internal("generator exhaustion outside a host resume")),
            Ok(Resolved::LoopExit(target)) => {
                let frame = self
                    .frames
                    .get_mut(base..)
                    .and_then(<[Frame]>::last_mut)
                    .ok_or_else(|| RunError::internal("FOR_ITER resumed from the host"))?;
                frame.pop()?;
                frame.jump(target);
                Ok(None)
            }
            Err(RunError::Exc(triple)) => self.raise_in_caller(*triple, base),
            Err(err) => Err(err),
        }
    }

    /// Turns an error raised by an instruction into a why-code, or tears down
    /// every frame above `base` for errors no handler may see.
    fn error_to_why(&mut self, err: RunError, base: usize) -> RunResult<Why> {
        match err {
            RunError::Exc(mut triple) => {
                let frame = self.current_frame();
                triple.push_frame(&frame.code.name, frame.line_number());
                Ok(Why::Exception(triple))
            }
            other => Err(self.abandon(other, base)),
        }
    }

    /// Pops every frame above `base`, finishing generators whose frames are
    /// dropped and extending the traceback of uncatchable errors.
    fn abandon(&mut self, mut err: RunError, base: usize) -> RunError {
        while self.frames.len() > base {
            let Some(mut frame) = self.frames.pop() else { break };
            if let RunError::Uncatchable(triple) = &mut err {
                triple.push_frame(&frame.code.name, frame.line_number());
            }
            if let ReturnAction::Resume(link) = std::mem::take(&mut frame.on_return) {
                link.generator.finish();
            }
            self.tracer.on_return(self.frames.len());
        }
        self.pending = None;
        err
    }

    /// Calls a callable and runs it to completion before returning.
    ///
    /// Used where an instruction needs a result before it can finish:
    /// `__enter__`/`__exit__`, raising an exception class, host calls.
    pub(crate) fn call_sync(&mut self, callable: Value, args: ArgValues) -> RunResult<Value> {
        let base = self.frames.len();
        match self.call_value(callable, args)? {
            CallResult::Push(value) => Ok(value),
            CallResult::FramePushed => match self.run_until(base)? {
                Completion::Value(value) => Ok(value),
                Completion::Exhausted => Err(RunError::internal("call completed as generator exhaustion")),
            },
        }
    }

    // ========================================================================
    // Frame access
    // ========================================================================

    #[inline]
    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    #[inline]
    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    #[inline]
    fn push(&mut self, value: Value) {
        self.current_frame_mut().push(value);
    }

    #[inline]
    fn pop(&mut self) -> RunResult<Value> {
        self.current_frame_mut().pop()
    }
}

/// Applies `__init__` and class-body post-processing to a frame's return value.
fn finish_return(frame: &mut Frame, value: Value) -> RunResult<Value> {
    if let Some(instance) = frame.init_instance.take() {
        check_init_result(&value)?;
        return Ok(Value::Instance(instance));
    }
    if let Some(info) = frame.class_body.take() {
        let class = Class::new(info.name, info.bases, frame.locals.entries());
        return Ok(Value::Class(Rc::new(class)));
    }
    Ok(value)
}

/// `__init__` must return None.
fn check_init_result(value: &Value) -> RunResult<()> {
    if matches!(value, Value::None) {
        Ok(())
    } else {
        Err(SimpleException::new_msg(
            ExcType::TypeError,
            format!("__init__() should return None, not '{}'", value.py_type_name()),
        )
        .into())
    }
}

/// Creates the instance a class call returns before `__init__` runs.
fn new_instance(class: &Rc<Class>, args: &ArgValues) -> Rc<Instance> {
    let instance = Rc::new(Instance::new(class.clone()));
    if class.is_exception_class() {
        instance.set_attr("args", Value::new_tuple(args.args.to_vec()));
    }
    instance
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> std::fmt::Debug for Vm<T, P, Tr> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("frames", &self.frames)
            .field("tracker", &self.tracker)
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}
