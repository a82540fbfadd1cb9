//! Raising and handling exceptions, and the with-statement protocol.

use super::{BlockKind, Vm, frame::triple_from_slots, unwind::Why, unwind::WhyMarker};
use crate::{
    args::ArgValues,
    exception_private::{ExcTriple, ExcType, RunError, RunResult, SimpleException},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    /// `RAISE_VARARGS n`.
    ///
    /// - 0: re-raise the exception currently handled in this frame
    /// - 1: raise TOS
    /// - 2: raise TOS1 with TOS as its `__cause__`
    pub(super) fn exec_raise(&mut self, count: usize) -> RunResult<Option<Why>> {
        match count {
            0 => match self.current_frame().handled.clone() {
                Some(triple) => Ok(Some(Why::Reraise(Box::new(triple)))),
                None => Err(SimpleException::new_msg(ExcType::RuntimeError, "No active exception to reraise").into()),
            },
            1 => {
                let value = self.pop()?;
                let exc = self.make_exception(value)?;
                Err(RunError::Exc(Box::new(ExcTriple::from_value(exc))))
            }
            2 => {
                let cause = self.pop()?;
                let value = self.pop()?;
                let exc = self.make_exception(value)?;
                let cause = match cause {
                    Value::None => Value::None,
                    cause => self.make_exception(cause)?,
                };
                match &exc {
                    Value::Exception(simple) => simple.set_cause(cause),
                    Value::Instance(instance) => instance.set_attr("__cause__", cause),
                    _ => {}
                }
                Err(RunError::Exc(Box::new(ExcTriple::from_value(exc))))
            }
            _ => Err(RunError::internal(format!("RAISE_VARARGS with {count} operands"))),
        }
    }

    /// Turns a raised value into the exception object: exception types and
    /// classes are instantiated without arguments, anything else is raised as is.
    pub(super) fn make_exception(&mut self, value: Value) -> RunResult<Value> {
        match value {
            Value::ExcType(exc_type) => Ok(Value::Exception(SimpleException::new(exc_type, Vec::new()).into())),
            Value::Class(class) if class.is_exception_class() => {
                self.call_sync(Value::Class(class), ArgValues::default())
            }
            other => Ok(other),
        }
    }

    /// `END_FINALLY`: resumes whatever a finally or with handler interrupted.
    ///
    /// TOS is None (normal completion), a why marker, or the type slot of an
    /// exception triple which is re-raised.
    pub(super) fn exec_end_finally(&mut self) -> RunResult<Option<Why>> {
        let frame = self.current_frame_mut();
        match frame.pop()? {
            Value::None => Ok(None),
            Value::Why(WhyMarker::Return) => Ok(Some(Why::Return(frame.pop()?))),
            Value::Why(WhyMarker::Break) => Ok(Some(Why::Break)),
            Value::Why(WhyMarker::Continue(target)) => Ok(Some(Why::Continue(target))),
            Value::Why(WhyMarker::Silenced) => Ok(Some(Why::Silenced)),
            exc_type => {
                let value = frame.pop()?;
                let traceback = frame.pop()?;
                let triple = triple_from_slots(exc_type, value, traceback)
                    .ok_or_else(|| RunError::internal("END_FINALLY found an empty exception triple"))?;
                Ok(Some(Why::Reraise(Box::new(triple))))
            }
        }
    }

    /// `POP_EXCEPT`: leaves an except handler, restoring the exception that
    /// was being handled before it.
    pub(super) fn exec_pop_except(&mut self) -> RunResult<()> {
        let frame = self.current_frame_mut();
        let block = frame.pop_block()?;
        if block.kind != BlockKind::ExceptHandler {
            return Err(RunError::internal("POP_EXCEPT outside an except handler"));
        }
        frame.unwind_block(&block)
    }

    /// `SETUP_WITH`: pops the context manager, pushes its bound `__exit__`,
    /// calls `__enter__`, installs the cleanup block and pushes the result.
    pub(super) fn exec_setup_with(&mut self, handler: usize) -> RunResult<()> {
        let manager = self.pop()?;
        let enter = super::attr::load_attr(&manager, "__enter__")?;
        let exit = super::attr::load_attr(&manager, "__exit__")?;
        self.push(exit);
        let result = self.call_sync(enter, ArgValues::default())?;
        let frame = self.frames.last_mut().expect("no active frame");
        let depth = frame.push_block(BlockKind::Resource, handler);
        self.tracer.on_block_push(BlockKind::Resource, depth);
        self.push(result);
        Ok(())
    }

    /// `WITH_CLEANUP`: calls the saved `__exit__`.
    ///
    /// On a normal exit, return, break or continue it is called with three
    /// Nones. With an exception in flight it gets the triple, and a truthy
    /// result replaces the triple with a `Silenced` marker for `END_FINALLY`.
    pub(super) fn exec_with_cleanup(&mut self) -> RunResult<()> {
        let frame = self.current_frame_mut();
        let len = frame.stack.len();
        let below = |n: usize| len.checked_sub(n).ok_or_else(|| RunError::internal("operand stack underflow"));
        let (exit_index, exc) = match frame.peek(0)? {
            Value::None => (below(2)?, None),
            Value::Why(WhyMarker::Return) => (below(3)?, None),
            Value::Why(_) => (below(2)?, None),
            _ => {
                let exc = [frame.peek(0)?.clone(), frame.peek(1)?.clone(), frame.peek(2)?.clone()];
                let block = frame
                    .blocks
                    .last_mut()
                    .filter(|block| block.kind == BlockKind::ExceptHandler)
                    .ok_or_else(|| RunError::internal("WITH_CLEANUP with an exception but no handler block"))?;
                // the exit sits just beneath the handler's saved triple; the
                // handler takes over its slot
                let exit_index = block
                    .level
                    .checked_sub(1)
                    .ok_or_else(|| RunError::internal("WITH_CLEANUP found no __exit__ slot"))?;
                block.level = exit_index;
                (exit_index, Some(exc))
            }
        };
        let exit = frame.remove(exit_index)?;

        let in_flight = exc.is_some();
        let args = exc.unwrap_or([Value::None, Value::None, Value::None]);
        let suppress = self.call_sync(exit, ArgValues::positional(args))?.py_bool();
        if in_flight && suppress {
            let frame = self.current_frame_mut();
            frame.popn(3)?;
            frame.push(Value::Why(WhyMarker::Silenced));
        }
        Ok(())
    }
}

/// Checks whether a raised type matches an except clause.
///
/// The clause may be a built-in exception type, a user exception class or a
/// tuple of those; values that are neither match only themselves.
pub(super) fn exception_matches(exc_type: &Value, handler: &Value) -> bool {
    match handler {
        Value::Tuple(options) => options.iter().any(|option| exception_matches(exc_type, option)),
        Value::ExcType(handler_type) => exc_type
            .exc_type_base()
            .is_some_and(|base| base.is_subclass_of(*handler_type)),
        Value::Class(handler_class) => matches!(exc_type, Value::Class(class) if class.is_subclass_of(handler_class)),
        other => exc_type.is(other),
    }
}
