//! Generator resumption: `next()`, `send()`, `throw()`, `close()`, `FOR_ITER`
//! and host-driven iteration.
//!
//! Resuming moves the generator's parked frame onto the frame stack with a
//! [`ResumeLink`] recording how the outcome should be reported. When the frame
//! yields, returns or raises, [`resolve`] turns the outcome into what the
//! resumer sees.

use std::rc::Rc;

use super::{CallResult, Completion, ReturnAction, Vm, unwind::Why};
use crate::{
    args::ArgValues,
    builtins::GeneratorMethod,
    exception_private::{ExcTriple, ExcType, RunError, RunResult, SimpleException},
    exception_public::Exception,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Generator, GeneratorState},
    value::Value,
};

/// How the outcome of a resumption is reported to the resumer.
#[derive(Debug)]
pub(crate) enum ResumeMode {
    /// `next()` and `send()`: exhaustion raises StopIteration unless a default is given.
    Next { default: Option<Value> },
    /// `FOR_ITER`: exhaustion pops the iterator and jumps to `exit`.
    ForIter { exit: usize },
    /// `close()`: GeneratorExit was thrown in; a yield is an error.
    Close,
    /// Host iteration: exhaustion is reported without an exception.
    Advance,
}

/// Connects a running generator frame back to its generator object.
#[derive(Debug)]
pub(crate) struct ResumeLink {
    pub generator: Rc<Generator>,
    pub mode: ResumeMode,
}

/// What a resumed generator frame did.
#[derive(Debug)]
pub(super) enum Event {
    Yielded(Value),
    Returned(Value),
    Raised(Box<ExcTriple>),
}

/// A resumption outcome as seen by the resumer.
#[derive(Debug)]
pub(super) enum Resolved {
    Value(Value),
    Exhausted,
    LoopExit(usize),
}

/// What is sent into a generator.
#[derive(Debug)]
pub(super) enum Resume {
    Send(Value),
    Throw(ExcTriple),
}

/// Whether a resumption pushed the generator's frame or finished on the spot.
#[derive(Debug)]
pub(super) enum Resumed {
    Frame,
    Now(Resolved),
}

/// Maps a generator outcome to the resumer's view of it.
pub(super) fn resolve(mode: ResumeMode, event: Event) -> RunResult<Resolved> {
    match (mode, event) {
        (ResumeMode::Close, Event::Yielded(_)) => Err(SimpleException::new_msg(
            ExcType::RuntimeError,
            "generator ignored GeneratorExit",
        )
        .into()),
        (_, Event::Yielded(value)) => Ok(Resolved::Value(value)),
        (ResumeMode::Next { default: Some(default) }, Event::Returned(_)) => Ok(Resolved::Value(default)),
        (ResumeMode::Next { default: None }, Event::Returned(value)) => Err(ExcType::stop_iteration(value)),
        (ResumeMode::ForIter { exit }, Event::Returned(_)) => Ok(Resolved::LoopExit(exit)),
        (ResumeMode::Close, Event::Returned(_)) => Ok(Resolved::Value(Value::None)),
        (ResumeMode::Advance, Event::Returned(_)) => Ok(Resolved::Exhausted),
        (ResumeMode::Close, Event::Raised(triple))
            if triple.is(ExcType::GeneratorExit) || triple.is(ExcType::StopIteration) =>
        {
            Ok(Resolved::Value(Value::None))
        }
        (_, Event::Raised(triple)) => Err(RunError::Exc(triple)),
    }
}

/// Iterator over a generator's values, driven from the host.
///
/// Yields `Err` once if the generator raises; the generator is finished after that.
pub struct GeneratorIter<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> {
    vm: &'a mut Vm<T, P, Tr>,
    generator: Rc<Generator>,
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Iterator for GeneratorIter<'_, T, P, Tr> {
    type Item = Result<Value, Exception>;

    fn next(&mut self) -> Option<Self::Item> {
        self.vm.advance(&self.generator).transpose()
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    // ========================================================================
    // Host API
    // ========================================================================

    /// Advances a generator; `Ok(None)` once it is exhausted.
    ///
    /// # Errors
    /// Returns the exception the generator raised.
    pub fn advance(&mut self, generator: &Rc<Generator>) -> Result<Option<Value>, Exception> {
        Ok(self.resume_host(generator, Resume::Send(Value::None), ResumeMode::Advance)?)
    }

    /// Sends a value into a generator; `Ok(None)` once it is exhausted.
    ///
    /// # Errors
    /// Returns the exception the generator raised, or TypeError when sending a
    /// non-None value into a generator that has not started.
    pub fn send(&mut self, generator: &Rc<Generator>, value: Value) -> Result<Option<Value>, Exception> {
        Ok(self.resume_host(generator, Resume::Send(value), ResumeMode::Advance)?)
    }

    /// Raises `exc` inside a generator at its current yield.
    ///
    /// Returns the next yielded value if the generator handled the exception.
    ///
    /// # Errors
    /// Returns the exception that escaped the generator.
    pub fn throw(&mut self, generator: &Rc<Generator>, exc: Exception) -> Result<Option<Value>, Exception> {
        let mut triple = exc.into_triple();
        triple.traceback.clear();
        Ok(self.resume_host(generator, Resume::Throw(triple), ResumeMode::Advance)?)
    }

    /// Closes a generator by raising GeneratorExit at its current yield.
    ///
    /// # Errors
    /// Returns RuntimeError if the generator yields instead of exiting, or any
    /// other exception it raised while closing.
    pub fn close(&mut self, generator: &Rc<Generator>) -> Result<(), Exception> {
        self.resume_host(generator, Resume::Throw(generator_exit()), ResumeMode::Close)?;
        Ok(())
    }

    /// Iterates a generator from the host.
    pub fn iterate(&mut self, generator: Rc<Generator>) -> GeneratorIter<'_, T, P, Tr> {
        GeneratorIter { vm: self, generator }
    }

    // ========================================================================
    // Resumption
    // ========================================================================

    /// Resumes a generator and runs it until it yields, returns or raises.
    fn resume_host(&mut self, generator: &Rc<Generator>, resume: Resume, mode: ResumeMode) -> RunResult<Option<Value>> {
        let base = self.frames.len();
        let resolved = match self.resume_generator(generator, resume, mode)? {
            Resumed::Now(resolved) => resolved,
            Resumed::Frame => match self.run_until(base)? {
                Completion::Value(value) => Resolved::Value(value),
                Completion::Exhausted => Resolved::Exhausted,
            },
        };
        match resolved {
            Resolved::Value(value) => Ok(Some(value)),
            Resolved::Exhausted => Ok(None),
            Resolved::LoopExit(_) => Err(RunError::internal("loop exit outside FOR_ITER")),
        }
    }

    /// Collects every remaining value of a generator, as `list(gen)` does.
    pub(super) fn drain_generator(&mut self, generator: &Rc<Generator>) -> RunResult<Vec<Value>> {
        let mut items = Vec::new();
        while let Some(value) = self.resume_host(generator, Resume::Send(Value::None), ResumeMode::Advance)? {
            items.push(value);
        }
        Ok(items)
    }

    /// Starts a resumption.
    ///
    /// Either pushes the generator's frame, leaving the outcome to the run
    /// loop, or resolves immediately when the generator cannot run.
    pub(super) fn resume_generator(
        &mut self,
        generator: &Rc<Generator>,
        resume: Resume,
        mode: ResumeMode,
    ) -> RunResult<Resumed> {
        let started = match generator.state() {
            GeneratorState::Running => {
                return Err(SimpleException::new_msg(ExcType::ValueError, "generator already executing").into());
            }
            GeneratorState::Finished => {
                let event = match resume {
                    Resume::Send(_) => Event::Returned(Value::None),
                    Resume::Throw(triple) => Event::Raised(Box::new(triple)),
                };
                return resolve(mode, event).map(Resumed::Now);
            }
            GeneratorState::New => false,
            GeneratorState::Suspended => true,
        };
        if !started {
            match resume {
                Resume::Send(Value::None) => {}
                Resume::Send(_) => {
                    return Err(SimpleException::new_msg(
                        ExcType::TypeError,
                        "can't send non-None value to a just-started generator",
                    )
                    .into());
                }
                Resume::Throw(triple) => {
                    // the frame never ran, so there is no handler to see the exception
                    generator.finish();
                    return resolve(mode, Event::Raised(Box::new(triple))).map(Resumed::Now);
                }
            }
        }

        self.tracker.check_recursion_depth(self.frames.len())?;
        let mut frame = generator
            .take_frame()
            .ok_or_else(|| RunError::internal("suspended generator has no frame"))?;
        match resume {
            Resume::Send(value) => {
                if started {
                    frame.push(value);
                }
            }
            Resume::Throw(mut triple) => {
                triple.push_frame(&frame.code.name, frame.line_number());
                self.pending = Some(Why::Exception(Box::new(triple)));
            }
        }
        frame.on_return = ReturnAction::Resume(ResumeLink {
            generator: generator.clone(),
            mode,
        });
        self.frames.push(frame);
        self.tracer.on_call(&generator.name, self.frames.len());
        Ok(Resumed::Frame)
    }

    /// Calls `send`, `throw` or `close` bound to a generator.
    pub(super) fn call_generator_method(
        &mut self,
        generator: &Rc<Generator>,
        method: GeneratorMethod,
        args: ArgValues,
    ) -> RunResult<CallResult> {
        let (resume, mode) = match method {
            GeneratorMethod::Send => (
                Resume::Send(args.get_one_arg("send")?),
                ResumeMode::Next { default: None },
            ),
            GeneratorMethod::Throw => {
                let exc = self.make_exception(args.get_one_arg("throw")?)?;
                if !exc.is_raisable() {
                    return Err(SimpleException::new_msg(
                        ExcType::TypeError,
                        "exceptions must derive from BaseException",
                    )
                    .into());
                }
                (Resume::Throw(ExcTriple::from_value(exc)), ResumeMode::Next { default: None })
            }
            GeneratorMethod::Close => {
                args.check_zero_args("close")?;
                (Resume::Throw(generator_exit()), ResumeMode::Close)
            }
        };
        match self.resume_generator(generator, resume, mode)? {
            Resumed::Frame => Ok(CallResult::FramePushed),
            Resumed::Now(Resolved::Value(value)) => Ok(CallResult::Push(value)),
            Resumed::Now(_) => Err(RunError::internal("generator method resolved to a loop exit")),
        }
    }
}

fn generator_exit() -> ExcTriple {
    SimpleException::new(ExcType::GeneratorExit, Vec::new()).into_triple()
}
