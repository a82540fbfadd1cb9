//! Why-codes and block-stack unwinding.
//!
//! Every non-sequential exit from straight-line code (return, break, continue,
//! a raised exception, a yield) is reported as a [`Why`]. The unwinder walks the
//! top frame's block stack, tearing down blocks until one accepts the why, and
//! reports a [`FrameExit`] when the why escapes the frame.

use super::{BlockKind, Vm};
use crate::{
    exception_private::{ExcTriple, RunError, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

/// Reason for leaving straight-line execution.
#[derive(Debug)]
pub(super) enum Why {
    Return(Value),
    Break,
    /// `CONTINUE_LOOP` with the absolute offset of the loop head.
    Continue(usize),
    /// A freshly raised exception.
    Exception(Box<ExcTriple>),
    /// An exception re-raised by a bare `raise` or at the end of a finally block.
    Reraise(Box<ExcTriple>),
    Yield(Value),
    /// A with-statement's `__exit__` suppressed the exception being handled.
    Silenced,
}

impl Why {
    pub(super) fn name(&self) -> &'static str {
        match self {
            Self::Return(_) => "return",
            Self::Break => "break",
            Self::Continue(_) => "continue",
            Self::Exception(_) => "exception",
            Self::Reraise(_) => "reraise",
            Self::Yield(_) => "yield",
            Self::Silenced => "silenced",
        }
    }
}

/// Why-code left on the operand stack for `END_FINALLY` and `WITH_CLEANUP`.
///
/// Pushed when a return, break or continue enters a finally handler, so the
/// handler's last instruction can resume what was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhyMarker {
    /// The return value sits directly beneath the marker.
    Return,
    Break,
    Continue(usize),
    Silenced,
}

/// A why-code that escaped every block of the top frame.
#[derive(Debug)]
pub(super) enum FrameExit {
    Return(Value),
    Exception(Box<ExcTriple>),
    Yield(Value),
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    /// Unwinds the top frame's block stack for `why`.
    ///
    /// Returns `None` when a block took over (the frame's `ip` now points at its
    /// handler or loop head), or the frame exit when nothing did.
    pub(super) fn unwind(&mut self, why: Why) -> RunResult<Option<FrameExit>> {
        let frame = self.frames.last_mut().expect("no active frame");
        self.tracer.on_unwind(why.name(), frame.blocks.len());

        let mut why = match why {
            Why::Yield(value) => return Ok(Some(FrameExit::Yield(value))),
            Why::Silenced => {
                // the suppressing with-statement's handler block ends here
                let block = frame.pop_block()?;
                if block.kind != BlockKind::ExceptHandler {
                    return Err(RunError::internal("silenced exception outside a handler"));
                }
                frame.unwind_block(&block)?;
                return Ok(None);
            }
            other => other,
        };

        while let Some(block) = frame.blocks.last().copied() {
            if let (BlockKind::Loop, Why::Continue(target)) = (block.kind, &why) {
                frame.jump(*target);
                return Ok(None);
            }
            frame.blocks.pop();
            frame.unwind_block(&block)?;

            match (block.kind, why) {
                (BlockKind::Loop, Why::Break) => {
                    frame.jump(block.handler);
                    return Ok(None);
                }
                (
                    BlockKind::Except | BlockKind::Finally | BlockKind::Resource,
                    Why::Exception(triple) | Why::Reraise(triple),
                ) => {
                    let level = frame.stack.len();
                    let depth = frame.push_block_at(BlockKind::ExceptHandler, block.handler, level);
                    self.tracer.on_block_push(BlockKind::ExceptHandler, depth);
                    let previous = frame.handled.take();
                    frame.push_triple(previous.as_ref());
                    frame.push_triple(Some(&triple));
                    frame.handled = Some(*triple);
                    frame.jump(block.handler);
                    return Ok(None);
                }
                (BlockKind::Finally | BlockKind::Resource, Why::Return(value)) => {
                    frame.push(value);
                    frame.push(Value::Why(WhyMarker::Return));
                    frame.jump(block.handler);
                    return Ok(None);
                }
                (BlockKind::Finally | BlockKind::Resource, Why::Break) => {
                    frame.push(Value::Why(WhyMarker::Break));
                    frame.jump(block.handler);
                    return Ok(None);
                }
                (BlockKind::Finally | BlockKind::Resource, Why::Continue(target)) => {
                    frame.push(Value::Why(WhyMarker::Continue(target)));
                    frame.jump(block.handler);
                    return Ok(None);
                }
                (_, other) => why = other,
            }
        }

        match why {
            Why::Return(value) => Ok(Some(FrameExit::Return(value))),
            Why::Exception(triple) | Why::Reraise(triple) => Ok(Some(FrameExit::Exception(triple))),
            other => Err(RunError::internal(format!(
                "'{}' outside a loop in {}",
                other.name(),
                frame.code.name
            ))),
        }
    }
}
