//! Container opcodes: `BUILD_MAP`, `UNPACK_SEQUENCE` and `FOR_ITER`.

use super::{
    Vm,
    generator::{Resolved, Resume, ResumeMode, Resumed},
};
use crate::{
    builtins::{collect_items, not_an_iterator},
    exception_private::{ExcType, RunResult, SimpleException},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::Dict,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<T, P, Tr> {
    /// `BUILD_MAP n`: pops `n` key/value pairs, pushed key first.
    pub(super) fn exec_build_map(&mut self, count: usize) -> RunResult<()> {
        let items = self.current_frame_mut().popn(count * 2)?;
        let mut dict = Dict::new();
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            dict.insert(key, value)?;
        }
        self.push(Value::new_dict(dict));
        Ok(())
    }

    /// `UNPACK_SEQUENCE n`: replaces TOS with its `n` items, first item on top.
    pub(super) fn exec_unpack_sequence(&mut self, count: usize) -> RunResult<()> {
        let iterable = self.pop()?;
        let items = match &iterable {
            Value::Generator(generator) => self.drain_generator(generator)?,
            other => collect_items(other)?,
        };
        if items.len() != count {
            let msg = if items.len() > count {
                format!("too many values to unpack (expected {count})")
            } else {
                format!("not enough values to unpack (expected {count}, got {})", items.len())
            };
            return Err(SimpleException::new_msg(ExcType::ValueError, msg).into());
        }
        let frame = self.current_frame_mut();
        for item in items.into_iter().rev() {
            frame.push(item);
        }
        Ok(())
    }

    /// `FOR_ITER delta`: pushes the next item of the iterator at TOS, or pops
    /// the iterator and jumps to `exit` once it is exhausted.
    ///
    /// A generator iterator has its frame pushed; the item arrives when it yields.
    pub(super) fn exec_for_iter(&mut self, exit: usize) -> RunResult<()> {
        let iterator = self.current_frame().peek(0)?.clone();
        match iterator {
            Value::Iterator(iter) => {
                let item = iter.borrow_mut().next();
                let frame = self.current_frame_mut();
                match item {
                    Some(item) => frame.push(item),
                    None => {
                        frame.pop()?;
                        frame.jump(exit);
                    }
                }
            }
            Value::Generator(generator) => {
                match self.resume_generator(&generator, Resume::Send(Value::None), ResumeMode::ForIter { exit })? {
                    Resumed::Frame => {}
                    Resumed::Now(Resolved::Value(item)) => self.push(item),
                    Resumed::Now(Resolved::LoopExit(_) | Resolved::Exhausted) => {
                        let frame = self.current_frame_mut();
                        frame.pop()?;
                        frame.jump(exit);
                    }
                }
            }
            other => return Err(not_an_iterator(&other)),
        }
        Ok(())
    }
}
