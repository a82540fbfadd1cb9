//! Activation records: operand stack, block stack and namespaces.

use std::{fmt, rc::Rc};

use smallvec::SmallVec;

use super::{ClassBodyInfo, ReturnAction};
use crate::{
    bytecode::Code,
    exception_private::{ExcTriple, RunError, RunResult},
    namespace::Namespace,
    types::{Cell, Instance},
    value::Value,
};

/// Kind of a structured-control-flow block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// `SETUP_LOOP`: handler is the first instruction after the loop.
    Loop,
    /// `SETUP_EXCEPT`: handler receives exceptions only.
    Except,
    /// `SETUP_FINALLY`: handler receives every non-normal exit.
    Finally,
    /// `SETUP_WITH`: like `Finally`, the handler is the `WITH_CLEANUP` sequence.
    Resource,
    /// Installed by the unwinder while a handler runs; owns the three stack
    /// slots above its level holding the previously handled exception.
    ExceptHandler,
}

/// One entry of a frame's block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Absolute offset of the handler.
    pub handler: usize,
    /// Operand stack depth restored when the block is torn down.
    pub level: usize,
}

/// A single activation record.
///
/// Each frame owns its operand stack and block stack, so a generator's frame can
/// be parked with both intact and resumed later.
pub struct Frame {
    pub(crate) code: Rc<Code>,
    pub(crate) globals: Namespace,
    pub(crate) locals: Namespace,
    pub(crate) builtins: Namespace,
    /// Cellvars followed by freevars.
    pub(crate) cells: Vec<Cell>,
    pub(crate) stack: Vec<Value>,
    pub(crate) blocks: SmallVec<[Block; 4]>,
    /// Offset of the next instruction.
    pub(crate) ip: usize,
    /// Offset of the instruction being executed, for line numbers.
    pub(crate) instr_start: usize,
    /// The exception currently being handled in this frame.
    pub(crate) handled: Option<ExcTriple>,
    /// What happens with this frame's result; set when the frame is pushed.
    pub(crate) on_return: ReturnAction,
    /// Set while running `__init__` for a class call; replaces the result.
    pub(crate) init_instance: Option<Rc<Instance>>,
    /// Set while running a class body; the locals become the class.
    pub(crate) class_body: Option<ClassBodyInfo>,
}

impl Frame {
    pub(crate) fn new(
        code: Rc<Code>,
        globals: Namespace,
        locals: Namespace,
        builtins: Namespace,
        cells: Vec<Cell>,
    ) -> Self {
        Self {
            code,
            globals,
            locals,
            builtins,
            cells,
            stack: Vec::new(),
            blocks: SmallVec::new(),
            ip: 0,
            instr_start: 0,
            handled: None,
            on_return: ReturnAction::default(),
            init_instance: None,
            class_body: None,
        }
    }

    #[must_use]
    pub fn code(&self) -> &Rc<Code> {
        &self.code
    }

    #[must_use]
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    #[must_use]
    pub fn locals(&self) -> &Namespace {
        &self.locals
    }

    /// Source line of the instruction being executed (or about to be, when suspended).
    #[must_use]
    pub fn line_number(&self) -> u32 {
        self.code.line_for_offset(self.instr_start)
    }

    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    // ========================================================================
    // Operand stack
    // ========================================================================

    #[inline]
    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> RunResult<Value> {
        self.stack.pop().ok_or_else(stack_underflow)
    }

    /// Returns the value `n` slots below the top (0 is the top).
    pub(crate) fn peek(&self, n: usize) -> RunResult<&Value> {
        self.stack
            .len()
            .checked_sub(n + 1)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(stack_underflow)
    }

    /// Pops the top `n` values, returned in push order.
    pub(crate) fn popn(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let start = self.stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        Ok(self.stack.split_off(start))
    }

    /// Moves the top of the stack down `n - 1` slots (`ROT_TWO`, `ROT_THREE`).
    pub(crate) fn rotate(&mut self, n: usize) -> RunResult<()> {
        let start = self.stack.len().checked_sub(n).ok_or_else(stack_underflow)?;
        self.stack[start..].rotate_right(1);
        Ok(())
    }

    /// Removes the value at absolute stack position `index`.
    pub(crate) fn remove(&mut self, index: usize) -> RunResult<Value> {
        if index < self.stack.len() {
            Ok(self.stack.remove(index))
        } else {
            Err(stack_underflow())
        }
    }

    #[inline]
    pub(crate) fn jump(&mut self, target: usize) {
        self.ip = target;
    }

    // ========================================================================
    // Operand decoding
    // ========================================================================

    /// Global/attribute name at `index`.
    pub(crate) fn name(&self, index: usize) -> RunResult<Rc<str>> {
        self.code
            .names
            .get(index)
            .cloned()
            .ok_or_else(|| RunError::internal(format!("name index {index} out of range")))
    }

    /// Local variable name at `index`.
    pub(crate) fn varname(&self, index: usize) -> RunResult<Rc<str>> {
        self.code
            .varnames
            .get(index)
            .cloned()
            .ok_or_else(|| RunError::internal(format!("local index {index} out of range")))
    }

    /// Cell or free-variable slot at `index`.
    pub(crate) fn cell(&self, index: usize) -> RunResult<&Cell> {
        self.cells
            .get(index)
            .ok_or_else(|| RunError::internal(format!("cell index {index} out of range")))
    }

    // ========================================================================
    // Block stack
    // ========================================================================

    /// Pushes a block recording the current stack depth; returns the new block depth.
    pub(crate) fn push_block(&mut self, kind: BlockKind, handler: usize) -> usize {
        let level = self.stack.len();
        self.push_block_at(kind, handler, level)
    }

    pub(crate) fn push_block_at(&mut self, kind: BlockKind, handler: usize, level: usize) -> usize {
        self.blocks.push(Block { kind, handler, level });
        self.blocks.len()
    }

    pub(crate) fn pop_block(&mut self) -> RunResult<Block> {
        self.blocks
            .pop()
            .ok_or_else(|| RunError::internal("block stack underflow"))
    }

    /// Tears a block down: truncates the operand stack to the block's level and,
    /// for `ExceptHandler`, restores the previously handled exception from the
    /// three slots it owns.
    pub(crate) fn unwind_block(&mut self, block: &Block) -> RunResult<()> {
        if block.kind == BlockKind::ExceptHandler {
            self.stack.truncate(block.level + 3);
            let exc_type = self.pop()?;
            let value = self.pop()?;
            let traceback = self.pop()?;
            self.handled = triple_from_slots(exc_type, value, traceback);
        }
        self.stack.truncate(block.level);
        Ok(())
    }

    /// Pushes an exception triple as three slots, type on top.
    pub(crate) fn push_triple(&mut self, triple: Option<&ExcTriple>) {
        match triple {
            Some(triple) => {
                self.push(Value::Traceback(triple.traceback.clone().into()));
                self.push(triple.value.clone());
                self.push(triple.exc_type.clone());
            }
            None => {
                self.push(Value::None);
                self.push(Value::None);
                self.push(Value::None);
            }
        }
    }
}

pub(super) fn triple_from_slots(exc_type: Value, value: Value, traceback: Value) -> Option<ExcTriple> {
    if matches!(exc_type, Value::None) {
        return None;
    }
    let traceback = match traceback {
        Value::Traceback(entries) => entries.to_vec(),
        _ => Vec::new(),
    };
    Some(ExcTriple {
        exc_type,
        value,
        traceback,
    })
}

fn stack_underflow() -> RunError {
    RunError::internal("operand stack underflow")
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("code", &self.code.name)
            .field("ip", &self.ip)
            .field("stack", &self.stack)
            .field("blocks", &self.blocks)
            .finish_non_exhaustive()
    }
}
