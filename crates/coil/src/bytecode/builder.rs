//! Assembler for code units.
//!
//! The real front-end compiler lives outside this crate. `CodeBuilder` is the
//! small assembler hosts and tests use to produce well-formed code units: it
//! interns names into the right pools, encodes arguments, resolves jump labels
//! and records the line table.

use std::rc::Rc;

use super::{
    code::{Code, CodeFlags, Const},
    op::{CompareOp, Opcode, OperandKind},
};

/// A jump target created by [`CodeBuilder::new_label`] and bound with [`CodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// A jump whose argument is patched once its label is bound.
#[derive(Debug)]
struct PendingJump {
    /// Offset of the two argument bytes.
    arg_offset: usize,
    /// Offset of the next instruction, used for relative jumps.
    next_ip: usize,
    label: Label,
    relative: bool,
}

/// Builder for emitting bytecode.
///
/// # Usage
///
/// ```
/// use coil::{CodeBuilder, Opcode};
///
/// let mut builder = CodeBuilder::new("<module>");
/// builder.load_const(1).load_const(1).emit(Opcode::BinaryAdd).emit(Opcode::ReturnValue);
/// let code = builder.build();
/// assert_eq!(code.name(), "<module>");
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
    name: Rc<str>,
    bytecode: Vec<u8>,
    consts: Vec<Const>,
    names: Vec<Rc<str>>,
    varnames: Vec<Rc<str>>,
    cellvars: Vec<Rc<str>>,
    freevars: Vec<Rc<str>>,
    argcount: u16,
    flags: CodeFlags,
    first_line: u32,

    /// Line of the most recent line-table entry.
    last_line: u32,
    /// Offset of the most recent line-table entry.
    last_line_offset: usize,
    line_table: Vec<(u8, i8)>,

    /// Bound offset of every label, `None` until bound.
    labels: Vec<Option<usize>>,
    pending_jumps: Vec<PendingJump>,
}

impl CodeBuilder {
    /// Creates a builder for a code unit called `name` starting at line 1.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            bytecode: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            argcount: 0,
            flags: CodeFlags::empty(),
            first_line: 1,
            last_line: 1,
            last_line_offset: 0,
            line_table: Vec::new(),
            labels: Vec::new(),
            pending_jumps: Vec::new(),
        }
    }

    /// Declares the positional-or-keyword parameters.
    ///
    /// Must be called before any local variable is referenced so parameters
    /// occupy the first `varnames` slots.
    pub fn params(&mut self, names: &[&str]) -> &mut Self {
        assert!(self.varnames.is_empty(), "parameters must be declared first");
        self.varnames.extend(names.iter().map(|name| Rc::from(*name)));
        self.argcount = u16::try_from(names.len()).expect("too many parameters");
        self
    }

    /// Declares a `*name` collector for surplus positional arguments.
    pub fn varargs(&mut self, name: &str) -> &mut Self {
        self.varnames.push(name.into());
        self.flags = self.flags | CodeFlags::VARARGS;
        self
    }

    /// Declares a `**name` collector for surplus keyword arguments.
    ///
    /// Must come after [`varargs`](Self::varargs) when both are used.
    pub fn varkeywords(&mut self, name: &str) -> &mut Self {
        self.varnames.push(name.into());
        self.flags = self.flags | CodeFlags::VARKEYWORDS;
        self
    }

    /// Marks the code unit as a generator body.
    pub fn generator(&mut self) -> &mut Self {
        self.flags = self.flags | CodeFlags::GENERATOR;
        self
    }

    /// Declares variables owned by this code unit that nested closures capture.
    pub fn cellvars(&mut self, names: &[&str]) -> &mut Self {
        self.cellvars.extend(names.iter().map(|name| Rc::from(*name)));
        self
    }

    /// Declares variables captured from the enclosing scope.
    pub fn freevars(&mut self, names: &[&str]) -> &mut Self {
        self.freevars.extend(names.iter().map(|name| Rc::from(*name)));
        self
    }

    /// Sets the line of the first instruction.
    pub fn first_line(&mut self, line: u32) -> &mut Self {
        self.first_line = line;
        self.last_line = line;
        self
    }

    /// Sets the source line recorded for subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) -> &mut Self {
        if line == self.last_line {
            return self;
        }
        let mut offset_delta = self.bytecode.len() - self.last_line_offset;
        let mut line_delta = i64::from(line) - i64::from(self.last_line);
        while offset_delta > usize::from(u8::MAX) {
            self.line_table.push((u8::MAX, 0));
            offset_delta -= usize::from(u8::MAX);
        }
        while line_delta > i64::from(i8::MAX) {
            self.line_table.push((u8::try_from(offset_delta).unwrap_or(u8::MAX), i8::MAX));
            offset_delta = 0;
            line_delta -= i64::from(i8::MAX);
        }
        while line_delta < i64::from(i8::MIN) {
            self.line_table.push((u8::try_from(offset_delta).unwrap_or(u8::MAX), i8::MIN));
            offset_delta = 0;
            line_delta -= i64::from(i8::MIN);
        }
        self.line_table.push((
            u8::try_from(offset_delta).unwrap_or(u8::MAX),
            i8::try_from(line_delta).unwrap_or(0),
        ));
        self.last_line = line;
        self.last_line_offset = self.bytecode.len();
        self
    }

    /// Emits a no-argument instruction.
    pub fn emit(&mut self, op: Opcode) -> &mut Self {
        assert!(!op.has_arg(), "{op} requires an argument");
        self.bytecode.push(op as u8);
        self
    }

    /// Emits an instruction with a raw u16 argument.
    pub fn emit_arg(&mut self, op: Opcode, arg: u16) -> &mut Self {
        assert!(op.has_arg(), "{op} takes no argument");
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&arg.to_le_bytes());
        self
    }

    /// Adds a constant to the pool, reusing an equal existing entry.
    pub fn add_const(&mut self, constant: impl Into<Const>) -> u16 {
        let constant = constant.into();
        let index = match constant {
            Const::Code(_) => None,
            ref other => self.consts.iter().position(|c| c == other),
        };
        let index = index.unwrap_or_else(|| {
            self.consts.push(constant);
            self.consts.len() - 1
        });
        u16::try_from(index).expect("constant pool exceeds u16 range")
    }

    /// Emits `LOAD_CONST` for `constant`.
    pub fn load_const(&mut self, constant: impl Into<Const>) -> &mut Self {
        let index = self.add_const(constant);
        self.emit_arg(Opcode::LoadConst, index)
    }

    /// Emits `LOAD_CONST None`.
    pub fn load_none(&mut self) -> &mut Self {
        self.load_const(Const::None)
    }

    /// Emits an instruction addressing the name pool (globals and attributes).
    pub fn name_op(&mut self, op: Opcode, name: &str) -> &mut Self {
        debug_assert_eq!(op.operand_kind(), OperandKind::Name);
        let index = intern(&mut self.names, name);
        self.emit_arg(op, index)
    }

    /// Emits an instruction addressing the local-variable pool.
    pub fn local_op(&mut self, op: Opcode, name: &str) -> &mut Self {
        debug_assert_eq!(op.operand_kind(), OperandKind::Local);
        let index = intern(&mut self.varnames, name);
        self.emit_arg(op, index)
    }

    /// Emits an instruction addressing the cell/free pool.
    ///
    /// Unknown names are added as cellvars.
    pub fn deref_op(&mut self, op: Opcode, name: &str) -> &mut Self {
        debug_assert_eq!(op.operand_kind(), OperandKind::Cell);
        let index = if let Some(index) = self.cellvars.iter().position(|n| &**n == name) {
            index
        } else if let Some(index) = self.freevars.iter().position(|n| &**n == name) {
            self.cellvars.len() + index
        } else {
            self.cellvars.push(name.into());
            self.cellvars.len() - 1
        };
        self.emit_arg(op, u16::try_from(index).expect("cell pool exceeds u16 range"))
    }

    /// Emits `COMPARE_OP`.
    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit_arg(Opcode::CompareOp, u16::from(op as u8))
    }

    /// Emits `CALL_FUNCTION` with the given positional and keyword-pair counts.
    pub fn call(&mut self, positional: u8, keyword: u8) -> &mut Self {
        self.emit_arg(Opcode::CallFunction, u16::from_le_bytes([positional, keyword]))
    }

    /// Creates a new, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        assert!(self.labels[label.0].is_none(), "label bound twice");
        self.labels[label.0] = Some(self.bytecode.len());
        self
    }

    /// Returns the offset the next instruction will be emitted at.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Emits a jump-carrying instruction targeting `label`.
    ///
    /// Relative or absolute encoding is chosen from the opcode's operand kind.
    pub fn jump(&mut self, op: Opcode, label: Label) -> &mut Self {
        let relative = match op.operand_kind() {
            OperandKind::RelativeJump => true,
            OperandKind::AbsoluteJump => false,
            other => panic!("{op} is not a jump (operand kind {other:?})"),
        };
        self.emit_arg(op, 0);
        let next_ip = self.bytecode.len();
        self.pending_jumps.push(PendingJump {
            arg_offset: next_ip - 2,
            next_ip,
            label,
            relative,
        });
        self
    }

    /// Finishes the code unit, patching every jump.
    ///
    /// # Panics
    /// Panics if a referenced label was never bound or a relative jump points backwards.
    #[must_use]
    pub fn build(mut self) -> Code {
        for jump in std::mem::take(&mut self.pending_jumps) {
            let target = self.labels[jump.label.0].expect("jump label was never bound");
            let arg = if jump.relative {
                target
                    .checked_sub(jump.next_ip)
                    .expect("relative jumps must point forwards")
            } else {
                target
            };
            let arg = u16::try_from(arg).expect("jump target exceeds u16 range");
            self.bytecode[jump.arg_offset..jump.arg_offset + 2].copy_from_slice(&arg.to_le_bytes());
        }
        Code {
            name: self.name,
            bytecode: self.bytecode,
            consts: self.consts,
            names: self.names,
            varnames: self.varnames,
            cellvars: self.cellvars,
            freevars: self.freevars,
            argcount: self.argcount,
            flags: self.flags,
            first_line: self.first_line,
            line_table: self.line_table,
        }
    }
}

/// Returns the index of `name` in `pool`, appending it if missing.
fn intern(pool: &mut Vec<Rc<str>>, name: &str) -> u16 {
    let index = pool.iter().position(|n| &**n == name).unwrap_or_else(|| {
        pool.push(name.into());
        pool.len() - 1
    });
    u16::try_from(index).expect("name pool exceeds u16 range")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn forward_and_backward_jumps_are_patched() {
        let mut builder = CodeBuilder::new("f");
        let top = builder.new_label();
        let end = builder.new_label();
        builder.bind(top);
        builder.jump(Opcode::JumpForward, end);
        builder.jump(Opcode::JumpAbsolute, top);
        builder.bind(end);
        builder.emit(Opcode::ReturnValue);
        let code = builder.build();
        // JUMP_FORWARD 3 skips the JUMP_ABSOLUTE, which targets offset 0
        assert_eq!(code.bytecode(), &[110, 3, 0, 113, 0, 0, 83]);
    }

    #[test]
    fn line_table_tracks_offsets() {
        let mut builder = CodeBuilder::new("f");
        builder.first_line(10);
        builder.load_none();
        builder.set_line(12);
        builder.emit(Opcode::PopTop);
        builder.set_line(11);
        builder.load_none().emit(Opcode::ReturnValue);
        let code = builder.build();
        assert_eq!(code.line_for_offset(0), 10);
        assert_eq!(code.line_for_offset(3), 12);
        assert_eq!(code.line_for_offset(4), 11);
        assert_eq!(code.line_for_offset(7), 11);
    }

    #[test]
    fn constants_and_names_are_deduplicated() {
        let mut builder = CodeBuilder::new("f");
        builder.load_const(7).load_const(7).load_const("x");
        builder.name_op(Opcode::LoadName, "a").name_op(Opcode::StoreName, "a");
        let code = builder.build();
        assert_eq!(code.consts().len(), 2);
        assert_eq!(code.names().len(), 1);
    }

    #[test]
    fn parameters_occupy_the_first_local_slots() {
        let mut builder = CodeBuilder::new("f");
        builder.params(&["a", "b"]).varargs("rest");
        builder.local_op(Opcode::LoadFast, "tmp");
        let code = builder.build();
        let names: Vec<&str> = code.varnames().iter().map(|n| &**n).collect();
        assert_eq!(names, vec!["a", "b", "rest", "tmp"]);
        assert_eq!(code.argcount(), 2);
        assert!(code.flags().contains(CodeFlags::VARARGS));
    }
}
