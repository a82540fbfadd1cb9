//! Code units: immutable compiled program fragments.
//!
//! A [`Code`] holds the raw instruction stream together with its constant pool,
//! the three name pools, flags and a run-length line table. Code units are
//! produced by an external compiler (or by [`CodeBuilder`](super::CodeBuilder))
//! and shared read-only by every function and frame built from them.

use std::{fmt::Write, rc::Rc};

use serde::{Deserialize, Serialize};

use super::op::{CompareOp, Opcode, OperandKind};

/// Flag bits describing how a code unit behaves when called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeFlags(u8);

impl CodeFlags {
    /// Calling this code unit produces a generator instead of running it.
    pub const GENERATOR: Self = Self(0b001);
    /// Surplus positional arguments are collected into a tuple.
    pub const VARARGS: Self = Self(0b010);
    /// Surplus keyword arguments are collected into a dict.
    pub const VARKEYWORDS: Self = Self(0b100);

    /// Returns an empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// An entry of the constant pool.
///
/// Constants are converted to runtime values when `LOAD_CONST` executes. Nested
/// code units (function bodies) are stored as constants too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<[Const]>),
    Code(Rc<Code>),
}

impl From<i64> for Const {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Const {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Const {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Const {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Const {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<Code> for Const {
    fn from(value: Code) -> Self {
        Self::Code(Rc::new(value))
    }
}

/// Error returned when a code unit cannot be encoded or decoded.
#[derive(Debug, Clone)]
pub struct CodeSerdeError(String);

impl std::fmt::Display for CodeSerdeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code unit serialization failed: {}", self.0)
    }
}

impl std::error::Error for CodeSerdeError {}

impl From<postcard::Error> for CodeSerdeError {
    fn from(err: postcard::Error) -> Self {
        Self(err.to_string())
    }
}

/// Immutable compiled program fragment.
///
/// # Name pools
///
/// - `names`: global and attribute names (`LOAD_NAME`, `LOAD_GLOBAL`, `LOAD_ATTR`, ...)
/// - `varnames`: local variable names; the first `argcount` entries are the declared
///   parameters, followed by the `*args` and `**kwargs` collectors when the matching
///   flags are set
/// - `cellvars` + `freevars`: the combined pool addressed by `LOAD_DEREF` and friends;
///   cellvars are owned by this code unit, freevars are captured from an enclosing scope
///
/// # Line table
///
/// `line_table` holds `(offset_delta, line_delta)` pairs. Walking the pairs from
/// `(0, first_line)` yields the line of every instruction offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub(crate) name: Rc<str>,
    pub(crate) bytecode: Vec<u8>,
    pub(crate) consts: Vec<Const>,
    pub(crate) names: Vec<Rc<str>>,
    pub(crate) varnames: Vec<Rc<str>>,
    pub(crate) cellvars: Vec<Rc<str>>,
    pub(crate) freevars: Vec<Rc<str>>,
    pub(crate) argcount: u16,
    pub(crate) flags: CodeFlags,
    pub(crate) first_line: u32,
    pub(crate) line_table: Vec<(u8, i8)>,
}

impl Code {
    /// The code unit's name (function name or `<module>`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw instruction stream.
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// The constant pool.
    #[must_use]
    pub fn consts(&self) -> &[Const] {
        &self.consts
    }

    /// Global and attribute names.
    #[must_use]
    pub fn names(&self) -> &[Rc<str>] {
        &self.names
    }

    /// Local variable names, parameters first.
    #[must_use]
    pub fn varnames(&self) -> &[Rc<str>] {
        &self.varnames
    }

    /// Variables owned by this code unit and captured by nested closures.
    #[must_use]
    pub fn cellvars(&self) -> &[Rc<str>] {
        &self.cellvars
    }

    /// Variables captured from an enclosing scope.
    #[must_use]
    pub fn freevars(&self) -> &[Rc<str>] {
        &self.freevars
    }

    /// Number of declared positional-or-keyword parameters.
    #[must_use]
    pub fn argcount(&self) -> usize {
        usize::from(self.argcount)
    }

    #[must_use]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    /// Returns true if calling this code unit produces a generator.
    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    #[must_use]
    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    /// Returns the name of cell/free slot `index` (cellvars first, then freevars).
    #[must_use]
    pub fn cell_name(&self, index: usize) -> Option<&Rc<str>> {
        match index.checked_sub(self.cellvars.len()) {
            None => self.cellvars.get(index),
            Some(free_index) => self.freevars.get(free_index),
        }
    }

    /// Resolves the source line of the instruction at `offset`.
    #[must_use]
    pub fn line_for_offset(&self, offset: usize) -> u32 {
        let mut line = i64::from(self.first_line);
        let mut addr = 0usize;
        for &(offset_delta, line_delta) in &self.line_table {
            addr += usize::from(offset_delta);
            if addr > offset {
                break;
            }
            line += i64::from(line_delta);
        }
        u32::try_from(line.max(0)).unwrap_or(u32::MAX)
    }

    /// Serializes the code unit to postcard bytes.
    ///
    /// # Errors
    /// Returns the postcard encoder's failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodeSerdeError> {
        postcard::to_allocvec(self).map_err(CodeSerdeError::from)
    }

    /// Decodes a code unit previously produced by [`Code::to_bytes`].
    ///
    /// # Errors
    /// Returns an error for truncated or malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodeSerdeError> {
        postcard::from_bytes(bytes).map_err(CodeSerdeError::from)
    }

    /// Renders a human-readable listing of the instruction stream.
    ///
    /// Nested code units found in the constant pool are listed after this one.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        let _ = writeln!(out, "Disassembly of {}:", self.name);
        let mut ip = 0;
        let mut last_line = None;
        while ip < self.bytecode.len() {
            let offset = ip;
            let line = self.line_for_offset(offset);
            let line_col = if last_line == Some(line) {
                String::new()
            } else {
                line.to_string()
            };
            last_line = Some(line);
            let Ok(opcode) = Opcode::try_from(self.bytecode[ip]) else {
                let _ = writeln!(out, "{line_col:>4} {offset:>6} <invalid {}>", self.bytecode[ip]);
                ip += 1;
                continue;
            };
            ip += 1;
            if !opcode.has_arg() {
                let _ = writeln!(out, "{line_col:>4} {offset:>6} {opcode}");
                continue;
            }
            let Some(bytes) = self.bytecode.get(ip..ip + 2) else {
                let _ = writeln!(out, "{line_col:>4} {offset:>6} {opcode} <truncated>");
                break;
            };
            let arg = u16::from_le_bytes([bytes[0], bytes[1]]);
            ip += 2;
            let detail = self.describe_operand(opcode, arg, ip);
            let _ = writeln!(out, "{line_col:>4} {offset:>6} {opcode:<20} {arg:>5} {detail}");
        }
        for constant in &self.consts {
            if let Const::Code(inner) = constant {
                out.push('\n');
                inner.disassemble_into(out);
            }
        }
    }

    fn describe_operand(&self, opcode: Opcode, arg: u16, next_ip: usize) -> String {
        let index = usize::from(arg);
        match opcode.operand_kind() {
            OperandKind::Const => match self.consts.get(index) {
                Some(Const::Code(code)) => format!("(<code {}>)", code.name),
                Some(other) => format!("({other:?})"),
                None => "(?)".to_owned(),
            },
            OperandKind::Name => format!("({})", self.names.get(index).map_or("?", |n| n)),
            OperandKind::Local => format!("({})", self.varnames.get(index).map_or("?", |n| n)),
            OperandKind::Cell => format!("({})", self.cell_name(index).map_or("?", |n| n)),
            OperandKind::RelativeJump => format!("(to {})", next_ip + index),
            OperandKind::Compare => CompareOp::from_repr(arg.to_le_bytes()[0])
                .map_or_else(|| "(?)".to_owned(), |op| format!("({op})")),
            OperandKind::CallCounts => {
                let [positional, keyword] = arg.to_le_bytes();
                format!("({positional} positional, {keyword} keyword)")
            }
            OperandKind::AbsoluteJump | OperandKind::Count | OperandKind::None => String::new(),
        }
    }
}
