//! Opcode definitions for the bytecode VM.
//!
//! Every instruction is either a bare opcode byte or, for opcodes numbered at or
//! above [`HAVE_ARGUMENT`], an opcode byte followed by a two-byte little-endian
//! argument. How the argument is interpreted depends on the opcode and is
//! described by [`OperandKind`].

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr, IntoStaticStr};

/// Opcodes numbered at or above this value carry a u16 argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// Bytecode instruction opcodes.
///
/// Numbering follows the classic stack-machine layout so that an external compiler
/// can target it directly. Opcodes below [`HAVE_ARGUMENT`] take no argument.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // ==========================================================================
    // Stack manipulation
    // ==========================================================================
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    Nop = 9,

    // ==========================================================================
    // Unary and binary operators
    // ==========================================================================
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,

    // ==========================================================================
    // Block teardown and frame exits
    // ==========================================================================
    BreakLoop = 80,
    WithCleanup = 81,
    ReturnValue = 83,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    PopExcept = 89,

    // ==========================================================================
    // Opcodes with an argument
    // ==========================================================================
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    SetupWith = 143,
    BuildClass = 150,
}

/// How an opcode's u16 argument is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// The opcode takes no argument.
    None,
    /// Index into the constant pool.
    Const,
    /// Index into the global/attribute name pool.
    Name,
    /// Index into the local-variable name pool.
    Local,
    /// Index into the combined cell/free-variable pool (cellvars first).
    Cell,
    /// Jump offset relative to the start of the next instruction.
    RelativeJump,
    /// Absolute jump target (byte offset).
    AbsoluteJump,
    /// Raw integer count.
    Count,
    /// A [`CompareOp`] discriminant.
    Compare,
    /// Call counts: low byte positional, high byte keyword pairs.
    CallCounts,
}

impl Opcode {
    /// Returns true if the opcode is followed by a u16 argument.
    #[must_use]
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// Returns the encoded size of the instruction in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        if self.has_arg() { 3 } else { 1 }
    }

    /// Describes how the argument of this opcode is interpreted.
    #[must_use]
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Self::LoadConst => OperandKind::Const,
            Self::StoreName
            | Self::DeleteName
            | Self::LoadName
            | Self::StoreAttr
            | Self::DeleteAttr
            | Self::LoadAttr
            | Self::StoreGlobal
            | Self::DeleteGlobal
            | Self::LoadGlobal
            | Self::ImportName
            | Self::ImportFrom => OperandKind::Name,
            Self::LoadFast | Self::StoreFast | Self::DeleteFast => OperandKind::Local,
            Self::LoadClosure | Self::LoadDeref | Self::StoreDeref => OperandKind::Cell,
            Self::ForIter
            | Self::JumpForward
            | Self::SetupLoop
            | Self::SetupExcept
            | Self::SetupFinally
            | Self::SetupWith => OperandKind::RelativeJump,
            Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::JumpAbsolute
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::ContinueLoop => OperandKind::AbsoluteJump,
            Self::CompareOp => OperandKind::Compare,
            Self::CallFunction => OperandKind::CallCounts,
            Self::UnpackSequence
            | Self::BuildTuple
            | Self::BuildList
            | Self::BuildMap
            | Self::RaiseVarargs
            | Self::MakeFunction
            | Self::MakeClosure
            | Self::BuildClass => OperandKind::Count,
            _ => OperandKind::None,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(byte)
    }
}

/// Comparison kinds carried by `COMPARE_OP`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, Serialize, Deserialize)]
pub enum CompareOp {
    #[strum(serialize = "<")]
    Lt = 0,
    #[strum(serialize = "<=")]
    Le = 1,
    #[strum(serialize = "==")]
    Eq = 2,
    #[strum(serialize = "!=")]
    Ne = 3,
    #[strum(serialize = ">")]
    Gt = 4,
    #[strum(serialize = ">=")]
    Ge = 5,
    #[strum(serialize = "in")]
    In = 6,
    #[strum(serialize = "not in")]
    NotIn = 7,
    #[strum(serialize = "is")]
    Is = 8,
    #[strum(serialize = "is not")]
    IsNot = 9,
    #[strum(serialize = "exception match")]
    ExceptionMatch = 10,
}
