use std::{fmt, str::FromStr};

/// Type tag of built-in values.
///
/// Instances of user classes report their class and exception values report their
/// [`ExcType`](crate::ExcType); every other value maps to one of these tags. The
/// tags listed in [`Type::CONSTRUCTORS`] double as the callable `int`, `str`, ... builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    List,
    Dict,
    Type,
    Function,
    Method,
    BuiltinFunction,
    Generator,
    Iterator,
    Cell,
    Code,
    Module,
    Traceback,
    /// Control-flow marker left on the operand stack by the unwinder.
    Marker,
}

impl Type {
    /// Types exposed by name in the builtins namespace.
    pub(crate) const CONSTRUCTORS: [Self; 8] = [
        Self::Bool,
        Self::Int,
        Self::Float,
        Self::Str,
        Self::Tuple,
        Self::List,
        Self::Dict,
        Self::Type,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoneType => "NoneType",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Tuple => "tuple",
            Self::List => "list",
            Self::Dict => "dict",
            Self::Type => "type",
            Self::Function => "function",
            Self::Method => "method",
            Self::BuiltinFunction => "builtin_function_or_method",
            Self::Generator => "generator",
            Self::Iterator => "iterator",
            Self::Cell => "cell",
            Self::Code => "code",
            Self::Module => "module",
            Self::Traceback => "traceback",
            Self::Marker => "why",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the name of a constructor type.
impl FromStr for Type {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::CONSTRUCTORS.into_iter().find(|t| t.as_str() == s).ok_or(())
    }
}
