use std::{
    cell::RefCell,
    fmt::{self, Write},
    rc::Rc,
};

use crate::{
    builtins::{BuiltinFunction, GeneratorMethod},
    bytecode::{Code, Const, WhyMarker},
    exception_private::{ExcType, SimpleException},
    exception_public::StackFrame,
    types::{Cell, Class, Dict, Function, Generator, HostFunction, Instance, Method, Module, Type, ValueIter},
};

/// Nesting depth at which `repr` stops descending into containers.
const MAX_REPR_DEPTH: usize = 32;

/// Runtime value.
///
/// Immediate values (`None`, `Bool`, `Int`, `Float`) are stored inline; everything
/// else is reference counted. Immutable objects share `Rc` data, mutable ones add
/// a `RefCell`, so cloning a `Value` never copies an object.
///
/// Equality (`PartialEq`) follows program semantics: numbers compare across kinds,
/// containers compare element-wise and every other object compares by identity.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<[Value]>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Dict>>),
    Function(Rc<Function>),
    Method(Rc<Method>),
    Generator(Rc<Generator>),
    /// `send`, `throw` or `close` bound to a generator.
    GeneratorMethod(Rc<Generator>, GeneratorMethod),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Cell(Cell),
    Code(Rc<Code>),
    Builtin(BuiltinFunction),
    HostFunction(Rc<HostFunction>),
    /// A built-in type such as `int`; callable as a constructor.
    Type(Type),
    /// A built-in exception type; callable to create an exception instance.
    ExcType(ExcType),
    /// An instance of a built-in exception type.
    Exception(Rc<SimpleException>),
    Iterator(Rc<RefCell<ValueIter>>),
    Module(Rc<Module>),
    Traceback(Rc<[StackFrame]>),
    /// Control-flow marker pushed by the unwinder for `END_FINALLY`/`WITH_CLEANUP`.
    Why(WhyMarker),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl Value {
    #[must_use]
    pub fn new_list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn new_tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    #[must_use]
    pub fn new_dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    pub(crate) fn new_iter(iter: ValueIter) -> Self {
        Self::Iterator(Rc::new(RefCell::new(iter)))
    }

    /// Wraps a host closure as a callable value.
    pub fn host_function(
        name: impl Into<Rc<str>>,
        func: impl Fn(&[Self]) -> Result<Self, crate::Exception> + 'static,
    ) -> Self {
        Self::HostFunction(Rc::new(HostFunction::new(name, func)))
    }

    /// Converts a constant-pool entry to a runtime value.
    #[must_use]
    pub fn from_const(constant: &Const) -> Self {
        match constant {
            Const::None => Self::None,
            Const::Bool(b) => Self::Bool(*b),
            Const::Int(i) => Self::Int(*i),
            Const::Float(f) => Self::Float(*f),
            Const::Str(s) => Self::Str(s.clone()),
            Const::Tuple(items) => Self::Tuple(items.iter().map(Self::from_const).collect()),
            Const::Code(code) => Self::Code(code.clone()),
        }
    }

    /// Returns the built-in type tag, or `None` for instances and exceptions whose
    /// type is a class or exception type.
    #[must_use]
    pub fn py_type(&self) -> Option<Type> {
        Some(match self {
            Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::Str(_) => Type::Str,
            Self::Tuple(_) => Type::Tuple,
            Self::List(_) => Type::List,
            Self::Dict(_) => Type::Dict,
            Self::Function(_) => Type::Function,
            Self::Method(_) => Type::Method,
            Self::Generator(_) => Type::Generator,
            Self::GeneratorMethod(..) | Self::Builtin(_) | Self::HostFunction(_) => Type::BuiltinFunction,
            Self::Class(_) | Self::Type(_) | Self::ExcType(_) => Type::Type,
            Self::Cell(_) => Type::Cell,
            Self::Code(_) => Type::Code,
            Self::Iterator(_) => Type::Iterator,
            Self::Module(_) => Type::Module,
            Self::Traceback(_) => Type::Traceback,
            Self::Why(_) => Type::Marker,
            Self::Instance(_) | Self::Exception(_) => return None,
        })
    }

    /// Returns the type of this value as a value: the class of an instance, the
    /// exception type of an exception, or a built-in type tag.
    #[must_use]
    pub fn type_value(&self) -> Self {
        match self {
            Self::Instance(instance) => Self::Class(instance.class.clone()),
            Self::Exception(exc) => Self::ExcType(exc.exc_type()),
            other => Self::Type(other.py_type().unwrap_or(Type::Type)),
        }
    }

    /// Name of this value's type, as used in error messages.
    #[must_use]
    pub fn py_type_name(&self) -> String {
        match self {
            Self::Instance(instance) => instance.class.name.to_string(),
            Self::Exception(exc) => exc.exc_type().to_string(),
            other => other.py_type().unwrap_or(Type::Type).to_string(),
        }
    }

    /// Name of a type value (class, exception type or type tag).
    #[must_use]
    pub fn type_display_name(&self) -> String {
        match self {
            Self::Class(class) => class.name.to_string(),
            Self::ExcType(exc_type) => exc_type.to_string(),
            Self::Type(t) => t.to_string(),
            other => other.py_repr(),
        }
    }

    /// The built-in exception type a type value derives from, if any.
    #[must_use]
    pub fn exc_type_base(&self) -> Option<ExcType> {
        match self {
            Self::ExcType(exc_type) => Some(*exc_type),
            Self::Class(class) => class.exc_base(),
            _ => None,
        }
    }

    /// Returns true if this value can be raised: an exception instance, an
    /// exception type, or an instance/subclass of an exception class.
    #[must_use]
    pub fn is_raisable(&self) -> bool {
        match self {
            Self::Exception(_) | Self::ExcType(_) => true,
            Self::Class(class) => class.is_exception_class(),
            Self::Instance(instance) => instance.class.is_exception_class(),
            _ => false,
        }
    }

    /// Arguments an exception was created with.
    #[must_use]
    pub fn exception_args(&self) -> Vec<Self> {
        match self {
            Self::Exception(exc) => exc.args().to_vec(),
            Self::Instance(instance) => match instance.get_own("args") {
                Some(Self::Tuple(items)) => items.to_vec(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Renders an exception value the way `str(exc)` would.
    #[must_use]
    pub fn exception_message(&self) -> String {
        match self {
            Self::Exception(_) | Self::Instance(_) => match self.exception_args().as_slice() {
                [] => String::new(),
                [single] => single.py_str(),
                many => Self::new_tuple(many.to_vec()).py_repr(),
            },
            other => other.py_str(),
        }
    }

    /// Truthiness used by conditional jumps and `not`.
    #[must_use]
    pub fn py_bool(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Dict(dict) => !dict.borrow().is_empty(),
            _ => true,
        }
    }

    /// Value equality (`==`).
    #[must_use]
    #[expect(clippy::float_cmp, reason = "mixed int/float equality")]
    pub fn py_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Float(f), other) | (other, Self::Float(f)) => other.as_int().is_some_and(|i| i as f64 == *f),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow()),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b) || dict_eq(&a.borrow(), &b.borrow()),
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Why(a), Self::Why(b)) => a == b,
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.is(b),
            },
        }
    }

    /// Identity comparison (`is`).
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Why(a), Self::Why(b)) => a == b,
            (Self::GeneratorMethod(a, m), Self::GeneratorMethod(b, n)) => Rc::ptr_eq(a, b) && m == n,
            (a, b) if a.is_object() && b.is_object() => a.identity() == b.identity(),
            _ => false,
        }
    }

    fn is_object(&self) -> bool {
        !matches!(
            self,
            Self::None
                | Self::Bool(_)
                | Self::Int(_)
                | Self::Float(_)
                | Self::Str(_)
                | Self::Type(_)
                | Self::ExcType(_)
                | Self::Builtin(_)
                | Self::Why(_)
                | Self::GeneratorMethod(..)
        )
    }

    /// Stable identity used for identity hashing.
    ///
    /// Reference-counted objects use their address; singleton-like values get a
    /// small tagged code that cannot collide with an (aligned) address.
    #[must_use]
    #[expect(clippy::cast_possible_truncation, reason = "identities only need to be distinct, not reversible")]
    pub(crate) fn identity(&self) -> usize {
        fn addr<T: ?Sized>(rc: &Rc<T>) -> usize {
            Rc::as_ptr(rc).cast::<u8>().addr()
        }
        match self {
            Self::Tuple(rc) => addr(rc),
            Self::List(rc) => addr(rc),
            Self::Dict(rc) => addr(rc),
            Self::Function(rc) => addr(rc),
            Self::Method(rc) => addr(rc),
            Self::Generator(rc) | Self::GeneratorMethod(rc, _) => addr(rc),
            Self::Class(rc) => addr(rc),
            Self::Instance(rc) => addr(rc),
            Self::Cell(cell) => cell.addr(),
            Self::Code(rc) => addr(rc),
            Self::HostFunction(rc) => addr(rc),
            Self::Exception(rc) => addr(rc),
            Self::Iterator(rc) => addr(rc),
            Self::Module(rc) => addr(rc),
            Self::Traceback(rc) => addr(rc),
            Self::Str(rc) => addr(rc),
            Self::Type(t) => (*t as usize) << 3 | 1,
            Self::ExcType(t) => (*t as usize) << 3 | 2,
            Self::Builtin(b) => (*b as usize) << 3 | 3,
            Self::Why(_) => 4,
            Self::None => 5,
            Self::Bool(b) => usize::from(*b) << 3 | 6,
            Self::Int(i) => (i.unsigned_abs() as usize) << 3 | 7,
            Self::Float(f) => (f.to_bits() as usize) << 3 | 7,
        }
    }

    /// Integer view of ints and bools.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Numeric view of ints, bools and floats.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `str(value)`: strings render bare, everything else as its repr.
    #[must_use]
    pub fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(_) => self.exception_message(),
            Self::Instance(instance) if instance.class.is_exception_class() => self.exception_message(),
            other => other.py_repr(),
        }
    }

    /// `repr(value)`.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.repr_fmt(&mut out, 0);
        out
    }

    fn repr_fmt(&self, f: &mut impl Write, depth: usize) -> fmt::Result {
        if depth > MAX_REPR_DEPTH {
            return f.write_str("...");
        }
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => float_repr_fmt(*x, f),
            Self::Str(s) => string_repr_fmt(s, f),
            Self::Tuple(items) => {
                f.write_char('(')?;
                seq_repr_fmt(items, f, depth)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::List(items) => {
                f.write_char('[')?;
                seq_repr_fmt(&items.borrow(), f, depth)?;
                f.write_char(']')
            }
            Self::Dict(dict) => {
                f.write_char('{')?;
                for (i, (key, value)) in dict.borrow().items().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    key.repr_fmt(f, depth + 1)?;
                    f.write_str(": ")?;
                    value.repr_fmt(f, depth + 1)?;
                }
                f.write_char('}')
            }
            Self::Function(func) => write!(f, "<function {}>", func.name),
            Self::Method(method) => match &method.receiver {
                Some(receiver) => {
                    write!(f, "<bound method {}.{} of ", method.class.name, method.function.name)?;
                    receiver.repr_fmt(f, depth + 1)?;
                    f.write_char('>')
                }
                None => write!(f, "<unbound method {}.{}>", method.class.name, method.function.name),
            },
            Self::Generator(generator) => write!(f, "<generator object {}>", generator.name),
            Self::GeneratorMethod(generator, method) => {
                write!(f, "<built-in method {method} of generator object {}>", generator.name)
            }
            Self::Class(class) => write!(f, "<class '{}'>", class.name),
            Self::Instance(instance) if instance.class.is_exception_class() => {
                f.write_str(&instance.class.name)?;
                exception_args_repr_fmt(&self.exception_args(), f, depth)
            }
            Self::Instance(instance) => write!(f, "<{} object>", instance.class.name),
            Self::Cell(cell) => write!(f, "{cell:?}"),
            Self::Code(code) => write!(f, "<code object {}>", code.name),
            Self::Builtin(builtin) => write!(f, "<built-in function {builtin}>"),
            Self::HostFunction(func) => write!(f, "<built-in function {}>", func.name),
            Self::Type(t) => write!(f, "<class '{t}'>"),
            Self::ExcType(exc_type) => write!(f, "<class '{exc_type}'>"),
            Self::Exception(exc) => {
                write!(f, "{}", exc.exc_type())?;
                exception_args_repr_fmt(exc.args(), f, depth)
            }
            Self::Iterator(_) => f.write_str("<iterator object>"),
            Self::Module(module) => write!(f, "<module '{}'>", module.name),
            Self::Traceback(entries) => write!(f, "<traceback object ({} frames)>", entries.len()),
            Self::Why(marker) => write!(f, "<why {marker:?}>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

/// Renders the repr; objects print shallowly so cycles cannot recurse.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.repr_fmt(f, 0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.py_str())
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn dict_eq(a: &Dict, b: &Dict) -> bool {
    a.len() == b.len()
        && a.items()
            .all(|(key, value)| matches!(b.get(key), Ok(Some(other)) if other.py_eq(value)))
}

fn seq_repr_fmt(items: &[Value], f: &mut impl Write, depth: usize) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.repr_fmt(f, depth + 1)?;
    }
    Ok(())
}

fn exception_args_repr_fmt(args: &[Value], f: &mut impl Write, depth: usize) -> fmt::Result {
    f.write_char('(')?;
    seq_repr_fmt(args, f, depth)?;
    f.write_char(')')
}

/// Writes a float the way the language prints it: `1.0`, `0.1`, `1e+20`, `inf`.
fn float_repr_fmt(x: f64, f: &mut impl Write) -> fmt::Result {
    if x.is_nan() {
        f.write_str("nan")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "inf" } else { "-inf" })
    } else if x != 0.0 && (x.abs() >= 1e16 || x.abs() < 1e-4) {
        let s = format!("{x:e}");
        match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => write!(f, "{mantissa}e+{exp:0>2}"),
            Some((mantissa, exp)) => write!(f, "{mantissa}e-{:0>2}", &exp[1..]),
            None => f.write_str(&s),
        }
    } else if x.fract() == 0.0 {
        write!(f, "{x:.1}")
    } else {
        write!(f, "{x}")
    }
}

/// Writes a quoted string literal, preferring single quotes.
fn string_repr_fmt(s: &str, f: &mut impl Write) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn repr_matches_language_conventions() {
        assert_eq!(Value::Float(1.0).py_repr(), "1.0");
        assert_eq!(Value::Float(0.5).py_repr(), "0.5");
        assert_eq!(Value::Float(1e20).py_repr(), "1e+20");
        assert_eq!(Value::from("it's").py_repr(), "\"it's\"");
        assert_eq!(Value::new_tuple(vec![Value::Int(1)]).py_repr(), "(1,)");
        assert_eq!(
            Value::new_list(vec![Value::None, Value::Bool(true), Value::from("a")]).py_repr(),
            "[None, True, 'a']"
        );
        let exc = Value::Exception(Rc::new(SimpleException::new_msg(ExcType::KeyError, "k")));
        assert_eq!(exc.py_repr(), "KeyError('k')");
        assert_eq!(exc.py_str(), "k");
    }

    #[test]
    fn equality_crosses_numeric_kinds() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(
            Value::new_tuple(vec![Value::Int(1), Value::from("x")]),
            Value::new_tuple(vec![Value::Float(1.0), Value::from("x")])
        );
    }

    #[test]
    fn self_referencing_list_repr_terminates() {
        let list = Value::new_list(vec![]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert!(list.py_repr().contains("..."));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::None.py_bool());
        assert!(!Value::from("").py_bool());
        assert!(Value::new_tuple(vec![Value::None]).py_bool());
        assert!(!Value::Float(0.0).py_bool());
    }

    #[test]
    fn type_values() {
        assert_eq!(Value::Int(3).type_value(), Value::Type(Type::Int));
        let exc = Value::Exception(Rc::new(SimpleException::new(ExcType::ValueError, vec![])));
        assert_eq!(exc.type_value(), Value::ExcType(ExcType::ValueError));
        assert_eq!(Value::None.py_type_name(), "NoneType");
    }
}
