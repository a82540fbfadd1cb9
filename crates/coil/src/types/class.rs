use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{exception_private::ExcType, value::Value};

pub(crate) type AttrMap = IndexMap<Rc<str>, Value, ahash::RandomState>;

/// A user-defined class produced by `BUILD_CLASS`.
///
/// Bases are other classes or built-in exception types; a class deriving from an
/// exception type can be raised and caught like one.
pub struct Class {
    pub(crate) name: Rc<str>,
    pub(crate) bases: Vec<Value>,
    pub(crate) attrs: RefCell<AttrMap>,
}

impl Class {
    #[must_use]
    pub fn new(name: Rc<str>, bases: Vec<Value>, attrs: impl IntoIterator<Item = (Rc<str>, Value)>) -> Self {
        Self {
            name,
            bases,
            attrs: RefCell::new(attrs.into_iter().collect()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bases(&self) -> &[Value] {
        &self.bases
    }

    /// Reads an attribute defined directly on this class.
    #[must_use]
    pub fn get_own(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn set_attr(&self, name: impl Into<Rc<str>>, value: Value) {
        self.attrs.borrow_mut().insert(name.into(), value);
    }

    pub(crate) fn remove_attr(&self, name: &str) -> Option<Value> {
        self.attrs.borrow_mut().shift_remove(name)
    }

    /// Finds an attribute on this class or its bases, depth-first in base order.
    ///
    /// Returns the value together with the class it was defined on.
    #[must_use]
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<(Value, Rc<Self>)> {
        if let Some(value) = self.get_own(name) {
            return Some((value, self.clone()));
        }
        self.bases.iter().find_map(|base| match base {
            Value::Class(base) => base.lookup(name),
            _ => None,
        })
    }

    /// Returns true if `other` is this class or one of its (transitive) bases.
    #[must_use]
    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Self>) -> bool {
        Rc::ptr_eq(self, other)
            || self.bases.iter().any(|base| match base {
                Value::Class(base) => base.is_subclass_of(other),
                _ => false,
            })
    }

    /// Returns the first built-in exception type among the (transitive) bases.
    #[must_use]
    pub fn exc_base(&self) -> Option<ExcType> {
        self.bases.iter().find_map(|base| match base {
            Value::ExcType(exc_type) => Some(*exc_type),
            Value::Class(base) => base.exc_base(),
            _ => None,
        })
    }

    /// Returns true if instances of this class may be raised.
    #[must_use]
    pub fn is_exception_class(&self) -> bool {
        self.exc_base().is_some()
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

/// An instance of a user-defined class with its own attribute dict.
pub struct Instance {
    pub(crate) class: Rc<Class>,
    pub(crate) attrs: RefCell<AttrMap>,
}

impl Instance {
    #[must_use]
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            attrs: RefCell::new(AttrMap::default()),
        }
    }

    #[must_use]
    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }

    /// Reads an attribute from the instance dict only.
    #[must_use]
    pub fn get_own(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn set_attr(&self, name: impl Into<Rc<str>>, value: Value) {
        self.attrs.borrow_mut().insert(name.into(), value);
    }

    pub(crate) fn remove_attr(&self, name: &str) -> Option<Value> {
        self.attrs.borrow_mut().shift_remove(name)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object>", self.class.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, bases: Vec<Value>) -> Rc<Class> {
        Rc::new(Class::new(name.into(), bases, []))
    }

    #[test]
    fn lookup_searches_bases_depth_first() {
        let root = class("Root", vec![]);
        root.set_attr("x", Value::Int(1));
        let left = class("Left", vec![Value::Class(root.clone())]);
        let right = class("Right", vec![]);
        right.set_attr("x", Value::Int(2));
        let child = class("Child", vec![Value::Class(left.clone()), Value::Class(right)]);

        let (value, owner) = child.lookup("x").unwrap();
        assert_eq!(value, Value::Int(1));
        assert!(Rc::ptr_eq(&owner, &root));
        assert!(child.is_subclass_of(&root));
        assert!(!root.is_subclass_of(&left));
    }

    #[test]
    fn exception_bases_are_found_transitively() {
        let base = class("AppError", vec![Value::ExcType(ExcType::ValueError)]);
        let child = class("ConfigError", vec![Value::Class(base)]);
        assert_eq!(child.exc_base(), Some(ExcType::ValueError));
        assert!(!class("Plain", vec![]).is_exception_class());
    }
}
