use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::value::Value;

type NamespaceMap = IndexMap<Rc<str>, Value, ahash::RandomState>;

/// A shared name-to-value mapping: the globals, locals or builtins of a frame.
///
/// Cloning a `Namespace` clones the handle, not the contents. Module code runs
/// with the same namespace as both globals and locals, and every function
/// defined in a module shares that module's globals. Insertion order is kept so
/// class attributes and listings come out in definition order.
#[derive(Clone, Default)]
pub struct Namespace(Rc<RefCell<NamespaceMap>>);

impl Namespace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<Rc<str>>, value: Value) {
        self.0.borrow_mut().insert(name.into(), value);
    }

    /// Removes a binding, returning the old value.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Returns the bound names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<Rc<str>> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Returns a snapshot of every binding in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.0.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Returns true if both handles refer to the same mapping.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<K: Into<Rc<str>>> FromIterator<(K, Value)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let map: NamespaceMap = iter.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self(Rc::new(RefCell::new(map)))
    }
}

/// Lists names only: values may refer back to this namespace.
impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.borrow().keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_bindings() {
        let globals = Namespace::new();
        let alias = globals.clone();
        alias.set("x", Value::Int(1));
        assert_eq!(globals.get("x"), Some(Value::Int(1)));
        assert!(globals.ptr_eq(&alias));
        assert!(!globals.ptr_eq(&Namespace::new()));
    }

    #[test]
    fn remove_keeps_order_of_remaining_names() {
        let ns: Namespace = [("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))]
            .into_iter()
            .collect();
        assert_eq!(ns.remove("b"), Some(Value::Int(2)));
        let names: Vec<String> = ns.names().iter().map(ToString::to_string).collect();
        assert_eq!(names, ["a", "c"]);
    }
}
