use std::{cell::RefCell, fmt, rc::Rc};

use crate::value::Value;

/// A shared mutable slot holding one variable captured by a closure.
///
/// Cells are created empty for every cellvar when a frame starts (pre-filled when
/// the cellvar names a parameter) and are shared by reference with the closures
/// that capture them, so a store through any holder is visible to all.
#[derive(Clone, Default)]
pub struct Cell(Rc<RefCell<Option<Value>>>);

impl Cell {
    #[must_use]
    pub fn new(value: Option<Value>) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Returns the current content, or `None` while the cell is empty.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = Some(value);
    }

    /// Empties the cell, returning its previous content.
    pub fn clear(&self) -> Option<Value> {
        self.0.borrow_mut().take()
    }

    /// Returns true if both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).addr()
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0.borrow() {
            Some(value) => write!(f, "<cell: {} object>", value.py_type_name()),
            None => f.write_str("<cell: empty>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_content() {
        let cell = Cell::default();
        let captured = cell.clone();
        assert_eq!(cell.get(), None);
        captured.set(Value::Int(3));
        assert_eq!(cell.get(), Some(Value::Int(3)));
        assert!(cell.ptr_eq(&captured));
        assert_eq!(cell.clear(), Some(Value::Int(3)));
        assert_eq!(captured.get(), None);
    }
}
