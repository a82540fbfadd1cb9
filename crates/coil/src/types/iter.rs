use std::{cell::RefCell, rc::Rc};

use crate::value::Value;

/// Iterator over a built-in sequence or range.
///
/// Generators are their own iterators and never appear here.
#[derive(Debug, Clone)]
pub enum ValueIter {
    /// Walks an immutable snapshot (tuple items, string characters, dict keys).
    Sequence { items: Rc<[Value]>, index: usize },
    /// Walks a list live, observing appends made during iteration.
    List { list: Rc<RefCell<Vec<Value>>>, index: usize },
    /// Counts from `next` towards `stop` by `step`.
    Range { next: i64, stop: i64, step: i64 },
}

impl ValueIter {
    /// Creates a range iterator; `step` must be non-zero.
    #[must_use]
    pub fn range(start: i64, stop: i64, step: i64) -> Self {
        Self::Range { next: start, stop, step }
    }
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Sequence { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
            Self::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                *index += 1;
                item
            }
            Self::Range { next, stop, step } => {
                let live = if *step > 0 { *next < *stop } else { *next > *stop };
                if !live {
                    return None;
                }
                let current = *next;
                match next.checked_add(*step) {
                    Some(value) => *next = value,
                    None => *next = *stop,
                }
                Some(Value::Int(current))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_count_in_both_directions() {
        let up: Vec<Value> = ValueIter::range(0, 3, 1).collect();
        assert_eq!(up, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
        let down: Vec<Value> = ValueIter::range(3, 0, -2).collect();
        assert_eq!(down, vec![Value::Int(3), Value::Int(1)]);
        assert_eq!(ValueIter::range(5, 5, 1).next(), None);
    }

    #[test]
    fn list_iteration_sees_appends() {
        let list = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let mut iter = ValueIter::List { list: list.clone(), index: 0 };
        assert_eq!(iter.next(), Some(Value::Int(1)));
        list.borrow_mut().push(Value::Int(2));
        assert_eq!(iter.next(), Some(Value::Int(2)));
        assert_eq!(iter.next(), None);
    }
}
