use std::{fmt, rc::Rc};

use crate::namespace::Namespace;

/// A module object, as returned by an import hook.
pub struct Module {
    pub(crate) name: Rc<str>,
    pub(crate) namespace: Namespace,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>, namespace: Namespace) -> Self {
        Self {
            name: name.into(),
            namespace,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<module '{}'>", self.name)
    }
}
