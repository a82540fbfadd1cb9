use std::{fmt, rc::Rc};

use crate::{bytecode::Code, namespace::Namespace, types::Class, types::Cell, value::Value};

/// A user-defined function: a code unit plus the environment it closes over.
pub struct Function {
    pub(crate) name: Rc<str>,
    pub(crate) code: Rc<Code>,
    pub(crate) globals: Namespace,
    /// Default values for the trailing parameters.
    pub(crate) defaults: Vec<Value>,
    /// Cells captured from the enclosing scope, one per freevar of `code`.
    pub(crate) closure: Vec<Cell>,
}

impl Function {
    #[must_use]
    pub fn new(name: Rc<str>, code: Rc<Code>, globals: Namespace, defaults: Vec<Value>, closure: Vec<Cell>) -> Self {
        Self {
            name,
            code,
            globals,
            defaults,
            closure,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn code(&self) -> &Rc<Code> {
        &self.code
    }

    #[must_use]
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    #[must_use]
    pub fn defaults(&self) -> &[Value] {
        &self.defaults
    }

    #[must_use]
    pub fn closure(&self) -> &[Cell] {
        &self.closure
    }

    /// Descriptor get: functions found on a class become methods.
    ///
    /// Looked up through an instance the method is bound to it; looked up through
    /// the class it stays unbound and checks its first argument when called.
    #[must_use]
    pub fn descriptor_get(self: &Rc<Self>, instance: Option<&Value>, owner: &Rc<Class>) -> Value {
        Value::Method(Rc::new(Method {
            function: self.clone(),
            receiver: instance.cloned(),
            class: owner.clone(),
        }))
    }
}

/// Omits globals and closure contents, which can refer back to the function.
impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("defaults", &self.defaults.len())
            .field("closure", &self.closure.len())
            .finish_non_exhaustive()
    }
}

/// A function obtained through a class, optionally bound to a receiver.
pub struct Method {
    pub(crate) function: Rc<Function>,
    /// `None` for an unbound method.
    pub(crate) receiver: Option<Value>,
    /// The class the function was found on.
    pub(crate) class: Rc<Class>,
}

impl Method {
    #[must_use]
    pub fn function(&self) -> &Rc<Function> {
        &self.function
    }

    #[must_use]
    pub fn receiver(&self) -> Option<&Value> {
        self.receiver.as_ref()
    }

    #[must_use]
    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.receiver.is_some() { "bound" } else { "unbound" };
        write!(f, "<{state} method {}.{}>", self.class.name, self.function.name)
    }
}
