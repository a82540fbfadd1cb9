use std::{fmt, rc::Rc};

use crate::{exception_public::Exception, value::Value};

type HostFn = dyn Fn(&[Value]) -> Result<Value, Exception>;

/// A function implemented by the embedding application.
///
/// Receives positional arguments only; returning `Err` raises the exception in
/// the calling frame.
pub struct HostFunction {
    pub(crate) name: Rc<str>,
    func: Box<HostFn>,
}

impl HostFunction {
    pub fn new(name: impl Into<Rc<str>>, func: impl Fn(&[Value]) -> Result<Value, Exception> + 'static) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self, args: &[Value]) -> Result<Value, Exception> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<host function {}>", self.name)
    }
}
