//! Generator objects.
//!
//! Calling a code unit flagged as a generator binds the arguments into a fresh
//! frame and wraps it here without running it. Each resumption moves the frame
//! onto the VM's frame stack; a yield moves it back.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::bytecode::Frame;

/// Generator execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created but not yet started.
    New,
    /// Currently executing; re-entry raises ValueError.
    Running,
    /// Suspended at a yield.
    Suspended,
    /// Returned or raised; every further advance reports exhaustion.
    Finished,
}

/// A suspended generator function.
pub struct Generator {
    pub(crate) name: Rc<str>,
    state: RefCell<GeneratorState>,
    /// The parked frame; `None` while running or once finished.
    frame: RefCell<Option<Frame>>,
}

impl Generator {
    pub(crate) fn new(frame: Frame) -> Self {
        Self {
            name: frame.code().name.clone(),
            state: RefCell::new(GeneratorState::New),
            frame: RefCell::new(Some(frame)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> GeneratorState {
        *self.state.borrow()
    }

    /// Takes the parked frame out for a resumption and marks the generator running.
    pub(crate) fn take_frame(&self) -> Option<Frame> {
        let frame = self.frame.borrow_mut().take();
        if frame.is_some() {
            *self.state.borrow_mut() = GeneratorState::Running;
        }
        frame
    }

    /// Parks the frame again after a yield.
    pub(crate) fn suspend(&self, frame: Frame) {
        *self.frame.borrow_mut() = Some(frame);
        *self.state.borrow_mut() = GeneratorState::Suspended;
    }

    /// Marks the generator exhausted and drops its frame.
    pub(crate) fn finish(&self) {
        self.frame.borrow_mut().take();
        *self.state.borrow_mut() = GeneratorState::Finished;
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<generator object {} ({:?})>", self.name, self.state())
    }
}
