//! Runtime object types referenced from [`Value`](crate::value::Value).
//!
//! Mutable objects use interior mutability behind `Rc` so that values can be
//! shared freely between frames, closures and the host.

pub mod cell;
pub mod class;
pub mod dict;
pub mod function;
pub mod generator;
pub mod host;
pub mod iter;
pub mod module;
pub mod r#type;

pub use cell::Cell;
pub use class::{Class, Instance};
pub use dict::{Dict, HashKey};
pub use function::{Function, Method};
pub use generator::{Generator, GeneratorState};
pub use host::HostFunction;
pub use iter::ValueIter;
pub use module::Module;
pub use r#type::Type;
