//! A frame-based bytecode interpreter for a dynamic scripting language.
//!
//! Code units are produced by an external compiler (or assembled with
//! [`CodeBuilder`]) and executed by [`Vm`], which models calls, generators,
//! exceptions and with-statements as explicit frame and block-stack
//! transitions rather than host recursion.

mod args;
mod builtins;
mod bytecode;
mod exception_private;
mod exception_public;
mod io;
mod namespace;
mod resource;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    builtins::{BuiltinFunction, GeneratorMethod},
    bytecode::{
        Block, BlockKind, Code, CodeBuilder, CodeSerdeError, CodeFlags, CompareOp, Const, Frame, GeneratorIter,
        HAVE_ARGUMENT, ImportHook, Label, Opcode, OperandKind, Vm, WhyMarker,
    },
    exception_private::ExcType,
    exception_public::{Exception, StackFrame},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    namespace::Namespace,
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    tracer::{NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    types::{
        Cell, Class, Dict, Function, Generator, GeneratorState, HashKey, HostFunction, Instance, Method, Module, Type,
        ValueIter,
    },
    value::Value,
};
