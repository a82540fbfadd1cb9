//! Observation hooks for the dispatch loop.
//!
//! `Vm` takes its tracer as a type parameter. Every [`VmTracer`] hook defaults to
//! an inlined empty body, so running with [`NoopTracer`] costs nothing once
//! monomorphized. The other tracers:
//!
//! - [`StderrTracer`] logs each event to stderr as it happens;
//! - [`ProfilingTracer`] counts opcodes, calls, yields and unwinds;
//! - [`RecordingTracer`] keeps a [`TraceEvent`] list for later inspection.

use std::fmt;

use crate::bytecode::{BlockKind, Opcode};

/// One observed VM event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// About to dispatch `opcode` at byte offset `ip`; `stack_depth` is the
    /// current frame's operand stack size.
    Instruction {
        ip: usize,
        opcode: Opcode,
        stack_depth: usize,
    },
    /// A frame was entered. `depth` counts the new frame.
    Call { name: String, depth: usize },
    /// A frame finished; `depth` is what remains.
    Return { depth: usize },
    /// A generator frame was suspended.
    Yield { depth: usize },
    CellLoad { slot: u16, cells_len: usize },
    CellStore { slot: u16, cells_len: usize },
    MakeFunction { cell_count: usize, defaults_count: usize },
    BlockPush { kind: BlockKind, depth: usize },
    /// A non-normal why-code began unwinding the current frame.
    Unwind { why: &'static str, block_depth: usize },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instruction {
                ip,
                opcode,
                stack_depth,
            } => write!(f, "{ip:>6}  {opcode} (stack {stack_depth})"),
            Self::Call { name, depth } => write!(f, "call {name} [depth {depth}]"),
            Self::Return { depth } => write!(f, "return [depth {depth}]"),
            Self::Yield { depth } => write!(f, "yield [depth {depth}]"),
            Self::CellLoad { slot, cells_len } => write!(f, "load cell {slot}/{cells_len}"),
            Self::CellStore { slot, cells_len } => write!(f, "store cell {slot}/{cells_len}"),
            Self::MakeFunction {
                cell_count,
                defaults_count,
            } => write!(f, "make function ({cell_count} cells, {defaults_count} defaults)"),
            Self::BlockPush { kind, depth } => write!(f, "push {kind:?} block [{depth}]"),
            Self::Unwind { why, block_depth } => write!(f, "unwind {why} through {block_depth} blocks"),
        }
    }
}

/// Callbacks fired by the VM. Implement only the ones of interest.
pub trait VmTracer: fmt::Debug {
    /// Fires before every dispatch, so it must stay cheap.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    #[inline(always)]
    fn on_call(&mut self, _name: &str, _depth: usize) {}

    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_yield(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_cell_load(&mut self, _slot: u16, _cells_len: usize) {}

    #[inline(always)]
    fn on_cell_store(&mut self, _slot: u16, _cells_len: usize) {}

    /// `cell_count` is zero for functions built without a closure.
    #[inline(always)]
    fn on_make_function(&mut self, _cell_count: usize, _defaults_count: usize) {}

    /// Also fires for the handler blocks the unwinder installs itself.
    #[inline(always)]
    fn on_block_push(&mut self, _kind: BlockKind, _depth: usize) {}

    #[inline(always)]
    fn on_unwind(&mut self, _why: &'static str, _block_depth: usize) {}
}

/// Forwards every hook to `self.emit(TraceEvent)`.
macro_rules! forward_hooks_as_events {
    ($tracer:ty) => {
        impl VmTracer for $tracer {
            fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize, _frame_depth: usize) {
                self.emit(TraceEvent::Instruction {
                    ip,
                    opcode,
                    stack_depth,
                });
            }

            fn on_call(&mut self, name: &str, depth: usize) {
                self.emit(TraceEvent::Call {
                    name: name.to_owned(),
                    depth,
                });
            }

            fn on_return(&mut self, depth: usize) {
                self.emit(TraceEvent::Return { depth });
            }

            fn on_yield(&mut self, depth: usize) {
                self.emit(TraceEvent::Yield { depth });
            }

            fn on_cell_load(&mut self, slot: u16, cells_len: usize) {
                self.emit(TraceEvent::CellLoad { slot, cells_len });
            }

            fn on_cell_store(&mut self, slot: u16, cells_len: usize) {
                self.emit(TraceEvent::CellStore { slot, cells_len });
            }

            fn on_make_function(&mut self, cell_count: usize, defaults_count: usize) {
                self.emit(TraceEvent::MakeFunction {
                    cell_count,
                    defaults_count,
                });
            }

            fn on_block_push(&mut self, kind: BlockKind, depth: usize) {
                self.emit(TraceEvent::BlockPush { kind, depth });
            }

            fn on_unwind(&mut self, why: &'static str, block_depth: usize) {
                self.emit(TraceEvent::Unwind { why, block_depth });
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Prints each event on its own stderr line, optionally going quiet after `limit` events.
#[derive(Debug, Default)]
pub struct StderrTracer {
    limit: Option<usize>,
    printed: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            printed: 0,
        }
    }

    fn emit(&mut self, event: TraceEvent) {
        match self.limit {
            Some(limit) if self.printed > limit => return,
            Some(limit) if self.printed == limit => eprintln!("(trace truncated after {limit} events)"),
            _ => eprintln!("{event}"),
        }
        self.printed += 1;
    }
}

forward_hooks_as_events!(StderrTracer);

/// Keeps every event, up to an optional cap.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::new(),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn emit(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|limit| self.events.len() < limit) {
            self.events.push(event);
        }
    }
}

forward_hooks_as_events!(RecordingTracer);

/// Counts what happened; read the totals through [`ProfilingTracer::report`].
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    per_opcode: ahash::AHashMap<Opcode, u64>,
    report: ProfilingReport,
}

/// Totals gathered by a [`ProfilingTracer`].
#[derive(Debug, Clone, Default)]
pub struct ProfilingReport {
    /// Sorted most frequent first, ties broken by opcode number.
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    pub max_depth: usize,
    pub total_calls: u64,
    pub total_yields: u64,
    pub total_unwinds: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<(Opcode, u64)> = self.per_opcode.iter().map(|(&op, &n)| (op, n)).collect();
        opcode_counts.sort_by_key(|&(op, n)| (std::cmp::Reverse(n), op as u8));
        ProfilingReport {
            opcode_counts,
            ..self.report.clone()
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        *self.per_opcode.entry(opcode).or_default() += 1;
        self.report.total_instructions += 1;
    }

    fn on_call(&mut self, _name: &str, depth: usize) {
        self.report.total_calls += 1;
        self.report.max_depth = self.report.max_depth.max(depth);
    }

    fn on_yield(&mut self, _depth: usize) {
        self.report.total_yields += 1;
    }

    fn on_unwind(&mut self, _why: &'static str, _block_depth: usize) {
        self.report.total_unwinds += 1;
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} instructions, {} calls, {} yields, {} unwinds, max depth {}",
            self.total_instructions, self.total_calls, self.total_yields, self.total_unwinds, self.max_depth
        )?;
        let total = self.total_instructions.max(1) as f64;
        for (opcode, count) in &self.opcode_counts {
            let share = *count as f64 * 100.0 / total;
            writeln!(f, "{count:>10}  {share:>5.1}%  {opcode}")?;
        }
        Ok(())
    }
}
