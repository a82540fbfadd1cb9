//! Execution budgets: instruction count, wall-clock time, result size and frame depth.

use std::{
    fmt,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::exception_private::{ExcType, RunError, SimpleException};

/// Frame depth allowed when no explicit limit is configured.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Estimated result size (bytes) from which sequence repetition consults
/// [`ResourceTracker::check_large_result`].
pub const LARGE_RESULT_THRESHOLD: usize = 100_000;

/// The wall clock is sampled once per this many instructions.
const CLOCK_SAMPLE_INTERVAL: usize = 256;

/// A budget that ran out.
#[derive(Debug, Clone)]
pub enum ResourceError {
    Operation { limit: usize, executed: usize },
    Time { limit: Duration, elapsed: Duration },
    Memory { limit: usize, requested: usize },
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation { limit, executed } => write!(f, "operation limit exceeded: {executed} > {limit}"),
            Self::Time { limit, elapsed } => write!(f, "time limit exceeded: {elapsed:?} > {limit:?}"),
            Self::Memory { limit, requested } => {
                write!(f, "memory limit exceeded: {requested} bytes > {limit} bytes")
            }
            Self::Recursion { .. } => f.write_str("maximum recursion depth exceeded"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Exception type the running program observes for this error.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        match self {
            Self::Recursion { .. } => ExcType::RecursionError,
            Self::Memory { .. } => ExcType::MemoryError,
            Self::Operation { .. } | Self::Time { .. } => ExcType::TimeoutError,
        }
    }

    /// Only exhausting the frame depth can be handled by the program itself.
    fn is_catchable(&self) -> bool {
        matches!(self, Self::Recursion { .. })
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        let exc = SimpleException::new_msg(err.exc_type(), err.to_string());
        if err.is_catchable() {
            exc.into()
        } else {
            Self::Uncatchable(Box::new(exc.into_triple()))
        }
    }
}

fn check_depth(limit: usize, current_depth: usize) -> Result<(), ResourceError> {
    if current_depth < limit {
        return Ok(());
    }
    Err(ResourceError::Recursion {
        limit,
        depth: current_depth + 1,
    })
}

/// Budgets handed to a [`LimitedTracker`]. Unset fields are unbounded, except the
/// frame depth which falls back to [`DEFAULT_MAX_RECURSION_DEPTH`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_operations: Option<usize>,
    pub max_duration: Option<Duration>,
    pub max_memory: Option<usize>,
    pub max_recursion_depth: Option<usize>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_operations(self, limit: usize) -> Self {
        Self {
            max_operations: Some(limit),
            ..self
        }
    }

    #[must_use]
    pub fn max_duration(self, limit: Duration) -> Self {
        Self {
            max_duration: Some(limit),
            ..self
        }
    }

    #[must_use]
    pub fn max_memory(self, limit: usize) -> Self {
        Self {
            max_memory: Some(limit),
            ..self
        }
    }

    #[must_use]
    pub fn max_recursion_depth(self, limit: usize) -> Self {
        Self {
            max_recursion_depth: Some(limit),
            ..self
        }
    }
}

/// Consulted by the dispatch loop as it runs.
///
/// The VM is monomorphized over its tracker; with [`NoLimitTracker`] the per
/// instruction hook is an inlined no-op.
pub trait ResourceTracker: fmt::Debug {
    /// Runs before every instruction.
    fn on_operation(&mut self) -> Result<(), ResourceError>;

    /// Runs before a frame is pushed; `current_depth` excludes the new frame.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Runs before building a result estimated at more than [`LARGE_RESULT_THRESHOLD`] bytes.
    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError>;

    /// Instructions counted so far, for trackers that count them.
    fn operation_count(&self) -> Option<usize> {
        None
    }
}

/// Only bounds the frame depth.
#[derive(Debug, Clone)]
pub struct NoLimitTracker {
    recursion_limit: usize,
}

impl Default for NoLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NoLimitTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_recursion_limit(DEFAULT_MAX_RECURSION_DEPTH)
    }

    #[must_use]
    pub const fn with_recursion_limit(recursion_limit: usize) -> Self {
        Self { recursion_limit }
    }
}

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_operation(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        check_depth(self.recursion_limit, current_depth)
    }

    #[inline]
    fn check_large_result(&self, _estimated_bytes: usize) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Enforces a [`ResourceLimits`]. The clock starts at construction (or [`LimitedTracker::reset`]).
#[derive(Debug, Clone)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    executed: usize,
    started: Instant,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            executed: 0,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn reset(&mut self) {
        self.executed = 0;
        self.started = Instant::now();
    }

    fn check_clock(&self) -> Result<(), ResourceError> {
        let Some(limit) = self.limits.max_duration else {
            return Ok(());
        };
        let elapsed = self.started.elapsed();
        if elapsed > limit {
            Err(ResourceError::Time { limit, elapsed })
        } else {
            Ok(())
        }
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_operation(&mut self) -> Result<(), ResourceError> {
        self.executed += 1;
        match self.limits.max_operations {
            Some(limit) if self.executed > limit => Err(ResourceError::Operation {
                limit,
                executed: self.executed,
            }),
            _ if self.executed % CLOCK_SAMPLE_INTERVAL == 0 => self.check_clock(),
            _ => Ok(()),
        }
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        let limit = self.limits.max_recursion_depth.unwrap_or(DEFAULT_MAX_RECURSION_DEPTH);
        check_depth(limit, current_depth)
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        match self.limits.max_memory {
            Some(limit) if estimated_bytes > limit => Err(ResourceError::Memory {
                limit,
                requested: estimated_bytes,
            }),
            _ => Ok(()),
        }
    }

    fn operation_count(&self) -> Option<usize> {
        Some(self.executed)
    }
}
