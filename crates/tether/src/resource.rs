//! Resource accounting for sandboxed execution.
//!
//! The heap and the VM report every allocation, container growth, frame push and a
//! periodic time checkpoint to a [`ResourceTracker`]. [`NoLimitTracker`] only schedules
//! garbage collection; [`LimitedTracker`] enforces [`ResourceLimits`] and aborts the run
//! with a [`ResourceError`] as soon as one of them is exceeded.
//!
//! Trackers are part of a snapshot, so counters survive a dump/load cycle. The wall clock
//! does not: it is restarted every time execution starts or resumes.

use std::{
    fmt,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Default maximum depth of the call stack.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Number of executed instructions between two wall clock checks.
pub(crate) const TIME_CHECK_INTERVAL: u32 = 1024;

/// Default number of allocations between two garbage collections.
const DEFAULT_GC_INTERVAL: usize = 100_000;

/// A configured limit was exceeded.
///
/// Resource errors cannot be caught by `try`/`except` in the running program, they always
/// terminate the execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ResourceError {
    #[error("allocation limit exceeded: {count} allocations (limit: {limit})")]
    Allocation { limit: usize, count: usize },
    #[error("time limit exceeded: {:.2}s elapsed (limit: {:.2}s)", .elapsed.as_secs_f64(), .limit.as_secs_f64())]
    Time { limit: Duration, elapsed: Duration },
    #[error("memory limit exceeded: {used} bytes used (limit: {limit})")]
    Memory { limit: usize, used: usize },
    #[error("recursion limit exceeded: depth {depth} (limit: {limit})")]
    Recursion { limit: usize, depth: usize },
}

/// Hooks called by the heap and the VM at resource safepoints.
pub trait ResourceTracker: fmt::Debug + Clone {
    /// Called before a new heap object is allocated. `get_size` is only evaluated by
    /// trackers that account for memory.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called when garbage collection frees a heap object.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called when an existing container grows by roughly `additional` bytes.
    fn on_grow(&mut self, additional: usize) -> Result<(), ResourceError>;

    /// Called every [`TIME_CHECK_INTERVAL`] instructions and at external call boundaries.
    fn check_time(&self) -> Result<(), ResourceError>;

    /// Called before a new call frame is pushed, `depth` counts the module frame.
    fn check_recursion_depth(&self, depth: usize) -> Result<(), ResourceError>;

    /// Whether a garbage collection pass should run after `allocations_since_gc` allocations.
    fn should_gc(&self, allocations_since_gc: usize) -> bool;

    /// Restarts the wall clock, called when execution starts or resumes.
    fn start_clock(&mut self);
}

/// Tracker that enforces nothing but the default recursion depth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn on_grow(&mut self, _additional: usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_time(&self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn check_recursion_depth(&self, depth: usize) -> Result<(), ResourceError> {
        if depth > DEFAULT_MAX_RECURSION_DEPTH {
            Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_RECURSION_DEPTH,
                depth,
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    fn should_gc(&self, allocations_since_gc: usize) -> bool {
        allocations_since_gc >= DEFAULT_GC_INTERVAL
    }

    #[inline]
    fn start_clock(&mut self) {}
}

/// Limits enforced by [`LimitedTracker`].
///
/// Every limit is optional; a missing value, or zero, leaves that dimension unbounded.
///
/// ```
/// use std::time::Duration;
/// use tether::ResourceLimits;
///
/// let limits = ResourceLimits::new()
///     .max_allocations(10_000)
///     .max_duration(Duration::from_secs(2))
///     .max_memory(16 * 1024 * 1024);
/// assert_eq!(limits.get_max_allocations(), Some(10_000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    max_allocations: Option<usize>,
    max_duration: Option<Duration>,
    max_memory: Option<usize>,
    gc_interval: Option<usize>,
    max_recursion_depth: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLimits {
    /// No allocation, time or memory limit, default recursion depth.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_allocations: None,
            max_duration: None,
            max_memory: None,
            gc_interval: None,
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
        }
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = non_zero(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = if limit.is_zero() { None } else { Some(limit) };
        self
    }

    /// Same as [`Self::max_duration`] with the limit given in (fractional) seconds, negative
    /// and non-finite values are treated as unbounded.
    #[must_use]
    pub fn max_duration_secs(self, seconds: f64) -> Self {
        match Duration::try_from_secs_f64(seconds) {
            Ok(limit) => self.max_duration(limit),
            Err(_) => Self {
                max_duration: None,
                ..self
            },
        }
    }

    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = non_zero(limit);
        self
    }

    /// Number of allocations between garbage collection passes.
    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc_interval = non_zero(interval);
        self
    }

    /// Maximum call stack depth, `None` (or zero) disables the check.
    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit.and_then(non_zero);
        self
    }

    #[must_use]
    pub fn get_max_allocations(&self) -> Option<usize> {
        self.max_allocations
    }

    #[must_use]
    pub fn get_max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    #[must_use]
    pub fn get_max_memory(&self) -> Option<usize> {
        self.max_memory
    }

    #[must_use]
    pub fn get_max_recursion_depth(&self) -> Option<usize> {
        self.max_recursion_depth
    }
}

fn non_zero(value: usize) -> Option<usize> {
    if value == 0 { None } else { Some(value) }
}

/// Tracker enforcing a set of [`ResourceLimits`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    allocation_count: usize,
    current_memory: usize,
    #[serde(skip)]
    started: Option<Instant>,
}

impl LimitedTracker {
    /// Creates a tracker, the clock starts running immediately and is restarted whenever
    /// an execution starts or resumes.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocation_count: 0,
            current_memory: 0,
            started: Some(Instant::now()),
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Total number of heap allocations so far.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Estimated bytes currently held by live heap objects.
    #[must_use]
    pub fn current_memory(&self) -> usize {
        self.current_memory
    }

    fn check_memory(&self) -> Result<(), ResourceError> {
        match self.limits.max_memory {
            Some(limit) if self.current_memory > limit => Err(ResourceError::Memory {
                limit,
                used: self.current_memory,
            }),
            _ => Ok(()),
        }
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        let count = self.allocation_count + 1;
        if let Some(limit) = self.limits.max_allocations {
            if count > limit {
                return Err(ResourceError::Allocation { limit, count });
            }
        }
        self.allocation_count = count;
        if self.limits.max_memory.is_some() {
            self.current_memory += get_size();
            self.check_memory()?;
        }
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        if self.limits.max_memory.is_some() {
            self.current_memory = self.current_memory.saturating_sub(get_size());
        }
    }

    fn on_grow(&mut self, additional: usize) -> Result<(), ResourceError> {
        if self.limits.max_memory.is_some() {
            self.current_memory += additional;
            self.check_memory()?;
        }
        Ok(())
    }

    fn check_time(&self) -> Result<(), ResourceError> {
        if let (Some(limit), Some(started)) = (self.limits.max_duration, self.started) {
            let elapsed = started.elapsed();
            if elapsed > limit {
                return Err(ResourceError::Time { limit, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, depth: usize) -> Result<(), ResourceError> {
        match self.limits.max_recursion_depth {
            Some(limit) if depth > limit => Err(ResourceError::Recursion { limit, depth }),
            _ => Ok(()),
        }
    }

    fn should_gc(&self, allocations_since_gc: usize) -> bool {
        allocations_since_gc >= self.limits.gc_interval.unwrap_or(DEFAULT_GC_INTERVAL)
    }

    fn start_clock(&mut self) {
        self.started = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_unbounded() {
        let limits = ResourceLimits::new()
            .max_allocations(0)
            .max_memory(0)
            .max_duration(Duration::ZERO)
            .max_recursion_depth(Some(0));
        assert_eq!(limits.get_max_allocations(), None);
        assert_eq!(limits.get_max_memory(), None);
        assert_eq!(limits.get_max_duration(), None);
        assert_eq!(limits.get_max_recursion_depth(), None);
    }

    #[test]
    fn duration_from_seconds() {
        let limits = ResourceLimits::new().max_duration_secs(1.5);
        assert_eq!(limits.get_max_duration(), Some(Duration::from_millis(1500)));
        let limits = ResourceLimits::new().max_duration_secs(-1.0);
        assert_eq!(limits.get_max_duration(), None);
    }

    #[test]
    fn allocation_limit() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(2));
        assert!(tracker.on_allocate(|| 8).is_ok());
        assert!(tracker.on_allocate(|| 8).is_ok());
        let err = tracker.on_allocate(|| 8).unwrap_err();
        assert_eq!(err, ResourceError::Allocation { limit: 2, count: 3 });
        assert_eq!(err.to_string(), "allocation limit exceeded: 3 allocations (limit: 2)");
    }

    #[test]
    fn memory_is_returned_on_free() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_memory(100));
        tracker.on_allocate(|| 60).unwrap();
        tracker.on_free(|| 60);
        tracker.on_allocate(|| 60).unwrap();
        assert_eq!(tracker.current_memory(), 60);
        let err = tracker.on_grow(50).unwrap_err();
        assert_eq!(err.to_string(), "memory limit exceeded: 110 bytes used (limit: 100)");
    }

    #[test]
    fn recursion_message() {
        let tracker = LimitedTracker::new(ResourceLimits::new().max_recursion_depth(Some(10)));
        assert!(tracker.check_recursion_depth(10).is_ok());
        let err = tracker.check_recursion_depth(11).unwrap_err();
        assert_eq!(err.to_string(), "recursion limit exceeded: depth 11 (limit: 10)");
    }

    #[test]
    fn time_message_has_two_decimals() {
        let err = ResourceError::Time {
            limit: Duration::from_millis(50),
            elapsed: Duration::from_millis(1234),
        };
        assert_eq!(err.to_string(), "time limit exceeded: 1.23s elapsed (limit: 0.05s)");
    }

    #[test]
    fn clock_is_not_serialized() {
        let tracker = LimitedTracker::new(ResourceLimits::new().max_duration(Duration::from_secs(1)));
        let bytes = postcard::to_allocvec(&tracker).unwrap();
        let mut restored: LimitedTracker = postcard::from_bytes(&bytes).unwrap();
        assert!(restored.started.is_none());
        assert!(restored.check_time().is_ok());
        restored.start_clock();
        assert!(restored.started.is_some());
    }
}
