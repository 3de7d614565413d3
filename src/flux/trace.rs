//! Timing hooks around each stage of the flux solver.
//!
//! The solver is generic over a [`Tracer`], defaulting to [`NoTrace`] which
//! compiles down to nothing.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;

/// Receiver of timing information for the solver stages.
pub trait Tracer: Sync {
    /// Whether stages should be timed at all.
    fn is_enabled(&self) -> bool {
        false
    }

    /// Called once a stage called `routine` has finished.
    fn record(&self, _routine: &'static str, _elapsed: Duration) {}
}

/// Tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrace;

impl Tracer for NoTrace {}

/// Tracer that logs the duration of each stage at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTrace;

impl Tracer for LogTrace {
    fn is_enabled(&self) -> bool {
        log::log_enabled!(log::Level::Debug)
    }

    fn record(&self, routine: &'static str, elapsed: Duration) {
        debug!("{routine} took {elapsed:?}");
    }
}

/// Number of calls and total time spent in one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutineStats {
    /// Number of times the stage ran.
    pub calls: usize,
    /// Total time spent in the stage.
    pub total: Duration,
}

/// Tracer accumulating the time spent in each stage, across calls and
/// threads.
#[derive(Debug, Default)]
pub struct RoutineTimer {
    stats: Mutex<BTreeMap<&'static str, RoutineStats>>,
}

impl RoutineTimer {
    /// New timer with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the statistics recorded so far, by stage name.
    pub fn summary(&self) -> BTreeMap<&'static str, RoutineStats> {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Tracer for RoutineTimer {
    fn is_enabled(&self) -> bool {
        true
    }

    fn record(&self, routine: &'static str, elapsed: Duration) {
        let mut stats = match self.stats.lock() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = stats.entry(routine).or_default();
        entry.calls += 1;
        entry.total += elapsed;
    }
}

/// Run `f`, reporting its duration to `tracer` under `routine`.
#[inline]
pub(crate) fn traced<T: Tracer + ?Sized, R>(
    tracer: &T,
    routine: &'static str,
    f: impl FnOnce() -> R,
) -> R {
    if !tracer.is_enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    tracer.record(routine, start.elapsed());
    result
}
