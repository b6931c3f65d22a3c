//! Lightweight counters for cache events and graph compilation time.
//!
//! Recording is compiled in only with the `profiler` feature; without it every entry point is an
//! inlined no-op and the `take_*` functions return empty reports.

use std::time::Duration;

#[cfg(feature = "profiler")]
use std::collections::BTreeMap;
#[cfg(feature = "profiler")]
use std::sync::{Mutex, OnceLock};
#[cfg(feature = "profiler")]
use std::time::Instant;

/// Aggregated compile time for one named scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileStats {
    pub calls: u64,
    pub total: Duration,
}

#[cfg(feature = "profiler")]
#[derive(Default)]
struct Profiler {
    cache: BTreeMap<&'static str, u64>,
    compile: BTreeMap<&'static str, CompileStats>,
}

#[cfg(feature = "profiler")]
fn profiler() -> &'static Mutex<Profiler> {
    static PROFILER: OnceLock<Mutex<Profiler>> = OnceLock::new();
    PROFILER.get_or_init(|| Mutex::new(Profiler::default()))
}

/// Records one occurrence of a cache event such as `"graph_cache_hit"`.
#[inline(always)]
pub fn cache_event(name: &'static str) {
    #[cfg(feature = "profiler")]
    {
        let mut profiler = profiler().lock().expect("profiler poisoned");
        *profiler.cache.entry(name).or_default() += 1;
    }
    #[cfg(not(feature = "profiler"))]
    {
        let _ = name;
    }
}

/// Guard returned by [`compile_scope`]; the elapsed time is recorded on drop.
pub struct ScopeGuard {
    #[cfg(feature = "profiler")]
    name: &'static str,
    #[cfg(feature = "profiler")]
    start: Instant,
}

#[inline(always)]
pub fn compile_scope(name: &'static str) -> ScopeGuard {
    #[cfg(feature = "profiler")]
    {
        ScopeGuard {
            name,
            start: Instant::now(),
        }
    }
    #[cfg(not(feature = "profiler"))]
    {
        let _ = name;
        ScopeGuard {}
    }
}

#[cfg(feature = "profiler")]
impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let mut profiler = profiler().lock().expect("profiler poisoned");
        let entry = profiler.compile.entry(self.name).or_default();
        entry.calls += 1;
        entry.total += elapsed;
    }
}

/// Drains the cache-event counters recorded so far.
pub fn take_cache_events() -> Vec<(&'static str, u64)> {
    #[cfg(feature = "profiler")]
    {
        let mut profiler = profiler().lock().expect("profiler poisoned");
        std::mem::take(&mut profiler.cache).into_iter().collect()
    }
    #[cfg(not(feature = "profiler"))]
    {
        Vec::new()
    }
}

/// Drains the compile-scope timings recorded so far.
pub fn take_compile_stats() -> Vec<(&'static str, CompileStats)> {
    #[cfg(feature = "profiler")]
    {
        let mut profiler = profiler().lock().expect("profiler poisoned");
        std::mem::take(&mut profiler.compile).into_iter().collect()
    }
    #[cfg(not(feature = "profiler"))]
    {
        Vec::new()
    }
}

#[cfg(all(test, feature = "profiler"))]
mod tests {
    use super::*;

    #[test]
    fn cache_events_are_counted_and_drained() {
        cache_event("profiling_test_event");
        cache_event("profiling_test_event");
        let events = take_cache_events();
        assert!(events.contains(&("profiling_test_event", 2)));
        assert!(!take_cache_events().contains(&("profiling_test_event", 2)));
    }
}
