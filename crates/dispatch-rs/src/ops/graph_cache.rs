//! Signature-keyed cache of compiled binary graphs.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::backend::{GraphBackend, NodeId};
use crate::config::GraphCacheConfig;
use crate::error::DispatchResult;
use crate::profiling;

use super::signature::SignatureKey;

/// Compiled graph plus the placeholders a call binds.
///
/// Immutable once built; the cache hands out shared references.
pub struct CachedGraph<B: GraphBackend> {
    pub executable: B::Executable,
    pub primary: NodeId,
    pub secondary: NodeId,
    pub alpha: Option<NodeId>,
    pub output: NodeId,
}

/// Eviction policy for a [`GraphCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Keep every graph until [`GraphCache::clear`].
    #[default]
    Unbounded,
    /// Retain at most `capacity` graphs, evicting the least recently used.
    Bounded { capacity: usize },
}

impl CachePolicy {
    pub fn from_config(config: &GraphCacheConfig) -> Self {
        match config.capacity {
            Some(capacity) => CachePolicy::Bounded { capacity },
            None => CachePolicy::Unbounded,
        }
    }
}

/// Hit/miss counters since construction or the last [`GraphCache::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphCacheStats {
    pub hits: u64,
    pub misses: u64,
}

type Slot<B> = Arc<OnceCell<Arc<CachedGraph<B>>>>;

/// Injectable graph cache shared by every dispatcher that holds it.
///
/// Lookup-or-create is atomic per key: the map lock is held only to fetch or create the per-key
/// slot, and the slot's initializer runs exactly once even when callers race. Slots whose build
/// is still running are pinned outside the LRU, so eviction under a bounded policy never lets a
/// second caller start a duplicate build.
pub struct GraphCache<B: GraphBackend> {
    entries: Mutex<LruCache<SignatureKey, Slot<B>>>,
    in_flight: Mutex<HashMap<SignatureKey, Slot<B>>>,
    policy: CachePolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<B: GraphBackend> GraphCache<B> {
    pub fn new(policy: CachePolicy) -> Self {
        let entries = match policy {
            CachePolicy::Unbounded => LruCache::unbounded(),
            CachePolicy::Bounded { capacity } => {
                LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN))
            }
        };
        GraphCache {
            entries: Mutex::new(entries),
            in_flight: Mutex::new(HashMap::new()),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Returns the graph cached under `key`, building it with `build` on first use.
    ///
    /// A failed build leaves the slot empty so a later call may try again.
    pub fn get_or_build<F>(
        &self,
        key: &SignatureKey,
        build: F,
    ) -> DispatchResult<Arc<CachedGraph<B>>>
    where
        F: FnOnce() -> DispatchResult<CachedGraph<B>>,
    {
        let slot = self.slot(key);

        let mut built = false;
        let graph = slot.get_or_try_init(|| {
            built = true;
            let _scope = profiling::compile_scope("binary_graph_build");
            debug!(key = %key, "graph cache miss, building graph");
            build().map(Arc::new)
        });
        if built {
            self.unpin(key, &slot);
        }
        let graph = graph?;

        if built {
            self.misses.fetch_add(1, Ordering::Relaxed);
            profiling::cache_event("graph_cache_miss");
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            profiling::cache_event("graph_cache_hit");
            trace!(key = %key, "graph cache hit");
        }
        Ok(Arc::clone(graph))
    }

    /// Fetches the slot for `key`, reusing a pinned in-flight slot the LRU has already evicted.
    fn slot(&self, key: &SignatureKey) -> Slot<B> {
        let mut entries = self.entries.lock().expect("graph cache poisoned");
        if let Some(slot) = entries.get(key) {
            return Arc::clone(slot);
        }
        let mut in_flight = self.in_flight.lock().expect("graph cache poisoned");
        let slot = Arc::clone(
            in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );
        entries.put(key.clone(), Arc::clone(&slot));
        slot
    }

    fn unpin(&self, key: &SignatureKey, slot: &Slot<B>) {
        let mut in_flight = self.in_flight.lock().expect("graph cache poisoned");
        if in_flight.get(key).is_some_and(|pinned| Arc::ptr_eq(pinned, slot)) {
            in_flight.remove(key);
        }
    }

    /// Returns the cached graph without building, if one is ready.
    pub fn get(&self, key: &SignatureKey) -> Option<Arc<CachedGraph<B>>> {
        let mut entries = self.entries.lock().expect("graph cache poisoned");
        entries.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of keys with a slot, including slots whose build is in flight.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("graph cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached graph and resets the counters. Builds still in flight stay pinned.
    pub fn clear(&self) {
        self.entries.lock().expect("graph cache poisoned").clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("graph cache cleared");
    }

    pub fn stats(&self) -> GraphCacheStats {
        GraphCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<B: GraphBackend> Default for GraphCache<B> {
    fn default() -> Self {
        Self::new(CachePolicy::Unbounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, Feed, Graph};
    use crate::error::DispatchError;
    use crate::tensor::Tensor;

    struct NullBackend;

    impl GraphBackend for NullBackend {
        type Executable = usize;

        fn backend_name(&self) -> &str {
            "null"
        }

        fn compile(&self, graph: &Graph) -> BackendResult<usize> {
            Ok(graph.nodes.len())
        }

        fn execute(
            &self,
            _executable: &usize,
            _feeds: &[(NodeId, Feed)],
            _fetches: &[(NodeId, Tensor)],
        ) -> BackendResult<()> {
            Ok(())
        }
    }

    fn graph(id: usize) -> CachedGraph<NullBackend> {
        CachedGraph {
            executable: id,
            primary: NodeId(0),
            secondary: NodeId(1),
            alpha: None,
            output: NodeId(2),
        }
    }

    fn key(name: &str) -> SignatureKey {
        crate::ops::signature::SignatureBuilder::new(name).finish()
    }

    #[test]
    fn builds_once_per_key() -> DispatchResult<()> {
        let cache = GraphCache::<NullBackend>::default();
        let first = cache.get_or_build(&key("add"), || Ok(graph(1)))?;
        let second = cache.get_or_build(&key("add"), || Ok(graph(2)))?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.executable, 1);
        assert_eq!(cache.stats(), GraphCacheStats { hits: 1, misses: 1 });
        Ok(())
    }

    #[test]
    fn failed_build_leaves_slot_empty() -> DispatchResult<()> {
        let cache = GraphCache::<NullBackend>::default();
        let err = cache.get_or_build(&key("mul"), || {
            Err(DispatchError::contract("boom"))
        });
        assert!(err.is_err());
        assert!(cache.get(&key("mul")).is_none());
        let built = cache.get_or_build(&key("mul"), || Ok(graph(7)))?;
        assert_eq!(built.executable, 7);
        Ok(())
    }

    #[test]
    fn bounded_policy_evicts_least_recent() -> DispatchResult<()> {
        let cache = GraphCache::<NullBackend>::new(CachePolicy::Bounded { capacity: 2 });
        cache.get_or_build(&key("a"), || Ok(graph(1)))?;
        cache.get_or_build(&key("b"), || Ok(graph(2)))?;
        cache.get_or_build(&key("a"), || Ok(graph(3)))?;
        cache.get_or_build(&key("c"), || Ok(graph(4)))?;
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("b")).is_none());
        assert_eq!(cache.get(&key("a")).map(|g| g.executable), Some(1));
        Ok(())
    }

    #[test]
    fn evicted_slot_is_reused_while_its_build_runs() -> DispatchResult<()> {
        let cache = GraphCache::<NullBackend>::new(CachePolicy::Bounded { capacity: 1 });
        let mut pinned = None;
        let built = cache.get_or_build(&key("a"), || {
            cache.get_or_build(&key("b"), || Ok(graph(2)))?;
            assert!(cache.get(&key("a")).is_none());
            pinned = Some(cache.slot(&key("a")));
            Ok(graph(1))
        })?;

        let pinned = pinned.ok_or_else(|| DispatchError::contract("build did not run"))?;
        assert!(pinned.get().is_some_and(|graph| Arc::ptr_eq(graph, &built)));
        assert!(cache.in_flight.lock().expect("poisoned").is_empty());
        let again = cache.get_or_build(&key("a"), || Ok(graph(3)))?;
        assert_eq!(again.executable, 1);
        assert_eq!(cache.stats(), GraphCacheStats { hits: 1, misses: 2 });
        Ok(())
    }

    #[test]
    fn clear_resets_entries_and_counters() -> DispatchResult<()> {
        let cache = GraphCache::<NullBackend>::default();
        cache.get_or_build(&key("sub"), || Ok(graph(1)))?;
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), GraphCacheStats::default());
        Ok(())
    }
}
