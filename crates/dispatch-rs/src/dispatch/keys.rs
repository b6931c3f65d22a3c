//! Dispatch keys and the thread-local include/exclude sets that steer key selection.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

/// Capability a kernel is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DispatchKey {
    /// Functionalization pass; runs before the backend when active.
    Functionalize,
    /// Concrete kernels operating on plain tensors.
    Backend,
}

impl DispatchKey {
    fn bit(self) -> u8 {
        match self {
            DispatchKey::Functionalize => 1 << 0,
            DispatchKey::Backend => 1 << 1,
        }
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchKey::Functionalize => f.write_str("Functionalize"),
            DispatchKey::Backend => f.write_str("Backend"),
        }
    }
}

/// Small bit set of [`DispatchKey`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchKeySet(u8);

impl DispatchKeySet {
    pub const EMPTY: DispatchKeySet = DispatchKeySet(0);

    pub fn has(self, key: DispatchKey) -> bool {
        self.0 & key.bit() != 0
    }

    pub fn add(self, key: DispatchKey) -> Self {
        DispatchKeySet(self.0 | key.bit())
    }

    pub fn remove(self, key: DispatchKey) -> Self {
        DispatchKeySet(self.0 & !key.bit())
    }
}

/// Per-thread keys forced on (`included`) or off (`excluded`) for every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalDispatchKeySet {
    pub included: DispatchKeySet,
    pub excluded: DispatchKeySet,
}

thread_local! {
    static LOCAL_KEYS: Cell<LocalDispatchKeySet> = const {
        Cell::new(LocalDispatchKeySet {
            included: DispatchKeySet::EMPTY,
            excluded: DispatchKeySet::EMPTY,
        })
    };
}

pub fn tls_local_dispatch_key_set() -> LocalDispatchKeySet {
    LOCAL_KEYS.with(Cell::get)
}

pub fn tls_is_dispatch_key_included(key: DispatchKey) -> bool {
    tls_local_dispatch_key_set().included.has(key)
}

pub fn tls_is_dispatch_key_excluded(key: DispatchKey) -> bool {
    tls_local_dispatch_key_set().excluded.has(key)
}

fn update_local(f: impl FnOnce(LocalDispatchKeySet) -> LocalDispatchKeySet) {
    LOCAL_KEYS.with(|keys| keys.set(f(keys.get())));
}

/// RAII guard that adds a key to the thread's include set until dropped.
pub struct IncludeDispatchKeyGuard {
    key: DispatchKey,
    previously_included: bool,
    _not_send: PhantomData<*const ()>,
}

impl IncludeDispatchKeyGuard {
    pub fn new(key: DispatchKey) -> Self {
        let previously_included = tls_is_dispatch_key_included(key);
        update_local(|mut keys| {
            keys.included = keys.included.add(key);
            keys
        });
        IncludeDispatchKeyGuard {
            key,
            previously_included,
            _not_send: PhantomData,
        }
    }
}

impl Drop for IncludeDispatchKeyGuard {
    fn drop(&mut self) {
        if !self.previously_included {
            let key = self.key;
            update_local(|mut keys| {
                keys.included = keys.included.remove(key);
                keys
            });
        }
    }
}

/// RAII guard that adds a key to the thread's exclude set until dropped.
pub struct ExcludeDispatchKeyGuard {
    key: DispatchKey,
    previously_excluded: bool,
    _not_send: PhantomData<*const ()>,
}

impl ExcludeDispatchKeyGuard {
    pub fn new(key: DispatchKey) -> Self {
        let previously_excluded = tls_is_dispatch_key_excluded(key);
        update_local(|mut keys| {
            keys.excluded = keys.excluded.add(key);
            keys
        });
        ExcludeDispatchKeyGuard {
            key,
            previously_excluded,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ExcludeDispatchKeyGuard {
    fn drop(&mut self) {
        if !self.previously_excluded {
            let key = self.key;
            update_local(|mut keys| {
                keys.excluded = keys.excluded.remove(key);
                keys
            });
        }
    }
}

/// Excludes `Functionalize` so redispatched calls reach the backend kernels.
pub struct AutoDispatchSkipFunctionalize {
    _guard: ExcludeDispatchKeyGuard,
}

impl AutoDispatchSkipFunctionalize {
    pub fn new() -> Self {
        AutoDispatchSkipFunctionalize {
            _guard: ExcludeDispatchKeyGuard::new(DispatchKey::Functionalize),
        }
    }
}

impl Default for AutoDispatchSkipFunctionalize {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_restore_previous_state() {
        assert!(!tls_is_dispatch_key_excluded(DispatchKey::Functionalize));
        {
            let _outer = AutoDispatchSkipFunctionalize::new();
            {
                let _inner = AutoDispatchSkipFunctionalize::new();
                assert!(tls_is_dispatch_key_excluded(DispatchKey::Functionalize));
            }
            assert!(tls_is_dispatch_key_excluded(DispatchKey::Functionalize));
        }
        assert!(!tls_is_dispatch_key_excluded(DispatchKey::Functionalize));
    }

    #[test]
    fn include_guard_is_released_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = IncludeDispatchKeyGuard::new(DispatchKey::Functionalize);
            panic!("unwind through guard");
        });
        assert!(result.is_err());
        assert!(!tls_is_dispatch_key_included(DispatchKey::Functionalize));
    }
}
