//! Per-branch handle cache.
//!
//! Callers own a [`BranchCache`] instance and pass it where it is needed;
//! there is no process-global cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

type EvictHook<T> = Box<dyn Fn(&str, &T) + Send + Sync>;

/// Map from branch name to a shared handle, e.g. an open database.
pub struct BranchCache<T> {
    entries: Mutex<HashMap<String, Arc<T>>>,
    on_evict: Option<EvictHook<T>>,
}

impl<T> Default for BranchCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BranchCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            on_evict: None,
        }
    }

    /// Run `hook` for every entry removed by [`evict`](Self::evict) or
    /// [`clear`](Self::clear).
    pub fn with_eviction_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.on_evict = Some(Box::new(hook));
        self
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<T>>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("branch cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, branch: &str) -> Option<Arc<T>> {
        self.entries().get(branch).cloned()
    }

    /// Return the cached handle for `branch`, creating it with `init` on a
    /// miss. The map stays locked while `init` runs, so two callers never
    /// build the same entry twice.
    pub fn get_or_try_insert_with<E, F>(&self, branch: &str, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(branch) {
            return Ok(Arc::clone(existing));
        }
        let value = Arc::new(init()?);
        entries.insert(branch.to_string(), Arc::clone(&value));
        debug!(branch, "cached branch handle");
        Ok(value)
    }

    /// Drop the entry for `branch`. Returns whether one existed.
    pub fn evict(&self, branch: &str) -> bool {
        let removed = self.entries().remove(branch);
        match removed {
            Some(value) => {
                if let Some(hook) = &self.on_evict {
                    hook(branch, &value);
                }
                debug!(branch, "evicted branch handle");
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let drained: Vec<(String, Arc<T>)> = self.entries().drain().collect();
        if let Some(hook) = &self.on_evict {
            for (branch, value) in &drained {
                hook(branch, value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_or_insert_runs_init_once() {
        let cache: BranchCache<String> = BranchCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with::<(), _>("main", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("handle".to_string())
                })
                .unwrap();
            assert_eq!(value.as_str(), "handle");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_init_is_not_cached() {
        let cache: BranchCache<u32> = BranchCache::new();
        let err = cache.get_or_try_insert_with("feature", || Err("boom"));
        assert_eq!(err.unwrap_err(), "boom");
        assert!(cache.get("feature").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_hook() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evicted);
        let cache = BranchCache::new().with_eviction_hook(move |_branch: &str, _v: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cache.get_or_try_insert_with::<(), _>("a", || Ok(1)).unwrap();
        cache.get_or_try_insert_with::<(), _>("b", || Ok(2)).unwrap();
        cache.get_or_try_insert_with::<(), _>("c", || Ok(3)).unwrap();

        assert!(cache.evict("a"));
        assert!(!cache.evict("a"));
        assert_eq!(evicted.load(Ordering::SeqCst), 1);

        cache.clear();
        assert_eq!(evicted.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }
}
