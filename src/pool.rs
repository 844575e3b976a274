//! Process-wide bounded LRU connection pool, keyed by a back-end-specific
//! string (§3 "Connection pool", §5 "Each connection pool is thread-safe
//! and bounded"). Grounded on the teacher's `moka`-backed cache in
//! `src/server/cache.rs`: `moka::sync::Cache` already gives us a
//! thread-safe, size-bounded, least-recently-used map, so the pool is a
//! thin typed wrapper rather than a hand-rolled LRU.

use moka::sync::Cache;
use std::any::Any;
use std::sync::Arc;

/// One pooled connection: an opaque boxed value plus nothing else — the
/// pool does not know how to construct entries, only how to hold and
/// evict them. Callers downcast via [`ConnectionPool::get_or_insert`].
type Entry = Arc<dyn Any + Send + Sync>;

/// A process-wide LRU map from a back-end-specific key to one live
/// connection object. Bounded (`max_list_size`, default 10 per the spec);
/// entries evict least-recently-used on overflow. `moka` drives the
/// eviction policy; this type only adds the typed get-or-insert contract
/// back-ends need.
pub struct ConnectionPool {
    cache: Cache<String, Entry>,
}

impl ConnectionPool {
    pub fn new(max_size: usize) -> Self {
        Self { cache: Cache::new(max_size as u64) }
    }

    /// Fetch the entry for `key` if present and of type `T`, or construct
    /// one with `build` and insert it. `build` may fail (e.g. opening a
    /// database connection); a failure is not cached.
    pub fn get_or_try_insert_with<T, F>(&self, key: &str, build: F) -> crate::error::Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> crate::error::Result<T>,
    {
        if let Some(existing) = self.cache.get(key) {
            if let Ok(typed) = existing.downcast::<T>() {
                return Ok(typed);
            }
        }
        let value = Arc::new(build()?);
        self.cache.insert(key.to_string(), value.clone() as Entry);
        Ok(value)
    }

    pub fn remove(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_existing_entry_for_same_key() {
        let pool = ConnectionPool::new(10);
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            pool.get_or_try_insert_with::<u32, _>("conn-a", move || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(7)
            })
            .unwrap();
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_build_distinct_entries() {
        let pool = ConnectionPool::new(10);
        let a = pool.get_or_try_insert_with::<u32, _>("a", || Ok(1)).unwrap();
        let b = pool.get_or_try_insert_with::<u32, _>("b", || Ok(2)).unwrap();
        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
    }

    #[test]
    fn bounded_size_evicts_lru() {
        let pool = ConnectionPool::new(2);
        pool.get_or_try_insert_with::<u32, _>("a", || Ok(1)).unwrap();
        pool.get_or_try_insert_with::<u32, _>("b", || Ok(2)).unwrap();
        pool.get_or_try_insert_with::<u32, _>("c", || Ok(3)).unwrap();
        pool.cache.run_pending_tasks();
        assert!(pool.len() <= 2);
    }
}
