//! Process-wide state, passed as an explicit value rather than held in
//! globals (§9 "Process-wide state"). A [`Context`] bundles the immutable
//! configuration arena with the two cross-worker coordination primitives
//! (§5): the locker and the connection pool. Each request constructs a
//! child scope (`Context::child`) carrying its own non-blocking flag;
//! nothing here is mutated after construction except via the config
//! auto-reload swap.

use crate::config::Config;
use crate::locker::{DiskLocker, Locker};
use crate::pool::ConnectionPool;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Process-wide handle shared by reference across worker threads (§5
/// "Configuration is immutable after startup; shared by reference across
/// threads; optionally re-read on file-mtime change").
#[derive(Clone)]
pub struct Context {
    config: Arc<ArcSwap<Config>>,
    locker: Arc<dyn Locker>,
    pool: Arc<ConnectionPool>,
    /// `true` for request paths that must never block (e.g. a non-blocking
    /// API caller); a blocking cache miss becomes a 404 instead of a render
    /// wait (§4.3(b), §6 "Non-blocking contexts map any blocking
    /// requirement to HTTP 404").
    non_blocking: bool,
}

impl Context {
    /// Build a context whose locker is the configured disk locker rooted at
    /// `config.lock_dir`, and a connection pool of [`crate::DEFAULT_POOL_SIZE`]
    /// per key.
    pub fn new(config: Config) -> Self {
        let locker: Arc<dyn Locker> = Arc::new(DiskLocker::new(config.lock_dir.clone()));
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            locker,
            pool: Arc::new(ConnectionPool::new(crate::DEFAULT_POOL_SIZE)),
            non_blocking: false,
        }
    }

    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = locker;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool = Arc::new(ConnectionPool::new(size));
        self
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Swap in a freshly-parsed configuration (`<auto_reload>`, §5, §6).
    /// Every outstanding `Context` (parent and children share the same
    /// `ArcSwap`) observes the new value on its next `config()` call.
    pub fn reload_config(&self, config: Config) {
        self.config.store(Arc::new(config));
    }

    pub fn locker(&self) -> &Arc<dyn Locker> {
        &self.locker
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn is_blocking(&self) -> bool {
        !self.non_blocking
    }

    /// A request-scoped child context inheriting the shared locker, pool,
    /// and config handle, but able to set its own blocking behavior (§9
    /// "each request constructs a child scope with its own error slot and
    /// log binding" — the error slot becomes a plain `Result` per-call
    /// under this design, §9 "Error propagation").
    pub fn child(&self, non_blocking: bool) -> Self {
        Self {
            config: self.config.clone(),
            locker: self.locker.clone(),
            pool: self.pool.clone(),
            non_blocking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_is_blocking_by_default() {
        let ctx = Context::new(Config::empty());
        assert!(ctx.is_blocking());
    }

    #[test]
    fn child_context_can_become_non_blocking() {
        let ctx = Context::new(Config::empty());
        let child = ctx.child(true);
        assert!(!child.is_blocking());
        assert!(ctx.is_blocking());
    }
}
