//! Distributed locking for the metatile single-flight render protocol
//! (§4.3(c), §5). Grounded on `original_source/lib/lock.c`: a named
//! exclusive lock keyed by the metatile's resource key, with poll-retry and
//! stale-lock force-removal on timeout.

pub mod disk;
pub mod fallback;
pub mod redis;

pub use disk::DiskLocker;
pub use fallback::FallbackLocker;
pub use redis::RedisLocker;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of an `acquire` attempt (§4.3(c)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// This caller now holds the lock and must render and release it.
    Acquired,
    /// Another caller holds the lock; the caller should poll and re-read
    /// the cache once it clears.
    Locked,
    /// The lock entry vanished between observation and acquisition —
    /// treated as "someone else just finished, re-read the cache".
    NoEntry,
}

/// A held lock's RAII guard. Dropping it without calling [`LockGuard::release`]
/// still releases the underlying resource on a best-effort basis, but
/// callers should call `release` explicitly to observe errors.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Attempt to acquire the named resource's lock.
    async fn acquire(&self, resource: &str, timeout: Duration) -> Result<LockStatus>;

    /// Release a lock this caller previously acquired.
    async fn release(&self, resource: &str) -> Result<()>;

    /// Liveness probe used by the fallback locker to pick a backend.
    async fn ping(&self) -> Result<()>;

    /// Force-remove every lock this backend holds (used by seeding tools
    /// to recover from a crashed render).
    async fn clear_all_locks(&self) -> Result<()>;
}

/// Poll `acquire` until it returns something other than `Locked`, sleeping
/// `retry_interval` between attempts, up to `timeout` total (§4.3(c)).
/// Returns `LockStatus::NoEntry` if the wait itself times out, mirroring
/// the "someone finished — re-read" treatment for a disappeared lock.
pub async fn acquire_with_retry(
    locker: &dyn Locker,
    resource: &str,
    timeout: Duration,
    retry_interval: Duration,
) -> Result<LockStatus> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match locker.acquire(resource, timeout).await? {
            LockStatus::Locked => {
                if tokio::time::Instant::now() >= deadline {
                    return Ok(LockStatus::NoEntry);
                }
                tokio::time::sleep(retry_interval).await;
            }
            status => return Ok(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyLocker {
        attempts: Arc<AtomicU32>,
        succeed_after: u32,
    }

    #[async_trait]
    impl Locker for FlakyLocker {
        async fn acquire(&self, _resource: &str, _timeout: Duration) -> Result<LockStatus> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n >= self.succeed_after {
                Ok(LockStatus::Acquired)
            } else {
                Ok(LockStatus::Locked)
            }
        }

        async fn release(&self, _resource: &str) -> Result<()> {
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn clear_all_locks(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn retry_eventually_acquires() {
        let locker = FlakyLocker { attempts: Arc::new(AtomicU32::new(0)), succeed_after: 2 };
        let status = acquire_with_retry(&locker, "3-1-2-osm", Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(status, LockStatus::Acquired);
    }
}
