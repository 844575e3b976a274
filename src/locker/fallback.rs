//! Fallback locker: tries each child backend in sequence until one
//! succeeds, so a Redis outage degrades to the disk locker rather than
//! failing every metatile render (§5).

use super::{LockStatus, Locker};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

pub struct FallbackLocker {
    children: Vec<Box<dyn Locker>>,
}

impl FallbackLocker {
    pub fn new(children: Vec<Box<dyn Locker>>) -> Self {
        Self { children }
    }

    async fn first_live(&self) -> Option<&dyn Locker> {
        for child in &self.children {
            if child.ping().await.is_ok() {
                return Some(child.as_ref());
            }
        }
        None
    }
}

#[async_trait]
impl Locker for FallbackLocker {
    async fn acquire(&self, resource: &str, timeout: Duration) -> Result<LockStatus> {
        let mut last_error = None;
        for child in &self.children {
            match child.acquire(resource, timeout).await {
                Ok(status) => return Ok(status),
                Err(err) => {
                    warn!(error = %err, "locker child unavailable, trying next");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| crate::error::Error::internal("no locker backend configured")))
    }

    async fn release(&self, resource: &str) -> Result<()> {
        if let Some(locker) = self.first_live().await {
            locker.release(resource).await
        } else {
            Ok(())
        }
    }

    async fn ping(&self) -> Result<()> {
        if self.first_live().await.is_some() {
            Ok(())
        } else {
            Err(crate::error::Error::internal("no locker backend responded to ping"))
        }
    }

    async fn clear_all_locks(&self) -> Result<()> {
        for child in &self.children {
            child.clear_all_locks().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysFails;

    #[async_trait]
    impl Locker for AlwaysFails {
        async fn acquire(&self, _resource: &str, _timeout: Duration) -> Result<LockStatus> {
            Err(crate::error::Error::internal("down"))
        }
        async fn release(&self, _resource: &str) -> Result<()> {
            Err(crate::error::Error::internal("down"))
        }
        async fn ping(&self) -> Result<()> {
            Err(crate::error::Error::internal("down"))
        }
        async fn clear_all_locks(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Recorder {
        acquired: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Locker for Recorder {
        async fn acquire(&self, _resource: &str, _timeout: Duration) -> Result<LockStatus> {
            self.acquired.store(true, Ordering::SeqCst);
            Ok(LockStatus::Acquired)
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
    async fn falls_through_to_second_backend() {
        let acquired = Arc::new(AtomicBool::new(false));
        let locker = FallbackLocker::new(vec![Box::new(AlwaysFails), Box::new(Recorder { acquired: acquired.clone() })]);
        let status = locker.acquire("3-1-2-osm", Duration::from_secs(120)).await.unwrap();
        assert_eq!(status, LockStatus::Acquired);
        assert!(acquired.load(Ordering::SeqCst));
    }
}
