//! Disk-file locker: one file per resource in a shared directory, the
//! mtime standing in for a lease timestamp so a stale lock can be detected
//! without any cross-process signaling (§5). Grounded on
//! `original_source/lib/lock.c`'s file-based lock (`O_CREAT|O_EXCL`).

use super::{LockStatus, Locker};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;

pub struct DiskLocker {
    lock_dir: PathBuf,
}

impl DiskLocker {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self { lock_dir: lock_dir.into() }
    }

    fn lock_path(&self, resource: &str) -> PathBuf {
        self.lock_dir.join(format!("{resource}.lck"))
    }

    async fn is_stale(path: &Path, timeout: Duration) -> bool {
        match fs::metadata(path).await.and_then(|meta| meta.modified()) {
            Ok(modified) => match SystemTime::now().duration_since(modified) {
                Ok(age) => age > timeout,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Locker for DiskLocker {
    async fn acquire(&self, resource: &str, timeout: Duration) -> Result<LockStatus> {
        fs::create_dir_all(&self.lock_dir).await?;
        let path = self.lock_path(resource);
        let pid = std::process::id().to_string();
        match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(pid.as_bytes()).await?;
                Ok(LockStatus::Acquired)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if Self::is_stale(&path, timeout).await {
                    tracing::warn!(resource, "disk lock stale past timeout, force-removing");
                    let _ = fs::remove_file(&path).await;
                    Ok(LockStatus::NoEntry)
                } else {
                    Ok(LockStatus::Locked)
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn release(&self, resource: &str) -> Result<()> {
        let path = self.lock_path(resource);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn ping(&self) -> Result<()> {
        fs::create_dir_all(&self.lock_dir).await?;
        Ok(())
    }

    async fn clear_all_locks(&self) -> Result<()> {
        let mut entries = match fs::read_dir(&self.lock_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|ext| ext.to_str()) == Some("lck") {
                let _ = fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_on_fresh_lock_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DiskLocker::new(dir.path());
        let first = locker.acquire("3-1-2-osm", Duration::from_secs(120)).await.unwrap();
        assert_eq!(first, LockStatus::Acquired);
        let second = locker.acquire("3-1-2-osm", Duration::from_secs(120)).await.unwrap();
        assert_eq!(second, LockStatus::Locked);
    }

    #[tokio::test]
    async fn release_then_acquire_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DiskLocker::new(dir.path());
        locker.acquire("3-1-2-osm", Duration::from_secs(120)).await.unwrap();
        locker.release("3-1-2-osm").await.unwrap();
        let status = locker.acquire("3-1-2-osm", Duration::from_secs(120)).await.unwrap();
        assert_eq!(status, LockStatus::Acquired);
    }

    #[tokio::test]
    async fn stale_lock_is_force_removed() {
        let dir = tempfile::tempdir().unwrap();
        let locker = DiskLocker::new(dir.path());
        locker.acquire("3-1-2-osm", Duration::from_secs(120)).await.unwrap();
        let status = locker.acquire("3-1-2-osm", Duration::from_millis(0)).await.unwrap();
        assert_eq!(status, LockStatus::NoEntry);
    }
}
