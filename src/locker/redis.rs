//! Redis-backed distributed locker, substituting for the original's
//! Memcache-based lock (§5, DESIGN.md). A `SET key value NX EX ttl` forms
//! the mutex; release only deletes a key this process still owns, checked
//! with a compare-and-delete Lua script to avoid releasing a lock some
//! other holder has since re-acquired after our own timeout expired.

use super::{LockStatus, Locker};
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

pub struct RedisLocker {
    connection: ConnectionManager,
    key_prefix: String,
    token: String,
}

impl RedisLocker {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection, key_prefix: key_prefix.into(), token: Uuid::new_v4().to_string() })
    }

    fn full_key(&self, resource: &str) -> String {
        format!("{}lock:{}", self.key_prefix, resource)
    }
}

#[async_trait]
impl Locker for RedisLocker {
    async fn acquire(&self, resource: &str, timeout: Duration) -> Result<LockStatus> {
        let key = self.full_key(resource);
        let mut conn = self.connection.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&self.token)
            .arg("NX")
            .arg("EX")
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        match set {
            Some(_) => Ok(LockStatus::Acquired),
            None => {
                let exists: bool = conn.exists(&key).await?;
                if exists {
                    Ok(LockStatus::Locked)
                } else {
                    Ok(LockStatus::NoEntry)
                }
            }
        }
    }

    async fn release(&self, resource: &str) -> Result<()> {
        let key = self.full_key(resource);
        let mut conn = self.connection.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);
        let _: i64 = script.key(&key).arg(&self.token).invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn clear_all_locks(&self) -> Result<()> {
        let pattern = format!("{}lock:*", self.key_prefix);
        let mut conn = self.connection.clone();
        let mut cursor = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) =
                redis::cmd("SCAN").arg(cursor).arg("MATCH").arg(&pattern).query_async(&mut conn).await?;
            if !keys.is_empty() {
                let _: () = conn.del(keys).await?;
            }
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_key_is_prefixed_and_namespaced() {
        assert_eq!(format!("{}lock:{}", "mapcache:", "3-1-2-osm"), "mapcache:lock:3-1-2-osm");
    }
}
