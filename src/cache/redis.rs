//! Networked backend on Redis.

use super::backend::KeyValueStore;
use super::key::KeyPattern;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

const SCAN_BATCH: usize = 200;

// DECR on a missing key would create it at -1; the contract wants NotFound.
const DECREMENT_EXISTING_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return false
end
if not string.match(current, '^-?%d+$') then
    return redis.error_reply('NOT_INTEGER value is not an integer')
end
return redis.call('DECR', KEYS[1])
"#;

/// Shared, persistent store reached over the network.
///
/// Holds a [`ConnectionManager`], which multiplexes one connection and
/// reconnects on failure; clones are cheap and share it.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    decrement: redis::Script,
    addr: String,
}

impl RedisStore {
    /// Connect to `redis://host:port/`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_url(&format!("redis://{}:{}/", host, port)).await
    }

    pub async fn connect_url(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::configuration(
                format!("invalid redis address: {}", e),
                ErrorContext::new().with_field_path("store").with_details(url),
            )
        })?;
        let conn = client.get_connection_manager().await?;
        debug!(addr = %url, "connected to redis");
        Ok(Self {
            conn,
            decrement: redis::Script::new(DECREMENT_EXISTING_SCRIPT),
            addr: url.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn with_ttl(cmd: &mut redis::Cmd, ttl: Option<Duration>) {
        if let Some(ttl) = ttl.filter(|d| !d.is_zero()) {
            // PX keeps sub-second TTLs meaningful; never round down to "no expiry".
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        Self::with_ttl(&mut cmd, ttl);
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        Self::with_ttl(&mut cmd, ttl);
        // Reply is "OK" when written and nil when the key already existed.
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn decrement(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let reply: redis::RedisResult<Option<i64>> =
            self.decrement.key(key).invoke_async(&mut conn).await;
        match reply {
            Ok(Some(v)) => Ok(v),
            Ok(None) => Err(Error::not_found(key)),
            Err(e) if e.code() == Some("NOT_INTEGER") => {
                let value = self.get(key).await?.unwrap_or_default();
                Err(Error::InvalidCounter {
                    key: key.to_string(),
                    value,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn list_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let glob = pattern.to_glob();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        // SCAN instead of KEYS so a large key space never blocks the server.
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&glob)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch.into_iter().filter(|k| pattern.matches(k)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may report a key more than once while the table rehashes.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
