use super::{StoreBackend, StoreError, Version, Versioned};
use async_trait::async_trait;
use log::error;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

// Documents live in a hash: `d` holds the JSON, `v` the version.
const PUT_SCRIPT: &str = r"
local v = redis.call('HINCRBY', KEYS[1], 'v', 1)
redis.call('HSET', KEYS[1], 'd', ARGV[1])
if tonumber(ARGV[2]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
  redis.call('PERSIST', KEYS[1])
end
return v
";

const CAS_SCRIPT: &str = r"
local current = tonumber(redis.call('HGET', KEYS[1], 'v')) or 0
if current ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('HSET', KEYS[1], 'd', ARGV[2], 'v', current + 1)
if tonumber(ARGV[3]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
else
  redis.call('PERSIST', KEYS[1])
end
return 1
";

const SET_ADD_SCRIPT: &str = r"
redis.call('SADD', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl > 0 then
  local current = redis.call('PTTL', KEYS[1])
  if current < ttl then
    redis.call('PEXPIRE', KEYS[1], ttl)
  end
end
return 1
";

fn ttl_millis(ttl: Option<Duration>) -> u64 {
    ttl.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX).max(1))
}

#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    conn_manager: ConnectionManager,
    prefix: String,
    put_script: Arc<Script>,
    cas_script: Arc<Script>,
    set_add_script: Arc<Script>,
}

impl RedisStore {
    /// Initialize a new Redis store instance
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, String> {
        let client = match Client::open(redis_url) {
            Ok(client) => client,
            Err(err) => {
                return Err(format!("Failed to connect to Redis: {}", err));
            }
        };

        let conn_manager = match ConnectionManager::new(client.clone()).await {
            Ok(manager) => manager,
            Err(err) => {
                return Err(format!(
                    "Failed to create Redis connection manager: {}",
                    err
                ));
            }
        };

        // Test the connection to ensure it's working
        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {}", err));
        }

        Ok(Self {
            _client: client,
            conn_manager,
            prefix: prefix.to_string(),
            put_script: Arc::new(Script::new(PUT_SCRIPT)),
            cas_script: Arc::new(Script::new(CAS_SCRIPT)),
            set_add_script: Arc::new(Script::new(SET_ADD_SCRIPT)),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    fn redis_error(operation: &str, key: &str, err: redis::RedisError) -> StoreError {
        error!("Redis error while {} key {}: {}", operation, key, err);
        StoreError::Redis(err.to_string())
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<Versioned<T>>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let (data, version): (Option<String>, Option<Version>) = redis::cmd("HMGET")
            .arg(self.key(key))
            .arg("d")
            .arg("v")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::redis_error("getting", key, e))?;

        match (data, version) {
            (Some(data), Some(version)) => serde_json::from_str(&data)
                .map_err(|e| StoreError::Deserialization(e.to_string()))
                .map(|value| Some(Versioned { value, version })),
            _ => Ok(None),
        }
    }

    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<Version, StoreError> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.conn_manager.clone();
        self.put_script
            .key(self.key(key))
            .arg(serialized)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::redis_error("setting", key, e))
    }

    async fn compare_and_set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        expected: Version,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.conn_manager.clone();
        let swapped: i64 = self
            .cas_script
            .key(self.key(key))
            .arg(expected)
            .arg(serialized)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::redis_error("swapping", key, e))?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();
        let removed: usize = conn
            .del(self.key(key))
            .await
            .map_err(|e| Self::redis_error("deleting", key, e))?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let prefixed: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let mut conn = self.conn_manager.clone();
        conn.del(prefixed)
            .await
            .map_err(|e| Self::redis_error("deleting", &keys.join(","), e))
    }

    async fn increment(&self, key: &str, by: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn_manager.clone();
        conn.incr(self.key(key), by)
            .await
            .map_err(|e| Self::redis_error("incrementing", key, e))
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = self
            .set_add_script
            .key(self.key(key))
            .arg(member)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::redis_error("adding to", key, e))?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        conn.srem::<_, _, ()>(self.key(key), member)
            .await
            .map_err(|e| Self::redis_error("removing from", key, e))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        conn.smembers(self.key(key))
            .await
            .map_err(|e| Self::redis_error("reading", key, e))
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }
}
