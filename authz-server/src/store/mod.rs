use crate::config::{StoreConfig, StoreKind};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis;
#[cfg(test)]
pub mod unavailable;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse value: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Key {0} does not hold a {1}")]
    WrongType(String, &'static str),
}

/// Monotonic per-key version, bumped on every write
pub type Version = u64;

/// A stored value together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

/// Store trait defining the interface for all store implementations.
///
/// Values are JSON documents carrying a version so callers can implement
/// optimistic updates with [`StoreBackend::compare_and_set`]. A `ttl` of
/// `None` keeps the entry until it is deleted.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<Versioned<T>>, StoreError>;

    /// Unconditionally writes `value`, returning its new version
    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<Version, StoreError>;

    /// Writes `value` only if the key still holds version `expected`. An
    /// `expected` of 0 creates the key and requires it to be absent.
    /// Returns `false` when the key changed or disappeared.
    async fn compare_and_set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        expected: Version,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Returns `true` if the key existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns how many of the keys existed
    async fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError>;

    /// Atomically adds `by` to a counter that starts at zero and returns the new value
    async fn increment(&self, key: &str, by: u64) -> Result<u64, StoreError>;

    /// Adds a member to a set. The set expires no earlier than `ttl` from now.
    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>)
        -> Result<(), StoreError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Returns Ok(()) if healthy, or Err with a descriptive message if unhealthy.
    async fn health_check(&self) -> Result<(), String>;
}

/// Store implementation that provides a uniform interface regardless of backend.
#[derive(Clone)]
pub enum Store {
    /// In-memory store implementation using Moka
    InMemory(memory::InMemoryStore),
    /// Redis-based store implementation
    Redis(redis::RedisStore),
    /// Store whose every operation fails, for failure-path tests
    #[cfg(test)]
    Unavailable(unavailable::UnavailableStore),
}

#[async_trait::async_trait]
impl StoreBackend for Store {
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<Versioned<T>>, StoreError> {
        match self {
            Self::InMemory(store) => store.get(key).await,
            Self::Redis(store) => store.get(key).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.get(key).await,
        }
    }

    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<Version, StoreError> {
        match self {
            Self::InMemory(store) => store.put(key, value, ttl).await,
            Self::Redis(store) => store.put(key, value, ttl).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.put(key, value, ttl).await,
        }
    }

    async fn compare_and_set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        expected: Version,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        match self {
            Self::InMemory(store) => store.compare_and_set(key, expected, value, ttl).await,
            Self::Redis(store) => store.compare_and_set(key, expected, value, ttl).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.compare_and_set(key, expected, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match self {
            Self::InMemory(store) => store.delete(key).await,
            Self::Redis(store) => store.delete(key).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.delete(key).await,
        }
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        match self {
            Self::InMemory(store) => store.delete_many(keys).await,
            Self::Redis(store) => store.delete_many(keys).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.delete_many(keys).await,
        }
    }

    async fn increment(&self, key: &str, by: u64) -> Result<u64, StoreError> {
        match self {
            Self::InMemory(store) => store.increment(key, by).await,
            Self::Redis(store) => store.increment(key, by).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.increment(key, by).await,
        }
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.set_add(key, member, ttl).await,
            Self::Redis(store) => store.set_add(key, member, ttl).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.set_add(key, member, ttl).await,
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.set_remove(key, member).await,
            Self::Redis(store) => store.set_remove(key, member).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.set_remove(key, member).await,
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::InMemory(store) => store.set_members(key).await,
            Self::Redis(store) => store.set_members(key).await,
            #[cfg(test)]
            Self::Unavailable(store) => store.set_members(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
            #[cfg(test)]
            Self::Unavailable(store) => store.health_check().await,
        }
    }
}

/// Creates the store selected by the configuration
pub async fn create_store(config: &StoreConfig) -> Result<Store, StoreError> {
    match config.kind {
        StoreKind::InMemory => Ok(Store::InMemory(memory::InMemoryStore::new())),
        StoreKind::Redis => {
            if config.redis_url.is_empty() {
                return Err(StoreError::Config(
                    "Redis URL is required for the Redis store".to_string(),
                ));
            }
            let store = redis::RedisStore::new(&config.redis_url, &config.key_prefix)
                .await
                .map_err(StoreError::Config)?;
            Ok(Store::Redis(store))
        }
    }
}
