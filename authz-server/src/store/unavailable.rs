use super::{StoreBackend, StoreError, Version, Versioned};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Store whose backend is unreachable: every operation fails
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore;

fn unreachable_backend() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl StoreBackend for UnavailableStore {
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        _key: &str,
    ) -> Result<Option<Versioned<T>>, StoreError> {
        Err(unreachable_backend())
    }

    async fn put<T: Serialize + Send + Sync>(
        &self,
        _key: &str,
        _value: &T,
        _ttl: Option<Duration>,
    ) -> Result<Version, StoreError> {
        Err(unreachable_backend())
    }

    async fn compare_and_set<T: Serialize + Send + Sync>(
        &self,
        _key: &str,
        _expected: Version,
        _value: &T,
        _ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        Err(unreachable_backend())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Err(unreachable_backend())
    }

    async fn delete_many(&self, _keys: &[String]) -> Result<usize, StoreError> {
        Err(unreachable_backend())
    }

    async fn increment(&self, _key: &str, _by: u64) -> Result<u64, StoreError> {
        Err(unreachable_backend())
    }

    async fn set_add(
        &self,
        _key: &str,
        _member: &str,
        _ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        Err(unreachable_backend())
    }

    async fn set_remove(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        Err(unreachable_backend())
    }

    async fn set_members(&self, _key: &str) -> Result<Vec<String>, StoreError> {
        Err(unreachable_backend())
    }

    async fn health_check(&self) -> Result<(), String> {
        Err("connection refused".to_string())
    }
}
