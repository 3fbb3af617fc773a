use super::{StoreBackend, StoreError, Version, Versioned};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::future::ready;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Slot {
    Document(String),
    Counter(u64),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    version: Version,
    ttl: Option<Duration>,
}

/// Per-entry expiration. Sets only ever extend their lifetime, every other
/// entry takes the TTL of its latest write.
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        match value.slot {
            Slot::Set(_) => match (duration_until_expiry, value.ttl) {
                (Some(current), Some(requested)) => Some(current.max(requested)),
                _ => None,
            },
            _ => value.ttl,
        }
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    cache: MokaCache<String, Entry>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Initialize a new in-memory store. Entries leave only on TTL or delete,
    /// never on capacity pressure.
    pub fn new() -> Self {
        let cache = MokaCache::builder().expire_after(EntryExpiry).build();
        Self { cache }
    }

    fn document<T: DeserializeOwned>(key: &str, entry: &Entry) -> Result<T, StoreError> {
        match &entry.slot {
            Slot::Document(data) => {
                serde_json::from_str(data).map_err(|e| StoreError::Deserialization(e.to_string()))
            }
            _ => Err(StoreError::WrongType(key.to_string(), "document")),
        }
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<Versioned<T>>, StoreError> {
        match self.cache.get(key).await {
            Some(entry) => Ok(Some(Versioned {
                value: Self::document(key, &entry)?,
                version: entry.version,
            })),
            None => Ok(None),
        }
    }

    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<Version, StoreError> {
        let data = serde_json::to_string(value)?;
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let version = current.map_or(0, |e| e.value().version) + 1;
                ready(Op::Put(Entry {
                    slot: Slot::Document(data),
                    version,
                    ttl,
                }))
            })
            .await;

        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => {
                Ok(entry.value().version)
            }
            _ => Err(StoreError::Unavailable(format!("write to {key} was dropped"))),
        }
    }

    async fn compare_and_set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        expected: Version,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let data = serde_json::to_string(value)?;
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().version == expected => Op::Put(Entry {
                        slot: Slot::Document(data),
                        version: expected + 1,
                        ttl,
                    }),
                    None if expected == 0 => Op::Put(Entry {
                        slot: Slot::Document(data),
                        version: 1,
                        ttl,
                    }),
                    _ => Op::Nop,
                };
                ready(op)
            })
            .await;

        Ok(matches!(
            result,
            CompResult::Inserted(_) | CompResult::ReplacedWith(_)
        ))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn increment(&self, key: &str, by: u64) -> Result<u64, StoreError> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current.map(|e| e.into_value()) {
                    None => Op::Put(Entry {
                        slot: Slot::Counter(by),
                        version: 1,
                        ttl: None,
                    }),
                    Some(Entry {
                        slot: Slot::Counter(count),
                        version,
                        ttl,
                    }) => Op::Put(Entry {
                        slot: Slot::Counter(count + by),
                        version: version + 1,
                        ttl,
                    }),
                    Some(_) => Op::Nop,
                };
                ready(op)
            })
            .await;

        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => {
                match entry.value().slot {
                    Slot::Counter(count) => Ok(count),
                    _ => Err(StoreError::WrongType(key.to_string(), "counter")),
                }
            }
            _ => Err(StoreError::WrongType(key.to_string(), "counter")),
        }
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current.map(|e| e.into_value()) {
                    None => Op::Put(Entry {
                        slot: Slot::Set(HashSet::from([member.to_string()])),
                        version: 1,
                        ttl,
                    }),
                    Some(Entry {
                        slot: Slot::Set(mut members),
                        version,
                        ..
                    }) => {
                        members.insert(member.to_string());
                        Op::Put(Entry {
                            slot: Slot::Set(members),
                            version: version + 1,
                            ttl,
                        })
                    }
                    Some(_) => Op::Nop,
                };
                ready(op)
            })
            .await;

        match result {
            CompResult::Inserted(_) | CompResult::ReplacedWith(_) => Ok(()),
            _ => Err(StoreError::WrongType(key.to_string(), "set")),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current.map(|e| e.into_value()) {
                    Some(Entry {
                        slot: Slot::Set(mut members),
                        version,
                        ttl,
                    }) => {
                        members.remove(member);
                        if members.is_empty() {
                            Op::Remove
                        } else {
                            Op::Put(Entry {
                                slot: Slot::Set(members),
                                version: version + 1,
                                ttl,
                            })
                        }
                    }
                    _ => Op::Nop,
                };
                ready(op)
            })
            .await;

        match result {
            CompResult::Unchanged(entry) if !matches!(entry.value().slot, Slot::Set(_)) => {
                Err(StoreError::WrongType(key.to_string(), "set"))
            }
            _ => Ok(()),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.cache.get(key).await {
            Some(Entry {
                slot: Slot::Set(members),
                ..
            }) => Ok(members.into_iter().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string(), "set")),
            None => Ok(Vec::new()),
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        field: String,
    }

    #[tokio::test]
    async fn test_entry_expiration() {
        let store = InMemoryStore::new();

        let data = TestData {
            field: "test".to_string(),
        };
        store
            .put("short", &data, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.put("forever", &data, None).await.unwrap();

        let retrieved: Versioned<TestData> = store.get("short").await.unwrap().unwrap();
        assert_eq!(data, retrieved.value);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.get::<TestData>("short").await.unwrap().is_none());
        assert!(store.get::<TestData>("forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_lifetime_is_never_shortened() {
        let store = InMemoryStore::new();
        store
            .set_add("s", "a", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        store
            .set_add("s", "b", Some(Duration::from_millis(100)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.set_members("s").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_reported() {
        let store = InMemoryStore::new();
        store.increment("counter", 1).await.unwrap();

        assert!(matches!(
            store.get::<TestData>("counter").await,
            Err(StoreError::WrongType(_, "document"))
        ));
        assert!(matches!(
            store.set_add("counter", "x", None).await,
            Err(StoreError::WrongType(_, "set"))
        ));
    }

    #[tokio::test]
    async fn test_put_bumps_version() {
        let store = InMemoryStore::new();
        let data = TestData {
            field: "v".to_string(),
        };
        let v1 = store.put("k", &data, None).await.unwrap();
        let v2 = store.put("k", &data, None).await.unwrap();
        assert_eq!(v2, v1 + 1);
    }
}
