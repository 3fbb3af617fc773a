use super::StatusListError;
use crate::store::{Store, StoreBackend};
use log::debug;
use std::fmt;
use tokio::sync::Mutex;

/// Store key of the shared reservation counter
pub(crate) const COUNTER_KEY: &str = "status_list:next";

#[derive(Debug, Default)]
struct Block {
    next: u64,
    end: u64,
}

/// Hands out status list indices.
///
/// Blocks of `block_size` indices are reserved with one atomic increment of a
/// store counter, so instances sharing the store never collide. Inside a block
/// the next index comes from memory. Indices are never handed out twice and
/// never reused; once `capacity` is reached every call fails.
pub struct StatusIndexAllocator {
    store: Store,
    capacity: u64,
    block_size: u64,
    block: Mutex<Block>,
}

impl fmt::Debug for StatusIndexAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusIndexAllocator")
            .field("capacity", &self.capacity)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

impl StatusIndexAllocator {
    pub fn new(store: Store, capacity: u64, block_size: u64) -> Self {
        Self {
            store,
            capacity,
            block_size: block_size.max(1),
            block: Mutex::new(Block::default()),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub async fn next(&self) -> Result<u64, StatusListError> {
        let mut block = self.block.lock().await;
        if block.next >= block.end {
            *block = self.reserve().await?;
        }
        let index = block.next;
        block.next += 1;
        Ok(index)
    }

    async fn reserve(&self) -> Result<Block, StatusListError> {
        let end = self.store.increment(COUNTER_KEY, self.block_size).await?;
        let start = end - self.block_size;
        if start >= self.capacity {
            return Err(StatusListError::Exhausted {
                capacity: self.capacity,
            });
        }
        let end = end.min(self.capacity);
        debug!("Reserved status list indices {}..{}", start, end);
        Ok(Block { next: start, end })
    }
}
