//! Token status list: index allocation and the shared revocation bitmap.
//!
//! Every access and ID token minted while the list is enabled gets an index.
//! Revoking a grant flips the entries of its tokens to [`TokenStatus::Invalid`].
//! The list is published as a signed `statuslist+jwt` whose `lst` member is
//! the zlib-compressed bitmap, entries packed least significant bit first.

pub mod allocator;

pub use allocator::StatusIndexAllocator;

use crate::config::StatusListConfig;
use crate::registry::token_factory::TokenFactory;
use crate::store::{Store, StoreBackend, StoreError};
use authz_crypto::{base64url, CryptoError, JwtClaims};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use thiserror::Error;

pub(crate) const BITMAP_KEY: &str = "status_list:bitmap";
const MAX_UPDATE_ATTEMPTS: usize = 16;
/// Upper bound of the published bitmap, `capacity * bits / 8` bytes
pub(crate) const MAX_BITMAP_BYTES: u64 = 4 * 1024 * 1024;
pub(crate) const STATUS_LIST_TYPE: &str = "statuslist+jwt";

#[derive(Debug, Error)]
pub enum StatusListError {
    #[error("Status list exhausted: all {capacity} indices are in use")]
    Exhausted { capacity: u64 },
    #[error("Status list index {0} is out of range")]
    OutOfRange(u64),
    #[error("Status list update kept conflicting after {0} attempts")]
    Conflict(usize),
    #[error("Invalid status list configuration: {0}")]
    Config(String),
    #[error("Failed to encode status list: {0}")]
    Encoding(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to sign status list: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TokenStatus {
    Valid = 0,
    Invalid = 1,
}

/// Reference embedded in a token's `status` claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRef {
    pub idx: u64,
    pub uri: String,
}

impl StatusRef {
    pub fn to_claim(&self) -> serde_json::Value {
        json!({ "status_list": { "idx": self.idx, "uri": self.uri } })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredBitmap {
    /// base64url of the packed entries, only as long as the highest set entry needs
    data: String,
}

pub struct StatusList {
    store: Store,
    allocator: StatusIndexAllocator,
    bits: u8,
    uri: String,
    token_lifetime: Duration,
}

impl StatusList {
    pub fn new(store: Store, config: &StatusListConfig, uri: String) -> Result<Self, StatusListError> {
        if !matches!(config.bits, 1 | 2 | 4 | 8) {
            return Err(StatusListError::Config(format!(
                "bits must be 1, 2, 4 or 8, got {}",
                config.bits
            )));
        }
        if config.capacity == 0 {
            return Err(StatusListError::Config("capacity must not be zero".to_string()));
        }
        let bitmap_bytes = config
            .capacity
            .saturating_mul(u64::from(config.bits))
            .div_ceil(8);
        if bitmap_bytes > MAX_BITMAP_BYTES {
            return Err(StatusListError::Config(format!(
                "capacity {} at {} bits needs {} bytes, more than the {} byte limit",
                config.capacity, config.bits, bitmap_bytes, MAX_BITMAP_BYTES
            )));
        }
        Ok(Self {
            allocator: StatusIndexAllocator::new(store.clone(), config.capacity, config.block_size),
            store,
            bits: config.bits,
            uri,
            token_lifetime: Duration::from_secs(config.token_lifetime),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Reserves a fresh index for a token about to be minted
    pub async fn allocate(&self) -> Result<StatusRef, StatusListError> {
        let idx = self.allocator.next().await?;
        Ok(StatusRef {
            idx,
            uri: self.uri.clone(),
        })
    }

    /// Writes `status` into every entry of `indices` in one update of the stored bitmap
    pub async fn set_status(&self, indices: &[u64], status: TokenStatus) -> Result<(), StatusListError> {
        if indices.is_empty() {
            return Ok(());
        }
        if let Some(&idx) = indices.iter().find(|&&i| i >= self.allocator.capacity()) {
            return Err(StatusListError::OutOfRange(idx));
        }

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.store.get::<StoredBitmap>(BITMAP_KEY).await?;
            let mut bytes = match &current {
                Some(stored) => decode_bitmap(&stored.value.data)?,
                None => Vec::new(),
            };
            for &idx in indices {
                write_entry(&mut bytes, self.bits, idx, status as u8);
            }
            let updated = StoredBitmap {
                data: base64url::encode(&bytes),
            };

            let expected = current.map_or(0, |stored| stored.version);
            let written = self
                .store
                .compare_and_set(BITMAP_KEY, expected, &updated, None)
                .await?;
            if written {
                debug!("Set {} status list entries to {:?}", indices.len(), status);
                return Ok(());
            }
            warn!("Status list update conflicted (attempt {})", attempt);
        }
        Err(StatusListError::Conflict(MAX_UPDATE_ATTEMPTS))
    }

    pub async fn status(&self, idx: u64) -> Result<u8, StatusListError> {
        if idx >= self.allocator.capacity() {
            return Err(StatusListError::OutOfRange(idx));
        }
        let bytes = self.load().await?;
        Ok(read_entry(&bytes, self.bits, idx))
    }

    /// `base64url(zlib(bitmap))`, the bitmap padded to the full capacity
    pub async fn encoded_list(&self) -> Result<String, StatusListError> {
        let mut bytes = self.load().await?;
        let full_len = (self.allocator.capacity() * u64::from(self.bits)).div_ceil(8);
        bytes.resize(usize::try_from(full_len).unwrap_or(usize::MAX), 0);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(&bytes)
            .map_err(|e| StatusListError::Encoding(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| StatusListError::Encoding(e.to_string()))?;
        Ok(base64url::encode(compressed))
    }

    /// Signed status list token served to relying parties
    pub async fn token(&self, signer: &TokenFactory) -> Result<String, StatusListError> {
        let now = chrono::Utc::now().timestamp();
        let lifetime = i64::try_from(self.token_lifetime.as_secs()).unwrap_or(i64::MAX);

        let mut claims = JwtClaims::new();
        claims.set("sub", self.uri.clone());
        claims.set("iss", signer.issuer().to_string());
        claims.set("iat", now);
        claims.set("exp", now.saturating_add(lifetime));
        claims.set("ttl", lifetime);
        claims.set(
            "status_list",
            json!({ "bits": self.bits, "lst": self.encoded_list().await? }),
        );
        Ok(signer.sign(STATUS_LIST_TYPE, claims)?)
    }

    async fn load(&self) -> Result<Vec<u8>, StatusListError> {
        match self.store.get::<StoredBitmap>(BITMAP_KEY).await? {
            Some(stored) => decode_bitmap(&stored.value.data),
            None => Ok(Vec::new()),
        }
    }
}

fn decode_bitmap(data: &str) -> Result<Vec<u8>, StatusListError> {
    base64url::decode(data).map_err(|e| StatusListError::Encoding(e.to_string()))
}

fn position(bits: u8, idx: u64) -> (usize, u32) {
    let bit = idx * u64::from(bits);
    (usize::try_from(bit / 8).unwrap_or(usize::MAX), (bit % 8) as u32)
}

fn write_entry(bytes: &mut Vec<u8>, bits: u8, idx: u64, value: u8) {
    let (byte, shift) = position(bits, idx);
    if bytes.len() <= byte {
        bytes.resize(byte + 1, 0);
    }
    let mask = (((1u16 << bits) - 1) as u8) << shift;
    bytes[byte] = (bytes[byte] & !mask) | ((value << shift) & mask);
}

fn read_entry(bytes: &[u8], bits: u8, idx: u64) -> u8 {
    let (byte, shift) = position(bits, idx);
    let mask = ((1u16 << bits) - 1) as u8;
    bytes.get(byte).map_or(0, |b| (b >> shift) & mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::store::memory::InMemoryStore;
    use authz_crypto::{jws, Jwt};
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn status_list(bits: u8, capacity: u64) -> StatusList {
        let mut config = ServerConfig::for_test().status_list;
        config.bits = bits;
        config.capacity = capacity;
        StatusList::new(
            Store::InMemory(InMemoryStore::new()),
            &config,
            "https://as.example.com/status_list".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_entries_are_packed_lsb_first() {
        let mut bytes = Vec::new();
        write_entry(&mut bytes, 2, 0, 1);
        write_entry(&mut bytes, 2, 3, 1);
        write_entry(&mut bytes, 2, 5, 3);
        assert_eq!(bytes, vec![0b0100_0001, 0b0000_1100]);
        assert_eq!(read_entry(&bytes, 2, 3), 1);
        assert_eq!(read_entry(&bytes, 2, 5), 3);
        assert_eq!(read_entry(&bytes, 2, 100), 0);

        write_entry(&mut bytes, 2, 3, 0);
        assert_eq!(read_entry(&bytes, 2, 3), 0);
        assert_eq!(read_entry(&bytes, 2, 0), 1);
    }

    #[test]
    fn test_invalid_bit_width_is_rejected() {
        let mut config = ServerConfig::for_test().status_list;
        config.bits = 3;
        let result = StatusList::new(
            Store::InMemory(InMemoryStore::new()),
            &config,
            "uri".to_string(),
        );
        assert!(matches!(result, Err(StatusListError::Config(_))));
    }

    #[test]
    fn test_oversized_capacity_is_rejected() {
        let mut config = ServerConfig::for_test().status_list;
        config.bits = 8;
        config.capacity = MAX_BITMAP_BYTES + 1;
        let result = StatusList::new(
            Store::InMemory(InMemoryStore::new()),
            &config,
            "uri".to_string(),
        );
        assert!(matches!(result, Err(StatusListError::Config(_))));

        config.capacity = MAX_BITMAP_BYTES;
        assert!(StatusList::new(Store::InMemory(InMemoryStore::new()), &config, "uri".to_string()).is_ok());
        config.capacity = u64::MAX;
        config.bits = 1;
        assert!(StatusList::new(Store::InMemory(InMemoryStore::new()), &config, "uri".to_string()).is_err());
    }

    #[tokio::test]
    async fn test_set_status_persists_in_store() {
        let list = status_list(2, 64);
        let first = list.allocate().await.unwrap();
        let second = list.allocate().await.unwrap();
        assert_ne!(first.idx, second.idx);
        assert_eq!(list.status(first.idx).await.unwrap(), TokenStatus::Valid as u8);

        list.set_status(&[first.idx], TokenStatus::Invalid).await.unwrap();
        assert_eq!(list.status(first.idx).await.unwrap(), TokenStatus::Invalid as u8);
        assert_eq!(list.status(second.idx).await.unwrap(), TokenStatus::Valid as u8);

        assert!(matches!(
            list.set_status(&[64], TokenStatus::Invalid).await,
            Err(StatusListError::OutOfRange(64))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let list = std::sync::Arc::new(status_list(1, 256));
        let mut handles = Vec::new();
        for idx in 0..32u64 {
            let list = std::sync::Arc::clone(&list);
            handles.push(tokio::spawn(async move {
                list.set_status(&[idx], TokenStatus::Invalid).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        for idx in 0..32u64 {
            assert_eq!(list.status(idx).await.unwrap(), 1, "entry {idx}");
        }
    }

    #[tokio::test]
    async fn test_token_carries_compressed_list() {
        let config = ServerConfig::for_test();
        let factory = TokenFactory::from_config(&config).unwrap();
        let list = status_list(2, 16);
        list.set_status(&[1], TokenStatus::Invalid).await.unwrap();

        let token = list.token(&factory).await.unwrap();
        let jwt = Jwt::parse(&token).unwrap();
        assert_eq!(jwt.header().typ.as_deref(), Some(STATUS_LIST_TYPE));
        jws::verify(&jwt, &factory.signing_key().unwrap()).unwrap();

        let claims = jwt.claims();
        assert_eq!(claims.subject(), Some("https://as.example.com/status_list"));
        let status_list = claims.get("status_list").unwrap();
        assert_eq!(status_list["bits"], 2);

        let compressed = base64url::decode(status_list["lst"].as_str().unwrap()).unwrap();
        let mut bitmap = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut bitmap)
            .unwrap();
        assert_eq!(bitmap, vec![0b0000_0100, 0, 0, 0]);
    }
}
