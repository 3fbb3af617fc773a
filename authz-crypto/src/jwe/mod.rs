//! Compact JWE and the (alg, enc) strategy table.
//!
//! Every supported combination of key management and content encryption is an
//! explicit entry in [`JweStrategies`]. Lookups are by value; a pair without an
//! entry is rejected with [`CryptoError::UnsupportedAlgorithm`].

mod cipher;
mod key_management;
mod strategy;

pub use strategy::{LegacyCompositeStrategy, StandardStrategy};

use crate::base64url;
use crate::error::CryptoError;
use crate::jwt::Jwt;
use crate::keys::JsonWebKey;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEncryptionAlgorithm {
    Dir,
    RsaOaep,
    RsaOaep256,
}

impl KeyEncryptionAlgorithm {
    pub const ALL: [Self; 3] = [Self::Dir, Self::RsaOaep, Self::RsaOaep256];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::RsaOaep => "RSA-OAEP",
            Self::RsaOaep256 => "RSA-OAEP-256",
        }
    }
}

impl fmt::Display for KeyEncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyEncryptionAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.name() == s)
            .ok_or_else(|| CryptoError::UnsupportedAlgorithm(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockEncryptionAlgorithm {
    A128Gcm,
    A256Gcm,
    A128CbcHs256,
    A256CbcHs512,
    /// Legacy composite, keys derived through Concat KDF
    A128CbcPlusHs256,
    /// Legacy composite, keys derived through Concat KDF
    A256CbcPlusHs512,
}

impl BlockEncryptionAlgorithm {
    pub const ALL: [Self; 6] = [
        Self::A128Gcm,
        Self::A256Gcm,
        Self::A128CbcHs256,
        Self::A256CbcHs512,
        Self::A128CbcPlusHs256,
        Self::A256CbcPlusHs512,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::A128Gcm => "A128GCM",
            Self::A256Gcm => "A256GCM",
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A256CbcHs512 => "A256CBC-HS512",
            Self::A128CbcPlusHs256 => "A128CBC+HS256",
            Self::A256CbcPlusHs512 => "A256CBC+HS512",
        }
    }

    /// Length of the key the key-management step transports: the CEK, or the
    /// content master key for the legacy composites
    pub fn key_len(&self) -> usize {
        match self {
            Self::A128Gcm => 16,
            Self::A256Gcm => 32,
            Self::A128CbcHs256 => 32,
            Self::A256CbcHs512 => 64,
            Self::A128CbcPlusHs256 => 32,
            Self::A256CbcPlusHs512 => 64,
        }
    }

    pub fn is_legacy_composite(&self) -> bool {
        matches!(self, Self::A128CbcPlusHs256 | Self::A256CbcPlusHs512)
    }
}

impl fmt::Display for BlockEncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlockEncryptionAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|enc| enc.name() == s)
            .ok_or_else(|| CryptoError::UnsupportedAlgorithm(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JweHeader {
    pub alg: KeyEncryptionAlgorithm,
    pub enc: BlockEncryptionAlgorithm,
    pub kid: Option<String>,
    pub typ: Option<String>,
    pub cty: Option<String>,
    pub extra: Map<String, Value>,
}

/// Wire shape of the protected header
#[derive(Serialize, Deserialize)]
struct RawJweHeader {
    alg: String,
    enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl JweHeader {
    pub fn new(alg: KeyEncryptionAlgorithm, enc: BlockEncryptionAlgorithm) -> Self {
        Self {
            alg,
            enc,
            kid: None,
            typ: None,
            cty: None,
            extra: Map::new(),
        }
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    fn encode(&self) -> Result<String, CryptoError> {
        let raw = RawJweHeader {
            alg: self.alg.to_string(),
            enc: self.enc.to_string(),
            kid: self.kid.clone(),
            typ: self.typ.clone(),
            cty: self.cty.clone(),
            extra: self.extra.clone(),
        };
        Ok(base64url::encode(serde_json::to_vec(&raw)?))
    }

    fn decode(segment: &str) -> Result<Self, CryptoError> {
        let bytes = base64url::decode(segment)
            .map_err(|e| CryptoError::MalformedToken(format!("JWE header is not base64url: {e}")))?;
        let raw: RawJweHeader = serde_json::from_slice(&bytes)
            .map_err(|e| CryptoError::MalformedToken(format!("JWE header is not valid: {e}")))?;
        Ok(Self {
            alg: raw.alg.parse()?,
            enc: raw.enc.parse()?,
            kid: raw.kid,
            typ: raw.typ,
            cty: raw.cty,
            extra: raw.extra,
        })
    }
}

/// A compact-serialized JWE: header, encrypted key, IV, ciphertext, tag
#[derive(Debug, Clone)]
pub struct Jwe {
    header: JweHeader,
    encoded_header: String,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl Jwe {
    pub fn parse(encoded: &str) -> Result<Self, CryptoError> {
        let segments: Vec<&str> = encoded.split('.').collect();
        let [header, encrypted_key, iv, ciphertext, tag] = segments.as_slice() else {
            return Err(CryptoError::MalformedToken(format!(
                "expected 5 JWE segments, found {}",
                segments.len()
            )));
        };

        Ok(Self {
            header: JweHeader::decode(header)?,
            encoded_header: header.to_string(),
            encrypted_key: decode_part(encrypted_key, "encrypted key")?,
            iv: decode_part(iv, "initialization vector")?,
            ciphertext: decode_part(ciphertext, "ciphertext")?,
            tag: decode_part(tag, "authentication tag")?,
        })
    }

    pub fn serialize(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            self.encoded_header,
            base64url::encode(&self.encrypted_key),
            base64url::encode(&self.iv),
            base64url::encode(&self.ciphertext),
            base64url::encode(&self.tag)
        )
    }

    pub fn header(&self) -> &JweHeader {
        &self.header
    }

    /// Protected header exactly as it appears on the wire, used as AAD
    pub fn encoded_header(&self) -> &str {
        &self.encoded_header
    }

    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted_key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn tag(&self) -> &[u8] {
        &self.tag
    }
}

impl fmt::Display for Jwe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn decode_part(segment: &str, name: &str) -> Result<Vec<u8>, CryptoError> {
    base64url::decode(segment)
        .map_err(|e| CryptoError::MalformedToken(format!("JWE {name} is not base64url: {e}")))
}

/// One (alg, enc) implementation
pub trait JweStrategy: Send + Sync {
    fn encrypt(
        &self,
        header: &JweHeader,
        plaintext: &[u8],
        key: &JsonWebKey,
    ) -> Result<Jwe, CryptoError>;

    fn decrypt(&self, jwe: &Jwe, key: &JsonWebKey) -> Result<Vec<u8>, CryptoError>;
}

type StrategyKey = (KeyEncryptionAlgorithm, BlockEncryptionAlgorithm);

#[derive(Clone, Default)]
pub struct JweStrategies {
    table: HashMap<StrategyKey, Arc<dyn JweStrategy>>,
}

impl JweStrategies {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table with every pair this crate implements. Legacy composites are only
    /// paired with RSA key transport.
    pub fn with_defaults() -> Self {
        let mut strategies = Self::empty();
        for alg in KeyEncryptionAlgorithm::ALL {
            for enc in BlockEncryptionAlgorithm::ALL {
                if enc.is_legacy_composite() {
                    if alg != KeyEncryptionAlgorithm::Dir {
                        strategies.register(alg, enc, Arc::new(LegacyCompositeStrategy::new(alg, enc)));
                    }
                } else {
                    strategies.register(alg, enc, Arc::new(StandardStrategy::new(alg, enc)));
                }
            }
        }
        strategies
    }

    pub fn register(
        &mut self,
        alg: KeyEncryptionAlgorithm,
        enc: BlockEncryptionAlgorithm,
        strategy: Arc<dyn JweStrategy>,
    ) {
        self.table.insert((alg, enc), strategy);
    }

    pub fn supports(&self, alg: KeyEncryptionAlgorithm, enc: BlockEncryptionAlgorithm) -> bool {
        self.table.contains_key(&(alg, enc))
    }

    fn resolve(
        &self,
        alg: KeyEncryptionAlgorithm,
        enc: BlockEncryptionAlgorithm,
    ) -> Result<&Arc<dyn JweStrategy>, CryptoError> {
        self.table
            .get(&(alg, enc))
            .ok_or_else(|| CryptoError::UnsupportedAlgorithm(format!("{alg} with {enc}")))
    }

    pub fn encrypt(
        &self,
        header: &JweHeader,
        plaintext: &[u8],
        key: &JsonWebKey,
    ) -> Result<Jwe, CryptoError> {
        debug!("Encrypting JWE with {} / {}", header.alg, header.enc);
        self.resolve(header.alg, header.enc)?
            .encrypt(header, plaintext, key)
    }

    /// Nests a signed JWT, marking the content type as `JWT`
    pub fn encrypt_jwt(
        &self,
        header: JweHeader,
        jwt: &Jwt,
        key: &JsonWebKey,
    ) -> Result<Jwe, CryptoError> {
        let mut header = header;
        header.cty = Some("JWT".to_string());
        self.encrypt(&header, jwt.serialize().as_bytes(), key)
    }

    pub fn decrypt(&self, jwe: &Jwe, key: &JsonWebKey) -> Result<Vec<u8>, CryptoError> {
        let header = jwe.header();
        self.resolve(header.alg, header.enc)?.decrypt(jwe, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names_round_trip() {
        for alg in KeyEncryptionAlgorithm::ALL {
            assert_eq!(alg.name().parse::<KeyEncryptionAlgorithm>().unwrap(), alg);
        }
        for enc in BlockEncryptionAlgorithm::ALL {
            assert_eq!(enc.name().parse::<BlockEncryptionAlgorithm>().unwrap(), enc);
        }
        assert!(matches!(
            "A128KW".parse::<KeyEncryptionAlgorithm>(),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_default_table() {
        let strategies = JweStrategies::with_defaults();
        assert!(strategies.supports(KeyEncryptionAlgorithm::Dir, BlockEncryptionAlgorithm::A256Gcm));
        assert!(strategies.supports(
            KeyEncryptionAlgorithm::RsaOaep,
            BlockEncryptionAlgorithm::A128CbcPlusHs256
        ));
        assert!(!strategies.supports(
            KeyEncryptionAlgorithm::Dir,
            BlockEncryptionAlgorithm::A128CbcPlusHs256
        ));
    }

    #[test]
    fn test_parse_requires_five_segments() {
        assert!(matches!(
            Jwe::parse("a.b.c.d"),
            Err(CryptoError::MalformedToken(_))
        ));
        assert!(matches!(
            Jwe::parse("a.b.c.d.e.f"),
            Err(CryptoError::MalformedToken(_))
        ));
    }
}
