use crate::error::CryptoError;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum KeyMaterial {
    /// Shared secret for HMAC signatures and `dir` encryption
    Octet(Vec<u8>),
    RsaPrivate(RsaPrivateKey),
    RsaPublic(RsaPublicKey),
}

// Secrets stay out of logs
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Octet(secret) => write!(f, "Octet({} bytes)", secret.len()),
            Self::RsaPrivate(_) => f.write_str("RsaPrivate"),
            Self::RsaPublic(_) => f.write_str("RsaPublic"),
        }
    }
}

/// A key and the id it is published under
#[derive(Debug, Clone)]
pub struct JsonWebKey {
    pub kid: String,
    pub material: KeyMaterial,
}

impl JsonWebKey {
    pub fn octet(kid: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            kid: kid.into(),
            material: KeyMaterial::Octet(secret.into()),
        }
    }

    /// Loads an RSA private key from PKCS#8 or PKCS#1 PEM
    pub fn rsa_private_from_pem(kid: impl Into<String>, pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidParameter(format!("invalid RSA private key: {e}")))?;
        Ok(Self {
            kid: kid.into(),
            material: KeyMaterial::RsaPrivate(key),
        })
    }

    /// Loads an RSA public key from SPKI or PKCS#1 PEM
    pub fn rsa_public_from_pem(kid: impl Into<String>, pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidParameter(format!("invalid RSA public key: {e}")))?;
        Ok(Self {
            kid: kid.into(),
            material: KeyMaterial::RsaPublic(key),
        })
    }

    pub fn generate_rsa(kid: impl Into<String>, bits: usize) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::InvalidParameter(format!("RSA key generation failed: {e}")))?;
        Ok(Self {
            kid: kid.into(),
            material: KeyMaterial::RsaPrivate(key),
        })
    }

    /// Copy of this key without private material
    pub fn public_only(&self) -> Result<Self, CryptoError> {
        Ok(Self {
            kid: self.kid.clone(),
            material: KeyMaterial::RsaPublic(self.rsa_public()?),
        })
    }

    pub fn octet_secret(&self) -> Result<&[u8], CryptoError> {
        match &self.material {
            KeyMaterial::Octet(secret) => Ok(secret),
            _ => Err(CryptoError::InvalidParameter(format!(
                "key '{}' is not a symmetric key",
                self.kid
            ))),
        }
    }

    pub fn rsa_private(&self) -> Result<&RsaPrivateKey, CryptoError> {
        match &self.material {
            KeyMaterial::RsaPrivate(key) => Ok(key),
            _ => Err(CryptoError::InvalidParameter(format!(
                "key '{}' is not an RSA private key",
                self.kid
            ))),
        }
    }

    pub fn rsa_public(&self) -> Result<RsaPublicKey, CryptoError> {
        match &self.material {
            KeyMaterial::RsaPrivate(key) => Ok(key.to_public_key()),
            KeyMaterial::RsaPublic(key) => Ok(key.clone()),
            KeyMaterial::Octet(_) => Err(CryptoError::InvalidParameter(format!(
                "key '{}' is not an RSA key",
                self.kid
            ))),
        }
    }
}

/// Source of key material addressed by key id
pub trait KeyProvider: Send + Sync {
    fn key(&self, kid: &str) -> Result<Arc<JsonWebKey>, CryptoError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    keys: HashMap<String, Arc<JsonWebKey>>,
}

impl InMemoryKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: JsonWebKey) -> Self {
        self.insert(key);
        self
    }

    pub fn insert(&mut self, key: JsonWebKey) {
        self.keys.insert(key.kid.clone(), Arc::new(key));
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyProvider for InMemoryKeyProvider {
    fn key(&self, kid: &str) -> Result<Arc<JsonWebKey>, CryptoError> {
        self.keys
            .get(kid)
            .cloned()
            .ok_or_else(|| CryptoError::KeyNotFound(kid.to_string()))
    }
}
