//! # authz-crypto
//!
//! Cryptographic building blocks for the token issuance core.
//!
//! ## Components
//!
//! - **jwt / jws:** Compact JWT parsing, signing and verification.
//! - **jwe:** Compact JWE with an explicit (alg, enc) strategy table.
//! - **kdf:** Concat-KDF derivation for the legacy `A128CBC+HS256` / `A256CBC+HS512` composites.
//! - **token_binding:** Token Binding message parser and confirmation hashes.
//! - **keys:** Key material and the key provider abstraction.

pub mod error;
pub mod jwe;
pub mod jws;
pub mod jwt;
pub mod kdf;
pub mod keys;
pub mod token_binding;

pub use error::CryptoError;
pub use jwe::{BlockEncryptionAlgorithm, Jwe, JweHeader, JweStrategies, KeyEncryptionAlgorithm};
pub use jws::SignatureAlgorithm;
pub use jwt::{Jwt, JwtClaims, JwtHeader};
pub use keys::{InMemoryKeyProvider, JsonWebKey, KeyMaterial, KeyProvider};
pub use token_binding::{TokenBinding, TokenBindingId, TokenBindingMessage};

/// Base64url (no padding) helpers shared by every compact serialization
pub mod base64url {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
        URL_SAFE_NO_PAD.encode(input)
    }

    pub fn decode<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>, base64::DecodeError> {
        URL_SAFE_NO_PAD.decode(input)
    }
}

/// Fills a fresh buffer with `len` bytes from the operating system RNG
pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
