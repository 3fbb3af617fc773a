use super::KeyEncryptionAlgorithm;
use crate::error::CryptoError;
use crate::keys::JsonWebKey;
use rand::rngs::OsRng;
use rsa::Oaep;
use sha1::Sha1;
use sha2::Sha256;

/// Content key for this message: the shared secret for `dir`, a fresh random
/// key otherwise
pub(super) fn content_key(
    alg: KeyEncryptionAlgorithm,
    key: &JsonWebKey,
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    match alg {
        KeyEncryptionAlgorithm::Dir => {
            let secret = key.octet_secret()?;
            if secret.len() != len {
                return Err(CryptoError::InvalidParameter(format!(
                    "dir key '{}' is {} bytes, content encryption needs {len}",
                    key.kid,
                    secret.len()
                )));
            }
            Ok(secret.to_vec())
        }
        KeyEncryptionAlgorithm::RsaOaep | KeyEncryptionAlgorithm::RsaOaep256 => {
            Ok(crate::random_bytes(len))
        }
    }
}

/// Produces the JWE Encrypted Key segment
pub(super) fn wrap(
    alg: KeyEncryptionAlgorithm,
    content_key: &[u8],
    key: &JsonWebKey,
) -> Result<Vec<u8>, CryptoError> {
    let padding = match alg {
        KeyEncryptionAlgorithm::Dir => return Ok(Vec::new()),
        KeyEncryptionAlgorithm::RsaOaep => Oaep::new::<Sha1>(),
        KeyEncryptionAlgorithm::RsaOaep256 => Oaep::new::<Sha256>(),
    };
    key.rsa_public()?
        .encrypt(&mut OsRng, padding, content_key)
        .map_err(|e| CryptoError::Encryption(format!("{alg} key wrap failed: {e}")))
}

/// Recovers the content key from the JWE Encrypted Key segment
pub(super) fn unwrap(
    alg: KeyEncryptionAlgorithm,
    encrypted_key: &[u8],
    key: &JsonWebKey,
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let padding = match alg {
        KeyEncryptionAlgorithm::Dir => {
            if !encrypted_key.is_empty() {
                return Err(CryptoError::Decryption(
                    "dir encryption must not carry an encrypted key".to_string(),
                ));
            }
            return content_key(alg, key, len);
        }
        KeyEncryptionAlgorithm::RsaOaep => Oaep::new::<Sha1>(),
        KeyEncryptionAlgorithm::RsaOaep256 => Oaep::new::<Sha256>(),
    };
    let content_key = key
        .rsa_private()?
        .decrypt(padding, encrypted_key)
        .map_err(|e| CryptoError::Decryption(format!("{alg} key unwrap failed: {e}")))?;
    if content_key.len() != len {
        return Err(CryptoError::Decryption(format!(
            "unwrapped key is {} bytes, expected {len}",
            content_key.len()
        )));
    }
    Ok(content_key)
}
