use super::cipher::{self, CBC_IV_LEN, Sealed};
use super::key_management;
use super::{BlockEncryptionAlgorithm, Jwe, JweHeader, JweStrategy, KeyEncryptionAlgorithm};
use crate::base64url;
use crate::error::CryptoError;
use crate::kdf;
use crate::keys::JsonWebKey;

/// RFC 7516 / 7518 content encryption with the protected header as AAD
#[derive(Debug, Clone, Copy)]
pub struct StandardStrategy {
    alg: KeyEncryptionAlgorithm,
    enc: BlockEncryptionAlgorithm,
}

impl StandardStrategy {
    pub fn new(alg: KeyEncryptionAlgorithm, enc: BlockEncryptionAlgorithm) -> Self {
        Self { alg, enc }
    }
}

impl JweStrategy for StandardStrategy {
    fn encrypt(
        &self,
        header: &JweHeader,
        plaintext: &[u8],
        key: &JsonWebKey,
    ) -> Result<Jwe, CryptoError> {
        let cek = key_management::content_key(self.alg, key, self.enc.key_len())?;
        let encrypted_key = key_management::wrap(self.alg, &cek, key)?;
        let encoded_header = header.encode()?;
        let sealed = cipher::seal(self.enc, &cek, plaintext, encoded_header.as_bytes())?;

        Ok(Jwe {
            header: header.clone(),
            encoded_header,
            encrypted_key,
            iv: sealed.iv,
            ciphertext: sealed.ciphertext,
            tag: sealed.tag,
        })
    }

    fn decrypt(&self, jwe: &Jwe, key: &JsonWebKey) -> Result<Vec<u8>, CryptoError> {
        let cek = key_management::unwrap(self.alg, &jwe.encrypted_key, key, self.enc.key_len())?;
        let sealed = Sealed {
            iv: jwe.iv.clone(),
            ciphertext: jwe.ciphertext.clone(),
            tag: jwe.tag.clone(),
        };
        cipher::open(self.enc, &cek, &sealed, jwe.encoded_header.as_bytes())
    }
}

/// `A128CBC+HS256` / `A256CBC+HS512`.
///
/// A random content master key is transported; CEK and CIK are derived from it
/// with [`kdf`]. The integrity value is an untruncated HMAC over the first
/// four encoded segments joined with '.'.
#[derive(Debug, Clone, Copy)]
pub struct LegacyCompositeStrategy {
    alg: KeyEncryptionAlgorithm,
    enc: BlockEncryptionAlgorithm,
}

impl LegacyCompositeStrategy {
    pub fn new(alg: KeyEncryptionAlgorithm, enc: BlockEncryptionAlgorithm) -> Self {
        Self { alg, enc }
    }
}

fn integrity_input(encoded_header: &str, encrypted_key: &[u8], iv: &[u8], ciphertext: &[u8]) -> String {
    format!(
        "{}.{}.{}.{}",
        encoded_header,
        base64url::encode(encrypted_key),
        base64url::encode(iv),
        base64url::encode(ciphertext)
    )
}

impl JweStrategy for LegacyCompositeStrategy {
    fn encrypt(
        &self,
        header: &JweHeader,
        plaintext: &[u8],
        key: &JsonWebKey,
    ) -> Result<Jwe, CryptoError> {
        let cmk = key_management::content_key(self.alg, key, self.enc.key_len())?;
        let encrypted_key = key_management::wrap(self.alg, &cmk, key)?;
        let cek = kdf::derive_content_encryption_key(&cmk, self.enc)?;
        let cik = kdf::derive_integrity_key(&cmk, self.enc)?;

        let iv = crate::random_bytes(CBC_IV_LEN);
        let ciphertext = cipher::aes_cbc_encrypt(&cek, &iv, plaintext)?;
        let encoded_header = header.encode()?;
        let input = integrity_input(&encoded_header, &encrypted_key, &iv, &ciphertext);
        let tag = cipher::hmac(cipher::wide_hash(self.enc), &cik, input.as_bytes())?;

        Ok(Jwe {
            header: header.clone(),
            encoded_header,
            encrypted_key,
            iv,
            ciphertext,
            tag,
        })
    }

    fn decrypt(&self, jwe: &Jwe, key: &JsonWebKey) -> Result<Vec<u8>, CryptoError> {
        let cmk = key_management::unwrap(self.alg, &jwe.encrypted_key, key, self.enc.key_len())?;
        let cek = kdf::derive_content_encryption_key(&cmk, self.enc)?;
        let cik = kdf::derive_integrity_key(&cmk, self.enc)?;

        let input = integrity_input(&jwe.encoded_header, &jwe.encrypted_key, &jwe.iv, &jwe.ciphertext);
        cipher::verify_hmac(cipher::wide_hash(self.enc), &cik, input.as_bytes(), &jwe.tag)?;
        cipher::aes_cbc_decrypt(&cek, &jwe.iv, &jwe.ciphertext)
    }
}
