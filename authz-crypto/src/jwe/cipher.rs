//! Content encryption primitives: AES-GCM, AES-CBC and HMAC tags.

use super::BlockEncryptionAlgorithm;
use crate::error::CryptoError;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
pub(super) const CBC_IV_LEN: usize = 16;

/// Ciphertext pieces of one sealed payload
pub(super) struct Sealed {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Authenticated encryption for the RFC 7518 algorithms (GCM and CBC-HS)
pub(super) fn seal(
    enc: BlockEncryptionAlgorithm,
    cek: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Sealed, CryptoError> {
    match enc {
        BlockEncryptionAlgorithm::A128Gcm | BlockEncryptionAlgorithm::A256Gcm => {
            let iv = crate::random_bytes(GCM_IV_LEN);
            let payload = Payload { msg: plaintext, aad };
            let nonce = Nonce::from_slice(&iv);
            let mut sealed = match enc {
                BlockEncryptionAlgorithm::A128Gcm => Aes128Gcm::new_from_slice(cek)
                    .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?
                    .encrypt(nonce, payload),
                _ => Aes256Gcm::new_from_slice(cek)
                    .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?
                    .encrypt(nonce, payload),
            }
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
            let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);
            Ok(Sealed {
                iv,
                ciphertext: sealed,
                tag,
            })
        }
        BlockEncryptionAlgorithm::A128CbcHs256 | BlockEncryptionAlgorithm::A256CbcHs512 => {
            let (mac_key, enc_key) = split_composite_key(enc, cek)?;
            let iv = crate::random_bytes(CBC_IV_LEN);
            let ciphertext = aes_cbc_encrypt(enc_key, &iv, plaintext)?;
            let tag = cbc_hs_tag(enc, mac_key, aad, &iv, &ciphertext)?;
            Ok(Sealed {
                iv,
                ciphertext,
                tag,
            })
        }
        other => Err(CryptoError::UnsupportedAlgorithm(format!(
            "{other} is not an RFC 7518 content encryption algorithm"
        ))),
    }
}

pub(super) fn open(
    enc: BlockEncryptionAlgorithm,
    cek: &[u8],
    sealed: &Sealed,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match enc {
        BlockEncryptionAlgorithm::A128Gcm | BlockEncryptionAlgorithm::A256Gcm => {
            if sealed.iv.len() != GCM_IV_LEN {
                return Err(CryptoError::Decryption("invalid GCM IV length".to_string()));
            }
            let mut combined = sealed.ciphertext.clone();
            combined.extend_from_slice(&sealed.tag);
            let payload = Payload {
                msg: &combined,
                aad,
            };
            let nonce = Nonce::from_slice(&sealed.iv);
            match enc {
                BlockEncryptionAlgorithm::A128Gcm => Aes128Gcm::new_from_slice(cek)
                    .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?
                    .decrypt(nonce, payload),
                _ => Aes256Gcm::new_from_slice(cek)
                    .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?
                    .decrypt(nonce, payload),
            }
            .map_err(|_| CryptoError::Decryption("authentication tag mismatch".to_string()))
        }
        BlockEncryptionAlgorithm::A128CbcHs256 | BlockEncryptionAlgorithm::A256CbcHs512 => {
            let (mac_key, enc_key) = split_composite_key(enc, cek)?;
            let mut al = Vec::with_capacity(8);
            al.extend_from_slice(&((aad.len() as u64) * 8).to_be_bytes());
            let input = [aad, sealed.iv.as_slice(), sealed.ciphertext.as_slice(), al.as_slice()].concat();
            verify_truncated_tag(enc, mac_key, &input, &sealed.tag)?;
            aes_cbc_decrypt(enc_key, &sealed.iv, &sealed.ciphertext)
        }
        other => Err(CryptoError::UnsupportedAlgorithm(format!(
            "{other} is not an RFC 7518 content encryption algorithm"
        ))),
    }
}

/// MAC key is the first half of the CEK, encryption key the second half
fn split_composite_key(
    enc: BlockEncryptionAlgorithm,
    cek: &[u8],
) -> Result<(&[u8], &[u8]), CryptoError> {
    if cek.len() != enc.key_len() {
        return Err(CryptoError::InvalidParameter(format!(
            "{enc} needs a {}-byte key, got {}",
            enc.key_len(),
            cek.len()
        )));
    }
    Ok(cek.split_at(cek.len() / 2))
}

fn cbc_hs_tag(
    enc: BlockEncryptionAlgorithm,
    mac_key: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let al = ((aad.len() as u64) * 8).to_be_bytes();
    let input = [aad, iv, ciphertext, al.as_slice()].concat();
    let mut tag = hmac(wide_hash(enc), mac_key, &input)?;
    tag.truncate(mac_key.len());
    Ok(tag)
}

fn verify_truncated_tag(
    enc: BlockEncryptionAlgorithm,
    mac_key: &[u8],
    input: &[u8],
    tag: &[u8],
) -> Result<(), CryptoError> {
    if tag.len() != mac_key.len() {
        return Err(CryptoError::Decryption("invalid authentication tag length".to_string()));
    }
    let result = if wide_hash(enc) {
        let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(mac_key)
            .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?;
        mac.update(input);
        mac.verify_truncated_left(tag)
    } else {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
            .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?;
        mac.update(input);
        mac.verify_truncated_left(tag)
    };
    result.map_err(|_| CryptoError::Decryption("authentication tag mismatch".to_string()))
}

/// HMAC-SHA-512 for the 256-bit variants, HMAC-SHA-256 otherwise
pub(super) fn wide_hash(enc: BlockEncryptionAlgorithm) -> bool {
    matches!(
        enc,
        BlockEncryptionAlgorithm::A256CbcHs512 | BlockEncryptionAlgorithm::A256CbcPlusHs512
    )
}

pub(super) fn hmac(wide: bool, key: &[u8], input: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if wide {
        let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    } else {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Full-length constant-time HMAC check
pub(super) fn verify_hmac(
    wide: bool,
    key: &[u8],
    input: &[u8],
    tag: &[u8],
) -> Result<(), CryptoError> {
    let result = if wide {
        let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?;
        mac.update(input);
        mac.verify_slice(tag)
    } else {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidParameter(e.to_string()))?;
        mac.update(input);
        mac.verify_slice(tag)
    };
    result.map_err(|_| CryptoError::Decryption("integrity value mismatch".to_string()))
}

pub(super) fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let invalid = |e: aes::cipher::InvalidLength| CryptoError::InvalidParameter(e.to_string());
    match key.len() {
        16 => Ok(cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        24 => Ok(cbc::Encryptor::<aes::Aes192>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        32 => Ok(cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        other => Err(CryptoError::InvalidParameter(format!(
            "unsupported AES key length {other}"
        ))),
    }
}

pub(super) fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let invalid = |e: aes::cipher::InvalidLength| CryptoError::InvalidParameter(e.to_string());
    let padding = |_| CryptoError::Decryption("invalid padding".to_string());
    match key.len() {
        16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(padding),
        24 => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(padding),
        32 => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(padding),
        other => Err(CryptoError::InvalidParameter(format!(
            "unsupported AES key length {other}"
        ))),
    }
}
