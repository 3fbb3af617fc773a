//! Single-round Concat KDF used by the legacy `A128CBC+HS256` and
//! `A256CBC+HS512` composites to split a content master key into a content
//! encryption key (CEK) and a content integrity key (CIK).
//!
//! Hash input, in order: round counter `00 00 00 01`, the master key, the
//! output size in bits (32-bit big endian), the algorithm name, empty
//! PartyUInfo and PartyVInfo (four zero bytes each), then the label.

use crate::error::CryptoError;
use crate::jwe::BlockEncryptionAlgorithm;
use sha2::{Digest, Sha256, Sha512};

const ROUND_ONE: [u8; 4] = [0, 0, 0, 1];
const EMPTY_PARTY_INFO: [u8; 4] = [0, 0, 0, 0];
const ENCRYPTION_LABEL: &str = "Encryption";
const INTEGRITY_LABEL: &str = "Integrity";

/// Sizes (in bits) of the derived keys for one legacy composite
struct CompositeParams {
    cek_bits: u32,
    cik_bits: u32,
    wide_hash: bool,
}

fn composite_params(enc: BlockEncryptionAlgorithm) -> Result<CompositeParams, CryptoError> {
    match enc {
        BlockEncryptionAlgorithm::A128CbcPlusHs256 => Ok(CompositeParams {
            cek_bits: 128,
            cik_bits: 256,
            wide_hash: false,
        }),
        BlockEncryptionAlgorithm::A256CbcPlusHs512 => Ok(CompositeParams {
            cek_bits: 256,
            cik_bits: 512,
            wide_hash: true,
        }),
        other => Err(CryptoError::InvalidParameter(format!(
            "{other} does not use Concat KDF key derivation"
        ))),
    }
}

pub fn derive_content_encryption_key(
    content_master_key: &[u8],
    enc: BlockEncryptionAlgorithm,
) -> Result<Vec<u8>, CryptoError> {
    let params = composite_params(enc)?;
    derive(
        content_master_key,
        params.cek_bits,
        enc.name(),
        ENCRYPTION_LABEL,
        params.wide_hash,
    )
}

pub fn derive_integrity_key(
    content_master_key: &[u8],
    enc: BlockEncryptionAlgorithm,
) -> Result<Vec<u8>, CryptoError> {
    let params = composite_params(enc)?;
    derive(
        content_master_key,
        params.cik_bits,
        enc.name(),
        INTEGRITY_LABEL,
        params.wide_hash,
    )
}

fn derive(
    content_master_key: &[u8],
    output_bits: u32,
    algorithm: &str,
    label: &str,
    wide_hash: bool,
) -> Result<Vec<u8>, CryptoError> {
    if content_master_key.is_empty() {
        return Err(CryptoError::InvalidParameter(
            "content master key is empty".to_string(),
        ));
    }

    let mut input = Vec::with_capacity(content_master_key.len() + algorithm.len() + label.len() + 16);
    input.extend_from_slice(&ROUND_ONE);
    input.extend_from_slice(content_master_key);
    input.extend_from_slice(&output_bits.to_be_bytes());
    input.extend_from_slice(algorithm.as_bytes());
    input.extend_from_slice(&EMPTY_PARTY_INFO);
    input.extend_from_slice(&EMPTY_PARTY_INFO);
    input.extend_from_slice(label.as_bytes());

    let mut digest = if wide_hash {
        Sha512::digest(&input).to_vec()
    } else {
        Sha256::digest(&input).to_vec()
    };
    digest.truncate(output_bits as usize / 8);
    Ok(digest)
}
