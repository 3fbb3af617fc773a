//! Token Binding message parsing (RFC 8471) and confirmation hashes.
//!
//! ```text
//! TokenBindingMessage = u16 length, TokenBinding*
//! TokenBinding        = u8 type, TokenBindingID, u16-prefixed signature,
//!                       u16-prefixed extensions
//! TokenBindingID      = u8 key_parameters, u16-prefixed public key
//! ```

use crate::base64url;
use crate::error::CryptoError;
use crate::jwt::JwtClaims;
use sha2::{Digest, Sha256};

/// Claim that carries confirmation members
pub const CONFIRMATION_CLAIM: &str = "cnf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBindingType {
    Provided,
    Referred,
}

impl TryFrom<u8> for TokenBindingType {
    type Error = CryptoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Provided),
            1 => Ok(Self::Referred),
            other => Err(CryptoError::Parse(format!(
                "unknown token binding type {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyParameters {
    Rsa2048Pkcs15,
    Rsa2048Pss,
    EcdsaP256,
}

impl TryFrom<u8> for KeyParameters {
    type Error = CryptoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Rsa2048Pkcs15),
            1 => Ok(Self::Rsa2048Pss),
            2 => Ok(Self::EcdsaP256),
            other => Err(CryptoError::Parse(format!(
                "unknown key parameters {other}"
            ))),
        }
    }
}

/// Decoded public key of a binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenBindingKey {
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    Ec { point: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBindingId {
    pub key_parameters: KeyParameters,
    /// Public key bytes without the length prefix
    pub public_key: Vec<u8>,
    pub key: TokenBindingKey,
    /// Exact wire encoding of the TokenBindingID structure
    pub raw_bytes: Vec<u8>,
}

impl TokenBindingId {
    pub fn confirmation_hash(&self) -> String {
        compute_confirmation_hash(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBindingExtension {
    pub extension_type: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBinding {
    pub binding_type: TokenBindingType,
    pub id: TokenBindingId,
    pub signature: Vec<u8>,
    pub extensions: Vec<TokenBindingExtension>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBindingMessage {
    pub bindings: Vec<TokenBinding>,
}

impl TokenBindingMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut reader = Reader::new(bytes);
        let body = reader.vec_u16("token bindings")?;
        if !reader.is_empty() {
            return Err(CryptoError::Parse(format!(
                "{} trailing bytes after token bindings",
                reader.remaining()
            )));
        }

        let mut body = Reader::new(body);
        let mut bindings = Vec::new();
        while !body.is_empty() {
            bindings.push(parse_binding(&mut body)?);
        }
        if bindings.is_empty() {
            return Err(CryptoError::Parse("message holds no token bindings".to_string()));
        }

        Ok(Self { bindings })
    }

    /// Parses the base64url form carried in the `Sec-Token-Binding` header
    pub fn from_base64url(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = base64url::decode(encoded.trim())
            .map_err(|e| CryptoError::Parse(format!("token binding is not base64url: {e}")))?;
        Self::parse(&bytes)
    }

    pub fn provided(&self) -> Option<&TokenBinding> {
        self.bindings
            .iter()
            .find(|b| b.binding_type == TokenBindingType::Provided)
    }

    pub fn referred(&self) -> Option<&TokenBinding> {
        self.bindings
            .iter()
            .find(|b| b.binding_type == TokenBindingType::Referred)
    }
}

/// `base64url(SHA-256(raw TokenBindingID bytes))`
pub fn compute_confirmation_hash(id: &TokenBindingId) -> String {
    base64url::encode(Sha256::digest(&id.raw_bytes))
}

/// Adds the confirmation hash of `id` to the `cnf` claim under `claim_key`,
/// keeping any confirmation members already present.
pub fn bind_claims(
    claims: &mut JwtClaims,
    claim_key: &str,
    id: &TokenBindingId,
) -> Result<(), CryptoError> {
    claims.merge_into_object(CONFIRMATION_CLAIM, claim_key, compute_confirmation_hash(id))
}

fn parse_binding(reader: &mut Reader<'_>) -> Result<TokenBinding, CryptoError> {
    let binding_type = TokenBindingType::try_from(reader.u8("token binding type")?)?;

    let id_start = reader.position();
    let key_parameters = KeyParameters::try_from(reader.u8("key parameters")?)?;
    let public_key = reader.vec_u16("public key")?.to_vec();
    let raw_bytes = reader.consumed_since(id_start).to_vec();
    let key = parse_public_key(key_parameters, &public_key)?;

    let signature = reader.vec_u16("signature")?.to_vec();

    let mut extensions_reader = Reader::new(reader.vec_u16("extensions")?);
    let mut extensions = Vec::new();
    while !extensions_reader.is_empty() {
        let extension_type = extensions_reader.u8("extension type")?;
        let data = extensions_reader.vec_u16("extension data")?.to_vec();
        extensions.push(TokenBindingExtension {
            extension_type,
            data,
        });
    }

    Ok(TokenBinding {
        binding_type,
        id: TokenBindingId {
            key_parameters,
            public_key,
            key,
            raw_bytes,
        },
        signature,
        extensions,
    })
}

fn parse_public_key(
    key_parameters: KeyParameters,
    public_key: &[u8],
) -> Result<TokenBindingKey, CryptoError> {
    let mut reader = Reader::new(public_key);
    let key = match key_parameters {
        KeyParameters::Rsa2048Pkcs15 | KeyParameters::Rsa2048Pss => TokenBindingKey::Rsa {
            modulus: reader.vec_u16("RSA modulus")?.to_vec(),
            exponent: reader.vec_u8("RSA exponent")?.to_vec(),
        },
        KeyParameters::EcdsaP256 => TokenBindingKey::Ec {
            point: reader.vec_u8("EC point")?.to_vec(),
        },
    };
    if !reader.is_empty() {
        return Err(CryptoError::Parse(format!(
            "public key length disagrees with its content ({} extra bytes)",
            reader.remaining()
        )));
    }
    Ok(key)
}

/// Bounds-checked cursor over a byte slice
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.bytes[start..self.pos]
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], CryptoError> {
        if self.remaining() < len {
            return Err(CryptoError::Parse(format!(
                "truncated {what}: need {len} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8, CryptoError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, CryptoError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn vec_u8(&mut self, what: &str) -> Result<&'a [u8], CryptoError> {
        let len = self.u8(what)? as usize;
        self.take(len, what)
    }

    fn vec_u16(&mut self, what: &str) -> Result<&'a [u8], CryptoError> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }
}
