use crate::error::CryptoError;
use crate::jwt::{Jwt, JwtClaims, JwtHeader, encode_signing_input};
use crate::keys::JsonWebKey;
use hmac::{Hmac, Mac};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    None,
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    RS512,
}

impl SignatureAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
        }
    }

    pub fn is_hmac(&self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384 | Self::RS512)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "RS512" => Ok(Self::RS512),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Signs `claims` with `algorithm`.
///
/// The header's `alg` is overwritten and `kid` defaults to the key id. The
/// signing input is encoded exactly once and the signature is computed over
/// those bytes.
pub fn sign(
    mut header: JwtHeader,
    claims: JwtClaims,
    algorithm: SignatureAlgorithm,
    key: &JsonWebKey,
) -> Result<Jwt, CryptoError> {
    header.alg = algorithm.to_string();
    if algorithm != SignatureAlgorithm::None && header.kid.is_none() {
        header.kid = Some(key.kid.clone());
    }

    let signing_input = encode_signing_input(&header, &claims)?;
    let signature = match algorithm {
        SignatureAlgorithm::None => None,
        _ => Some(create_signature(algorithm, key, signing_input.as_bytes())?),
    };

    Ok(Jwt::from_parts(header, claims, signing_input, signature))
}

/// Builds an unsecured (`alg: none`) token
pub fn unsecured(header: JwtHeader, claims: JwtClaims) -> Result<Jwt, CryptoError> {
    let mut header = header;
    header.alg = SignatureAlgorithm::None.to_string();
    let signing_input = encode_signing_input(&header, &claims)?;
    Ok(Jwt::from_parts(header, claims, signing_input, None))
}

/// Verifies the signature of `jwt` against `key` using the algorithm named in its header.
/// Unsecured tokens never verify.
pub fn verify(jwt: &Jwt, key: &JsonWebKey) -> Result<(), CryptoError> {
    let algorithm = jwt.header().algorithm()?;
    let signature = jwt.signature().ok_or(CryptoError::InvalidSignature)?;
    let input = jwt.signing_input().as_bytes();

    if algorithm.is_hmac() {
        hmac_check(algorithm, key.octet_secret()?, input, signature)
    } else if algorithm.is_rsa() {
        rsa_verify(algorithm, key.rsa_public()?, input, signature)
    } else {
        Err(CryptoError::InvalidSignature)
    }
}

fn create_signature(
    algorithm: SignatureAlgorithm,
    key: &JsonWebKey,
    input: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if algorithm.is_hmac() {
        hmac_tag(algorithm, key.octet_secret()?, input)
    } else if algorithm.is_rsa() {
        rsa_sign(algorithm, key.rsa_private()?, input)
    } else {
        Ok(Vec::new())
    }
}

fn invalid_hmac_key(e: hmac::digest::InvalidLength) -> CryptoError {
    CryptoError::InvalidParameter(format!("invalid HMAC key: {e}"))
}

fn hmac_tag(
    algorithm: SignatureAlgorithm,
    secret: &[u8],
    input: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let tag = match algorithm {
        SignatureAlgorithm::HS256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(invalid_hmac_key)?;
            mac.update(input);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureAlgorithm::HS384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(secret).map_err(invalid_hmac_key)?;
            mac.update(input);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureAlgorithm::HS512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(secret).map_err(invalid_hmac_key)?;
            mac.update(input);
            mac.finalize().into_bytes().to_vec()
        }
        other => {
            return Err(CryptoError::InvalidParameter(format!(
                "{other} is not an HMAC algorithm"
            )));
        }
    };
    Ok(tag)
}

/// Constant-time HMAC comparison
fn hmac_check(
    algorithm: SignatureAlgorithm,
    secret: &[u8],
    input: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let result = match algorithm {
        SignatureAlgorithm::HS256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(invalid_hmac_key)?;
            mac.update(input);
            mac.verify_slice(signature)
        }
        SignatureAlgorithm::HS384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(secret).map_err(invalid_hmac_key)?;
            mac.update(input);
            mac.verify_slice(signature)
        }
        SignatureAlgorithm::HS512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(secret).map_err(invalid_hmac_key)?;
            mac.update(input);
            mac.verify_slice(signature)
        }
        _ => return Err(CryptoError::InvalidSignature),
    };
    result.map_err(|_| CryptoError::InvalidSignature)
}

fn rsa_sign(
    algorithm: SignatureAlgorithm,
    key: &RsaPrivateKey,
    input: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = key.clone();
    let signature = match algorithm {
        SignatureAlgorithm::RS256 => SigningKey::<Sha256>::new(key).try_sign(input),
        SignatureAlgorithm::RS384 => SigningKey::<Sha384>::new(key).try_sign(input),
        SignatureAlgorithm::RS512 => SigningKey::<Sha512>::new(key).try_sign(input),
        other => {
            return Err(CryptoError::InvalidParameter(format!(
                "{other} is not an RSA algorithm"
            )));
        }
    };
    signature
        .map(|signature| signature.to_vec())
        .map_err(|e| CryptoError::InvalidParameter(format!("RSA signing failed: {e}")))
}

fn rsa_verify(
    algorithm: SignatureAlgorithm,
    key: RsaPublicKey,
    input: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let signature = Signature::try_from(signature).map_err(|_| CryptoError::InvalidSignature)?;
    let result = match algorithm {
        SignatureAlgorithm::RS256 => VerifyingKey::<Sha256>::new(key).verify(input, &signature),
        SignatureAlgorithm::RS384 => VerifyingKey::<Sha384>::new(key).verify(input, &signature),
        SignatureAlgorithm::RS512 => VerifyingKey::<Sha512>::new(key).verify(input, &signature),
        _ => return Err(CryptoError::InvalidSignature),
    };
    result.map_err(|_| CryptoError::InvalidSignature)
}
