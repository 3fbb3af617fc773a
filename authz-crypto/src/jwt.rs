use crate::base64url;
use crate::error::CryptoError;
use crate::jws::SignatureAlgorithm;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// JOSE header of a compact JWT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
    /// Any header parameter not modelled above, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JwtHeader {
    pub fn new(alg: SignatureAlgorithm) -> Self {
        Self {
            alg: alg.to_string(),
            typ: Some("JWT".to_string()),
            kid: None,
            cty: None,
            extra: Map::new(),
        }
    }

    pub fn with_type(mut self, typ: impl Into<String>) -> Self {
        self.typ = Some(typ.into());
        self
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Resolves the `alg` parameter into a known signature algorithm
    pub fn algorithm(&self) -> Result<SignatureAlgorithm, CryptoError> {
        self.alg.parse()
    }
}

/// Claim set of a JWT.
///
/// Registered claims get typed accessors; everything else goes through
/// [`JwtClaims::get`] / [`JwtClaims::set`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwtClaims(Map<String, Value>);

impl JwtClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Sets the claim only when a value is present
    pub fn set_opt<V: Into<Value>>(&mut self, name: impl Into<String>, value: Option<V>) {
        if let Some(value) = value {
            self.set(name, value);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    pub fn jwt_id(&self) -> Option<&str> {
        self.get_str("jti")
    }

    pub fn expiration(&self) -> Option<i64> {
        self.get_i64("exp")
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.get_i64("iat")
    }

    /// `aud` may be a single string or an array of strings
    pub fn audience(&self) -> Vec<String> {
        match self.0.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Inserts `key: value` into the JSON object held by claim `name`, creating
    /// the object when the claim is absent. Existing members are kept.
    pub fn merge_into_object(
        &mut self,
        name: &str,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), CryptoError> {
        let entry = self
            .0
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(object) => {
                object.insert(key.into(), value.into());
                Ok(())
            }
            _ => Err(CryptoError::InvalidParameter(format!(
                "claim '{name}' is not a JSON object"
            ))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for JwtClaims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A compact-serialized JSON Web Token.
///
/// Instances are immutable: they come either from [`Jwt::parse`] or from
/// [`crate::jws::sign`]. The signing input is captured once, at parse or sign
/// time, and is never recomputed from the decoded header and claims.
#[derive(Debug, Clone)]
pub struct Jwt {
    header: JwtHeader,
    claims: JwtClaims,
    signing_input: String,
    signature: Option<Vec<u8>>,
}

impl Jwt {
    /// Parses the 2- or 3-segment compact form
    pub fn parse(encoded: &str) -> Result<Self, CryptoError> {
        let segments: Vec<&str> = encoded.split('.').collect();
        let (header_segment, claims_segment, signature_segment) = match segments.as_slice() {
            [header, claims] => (*header, *claims, None),
            [header, claims, signature] => (*header, *claims, Some(*signature)),
            _ => {
                return Err(CryptoError::MalformedToken(format!(
                    "expected 2 or 3 segments, found {}",
                    segments.len()
                )));
            }
        };

        let header: JwtHeader = decode_segment(header_segment, "header")?;
        let claims: JwtClaims = decode_segment(claims_segment, "claims")?;
        let signature = match signature_segment {
            None | Some("") => None,
            Some(segment) => Some(base64url::decode(segment).map_err(|e| {
                CryptoError::MalformedToken(format!("signature is not base64url: {e}"))
            })?),
        };

        Ok(Self {
            header,
            claims,
            signing_input: format!("{header_segment}.{claims_segment}"),
            signature,
        })
    }

    /// Builds the token from already encoded parts
    pub(crate) fn from_parts(
        header: JwtHeader,
        claims: JwtClaims,
        signing_input: String,
        signature: Option<Vec<u8>>,
    ) -> Self {
        Self {
            header,
            claims,
            signing_input,
            signature,
        }
    }

    pub fn header(&self) -> &JwtHeader {
        &self.header
    }

    pub fn claims(&self) -> &JwtClaims {
        &self.claims
    }

    /// `base64url(header) + "." + base64url(claims)` exactly as signed or received
    pub fn signing_input(&self) -> &str {
        &self.signing_input
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Compact serialization; unsigned tokens end with an empty signature segment
    pub fn serialize(&self) -> String {
        match &self.signature {
            Some(signature) => format!("{}.{}", self.signing_input, base64url::encode(signature)),
            None => format!("{}.", self.signing_input),
        }
    }
}

impl fmt::Display for Jwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for Jwt {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Encodes header and claims into the signing input
pub(crate) fn encode_signing_input(
    header: &JwtHeader,
    claims: &JwtClaims,
) -> Result<String, CryptoError> {
    let header_json = serde_json::to_vec(header)?;
    let claims_json = serde_json::to_vec(claims)?;
    Ok(format!(
        "{}.{}",
        base64url::encode(header_json),
        base64url::encode(claims_json)
    ))
}

fn decode_segment<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T, CryptoError> {
    let bytes = base64url::decode(segment)
        .map_err(|e| CryptoError::MalformedToken(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CryptoError::MalformedToken(format!("{name} is not a JSON object: {e}")))
}
