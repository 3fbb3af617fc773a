use super::model::{AuthorizationGrant, OPENID_SCOPE};
use super::RegistryError;
use crate::config::{ClientConfig, ServerConfig};
use crate::status_list::StatusRef;
use authz_crypto::token_binding::bind_claims;
use authz_crypto::{
    base64url, jws, BlockEncryptionAlgorithm, CryptoError, InMemoryKeyProvider, JsonWebKey,
    JweHeader, JweStrategies, Jwt, JwtClaims, JwtHeader, KeyEncryptionAlgorithm, KeyProvider,
    SignatureAlgorithm, TokenBindingId,
};
use log::warn;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::sync::Arc;

const OPAQUE_TOKEN_BYTES: usize = 32;

/// Structured access token contents
pub struct AccessTokenClaims<'a> {
    pub grant: &'a AuthorizationGrant,
    pub jti: &'a str,
    pub issued_at: i64,
    pub expires_at: i64,
    pub status: Option<&'a StatusRef>,
    /// Contributed by the lifecycle hook; never overrides registered claims
    pub extra: &'a Map<String, Value>,
}

/// ID token contents
pub struct IdTokenClaims<'a> {
    pub grant: &'a AuthorizationGrant,
    pub issued_at: i64,
    pub expires_at: i64,
    pub access_token: Option<&'a str>,
    pub status: Option<&'a StatusRef>,
    pub binding: Option<&'a TokenBindingId>,
}

/// Mints token values: opaque random strings and signed (optionally encrypted) JWTs
pub struct TokenFactory {
    issuer: String,
    keys: Arc<dyn KeyProvider>,
    signing_kid: String,
    signing_alg: SignatureAlgorithm,
    jwe: JweStrategies,
    binding_claim: String,
}

impl fmt::Debug for TokenFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenFactory")
            .field("issuer", &self.issuer)
            .field("signing_kid", &self.signing_kid)
            .field("signing_alg", &self.signing_alg)
            .finish()
    }
}

impl TokenFactory {
    pub fn new(
        issuer: impl Into<String>,
        keys: Arc<dyn KeyProvider>,
        signing_kid: impl Into<String>,
        signing_alg: SignatureAlgorithm,
        binding_claim: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            keys,
            signing_kid: signing_kid.into(),
            signing_alg,
            jwe: JweStrategies::with_defaults(),
            binding_claim: binding_claim.into(),
        }
    }

    /// Builds the signing key from the `keys` section
    pub fn from_config(config: &ServerConfig) -> Result<Self, RegistryError> {
        let keys = &config.keys;
        let algorithm: SignatureAlgorithm = keys.signing_algorithm.parse()?;

        let key = if algorithm.is_hmac() {
            if keys.hmac_secret.is_empty() {
                warn!("No HMAC secret configured, generating one; issued tokens will not survive a restart");
                JsonWebKey::octet(&keys.signing_kid, random_bytes(64))
            } else {
                JsonWebKey::octet(&keys.signing_kid, keys.hmac_secret.as_bytes().to_vec())
            }
        } else if algorithm.is_rsa() {
            let path = keys.rsa_private_key_path.as_deref().ok_or_else(|| {
                RegistryError::Config(format!("{algorithm} needs keys.rsa_private_key_path"))
            })?;
            let pem = std::fs::read_to_string(path)
                .map_err(|e| RegistryError::Config(format!("Failed to read {path}: {e}")))?;
            JsonWebKey::rsa_private_from_pem(&keys.signing_kid, &pem)?
        } else {
            return Err(RegistryError::Config(
                "unsigned tokens cannot be issued".to_string(),
            ));
        };

        let provider = InMemoryKeyProvider::new().with_key(key);
        Ok(Self::new(
            &config.issuer,
            Arc::new(provider),
            &keys.signing_kid,
            algorithm,
            &config.tokens.token_binding_claim,
        ))
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn signing_key(&self) -> Result<Arc<JsonWebKey>, CryptoError> {
        self.keys.key(&self.signing_kid)
    }

    /// 256 bits from the OS RNG, base64url encoded
    pub fn opaque(&self) -> String {
        base64url::encode(random_bytes(OPAQUE_TOKEN_BYTES))
    }

    pub fn sign(&self, typ: &str, claims: JwtClaims) -> Result<String, CryptoError> {
        let key = self.signing_key()?;
        let header = JwtHeader::new(self.signing_alg)
            .with_type(typ)
            .with_kid(&self.signing_kid);
        Ok(jws::sign(header, claims, self.signing_alg, &key)?.serialize())
    }

    /// Verifies a token signed by this factory and returns its claims.
    /// The header must name the configured algorithm and the issuer must match.
    pub fn verify(&self, token: &str) -> Result<JwtClaims, CryptoError> {
        let jwt = Jwt::parse(token)?;
        if jwt.header().algorithm()? != self.signing_alg {
            return Err(CryptoError::InvalidSignature);
        }
        let kid = jwt.header().kid.as_deref().unwrap_or(&self.signing_kid);
        let key = self.keys.key(kid)?;
        jws::verify(&jwt, key.as_ref())?;
        if jwt.claims().issuer() != Some(self.issuer.as_str()) {
            return Err(CryptoError::InvalidParameter(
                "token was issued by another issuer".to_string(),
            ));
        }
        Ok(jwt.claims().clone())
    }

    pub fn access_token(&self, claims: AccessTokenClaims<'_>) -> Result<String, CryptoError> {
        let grant = claims.grant;
        let mut jwt_claims = JwtClaims::new();
        jwt_claims.set("iss", self.issuer.clone());
        jwt_claims.set("aud", grant.client_id.clone());
        jwt_claims.set("client_id", grant.client_id.clone());
        jwt_claims.set("token_type", "Bearer");
        jwt_claims.set("iat", claims.issued_at);
        jwt_claims.set("nbf", claims.issued_at);
        jwt_claims.set("exp", claims.expires_at);
        jwt_claims.set("jti", claims.jti);
        jwt_claims.set_opt("scope", grant.scope());
        jwt_claims.set_opt("sub", grant.user_id.clone());
        jwt_claims.set_opt("acr", grant.acr.clone());
        jwt_claims.set_opt("auth_time", grant.authentication_time);
        jwt_claims.set_opt("status", claims.status.map(StatusRef::to_claim));
        for (name, value) in claims.extra {
            if !jwt_claims.contains(name) {
                jwt_claims.set(name.clone(), value.clone());
            }
        }
        self.sign("at+jwt", jwt_claims)
    }

    /// Signs an ID token and wraps it in a JWE when the client registered encryption
    pub fn id_token(
        &self,
        claims: IdTokenClaims<'_>,
        client: &ClientConfig,
    ) -> Result<String, CryptoError> {
        let grant = claims.grant;
        let subject = grant.user_id.clone().ok_or_else(|| {
            CryptoError::InvalidParameter("ID tokens need an authenticated user".to_string())
        })?;

        let mut jwt_claims = JwtClaims::new();
        jwt_claims.set("iss", self.issuer.clone());
        jwt_claims.set("aud", grant.client_id.clone());
        jwt_claims.set("sub", subject);
        jwt_claims.set("iat", claims.issued_at);
        jwt_claims.set("exp", claims.expires_at);
        jwt_claims.set_opt("auth_time", grant.authentication_time);
        jwt_claims.set_opt("acr", grant.acr.clone());
        jwt_claims.set_opt("nonce", grant.nonce.clone());
        jwt_claims.set_opt(
            "at_hash",
            claims.access_token.map(|token| self.left_half_hash(token)),
        );
        jwt_claims.set_opt("status", claims.status.map(StatusRef::to_claim));
        if let Some(binding) = claims.binding {
            bind_claims(&mut jwt_claims, &self.binding_claim, binding)?;
        }

        let signed = self.sign("JWT", jwt_claims)?;
        match (
            &client.id_token_encrypted_response_alg,
            &client.id_token_encrypted_response_enc,
        ) {
            (Some(alg), enc) => {
                let alg: KeyEncryptionAlgorithm = alg.parse()?;
                // A128CBC-HS256 is the registration default when only alg is set
                let enc: BlockEncryptionAlgorithm = enc.as_deref().unwrap_or("A128CBC-HS256").parse()?;
                let key = encryption_key(client, alg, enc)?;
                let header = JweHeader::new(alg, enc).with_kid(key.kid.clone());
                let jwt = Jwt::parse(&signed)?;
                Ok(self.jwe.encrypt_jwt(header, &jwt, &key)?.serialize())
            }
            (None, _) => Ok(signed),
        }
    }

    /// `at_hash`: left half of the hash matching the signing algorithm
    fn left_half_hash(&self, value: &str) -> String {
        let digest = match self.signing_alg {
            SignatureAlgorithm::HS384 | SignatureAlgorithm::RS384 => {
                Sha384::digest(value.as_bytes()).to_vec()
            }
            SignatureAlgorithm::HS512 | SignatureAlgorithm::RS512 => {
                Sha512::digest(value.as_bytes()).to_vec()
            }
            _ => Sha256::digest(value.as_bytes()).to_vec(),
        };
        base64url::encode(&digest[..digest.len() / 2])
    }
}

/// Key a client's ID tokens are encrypted to. `dir` uses a key derived from
/// the client secret, RSA key transport the client's registered public key.
fn encryption_key(
    client: &ClientConfig,
    alg: KeyEncryptionAlgorithm,
    enc: BlockEncryptionAlgorithm,
) -> Result<JsonWebKey, CryptoError> {
    match alg {
        KeyEncryptionAlgorithm::Dir => {
            let len = enc.key_len();
            let digest = if len <= 32 {
                Sha256::digest(client.client_secret.as_bytes()).to_vec()
            } else {
                Sha512::digest(client.client_secret.as_bytes()).to_vec()
            };
            Ok(JsonWebKey::octet(client.client_id.clone(), digest[..len].to_vec()))
        }
        _ => {
            let pem = client.encryption_public_key_pem.as_deref().ok_or_else(|| {
                CryptoError::InvalidParameter(format!(
                    "client {} registered {alg} without an encryption key",
                    client.client_id
                ))
            })?;
            JsonWebKey::rsa_public_from_pem(client.client_id.clone(), pem)
        }
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// True when the grant should receive an ID token alongside its access token
pub(crate) fn wants_id_token(grant: &AuthorizationGrant) -> bool {
    grant.has_scope(OPENID_SCOPE) && grant.user_id.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::clients::test_client;
    use crate::registry::model::GrantType;
    use authz_crypto::token_binding::TokenBindingMessage;

    fn factory() -> TokenFactory {
        TokenFactory::from_config(&ServerConfig::for_test()).unwrap()
    }

    fn grant() -> AuthorizationGrant {
        AuthorizationGrant {
            grant_id: "g1".to_string(),
            client_id: "c1".to_string(),
            user_id: Some("alice".to_string()),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            acr: Some("urn:acr:mfa".to_string()),
            authentication_time: Some(1_700_000_000),
            session_reference: None,
            grant_type: GrantType::AuthorizationCode,
            created_at: 1_700_000_000,
            nonce: Some("n-0S6_WzA2Mj".to_string()),
            redirect_uri: None,
            expires_at: 1_700_003_600,
        }
    }

    fn id_claims<'a>(grant: &'a AuthorizationGrant, access_token: Option<&'a str>) -> IdTokenClaims<'a> {
        IdTokenClaims {
            grant,
            issued_at: 1_700_000_000,
            expires_at: 4_000_000_000,
            access_token,
            status: None,
            binding: None,
        }
    }

    #[test]
    fn test_opaque_tokens_are_unique() {
        let factory = factory();
        let first = factory.opaque();
        assert_eq!(first.len(), 43);
        assert_ne!(first, factory.opaque());
    }

    #[test]
    fn test_access_token_claims() {
        let factory = factory();
        let grant = grant();
        let status = StatusRef {
            idx: 7,
            uri: "https://as.example.com/status_list".to_string(),
        };
        let mut extra = Map::new();
        extra.insert("tenant".to_string(), Value::from("acme"));
        extra.insert("sub".to_string(), Value::from("mallory"));

        let token = factory
            .access_token(AccessTokenClaims {
                grant: &grant,
                jti: "jti-1",
                issued_at: 1_700_000_000,
                expires_at: 4_000_000_000,
                status: Some(&status),
                extra: &extra,
            })
            .unwrap();

        let claims = factory.verify(&token).unwrap();
        assert_eq!(claims.subject(), Some("alice"));
        assert_eq!(claims.get_str("scope"), Some("openid profile"));
        assert_eq!(claims.get_str("tenant"), Some("acme"));
        assert_eq!(claims.get("status").unwrap()["status_list"]["idx"], 7);
        assert_eq!(Jwt::parse(&token).unwrap().header().typ.as_deref(), Some("at+jwt"));
    }

    #[test]
    fn test_id_token_at_hash_and_nonce() {
        let factory = factory();
        let grant = grant();
        let token = factory
            .id_token(id_claims(&grant, Some("access-token-value")), &test_client("c1"))
            .unwrap();

        let claims = factory.verify(&token).unwrap();
        assert_eq!(claims.get_str("nonce"), Some("n-0S6_WzA2Mj"));
        assert_eq!(claims.audience(), vec!["c1".to_string()]);
        let digest = Sha256::digest(b"access-token-value");
        assert_eq!(
            claims.get_str("at_hash"),
            Some(base64url::encode(&digest[..16]).as_str())
        );
    }

    #[test]
    fn test_id_token_binding_confirmation() {
        // provided binding, ecdsap256 key, empty signature and extensions
        let mut message = vec![0x00, 0x49, 0x00, 0x02, 0x00, 0x41, 0x40];
        message.extend(std::iter::repeat(0x01).take(64));
        message.extend([0x00, 0x00, 0x00, 0x00]);
        let encoded = base64url::encode(&message);
        let parsed = TokenBindingMessage::from_base64url(&encoded).unwrap();
        let id = &parsed.provided().unwrap().id;

        let factory = factory();
        let grant = grant();
        let mut claims = id_claims(&grant, None);
        claims.binding = Some(id);
        let token = factory.id_token(claims, &test_client("c1")).unwrap();

        let claims = factory.verify(&token).unwrap();
        assert_eq!(
            claims.get("cnf").unwrap()["tbh"],
            Value::from(id.confirmation_hash())
        );
    }

    #[test]
    fn test_encrypted_id_token_with_client_secret() {
        let factory = factory();
        let grant = grant();
        let mut client = test_client("c1");
        client.id_token_encrypted_response_alg = Some("dir".to_string());
        client.id_token_encrypted_response_enc = Some("A128GCM".to_string());

        let token = factory.id_token(id_claims(&grant, None), &client).unwrap();
        assert_eq!(token.split('.').count(), 5);

        let jwe = authz_crypto::Jwe::parse(&token).unwrap();
        let key = encryption_key(
            &client,
            KeyEncryptionAlgorithm::Dir,
            BlockEncryptionAlgorithm::A128Gcm,
        )
        .unwrap();
        let nested = JweStrategies::with_defaults().decrypt(&jwe, &key).unwrap();
        let claims = factory.verify(std::str::from_utf8(&nested).unwrap()).unwrap();
        assert_eq!(claims.subject(), Some("alice"));
    }

    #[test]
    fn test_rsa_encryption_needs_client_key() {
        let factory = factory();
        let grant = grant();
        let mut client = test_client("c1");
        client.id_token_encrypted_response_alg = Some("RSA-OAEP-256".to_string());
        assert!(matches!(
            factory.id_token(id_claims(&grant, None), &client),
            Err(CryptoError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_tokens() {
        let factory = factory();
        let other = TokenFactory::new(
            "https://other.example.com",
            Arc::new(InMemoryKeyProvider::new().with_key(JsonWebKey::octet(
                "authz-signing",
                b"another-secret-another-secret-32".to_vec(),
            ))),
            "authz-signing",
            SignatureAlgorithm::HS256,
            "tbh",
        );
        let token = other.sign("JWT", JwtClaims::new()).unwrap();
        assert!(factory.verify(&token).is_err());
    }

    #[test]
    fn test_rsa_signing_requires_key_path() {
        let mut config = ServerConfig::for_test();
        config.keys.signing_algorithm = "RS256".to_string();
        assert!(matches!(
            TokenFactory::from_config(&config),
            Err(RegistryError::Config(_))
        ));
    }
}
