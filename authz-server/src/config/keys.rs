use confique::Config;

/// Signing key configuration
#[derive(Debug, Config, Clone)]
pub struct KeysConfig {
    /// Key id advertised in the `kid` header of signed tokens
    #[config(env = "AUTHZ_KEYS_SIGNING_KID", default = "authz-signing")]
    pub signing_kid: String,

    /// JWS algorithm: HS256, HS384, HS512, RS256, RS384 or RS512 (default: HS256)
    #[config(env = "AUTHZ_KEYS_SIGNING_ALGORITHM", default = "HS256")]
    pub signing_algorithm: String,

    /// Shared secret for the HMAC algorithms. When empty a random secret is
    /// generated at startup and tokens do not survive a restart.
    #[config(env = "AUTHZ_KEYS_HMAC_SECRET", default = "")]
    pub hmac_secret: String,

    /// PEM file (PKCS#8 or PKCS#1) holding the RSA private key for the RS algorithms
    #[config(env = "AUTHZ_KEYS_RSA_PRIVATE_KEY_PATH")]
    pub rsa_private_key_path: Option<String>,
}
