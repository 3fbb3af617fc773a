use confique::Config;
use std::time::Duration;

/// Token lifetimes and issuance options
#[derive(Debug, Config, Clone)]
pub struct TokenConfig {
    /// Authorization code lifetime in seconds (default: 600)
    #[config(env = "AUTHZ_TOKENS_CODE_LIFETIME", default = 600)]
    pub code_lifetime: u64,

    /// Access token lifetime in seconds (default: 3600)
    #[config(env = "AUTHZ_TOKENS_ACCESS_TOKEN_LIFETIME", default = 3600)]
    pub access_token_lifetime: u64,

    /// Refresh token lifetime in seconds (default: 14 days)
    #[config(env = "AUTHZ_TOKENS_REFRESH_TOKEN_LIFETIME", default = 1209600)]
    pub refresh_token_lifetime: u64,

    /// ID token lifetime in seconds (default: 3600)
    #[config(env = "AUTHZ_TOKENS_ID_TOKEN_LIFETIME", default = 3600)]
    pub id_token_lifetime: u64,

    /// Mint a new refresh token on every refresh and retire the presented one
    #[config(env = "AUTHZ_TOKENS_REFRESH_TOKEN_ROTATION", default = true)]
    pub refresh_token_rotation: bool,

    /// Member of the `cnf` claim that carries the token binding hash
    #[config(env = "AUTHZ_TOKENS_TOKEN_BINDING_CLAIM", default = "tbh")]
    pub token_binding_claim: String,
}

impl TokenConfig {
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_lifetime)
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_lifetime)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_lifetime)
    }

    pub fn id_token_ttl(&self) -> Duration {
        Duration::from_secs(self.id_token_lifetime)
    }
}
