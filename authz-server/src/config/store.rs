use confique::Config;
use serde::Deserialize;

/// Specifies which store implementation holds grants, tokens and CIBA requests
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    #[default]
    InMemory,
    Redis,
}

/// Configuration for the durable store
#[derive(Debug, Config, Clone)]
pub struct StoreConfig {
    /// Store type: "in-memory" (default) or "redis"
    #[config(env = "AUTHZ_STORE_KIND", default = "in-memory")]
    pub kind: StoreKind,

    /// Redis connection string, required when kind is "redis"
    #[config(env = "AUTHZ_STORE_REDIS_URL", default = "")]
    pub redis_url: String,

    /// Prefix prepended to every key written to the store
    #[config(env = "AUTHZ_STORE_KEY_PREFIX", default = "authz")]
    pub key_prefix: String,
}
