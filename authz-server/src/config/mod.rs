pub(crate) use crate::config::ciba::CibaConfig;
pub(crate) use crate::config::clients::{BackchannelDeliveryMode, ClientCatalog, ClientConfig};
pub(crate) use crate::config::hooks::{HookKind, HooksConfig};
pub(crate) use crate::config::keys::KeysConfig;
pub(crate) use crate::config::status_list::StatusListConfig;
pub(crate) use crate::config::store::{StoreConfig, StoreKind};
pub(crate) use crate::config::tokens::TokenConfig;
use confique::Config;

pub mod ciba;
pub mod clients;
pub mod hooks;
pub mod keys;
pub mod status_list;
pub mod store;
pub mod tokens;

/// Environment variable naming an optional TOML file layered under the environment
pub const CONFIG_FILE_ENV: &str = "AUTHZ_CONFIG_FILE";

/// Main configuration structure for the authorization server
#[derive(Debug, Config, Clone)]
pub struct ServerConfig {
    /// The port the server will listen to (default: 8780)
    #[config(env = "AUTHZ_PORT", default = 8780)]
    pub port: u16,

    /// API key protecting the internal endpoints used by the login UI
    #[config(env = "AUTHZ_API_KEY", default = "")]
    pub api_key: String,

    /// Issuer identifier placed in the `iss` claim
    #[config(env = "AUTHZ_ISSUER", default = "http://localhost:8780")]
    pub issuer: String,

    #[config(nested)]
    pub store: StoreConfig,

    #[config(nested)]
    pub tokens: TokenConfig,

    #[config(nested)]
    pub keys: KeysConfig,

    #[config(nested)]
    pub ciba: CibaConfig,

    #[config(nested)]
    pub status_list: StatusListConfig,

    #[config(nested)]
    pub hooks: HooksConfig,

    /// Registered clients, only configurable from the TOML file
    #[config(default = [])]
    pub clients: Vec<ClientConfig>,
}

impl ServerConfig {
    /// Loads the configuration from the environment, then the optional TOML
    /// file named by `AUTHZ_CONFIG_FILE`, then the defaults
    pub fn new() -> Result<Self, confique::Error> {
        let mut builder = Self::builder().env();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.file(path);
        }
        builder.load()
    }

    /// URI of the status list, as referenced from issued tokens
    pub fn status_list_uri(&self) -> String {
        self.status_list
            .uri
            .clone()
            .unwrap_or_else(|| format!("{}/status_list", self.issuer.trim_end_matches('/')))
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        let mut config = Self::builder()
            .load()
            .expect("defaults cover every field");
        config.port = 0;
        config.api_key = "test_api_key".to_string();
        config.issuer = "https://as.example.com".to_string();
        config.keys.hmac_secret = "0123456789abcdef0123456789abcdef".to_string();
        config.clients = vec![clients::test_client("c1"), clients::test_client("c2")];
        config
    }
}
