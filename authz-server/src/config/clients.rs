use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// How a client receives the outcome of a backchannel authentication request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackchannelDeliveryMode {
    Poll,
    Ping,
    Push,
}

impl BackchannelDeliveryMode {
    /// Ping and push notify the client at its registered endpoint
    pub fn notifies(&self) -> bool {
        !matches!(self, Self::Poll)
    }
}

fn default_grant_types() -> Vec<String> {
    vec![
        "authorization_code".to_string(),
        "refresh_token".to_string(),
    ]
}

/// A statically registered OAuth client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,

    /// Grant types the client may use at the token endpoint
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,

    /// Scopes the client may request; empty allows any scope
    #[serde(default)]
    pub allowed_scopes: Vec<String>,

    /// Issue access tokens as signed JWTs instead of opaque values
    #[serde(default)]
    pub access_token_as_jwt: bool,

    #[serde(default)]
    pub backchannel_token_delivery_mode: Option<BackchannelDeliveryMode>,

    #[serde(default)]
    pub backchannel_client_notification_endpoint: Option<String>,

    /// JWE `alg` for ID tokens; ID tokens are only signed when unset
    #[serde(default)]
    pub id_token_encrypted_response_alg: Option<String>,

    #[serde(default)]
    pub id_token_encrypted_response_enc: Option<String>,

    /// RSA public key (PEM) used with the RSA-OAEP key management algorithms
    #[serde(default)]
    pub encryption_public_key_pem: Option<String>,
}

impl ClientConfig {
    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }

    /// Returns the first requested scope the client is not allowed to request
    pub fn disallowed_scope<'a>(&self, scopes: &'a [String]) -> Option<&'a str> {
        if self.allowed_scopes.is_empty() {
            return None;
        }
        scopes
            .iter()
            .find(|s| !self.allowed_scopes.contains(s))
            .map(String::as_str)
    }
}

/// Lookup table over the configured clients
#[derive(Debug, Clone, Default)]
pub struct ClientCatalog {
    clients: HashMap<String, ClientConfig>,
}

impl ClientCatalog {
    pub fn new(clients: impl IntoIterator<Item = ClientConfig>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|c| (c.client_id.clone(), c))
                .collect(),
        }
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientConfig> {
        self.clients.get(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_client(client_id: &str) -> ClientConfig {
    ClientConfig {
        client_id: client_id.to_string(),
        client_secret: format!("{client_id}-secret"),
        grant_types: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
            "client_credentials".to_string(),
            "urn:openid:params:grant-type:ciba".to_string(),
        ],
        allowed_scopes: Vec::new(),
        access_token_as_jwt: false,
        backchannel_token_delivery_mode: None,
        backchannel_client_notification_endpoint: None,
        id_token_encrypted_response_alg: None,
        id_token_encrypted_response_enc: None,
        encryption_public_key_pem: None,
    }
}
