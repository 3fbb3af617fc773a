use crate::config::BackchannelDeliveryMode;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Set of auth_req_ids still pending, walked by the expiry sweep
pub(crate) const PENDING_INDEX_KEY: &str = "ciba_pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CibaStatus {
    Pending,
    Granted,
    Denied,
    Expired,
}

impl CibaStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A backchannel authentication request. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CibaRequest {
    pub auth_req_id: String,
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub acr: Option<String>,
    pub binding_message: Option<String>,
    pub client_notification_token: Option<String>,
    pub delivery_mode: BackchannelDeliveryMode,
    pub created_at: i64,
    pub expires_at: i64,
    pub status: CibaStatus,
    /// Time of the previous poll, used to pace polling clients
    pub last_access: Option<i64>,
    pub tokens_delivered: bool,
    pub grant_id: Option<String>,
}

impl CibaRequest {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Push notification target registered by a user's authentication device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub user_id: String,
    pub registration_token: String,
    pub registered_at: i64,
}

/// Input of a backchannel authentication request, after client authentication
#[derive(Debug, Clone, Default)]
pub struct BackchannelRequest {
    pub scopes: Vec<String>,
    pub login_hint: Option<String>,
    pub id_token_hint: Option<String>,
    pub binding_message: Option<String>,
    pub client_notification_token: Option<String>,
    pub acr_values: Option<String>,
    pub requested_expiry: Option<u64>,
}

/// Backchannel authentication endpoint success response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackchannelResponse {
    pub auth_req_id: String,
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

/// Result of the user's authentication on the decoupled device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Granted {
        #[serde(default)]
        acr: Option<String>,
        #[serde(default)]
        auth_time: Option<i64>,
    },
    Denied,
}

pub(crate) fn request_key(auth_req_id: &str) -> String {
    format!("ciba:{auth_req_id}")
}

pub(crate) fn device_key(user_id: &str) -> String {
    format!("ciba_device:{user_id}")
}
