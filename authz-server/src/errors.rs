use crate::ciba::CibaError;
use crate::hooks::HookError;
use crate::registry::RegistryError;
use crate::status_list::StatusListError;
use crate::store::StoreError;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::{CACHE_CONTROL, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use log::{error, warn};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

#[derive(Debug, Clone)]
pub struct ApiError {
    pub detail: String,
    pub status_code: StatusCode,
}

impl ApiError {
    /// Create a new ApiError with a detail message and status code
    pub fn new<S: ToString>(detail: S, status_code: StatusCode) -> Self {
        Self {
            detail: detail.to_string(),
            status_code,
        }
    }

    /// Create new Internal Server Error (500) with a detail message
    pub fn internal<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Create new Bad Request Error (400) with a detail message
    pub fn bad_request<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::BAD_REQUEST)
    }

    pub fn not_found<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::NOT_FOUND)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code;
        let body = json!({
            "detail": self.detail,
        });
        (status_code, Json(body)).into_response()
    }
}

/// OAuth 2.0 error response, also used for the CIBA error codes
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OAuthError {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip)]
    status_code: StatusCode,
}

impl OAuthError {
    fn new(error: &str, description: impl Into<String>, status_code: StatusCode) -> Self {
        Self {
            error: error.to_string(),
            error_description: Some(description.into()),
            status_code,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new("invalid_request", description, StatusCode::BAD_REQUEST)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new("invalid_client", description, StatusCode::UNAUTHORIZED)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new("invalid_grant", description, StatusCode::BAD_REQUEST)
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new("invalid_scope", description, StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new("unauthorized_client", description, StatusCode::BAD_REQUEST)
    }

    pub fn unsupported_grant_type(grant_type: &str) -> Self {
        Self::new(
            "unsupported_grant_type",
            format!("grant type {grant_type} is not supported"),
            StatusCode::BAD_REQUEST,
        )
    }

    pub fn authorization_pending() -> Self {
        Self::new(
            "authorization_pending",
            "The authorization request is still pending as the end-user hasn't yet been authenticated.",
            StatusCode::BAD_REQUEST,
        )
    }

    pub fn slow_down() -> Self {
        Self::new(
            "slow_down",
            "The client should slow down the polling requests",
            StatusCode::BAD_REQUEST,
        )
    }

    pub fn expired_token(description: impl Into<String>) -> Self {
        Self::new("expired_token", description, StatusCode::BAD_REQUEST)
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new("access_denied", description, StatusCode::BAD_REQUEST)
    }

    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new("server_error", description, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status_code = self.status_code;
        let mut response = (status_code, Json(self)).into_response();
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if status_code == StatusCode::UNAUTHORIZED {
            headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic"));
        }
        response
    }
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        error!("Store failure while serving an OAuth request: {}", err);
        Self::server_error("The store is unavailable")
    }
}

impl From<StatusListError> for OAuthError {
    fn from(err: StatusListError) -> Self {
        error!("Status list failure: {}", err);
        Self::server_error("Failed to update the token status list")
    }
}

impl From<RegistryError> for OAuthError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::TokenNotFound => Self::invalid_grant("The token is invalid or expired"),
            RegistryError::GrantNotFound(_) => Self::invalid_grant("The grant no longer exists"),
            RegistryError::InvalidGrant(description) => Self::invalid_grant(description),
            RegistryError::UnauthorizedClient(client_id) => Self::unauthorized_client(format!(
                "client {client_id} is not allowed to perform this operation"
            )),
            RegistryError::UnknownClient(client_id) => {
                Self::invalid_client(format!("unknown client {client_id}"))
            }
            RegistryError::Hook(HookError::Denied(reason)) => {
                warn!("Issuance denied by the grant hook: {}", reason);
                Self::access_denied(reason)
            }
            RegistryError::Store(err) => err.into(),
            RegistryError::StatusList(err) => err.into(),
            err => {
                error!("Token issuance failed: {}", err);
                Self::server_error("Token issuance failed")
            }
        }
    }
}

impl From<CibaError> for OAuthError {
    fn from(err: CibaError) -> Self {
        match err {
            CibaError::Disabled => Self::unauthorized_client(err.to_string()),
            CibaError::InvalidRequest(description) => Self::invalid_request(description),
            CibaError::InvalidScope(scope) => {
                Self::invalid_scope(format!("scope {scope} is not allowed"))
            }
            CibaError::InvalidClient(client_id) => {
                Self::invalid_client(format!("unknown client {client_id}"))
            }
            CibaError::UnauthorizedClient(_) => Self::unauthorized_client(err.to_string()),
            CibaError::AuthorizationPending => Self::authorization_pending(),
            CibaError::SlowDown => Self::slow_down(),
            CibaError::ExpiredToken(description) => Self::expired_token(description),
            CibaError::AccessDenied => Self::access_denied(err.to_string()),
            CibaError::InvalidGrant(description) => Self::invalid_grant(description),
            CibaError::UnknownRequest(_) | CibaError::NotPending(_) => {
                Self::invalid_request(err.to_string())
            }
            CibaError::Registry(err) => err.into(),
            CibaError::Store(err) => err.into(),
            err => {
                error!("Backchannel request failed: {}", err);
                Self::server_error("Backchannel request failed")
            }
        }
    }
}
