use crate::registry::model::TokenSet;
use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid notification endpoint {0}: {1}")]
    Endpoint(String, url::ParseError),
    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Client notification endpoint answered with status {0}")]
    Status(u16),
}

/// Body of a client notification
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Notification {
    Ping {
        auth_req_id: String,
    },
    Push {
        auth_req_id: String,
        access_token: String,
        token_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
        expires_in: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        id_token: Option<String>,
    },
    PushError {
        auth_req_id: String,
        error: String,
        error_description: String,
    },
}

impl Notification {
    pub fn ping(auth_req_id: &str) -> Self {
        Self::Ping {
            auth_req_id: auth_req_id.to_string(),
        }
    }

    pub fn push(auth_req_id: &str, tokens: TokenSet) -> Self {
        Self::Push {
            auth_req_id: auth_req_id.to_string(),
            access_token: tokens.access_token,
            token_type: tokens.token_type,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
            id_token: tokens.id_token,
        }
    }

    pub fn access_denied(auth_req_id: &str) -> Self {
        Self::PushError {
            auth_req_id: auth_req_id.to_string(),
            error: "access_denied".to_string(),
            error_description: "The end-user denied the authorization request.".to_string(),
        }
    }

    fn auth_req_id(&self) -> &str {
        match self {
            Self::Ping { auth_req_id }
            | Self::Push { auth_req_id, .. }
            | Self::PushError { auth_req_id, .. } => auth_req_id,
        }
    }
}

/// Sends ping and push notifications to client notification endpoints.
///
/// Every request is bounded by the configured timeout. Failures are returned
/// to the caller and never affect the request or the tokens already issued.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: Client,
}

impl DeliveryClient {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub async fn notify(
        &self,
        endpoint: &str,
        notification_token: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let url = Url::parse(endpoint)
            .map_err(|e| DeliveryError::Endpoint(endpoint.to_string(), e))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(notification_token)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "Notification for {} was rejected by {} with status {}",
                notification.auth_req_id(),
                endpoint,
                status
            );
            return Err(DeliveryError::Status(status.as_u16()));
        }
        debug!("Delivered notification for {}", notification.auth_req_id());
        Ok(())
    }
}
