use super::client_auth::authenticate_client;
use super::{no_store, parse_scope};
use crate::ciba::{BackchannelRequest, BackchannelResponse};
use crate::errors::OAuthError;
use crate::openapi::CIBA_TAG;
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, StatusCode};
use log::info;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(backchannel_authorize_handler))
        .routes(routes!(device_registration_handler))
}

/// Backchannel authentication request, form encoded
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct BackchannelAuthorizeRequest {
    /// Space separated, must contain `openid`
    scope: Option<String>,
    login_hint: Option<String>,
    id_token_hint: Option<String>,
    binding_message: Option<String>,
    client_notification_token: Option<String>,
    acr_values: Option<String>,
    /// Requested lifetime of the request in seconds
    requested_expiry: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl BackchannelAuthorizeRequest {
    fn into_request(self) -> Result<BackchannelRequest, OAuthError> {
        let requested_expiry = match self.requested_expiry.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(value.parse::<u64>().map_err(|_| {
                OAuthError::invalid_request("requested_expiry must be a positive integer")
            })?),
        };
        Ok(BackchannelRequest {
            scopes: parse_scope(self.scope.as_deref().unwrap_or_default()),
            login_hint: self.login_hint,
            id_token_hint: self.id_token_hint,
            binding_message: self.binding_message,
            client_notification_token: self.client_notification_token,
            acr_values: self.acr_values,
            requested_expiry,
        })
    }
}

#[utoipa::path(
    post,
    path = "/bc-authorize",
    tag = CIBA_TAG,
    request_body(content = BackchannelAuthorizeRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "The request is pending user authentication", body = BackchannelResponse),
        (status = 400, description = "Invalid request", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError)
    )
)]
pub(super) async fn backchannel_authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<BackchannelAuthorizeRequest>, FormRejection>,
) -> Response {
    let result = match form {
        Ok(Form(request)) => backchannel_authorize(&state, &headers, request).await,
        Err(rejection) => Err(OAuthError::invalid_request(rejection.body_text())),
    };
    match result {
        Ok(response) => no_store((StatusCode::OK, Json(response))),
        Err(err) => err.into_response(),
    }
}

async fn backchannel_authorize(
    state: &AppState,
    headers: &HeaderMap,
    request: BackchannelAuthorizeRequest,
) -> Result<BackchannelResponse, OAuthError> {
    let client = authenticate_client(
        &state.clients,
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let client_id = client.client_id.clone();
    let response = state
        .ciba
        .register(&client_id, request.into_request()?)
        .await?;
    info!(
        "Client {} started backchannel request {}",
        client_id, response.auth_req_id
    );
    Ok(response)
}

/// Registration of the push token of a user's authentication device
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct DeviceRegistrationRequest {
    /// ID token previously issued to the user
    id_token_hint: Option<String>,
    device_registration_token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/bc-deviceregistration",
    tag = CIBA_TAG,
    request_body(content = DeviceRegistrationRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "The device was registered"),
        (status = 400, description = "Invalid request", body = OAuthError)
    )
)]
pub(super) async fn device_registration_handler(
    State(state): State<AppState>,
    form: Result<Form<DeviceRegistrationRequest>, FormRejection>,
) -> Response {
    let request = match form {
        Ok(Form(request)) => request,
        Err(rejection) => return OAuthError::invalid_request(rejection.body_text()).into_response(),
    };
    let result = state
        .ciba
        .register_device(
            request.id_token_hint.as_deref().unwrap_or_default(),
            request.device_registration_token.as_deref().unwrap_or_default(),
        )
        .await;
    match result {
        Ok(_) => no_store(StatusCode::OK),
        Err(err) => OAuthError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::ciba::model::{device_key, DeviceRegistration};
    use crate::config::BackchannelDeliveryMode;
    use crate::store::StoreBackend;
    use crate::test_utils::TestFixture;
    use http::StatusCode;

    #[tokio::test]
    async fn test_backchannel_authorize() {
        let fixture = TestFixture::with_delivery_mode(BackchannelDeliveryMode::Poll).await;
        let response = fixture
            .post_form_as(
                "c1",
                "/bc-authorize",
                &[
                    ("scope", "openid profile"),
                    ("login_hint", "alice"),
                    ("requested_expiry", "60"),
                ],
            )
            .await;
        response.assert_ok();
        assert!(response.json["auth_req_id"].is_string());
        assert_eq!(response.json["expires_in"], 60);
        assert_eq!(response.json["interval"], 2);
    }

    #[tokio::test]
    async fn test_backchannel_authorize_errors() {
        let fixture = TestFixture::with_delivery_mode(BackchannelDeliveryMode::Poll).await;

        let response = fixture
            .post_form_as(
                "c1",
                "/bc-authorize",
                &[("scope", "openid"), ("login_hint", "alice"), ("requested_expiry", "soon")],
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_request");

        let response = fixture
            .post_form_as("c1", "/bc-authorize", &[("scope", "profile"), ("login_hint", "alice")])
            .await;
        assert_eq!(response.json["error"], "invalid_request");

        // clients without a delivery mode are not registered for backchannel authentication
        let fixture = TestFixture::new().await;
        let response = fixture
            .post_form_as("c1", "/bc-authorize", &[("scope", "openid"), ("login_hint", "alice")])
            .await;
        assert_eq!(response.json["error"], "unauthorized_client");
    }

    #[tokio::test]
    async fn test_device_registration() {
        let fixture = TestFixture::new().await;
        let factory = fixture.state.registry.factory();
        let mut claims = authz_crypto::JwtClaims::new();
        claims.set("iss", factory.issuer());
        claims.set("sub", "alice");
        let id_token = factory.sign("JWT", claims).unwrap();

        let response = fixture
            .post_form(
                "/bc-deviceregistration",
                &[("id_token_hint", id_token.as_str()), ("device_registration_token", "fcm-123")],
            )
            .await;
        response.assert_ok();
        let stored = fixture
            .state
            .store
            .get::<DeviceRegistration>(&device_key("alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.value.registration_token, "fcm-123");

        let response = fixture
            .post_form("/bc-deviceregistration", &[("id_token_hint", id_token.as_str())])
            .await;
        assert_eq!(response.json["error"], "invalid_request");
    }
}
