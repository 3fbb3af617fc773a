use super::client_auth::authenticate_client;
use super::{no_store, parse_scope};
use crate::ciba::CIBA_GRANT_TYPE;
use crate::errors::OAuthError;
use crate::openapi::OAUTH_TAG;
use crate::registry::model::TokenSet;
use crate::state::AppState;
use authz_crypto::{TokenBindingId, TokenBindingMessage};
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, StatusCode};
use log::{debug, warn};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

const TOKEN_BINDING_HEADER: &str = "sec-token-binding";

const SUPPORTED_GRANT_TYPES: [&str; 4] = [
    "authorization_code",
    "refresh_token",
    "client_credentials",
    CIBA_GRANT_TYPE,
];

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(token_handler))
}

/// Token request, form encoded
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct TokenRequest {
    grant_type: String,
    /// Only for `client_secret_post`
    client_id: Option<String>,
    /// Only for `client_secret_post`
    client_secret: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    refresh_token: Option<String>,
    /// Space separated
    scope: Option<String>,
    /// For the CIBA grant
    auth_req_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH_TAG,
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    params(
        ("Sec-Token-Binding" = Option<String>, Header, description = "Token Binding message binding the ID token to the TLS channel"),
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenSet),
        (status = 400, description = "OAuth error, including the CIBA polling errors", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError),
        (status = 500, description = "Internal server error", body = OAuthError)
    )
)]
pub(super) async fn token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let result = match form {
        Ok(Form(request)) => token(&state, &headers, request).await,
        Err(rejection) => Err(OAuthError::invalid_request(rejection.body_text())),
    };
    match result {
        Ok(tokens) => no_store((StatusCode::OK, Json(tokens))),
        Err(err) => err.into_response(),
    }
}

async fn token(
    state: &AppState,
    headers: &HeaderMap,
    request: TokenRequest,
) -> Result<TokenSet, OAuthError> {
    let client = authenticate_client(
        &state.clients,
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let grant_type = request.grant_type.as_str();
    if !SUPPORTED_GRANT_TYPES.contains(&grant_type) {
        return Err(OAuthError::unsupported_grant_type(grant_type));
    }
    if !client.allows_grant_type(grant_type) {
        warn!("Client {} used grant type {} it is not registered for", client.client_id, grant_type);
        return Err(OAuthError::unauthorized_client(format!(
            "the client may not use the {grant_type} grant"
        )));
    }
    let binding = token_binding(headers)?;
    debug!("Token request from client {} ({})", client.client_id, grant_type);

    let client_id = client.client_id.as_str();
    let tokens = match grant_type {
        "authorization_code" => {
            let code = required(request.code.as_deref(), "code")?;
            state
                .registry
                .exchange_code(client_id, code, request.redirect_uri.as_deref(), binding)
                .await?
        }
        "refresh_token" => {
            let refresh_token = required(request.refresh_token.as_deref(), "refresh_token")?;
            let scopes = request.scope.as_deref().map(parse_scope);
            state
                .registry
                .refresh(client_id, refresh_token, scopes.as_deref())
                .await?
        }
        "client_credentials" => {
            let scopes = parse_scope(request.scope.as_deref().unwrap_or_default());
            if let Some(scope) = client.disallowed_scope(&scopes) {
                return Err(OAuthError::invalid_scope(format!("scope {scope} is not allowed")));
            }
            state.registry.client_credentials(client_id, scopes).await?
        }
        _ => {
            let auth_req_id = required(request.auth_req_id.as_deref(), "auth_req_id")?;
            state.ciba.poll(client_id, auth_req_id, binding).await?
        }
    };
    Ok(tokens)
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, OAuthError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| OAuthError::invalid_request(format!("{name} is required")))
}

/// The provided binding of the `Sec-Token-Binding` header, if any
fn token_binding(headers: &HeaderMap) -> Result<Option<TokenBindingId>, OAuthError> {
    let Some(value) = headers.get(TOKEN_BINDING_HEADER) else {
        return Ok(None);
    };
    let invalid = |reason: String| {
        OAuthError::invalid_request(format!("Invalid Sec-Token-Binding header: {reason}"))
    };
    let value = value.to_str().map_err(|e| invalid(e.to_string()))?;
    let message = TokenBindingMessage::from_base64url(value).map_err(|e| invalid(e.to_string()))?;
    message
        .provided()
        .map(|binding| Some(binding.id.clone()))
        .ok_or_else(|| invalid("no provided token binding".to_string()))
}

#[cfg(test)]
mod tests {
    use crate::ciba::{BackchannelRequest, CompletionOutcome};
    use crate::config::BackchannelDeliveryMode;
    use crate::registry::model::{GrantType, NewGrant};
    use crate::test_utils::TestFixture;
    use authz_crypto::{base64url, Jwt};
    use http::StatusCode;

    async fn code_for(fixture: &TestFixture, client_id: &str) -> String {
        let mut grant = NewGrant::new(client_id, GrantType::AuthorizationCode);
        grant.user_id = Some("alice".to_string());
        grant.scopes = vec!["openid".to_string(), "email".to_string()];
        grant.redirect_uri = Some("https://rp.example.com/cb".to_string());
        fixture
            .state
            .registry
            .create_authorization_code(grant)
            .await
            .unwrap()
            .1
    }

    fn binding_message() -> String {
        let mut message = vec![0x00, 0x49, 0x00, 0x02, 0x00, 0x41, 0x40];
        message.extend([0x01; 64]);
        message.extend([0x00, 0x00, 0x00, 0x00]);
        base64url::encode(message)
    }

    #[tokio::test]
    async fn test_code_exchange() {
        let fixture = TestFixture::new().await;
        let code = code_for(&fixture, "c1").await;

        let response = fixture
            .post_form_as(
                "c1",
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://rp.example.com/cb"),
                ],
            )
            .await;
        response.assert_ok();
        assert_eq!(response.json["token_type"], "Bearer");
        assert!(response.json["refresh_token"].is_string());
        assert!(response.json["id_token"].is_string());
        assert_eq!(response.json["scope"], "openid email");

        // codes are single use
        let replay = fixture
            .post_form_as(
                "c1",
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://rp.example.com/cb"),
                ],
            )
            .await;
        replay.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(replay.json["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_token_binding_header_binds_id_token() {
        let fixture = TestFixture::new().await;
        let code = code_for(&fixture, "c1").await;
        let binding = binding_message();

        let response = fixture
            .post_form_with_headers(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://rp.example.com/cb"),
                    ("client_id", "c1"),
                    ("client_secret", "c1-secret"),
                ],
                &[("Sec-Token-Binding", binding.as_str())],
            )
            .await;
        response.assert_ok();
        let id_token = Jwt::parse(response.json["id_token"].as_str().unwrap()).unwrap();
        assert!(id_token.claims().get("cnf").unwrap()["tbh"].is_string());

        let code = code_for(&fixture, "c1").await;
        let response = fixture
            .post_form_with_headers(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("client_id", "c1"),
                    ("client_secret", "c1-secret"),
                ],
                &[("Sec-Token-Binding", "not-a-binding")],
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_client_errors() {
        let fixture = TestFixture::new().await;

        let response = fixture
            .post_form("/token", &[("grant_type", "client_credentials")])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json["error"], "invalid_client");

        let response = fixture
            .post_form_as("c1", "/token", &[("grant_type", "password")])
            .await;
        assert_eq!(response.json["error"], "unsupported_grant_type");

        let response = fixture
            .post_form_as("c1", "/token", &[("grant_type", "authorization_code")])
            .await;
        assert_eq!(response.json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_client_credentials_and_refresh() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .post_form_as(
                "c2",
                "/token",
                &[("grant_type", "client_credentials"), ("scope", "read write")],
            )
            .await;
        response.assert_ok();
        assert_eq!(response.json["scope"], "read write");
        assert!(response.json.get("refresh_token").is_none());

        let code = code_for(&fixture, "c1").await;
        let tokens = fixture
            .post_form_as(
                "c1",
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", "https://rp.example.com/cb"),
                ],
            )
            .await;
        let refresh_token = tokens.json["refresh_token"].as_str().unwrap().to_string();

        let refreshed = fixture
            .post_form_as(
                "c1",
                "/token",
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("scope", "openid"),
                ],
            )
            .await;
        refreshed.assert_ok();
        assert_eq!(refreshed.json["scope"], "openid");
        assert_ne!(refreshed.json["refresh_token"], tokens.json["refresh_token"]);

        let widened = fixture
            .post_form_as(
                "c1",
                "/token",
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refreshed.json["refresh_token"].as_str().unwrap()),
                    ("scope", "openid admin"),
                ],
            )
            .await;
        assert_eq!(widened.json["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_ciba_poll_through_token_endpoint() {
        let fixture = TestFixture::with_delivery_mode(BackchannelDeliveryMode::Poll).await;
        let request = BackchannelRequest {
            scopes: vec!["openid".to_string()],
            login_hint: Some("alice".to_string()),
            ..Default::default()
        };
        let id = fixture
            .state
            .ciba
            .register("c1", request)
            .await
            .unwrap()
            .auth_req_id;
        let poll = [
            ("grant_type", "urn:openid:params:grant-type:ciba"),
            ("auth_req_id", id.as_str()),
        ];

        let response = fixture.post_form_as("c1", "/token", &poll).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "authorization_pending");
        let response = fixture.post_form_as("c1", "/token", &poll).await;
        assert_eq!(response.json["error"], "slow_down");

        fixture
            .state
            .ciba
            .complete(&id, CompletionOutcome::Denied)
            .await
            .unwrap();
        let response = fixture.post_form_as("c1", "/token", &poll).await;
        assert_eq!(response.json["error"], "access_denied");
    }
}
