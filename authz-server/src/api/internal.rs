//! Endpoints for the login UI. The UI authenticates the user, then hands the
//! outcome over here; both routes sit behind the API key.

use crate::ciba::{CibaError, CibaStatus, CompletionOutcome};
use crate::errors::ApiError;
use crate::openapi::INTERNAL_TAG;
use crate::registry::model::{GrantType, NewGrant};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use log::{error, info};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_grant_handler))
        .routes(routes!(revoke_grant_handler))
        .routes(routes!(complete_backchannel_handler))
}

/// A completed authentication for the authorization code flow
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct AuthenticatedGrant {
    client_id: String,
    user_id: String,
    #[serde(default)]
    scopes: Vec<String>,
    redirect_uri: Option<String>,
    nonce: Option<String>,
    acr: Option<String>,
    /// Unix seconds; defaults to now
    auth_time: Option<i64>,
    session_reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct AuthorizationCodeResponse {
    grant_id: String,
    code: String,
    /// Lifetime of the code in seconds
    expires_in: u64,
}

#[utoipa::path(
    post,
    path = "/internal/grants",
    tag = INTERNAL_TAG,
    request_body = AuthenticatedGrant,
    params(
        ("Authorization" = String, Header, description = "Bearer API key"),
    ),
    responses(
        (status = 200, description = "Authorization code issued", body = AuthorizationCodeResponse),
        (status = 400, description = "Invalid grant request"),
        (status = 500, description = "Internal server error")
    )
)]
pub(super) async fn create_grant_handler(
    State(state): State<AppState>,
    body: Result<Json<AuthenticatedGrant>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return ApiError::bad_request(rejection.body_text()).into_response(),
    };
    match create_grant(&state, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_grant(
    state: &AppState,
    request: AuthenticatedGrant,
) -> Result<AuthorizationCodeResponse, ApiError> {
    let client = state
        .clients
        .get(&request.client_id)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown client {}", request.client_id)))?;
    if !client.allows_grant_type("authorization_code") {
        return Err(ApiError::bad_request(format!(
            "Client {} may not use the authorization code grant",
            client.client_id
        )));
    }
    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }
    if let Some(scope) = client.disallowed_scope(&request.scopes) {
        return Err(ApiError::bad_request(format!("Scope {scope} is not allowed")));
    }

    let mut grant = NewGrant::new(request.client_id, GrantType::AuthorizationCode);
    grant.user_id = Some(request.user_id);
    grant.scopes = request.scopes;
    grant.redirect_uri = request.redirect_uri;
    grant.nonce = request.nonce;
    grant.acr = request.acr;
    grant.authentication_time = Some(
        request
            .auth_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
    );
    grant.session_reference = request.session_reference;

    let (grant, code) = state
        .registry
        .create_authorization_code(grant)
        .await
        .map_err(|e| {
            error!("Failed to create authorization grant: {}", e);
            ApiError::internal("Failed to create the authorization grant")
        })?;
    info!("Created grant {} for client {}", grant.grant_id, grant.client_id);
    Ok(AuthorizationCodeResponse {
        grant_id: grant.grant_id,
        code,
        expires_in: state.registry.token_config().code_lifetime,
    })
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct RevokedGrant {
    /// False when the grant did not exist
    revoked: bool,
}

#[utoipa::path(
    delete,
    path = "/internal/grants/{grant_id}",
    tag = INTERNAL_TAG,
    params(
        ("grant_id" = String, Path, description = "Grant to revoke with all its tokens"),
        ("Authorization" = String, Header, description = "Bearer API key"),
    ),
    responses(
        (status = 200, description = "The grant is gone", body = RevokedGrant),
        (status = 500, description = "The revocation could not be recorded")
    )
)]
pub(super) async fn revoke_grant_handler(
    State(state): State<AppState>,
    Path(grant_id): Path<String>,
) -> Response {
    match state.registry.revoke(&grant_id).await {
        Ok(revoked) => (StatusCode::OK, Json(RevokedGrant { revoked })).into_response(),
        Err(e) => {
            error!("Failed to revoke grant {}: {}", grant_id, e);
            ApiError::internal("Failed to revoke the grant").into_response()
        }
    }
}

/// The user's decision on a backchannel authentication request
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct CompletionEvent {
    auth_req_id: String,
    #[serde(flatten)]
    outcome: CompletionOutcome,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct CompletionResponse {
    auth_req_id: String,
    status: CibaStatus,
}

#[utoipa::path(
    post,
    path = "/internal/bc-complete",
    tag = INTERNAL_TAG,
    request_body = CompletionEvent,
    params(
        ("Authorization" = String, Header, description = "Bearer API key"),
    ),
    responses(
        (status = 200, description = "The request reached its terminal state", body = CompletionResponse),
        (status = 404, description = "Unknown auth_req_id"),
        (status = 409, description = "The request is no longer pending"),
        (status = 500, description = "Internal server error")
    )
)]
pub(super) async fn complete_backchannel_handler(
    State(state): State<AppState>,
    body: Result<Json<CompletionEvent>, JsonRejection>,
) -> Response {
    let event = match body {
        Ok(Json(event)) => event,
        Err(rejection) => return ApiError::bad_request(rejection.body_text()).into_response(),
    };
    // delivery continues in the background once the transition is stored
    match state.ciba.complete(&event.auth_req_id, event.outcome).await {
        Ok(completion) => (
            StatusCode::OK,
            Json(CompletionResponse {
                auth_req_id: completion.request.auth_req_id,
                status: completion.request.status,
            }),
        )
            .into_response(),
        Err(err) => completion_error(err).into_response(),
    }
}

fn completion_error(err: CibaError) -> ApiError {
    match err {
        CibaError::UnknownRequest(_) => ApiError::not_found(err.to_string()),
        CibaError::NotPending(_) => ApiError::new(err.to_string(), StatusCode::CONFLICT),
        CibaError::Disabled | CibaError::InvalidRequest(_) => ApiError::bad_request(err.to_string()),
        err => {
            error!("Failed to complete backchannel request: {}", err);
            ApiError::internal("Failed to complete the backchannel request")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::BackchannelDeliveryMode;
    use crate::test_utils::TestFixture;
    use axum::body::Body;
    use http::{Method, StatusCode};
    use serde_json::json;

    fn grant_request() -> serde_json::Value {
        json!({
            "client_id": "c1",
            "user_id": "alice",
            "scopes": ["openid", "email"],
            "redirect_uri": "https://rp.example.com/cb",
            "acr": "urn:acr:mfa"
        })
    }

    #[tokio::test]
    async fn test_login_ui_flow() {
        let fixture = TestFixture::new().await;
        let response = fixture.post("/internal/grants", &grant_request()).await;
        response.assert_ok();
        assert_eq!(response.json["expires_in"], 600);
        let code = response.json["code"].as_str().unwrap();
        let grant_id = response.json["grant_id"].as_str().unwrap().to_string();

        let tokens = fixture
            .post_form_as(
                "c1",
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", "https://rp.example.com/cb"),
                ],
            )
            .await;
        tokens.assert_ok();
        let access_token = tokens.json["access_token"].as_str().unwrap();

        let request = fixture
            .request_builder(Method::DELETE, format!("/internal/grants/{grant_id}"))
            .body(Body::empty())
            .unwrap();
        let response = fixture.send(request).await;
        response.assert_ok();
        assert_eq!(response.json, json!({"revoked": true}));

        let introspection = fixture
            .post_form_as("c1", "/introspect", &[("token", access_token)])
            .await;
        assert_eq!(introspection.json["active"], false);
    }

    #[tokio::test]
    async fn test_grant_validation() {
        let fixture = TestFixture::new().await;
        let mut request = grant_request();
        request["client_id"] = json!("nobody");
        let response = fixture.post("/internal/grants", &request).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json["detail"].as_str().unwrap().contains("nobody"));

        let mut request = grant_request();
        request["user_id"] = json!(" ");
        fixture
            .post("/internal/grants", &request)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_internal_routes_need_the_api_key() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .post_with_headers(
                "/internal/grants",
                &grant_request(),
                &[("Authorization", "Bearer wrong")],
            )
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_backchannel_completion() {
        let fixture = TestFixture::with_delivery_mode(BackchannelDeliveryMode::Poll).await;
        let started = fixture
            .post_form_as(
                "c1",
                "/bc-authorize",
                &[("scope", "openid"), ("login_hint", "alice")],
            )
            .await;
        let auth_req_id = started.json["auth_req_id"].as_str().unwrap();

        let event = json!({"auth_req_id": auth_req_id, "outcome": "granted", "acr": "mfa"});
        let response = fixture.post("/internal/bc-complete", &event).await;
        response.assert_ok();
        assert_eq!(response.json["status"], "GRANTED");

        let response = fixture.post("/internal/bc-complete", &event).await;
        response.assert_status(StatusCode::CONFLICT);

        let unknown = json!({"auth_req_id": "nope", "outcome": "denied"});
        fixture
            .post("/internal/bc-complete", &unknown)
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let tokens = fixture
            .post_form_as(
                "c1",
                "/token",
                &[
                    ("grant_type", "urn:openid:params:grant-type:ciba"),
                    ("auth_req_id", auth_req_id),
                ],
            )
            .await;
        tokens.assert_ok();
        assert!(tokens.json["id_token"].is_string());
        assert!(tokens.json["refresh_token"].is_string());
    }
}
