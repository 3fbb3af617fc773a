use super::client_auth::authenticate_client;
use super::no_store;
use crate::errors::OAuthError;
use crate::openapi::OAUTH_TAG;
use crate::registry::model::{Introspection, TokenKind};
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(introspect_handler))
}

/// RFC 7662 introspection request
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct IntrospectionRequest {
    token: Option<String>,
    token_type_hint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[utoipa::path(
    post,
    path = "/introspect",
    tag = OAUTH_TAG,
    request_body(content = IntrospectionRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token state; unknown, expired and revoked tokens are inactive", body = Introspection),
        (status = 400, description = "Invalid request", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError)
    )
)]
pub(super) async fn introspect_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<IntrospectionRequest>, FormRejection>,
) -> Response {
    let result = match form {
        Ok(Form(request)) => introspect(&state, &headers, request).await,
        Err(rejection) => Err(OAuthError::invalid_request(rejection.body_text())),
    };
    match result {
        Ok(introspection) => no_store((StatusCode::OK, Json(introspection))),
        Err(err) => err.into_response(),
    }
}

async fn introspect(
    state: &AppState,
    headers: &HeaderMap,
    request: IntrospectionRequest,
) -> Result<Introspection, OAuthError> {
    authenticate_client(
        &state.clients,
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let token = request
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuthError::invalid_request("token is required"))?;
    let hint = request.token_type_hint.as_deref().and_then(TokenKind::from_hint);
    Ok(state.registry.introspect(&token, hint).await?)
}
