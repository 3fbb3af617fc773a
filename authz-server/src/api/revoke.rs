use super::client_auth::authenticate_client;
use crate::errors::OAuthError;
use crate::openapi::OAUTH_TAG;
use crate::registry::model::TokenKind;
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

pub(super) fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(revoke_handler))
}

/// RFC 7009 revocation request
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct RevocationRequest {
    token: Option<String>,
    /// `access_token` or `refresh_token`; unknown hints are ignored
    token_type_hint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH_TAG,
    request_body(content = RevocationRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "The token was revoked or was not known"),
        (status = 400, description = "Invalid request", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError),
        (status = 500, description = "The revocation could not be recorded", body = OAuthError)
    )
)]
pub(super) async fn revoke_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<RevocationRequest>, FormRejection>,
) -> Response {
    let result = match form {
        Ok(Form(request)) => revoke(&state, &headers, request).await,
        Err(rejection) => Err(OAuthError::invalid_request(rejection.body_text())),
    };
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn revoke(
    state: &AppState,
    headers: &HeaderMap,
    request: RevocationRequest,
) -> Result<(), OAuthError> {
    let client = authenticate_client(
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
    state
        .registry
        .revoke_token(&client.client_id, &token, hint)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFixture;
    use http::StatusCode;

    async fn issue(fixture: &TestFixture, client_id: &str) -> serde_json::Value {
        let response = fixture
            .post_form_as(
                client_id,
                "/token",
                &[("grant_type", "client_credentials"), ("scope", "read")],
            )
            .await;
        response.assert_ok();
        response.json
    }

    #[tokio::test]
    async fn test_revoke_makes_token_inactive() {
        let fixture = TestFixture::new().await;
        let tokens = issue(&fixture, "c1").await;
        let access_token = tokens["access_token"].as_str().unwrap();

        fixture
            .post_form_as(
                "c1",
                "/revoke",
                &[("token", access_token), ("token_type_hint", "access_token")],
            )
            .await
            .assert_ok();

        let introspection = fixture
            .post_form_as("c1", "/introspect", &[("token", access_token)])
            .await;
        introspection.assert_ok();
        assert_eq!(introspection.json["active"], false);

        // revoking again is a no-op
        fixture
            .post_form_as("c1", "/revoke", &[("token", access_token)])
            .await
            .assert_ok();
    }

    #[tokio::test]
    async fn test_unknown_token_is_accepted() {
        let fixture = TestFixture::new().await;
        fixture
            .post_form_as("c1", "/revoke", &[("token", "never-issued")])
            .await
            .assert_ok();
    }

    #[tokio::test]
    async fn test_revoke_errors() {
        let fixture = TestFixture::new().await;
        let tokens = issue(&fixture, "c1").await;
        let access_token = tokens["access_token"].as_str().unwrap();

        let response = fixture
            .post_form_as("c2", "/revoke", &[("token", access_token)])
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "unauthorized_client");

        let response = fixture.post_form_as("c1", "/revoke", &[]).await;
        assert_eq!(response.json["error"], "invalid_request");

        let response = fixture
            .post_form("/revoke", &[("token", access_token)])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        // the token survived every failed attempt
        let introspection = fixture
            .post_form_as("c1", "/introspect", &[("token", access_token)])
            .await;
        assert_eq!(introspection.json["active"], true);
    }
}
