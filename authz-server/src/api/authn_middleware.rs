use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::warn;
use subtle::ConstantTimeEq;

const FORBIDDEN_MESSAGE: &str =
    "You are not authorized to access this resource, please check your API key.";

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, FORBIDDEN_MESSAGE).into_response()
}

/// Guards the internal routes with the configured API key. An empty key
/// rejects every request.
pub(super) async fn authentication_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(auth_header) = request.headers().get(http::header::AUTHORIZATION) else {
        warn!("Missing Authorization header");
        return (StatusCode::UNAUTHORIZED, "Missing Authorization header").into_response();
    };

    let api_key = match auth_header.to_str() {
        Ok(header_str) if header_str.len() > 7 && header_str[..7].eq_ignore_ascii_case("bearer ") => {
            &header_str[7..]
        }
        Ok(_) => {
            warn!("Invalid Authorization header format, missing 'Bearer ' prefix");
            return forbidden();
        }
        Err(e) => {
            warn!("Failed to parse Authorization header to string: {}", e);
            return forbidden();
        }
    };

    let expected = state.config.api_key.as_bytes();
    if expected.is_empty() || !bool::from(api_key.as_bytes().ct_eq(expected)) {
        warn!("Authentication failed: Invalid API key");
        return forbidden();
    }
    next.run(request).await
}
