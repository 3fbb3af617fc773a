mod authn_middleware;
pub(crate) mod backchannel;
mod client_auth;
pub(crate) mod health;
pub(crate) mod internal;
pub(crate) mod introspect;
pub(crate) mod revoke;
pub(crate) mod status_list;
pub(crate) mod token;

use crate::api::authn_middleware::authentication_middleware;
use crate::state::AppState;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use http::header::{CACHE_CONTROL, PRAGMA};
use http::HeaderValue;
use utoipa_axum::router::OpenApiRouter;

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(health::router())
        .merge(token::router())
        .merge(revoke::router())
        .merge(introspect::router())
        .merge(backchannel::router())
        .merge(status_list::router())
        .merge(protected_routes(state))
}

/// Routes for the login UI, protected by the API key
fn protected_routes(state: &AppState) -> OpenApiRouter<AppState> {
    internal::router().layer(middleware::from_fn_with_state(
        state.clone(),
        authentication_middleware,
    ))
}

/// Marks a response carrying credentials as non-cacheable
pub(crate) fn no_store(response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Splits a space separated `scope` parameter
pub(crate) fn parse_scope(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope() {
        assert_eq!(parse_scope(" openid  email "), vec!["openid", "email"]);
        assert!(parse_scope("").is_empty());
    }
}
