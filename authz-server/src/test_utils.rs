use crate::config::{BackchannelDeliveryMode, ServerConfig};
use crate::create_app;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tower::ServiceExt;

/// Test fixture running the full router over an in-memory store.
///
/// JSON helpers (`get`, `post`) carry the API key and are meant for the
/// internal routes; form helpers (`post_form*`) carry client credentials and
/// are meant for the OAuth endpoints.
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     let response = fixture
///         .post_form_as("c1", "/token", &[("grant_type", "client_credentials")])
///         .await;
///     response.assert_ok();
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    pub config: ServerConfig,
    /// Shared with the router, for arranging state directly
    pub state: AppState,
}

impl TestFixture {
    /// Fixture over [`ServerConfig::for_test`]: clients `c1` and `c2` with
    /// secrets `c1-secret` and `c2-secret`
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::for_test()).await
    }

    /// Every client is registered for backchannel authentication with `mode`
    pub async fn with_delivery_mode(mode: BackchannelDeliveryMode) -> Self {
        let mut config = ServerConfig::for_test();
        for client in &mut config.clients {
            client.backchannel_token_delivery_mode = Some(mode);
        }
        Self::with_config(config).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let state = AppState::for_testing(&config);
        Self::with_state(config, state).await
    }

    pub async fn with_state(config: ServerConfig, state: AppState) -> Self {
        Self::setup_logger(LevelFilter::Debug);
        let app = create_app(state.clone()).await;
        Self { app, config, state }
    }

    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Request builder with the API key and a JSON content type
    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri.as_ref())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
    }

    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn post<T: Serialize>(&self, uri: impl AsRef<str>, body: &T) -> TestResponse {
        self.post_with_headers(uri, body, &[]).await
    }

    /// Custom headers replace the defaults of the same name
    pub async fn post_with_headers<T: Serialize>(
        &self,
        uri: impl AsRef<str>,
        body: &T,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let mut request = self
            .request_builder(Method::POST, uri)
            .body(Body::from(json_body))
            .expect("Failed to build request");
        for (name, value) in headers {
            request.headers_mut().insert(
                http::HeaderName::from_bytes(name.as_bytes()).expect("valid header name"),
                http::HeaderValue::from_str(value).expect("valid header value"),
            );
        }
        self.send(request).await
    }

    /// Form POST without any client credentials
    pub async fn post_form(&self, uri: impl AsRef<str>, fields: &[(&str, &str)]) -> TestResponse {
        self.post_form_with_headers(uri, fields, &[]).await
    }

    /// Form POST authenticated as `client_id` with `client_secret_basic`
    pub async fn post_form_as(
        &self,
        client_id: &str,
        uri: impl AsRef<str>,
        fields: &[(&str, &str)],
    ) -> TestResponse {
        let credentials = STANDARD.encode(format!("{client_id}:{client_id}-secret"));
        let authorization = format!("Basic {credentials}");
        self.post_form_with_headers(uri, fields, &[("Authorization", authorization.as_str())])
            .await
    }

    pub async fn post_form_with_headers(
        &self,
        uri: impl AsRef<str>,
        fields: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri.as_ref())
            .header("Content-Type", "application/x-www-form-urlencoded");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("Failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        // Try to parse as JSON, defaulting to empty object if parsing fails or empty body
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse { status, json }
    }
}

/// Response from a test request that provides convenient access to status and JSON body.
pub struct TestResponse {
    pub status: StatusCode,
    /// Response body as JSON (if present and valid JSON)
    pub json: Value,
}

impl TestResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ciba::BackchannelResponse;

    #[tokio::test]
    async fn test_form_helpers_authenticate_clients() {
        let fixture = TestFixture::with_delivery_mode(BackchannelDeliveryMode::Poll).await;
        let response = fixture
            .post_form_as(
                "c2",
                "/bc-authorize",
                &[("scope", "openid"), ("login_hint", "carol & dave")],
            )
            .await;
        assert!(response.is_success());
        let started: BackchannelResponse = response.json_as();
        assert_eq!(started.expires_in, 120);

        let response = fixture
            .post_form_with_headers(
                "/bc-authorize",
                &[
                    ("scope", "openid"),
                    ("login_hint", "alice"),
                    ("client_id", "c2"),
                    ("client_secret", "c2-secret"),
                ],
                &[],
            )
            .await;
        response.assert_ok();
    }
}
