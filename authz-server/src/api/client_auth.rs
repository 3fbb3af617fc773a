use crate::config::{ClientCatalog, ClientConfig};
use crate::errors::OAuthError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use log::warn;
use subtle::ConstantTimeEq;

const AUTHENTICATION_FAILED: &str = "Client authentication failed";

/// Credentials found in the `Authorization: Basic` header
fn basic_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, OAuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let malformed = || OAuthError::invalid_client("Malformed Basic authorization header");
    let value = value.to_str().map_err(|_| malformed())?;
    let Some(encoded) = value
        .get(..6)
        .filter(|scheme| scheme.eq_ignore_ascii_case("basic "))
        .map(|_| &value[6..])
    else {
        return Err(malformed());
    };
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (client_id, secret) = decoded.split_once(':').ok_or_else(malformed)?;
    Ok(Some((client_id.to_string(), secret.to_string())))
}

/// Authenticates the calling client with `client_secret_basic` or
/// `client_secret_post`; using both at once is rejected
pub(crate) fn authenticate_client<'a>(
    clients: &'a ClientCatalog,
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<&'a ClientConfig, OAuthError> {
    let (client_id, secret) = match (basic_credentials(headers)?, form_client_secret) {
        (Some(_), Some(_)) => {
            return Err(OAuthError::invalid_request(
                "Only one client authentication method may be used",
            ))
        }
        (Some(credentials), None) => credentials,
        (None, Some(secret)) => (
            form_client_id.unwrap_or_default().to_string(),
            secret.to_string(),
        ),
        (None, None) => return Err(OAuthError::invalid_client("Client authentication is required")),
    };

    let Some(client) = clients.get(&client_id) else {
        warn!("Authentication attempt for unknown client {}", client_id);
        return Err(OAuthError::invalid_client(AUTHENTICATION_FAILED));
    };
    if !bool::from(client.client_secret.as_bytes().ct_eq(secret.as_bytes())) {
        warn!("Client {} presented a wrong secret", client_id);
        return Err(OAuthError::invalid_client(AUTHENTICATION_FAILED));
    }
    Ok(client)
}
