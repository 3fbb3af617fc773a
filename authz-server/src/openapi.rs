use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth API";
pub(crate) const CIBA_TAG: &str = "Backchannel Authentication API";
pub(crate) const STATUS_LIST_TAG: &str = "Status List API";
pub(crate) const INTERNAL_TAG: &str = "Internal API";

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "Token, revocation and introspection endpoints"),
        (name = CIBA_TAG, description = "Client-initiated backchannel authentication"),
        (name = STATUS_LIST_TAG, description = "Token status list for relying parties"),
        (name = INTERNAL_TAG, description = "Grant handover from the login UI, protected by the API key"),
    ),
    info(
        title = "Authorization Server API",
        description = "OAuth 2.0 / OpenID Connect token issuance",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;
