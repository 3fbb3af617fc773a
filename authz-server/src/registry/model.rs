use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

pub const OPENID_SCOPE: &str = "openid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AuthorizationCode,
    AccessToken,
    RefreshToken,
    IdToken,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "code",
            Self::AccessToken => "at",
            Self::RefreshToken => "rt",
            Self::IdToken => "idt",
        }
    }

    /// Parses a `token_type_hint`; unknown hints are ignored by callers
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint {
            "access_token" => Some(Self::AccessToken),
            "refresh_token" => Some(Self::RefreshToken),
            "id_token" => Some(Self::IdToken),
            "authorization_code" => Some(Self::AuthorizationCode),
            _ => None,
        }
    }

    /// Status list indices are only allocated for tokens relying parties check
    pub fn has_status(&self) -> bool {
        matches!(self, Self::AccessToken | Self::IdToken)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    Ciba,
}

/// Tokens issued from one authentication or consent event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub grant_id: String,
    pub client_id: String,
    /// Absent for client credentials grants
    pub user_id: Option<String>,
    pub scopes: Vec<String>,
    pub acr: Option<String>,
    pub authentication_time: Option<i64>,
    pub session_reference: Option<String>,
    pub grant_type: GrantType,
    pub created_at: i64,
    pub nonce: Option<String>,
    pub redirect_uri: Option<String>,
    /// Expiry of the longest-lived token issued so far
    pub expires_at: i64,
}

impl AuthorizationGrant {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn scope(&self) -> Option<String> {
        if self.scopes.is_empty() {
            None
        } else {
            Some(self.scopes.join(" "))
        }
    }
}

/// Input of [`super::Registry::create_grant`]
#[derive(Debug, Clone)]
pub struct NewGrant {
    pub client_id: String,
    pub user_id: Option<String>,
    pub scopes: Vec<String>,
    pub acr: Option<String>,
    pub authentication_time: Option<i64>,
    pub session_reference: Option<String>,
    pub grant_type: GrantType,
    pub nonce: Option<String>,
    pub redirect_uri: Option<String>,
}

impl NewGrant {
    pub fn new(client_id: impl Into<String>, grant_type: GrantType) -> Self {
        Self {
            client_id: client_id.into(),
            user_id: None,
            scopes: Vec::new(),
            acr: None,
            authentication_time: None,
            session_reference: None,
            grant_type,
            nonce: None,
            redirect_uri: None,
        }
    }
}

/// What the registry remembers about an issued token; the value itself is never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub grant_id: String,
    pub kind: TokenKind,
    pub client_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub status_index: Option<u64>,
    pub jti: Option<String>,
    /// Scopes this token carries; narrower than the grant's after a scoped refresh
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn scope(&self) -> Option<String> {
        if self.scopes.is_empty() {
            None
        } else {
            Some(self.scopes.join(" "))
        }
    }
}

/// A freshly minted token and its record
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub record: TokenRecord,
}

/// Result of a successful lookup
#[derive(Debug, Clone)]
pub struct TokenLookup {
    pub grant: AuthorizationGrant,
    pub token: TokenRecord,
}

/// Token endpoint success response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip)]
    pub grant_id: String,
}

/// RFC 7662 introspection response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Introspection {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
}

impl Introspection {
    pub fn inactive() -> Self {
        Self::default()
    }
}

pub(crate) fn grant_key(grant_id: &str) -> String {
    format!("grant:{grant_id}")
}

/// Set of token record keys issued under a grant
pub(crate) fn grant_tokens_key(grant_id: &str) -> String {
    format!("grant_tokens:{grant_id}")
}

pub(crate) fn token_key(kind: TokenKind, value: &str) -> String {
    format!("token:{}:{:x}", kind.key_prefix(), Sha256::digest(value.as_bytes()))
}
