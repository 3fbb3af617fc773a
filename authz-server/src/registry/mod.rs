//! Grant & token registry.
//!
//! Tokens are grouped under the grant they were issued from. Every mutation
//! of a grant (issuing, consuming a code, rotating a refresh token, revoking)
//! holds that grant's key lock, so a revocation can never interleave with an
//! issuance on the same grant. Lookups need no lock: a token is only valid
//! while both its record and its grant exist, and revocation deletes the
//! grant first.

pub mod model;
pub mod token_factory;

use crate::config::{ClientCatalog, ClientConfig, TokenConfig};
use crate::hooks::{GrantLifecycleHook, HookError, IssuanceDecision};
use crate::locks::KeyedLocks;
use crate::status_list::{StatusList, StatusListError, StatusRef, TokenStatus};
use crate::store::{Store, StoreBackend, StoreError};
use authz_crypto::{CryptoError, TokenBindingId};
use log::{debug, info, warn};
use model::{
    grant_key, grant_tokens_key, token_key, AuthorizationGrant, GrantType, Introspection,
    IssuedToken, NewGrant, TokenKind, TokenLookup, TokenRecord, TokenSet,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use token_factory::{wants_id_token, AccessTokenClaims, IdTokenClaims, TokenFactory};

/// Probe order when the caller gives no usable hint
const DEFAULT_PROBE_ORDER: [TokenKind; 2] = [TokenKind::AccessToken, TokenKind::RefreshToken];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Token not found")]
    TokenNotFound,
    #[error("Grant {0} not found")]
    GrantNotFound(String),
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),
    #[error("Client {0} is not allowed to perform this operation")]
    UnauthorizedClient(String),
    #[error("Unknown client: {0}")]
    UnknownClient(String),
    #[error("Invalid registry configuration: {0}")]
    Config(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Status list error: {0}")]
    StatusList(#[from] StatusListError),
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),
}

/// Options for a batch of tokens minted together
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    pub refresh_token: bool,
    /// Token binding of the requesting TLS channel, bound into the ID token
    pub binding: Option<TokenBindingId>,
}

pub struct Registry {
    store: Store,
    locks: KeyedLocks,
    factory: Arc<TokenFactory>,
    status_list: Option<Arc<StatusList>>,
    hook: GrantLifecycleHook,
    clients: Arc<ClientCatalog>,
    tokens: TokenConfig,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

impl Registry {
    pub fn new(
        store: Store,
        factory: Arc<TokenFactory>,
        status_list: Option<Arc<StatusList>>,
        hook: GrantLifecycleHook,
        clients: Arc<ClientCatalog>,
        tokens: TokenConfig,
    ) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            factory,
            status_list,
            hook,
            clients,
            tokens,
        }
    }

    pub fn factory(&self) -> &Arc<TokenFactory> {
        &self.factory
    }

    pub fn token_config(&self) -> &TokenConfig {
        &self.tokens
    }

    fn client(&self, client_id: &str) -> Result<&ClientConfig, RegistryError> {
        self.clients
            .get(client_id)
            .ok_or_else(|| RegistryError::UnknownClient(client_id.to_string()))
    }

    /// Stores a new grant under a fresh random id. The grant lives for `ttl`
    /// unless tokens issued under it outlive that.
    pub async fn create_grant(
        &self,
        grant: NewGrant,
        ttl: Duration,
    ) -> Result<AuthorizationGrant, RegistryError> {
        self.client(&grant.client_id)?;
        let created_at = now();
        let grant = AuthorizationGrant {
            grant_id: self.factory.opaque(),
            client_id: grant.client_id,
            user_id: grant.user_id,
            scopes: grant.scopes,
            acr: grant.acr,
            authentication_time: grant.authentication_time,
            session_reference: grant.session_reference,
            grant_type: grant.grant_type,
            created_at,
            nonce: grant.nonce,
            redirect_uri: grant.redirect_uri,
            expires_at: created_at.saturating_add(ttl_secs(ttl)),
        };
        self.store
            .put(&grant_key(&grant.grant_id), &grant, Some(ttl))
            .await?;
        debug!(
            "Created {:?} grant {} for client {}",
            grant.grant_type, grant.grant_id, grant.client_id
        );
        Ok(grant)
    }

    pub async fn grant(&self, grant_id: &str) -> Result<Option<AuthorizationGrant>, RegistryError> {
        Ok(self
            .store
            .get::<AuthorizationGrant>(&grant_key(grant_id))
            .await?
            .map(|v| v.value))
    }

    /// Mints one token of `kind` under an existing grant
    pub async fn issue_token(
        &self,
        grant_id: &str,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, RegistryError> {
        let _guard = self.locks.lock(&grant_key(grant_id)).await;
        let grant = self
            .grant(grant_id)
            .await?
            .ok_or_else(|| RegistryError::GrantNotFound(grant_id.to_string()))?;
        let decision = self.hook.before_issue(&grant, &[kind]).await?;
        let mut grant = grant;
        self.mint(&mut grant, kind, ttl, &decision, None, None)
            .await
    }

    /// Mints an access token, plus a refresh token when requested and an ID
    /// token when the grant carries `openid`, as one batch under one lock
    pub async fn issue_token_set(
        &self,
        grant_id: &str,
        options: &IssueOptions,
    ) -> Result<TokenSet, RegistryError> {
        let _guard = self.locks.lock(&grant_key(grant_id)).await;
        let grant = self
            .grant(grant_id)
            .await?
            .ok_or_else(|| RegistryError::GrantNotFound(grant_id.to_string()))?;
        self.issue_token_set_locked(grant, options).await
    }

    async fn issue_token_set_locked(
        &self,
        mut grant: AuthorizationGrant,
        options: &IssueOptions,
    ) -> Result<TokenSet, RegistryError> {
        let mut kinds = vec![TokenKind::AccessToken];
        if options.refresh_token {
            kinds.push(TokenKind::RefreshToken);
        }
        if wants_id_token(&grant) {
            kinds.push(TokenKind::IdToken);
        }
        let decision = self.hook.before_issue(&grant, &kinds).await?;

        let access_ttl = self.tokens.access_token_ttl();
        let access = self
            .mint(&mut grant, TokenKind::AccessToken, access_ttl, &decision, None, None)
            .await?;

        let refresh_token = if options.refresh_token {
            let ttl = self.tokens.refresh_token_ttl();
            let refresh = self
                .mint(&mut grant, TokenKind::RefreshToken, ttl, &decision, None, None)
                .await?;
            Some(refresh.value)
        } else {
            None
        };

        let id_token = if wants_id_token(&grant) {
            let ttl = self.tokens.id_token_ttl();
            let id = self
                .mint(
                    &mut grant,
                    TokenKind::IdToken,
                    ttl,
                    &decision,
                    Some(&access.value),
                    options.binding.as_ref(),
                )
                .await?;
            Some(id.value)
        } else {
            None
        };

        info!(
            "Issued tokens for grant {} to client {}",
            grant.grant_id, grant.client_id
        );
        Ok(TokenSet {
            access_token: access.value,
            token_type: "Bearer".to_string(),
            expires_in: access_ttl.as_secs(),
            refresh_token,
            id_token,
            scope: grant.scope(),
            grant_id: grant.grant_id,
        })
    }

    /// Mints, records and attaches a token. Callers hold the grant lock.
    async fn mint(
        &self,
        grant: &mut AuthorizationGrant,
        kind: TokenKind,
        ttl: Duration,
        decision: &IssuanceDecision,
        access_token: Option<&str>,
        binding: Option<&TokenBindingId>,
    ) -> Result<IssuedToken, RegistryError> {
        let client = self.client(&grant.client_id)?;
        let issued_at = now();
        let expires_at = issued_at.saturating_add(ttl_secs(ttl));

        let status: Option<StatusRef> = match &self.status_list {
            Some(list) if kind.has_status() => Some(list.allocate().await?),
            _ => None,
        };

        let (value, jti) = match kind {
            TokenKind::AccessToken if client.access_token_as_jwt => {
                let jti = self.factory.opaque();
                let value = self.factory.access_token(AccessTokenClaims {
                    grant: &*grant,
                    jti: &jti,
                    issued_at,
                    expires_at,
                    status: status.as_ref(),
                    extra: &decision.claims,
                })?;
                (value, Some(jti))
            }
            TokenKind::IdToken => {
                let value = self.factory.id_token(
                    IdTokenClaims {
                        grant: &*grant,
                        issued_at,
                        expires_at,
                        access_token,
                        status: status.as_ref(),
                        binding,
                    },
                    client,
                )?;
                (value, None)
            }
            _ => (self.factory.opaque(), None),
        };

        let record = TokenRecord {
            grant_id: grant.grant_id.clone(),
            kind,
            client_id: grant.client_id.clone(),
            issued_at,
            expires_at,
            status_index: status.map(|s| s.idx),
            jti,
            scopes: grant.scopes.clone(),
        };
        let record_key = token_key(kind, &value);
        self.store.put(&record_key, &record, Some(ttl)).await?;
        self.store
            .set_add(&grant_tokens_key(&grant.grant_id), &record_key, Some(ttl))
            .await?;

        if expires_at > grant.expires_at {
            grant.expires_at = expires_at;
            self.extend_grant(&grant.grant_id, expires_at, ttl).await?;
        }

        debug!(
            "Minted {} for grant {} (expires at {})",
            kind.name(),
            grant.grant_id,
            expires_at
        );
        Ok(IssuedToken { value, record })
    }

    /// Pushes the stored grant's expiry out to `expires_at`. Only the expiry
    /// changes: callers may hold a copy with narrowed scopes.
    async fn extend_grant(
        &self,
        grant_id: &str,
        expires_at: i64,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        let key = grant_key(grant_id);
        let mut stored = self
            .store
            .get::<AuthorizationGrant>(&key)
            .await?
            .ok_or_else(|| RegistryError::GrantNotFound(grant_id.to_string()))?
            .value;
        stored.expires_at = expires_at;
        self.store.put(&key, &stored, Some(ttl)).await?;
        Ok(())
    }

    /// Resolves a token to its grant. The hinted kind is probed first, then
    /// access tokens, then refresh tokens.
    pub async fn lookup(
        &self,
        token: &str,
        hint: Option<TokenKind>,
    ) -> Result<TokenLookup, RegistryError> {
        let mut order: Vec<TokenKind> = hint.into_iter().collect();
        order.extend(DEFAULT_PROBE_ORDER.iter().filter(|k| Some(**k) != hint));

        let now = now();
        for kind in order {
            let Some(record) = self
                .store
                .get::<TokenRecord>(&token_key(kind, token))
                .await?
            else {
                continue;
            };
            if record.value.is_expired(now) {
                continue;
            }
            return match self.grant(&record.value.grant_id).await? {
                Some(grant) => Ok(TokenLookup {
                    grant,
                    token: record.value,
                }),
                None => Err(RegistryError::TokenNotFound),
            };
        }
        Err(RegistryError::TokenNotFound)
    }

    /// Removes the grant and every token issued under it. Succeeds when the
    /// grant does not exist; fails when the store cannot be reached.
    pub async fn revoke(&self, grant_id: &str) -> Result<bool, RegistryError> {
        let grant = {
            let _guard = self.locks.lock(&grant_key(grant_id)).await;
            let Some(grant) = self.grant(grant_id).await? else {
                debug!("Grant {} already revoked", grant_id);
                return Ok(false);
            };

            let tokens_key = grant_tokens_key(grant_id);
            let mut keys = self.store.set_members(&tokens_key).await?;
            let mut indices = Vec::new();
            for key in &keys {
                if let Some(record) = self.store.get::<TokenRecord>(key).await? {
                    indices.extend(record.value.status_index);
                }
            }

            // status entries flip before anything is deleted, so a failure
            // here leaves the grant intact for a retry
            if let Some(list) = &self.status_list {
                list.set_status(&indices, TokenStatus::Invalid).await?;
            }

            // then the grant: from here on no lookup resolves
            self.store.delete(&grant_key(grant_id)).await?;
            keys.push(tokens_key);
            let removed = self.store.delete_many(&keys).await?;
            info!(
                "Revoked grant {} of client {} ({} records)",
                grant_id, grant.client_id, removed
            );
            grant
        };

        if let Err(e) = self.hook.after_revoke(&grant).await {
            warn!("Revocation hook failed for grant {}: {}", grant_id, e);
        }
        Ok(true)
    }

    /// Token revocation endpoint semantics: unknown tokens are ignored, a
    /// known token revokes its whole grant
    pub async fn revoke_token(
        &self,
        client_id: &str,
        token: &str,
        hint: Option<TokenKind>,
    ) -> Result<(), RegistryError> {
        let found = match self.lookup(token, hint).await {
            Ok(found) => found,
            Err(RegistryError::TokenNotFound) => {
                debug!("Client {} revoked an unknown token", client_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if found.token.client_id != client_id {
            warn!(
                "Client {} tried to revoke a token of client {}",
                client_id, found.token.client_id
            );
            return Err(RegistryError::UnauthorizedClient(client_id.to_string()));
        }
        self.revoke(&found.grant.grant_id).await?;
        Ok(())
    }

    /// Creates a grant for a completed authentication and its authorization code
    pub async fn create_authorization_code(
        &self,
        grant: NewGrant,
    ) -> Result<(AuthorizationGrant, String), RegistryError> {
        let ttl = self.tokens.code_ttl();
        let grant = self.create_grant(grant, ttl).await?;
        let code = self
            .issue_token(&grant.grant_id, TokenKind::AuthorizationCode, ttl)
            .await?;
        Ok((grant, code.value))
    }

    /// Exchanges a single-use authorization code for a token set
    pub async fn exchange_code(
        &self,
        client_id: &str,
        code: &str,
        redirect_uri: Option<&str>,
        binding: Option<TokenBindingId>,
    ) -> Result<TokenSet, RegistryError> {
        let code_key = token_key(TokenKind::AuthorizationCode, code);
        let invalid = || RegistryError::InvalidGrant("authorization code is invalid or expired".to_string());

        let record = self
            .store
            .get::<TokenRecord>(&code_key)
            .await?
            .ok_or_else(invalid)?
            .value;

        let _guard = self.locks.lock(&grant_key(&record.grant_id)).await;
        // consumed here; a concurrent or repeated exchange finds nothing
        if !self.store.delete(&code_key).await? || record.is_expired(now()) {
            return Err(invalid());
        }
        if record.client_id != client_id {
            warn!("Client {} presented a code issued to {}", client_id, record.client_id);
            return Err(invalid());
        }

        let grant = self.grant(&record.grant_id).await?.ok_or_else(invalid)?;
        if let Some(expected) = &grant.redirect_uri {
            if redirect_uri != Some(expected.as_str()) {
                return Err(RegistryError::InvalidGrant("redirect_uri mismatch".to_string()));
            }
        }

        let client = self.client(client_id)?;
        let options = IssueOptions {
            refresh_token: client.allows_grant_type("refresh_token"),
            binding,
        };
        self.issue_token_set_locked(grant, &options).await
    }

    /// Issues a new access token from a refresh token, rotating the refresh
    /// token when rotation is enabled
    pub async fn refresh(
        &self,
        client_id: &str,
        refresh_token: &str,
        scopes: Option<&[String]>,
    ) -> Result<TokenSet, RegistryError> {
        let invalid = || RegistryError::InvalidGrant("refresh token is invalid or expired".to_string());
        let found = match self.lookup(refresh_token, Some(TokenKind::RefreshToken)).await {
            Ok(found) if found.token.kind == TokenKind::RefreshToken => found,
            Ok(_) | Err(RegistryError::TokenNotFound) => return Err(invalid()),
            Err(e) => return Err(e),
        };
        if found.token.client_id != client_id {
            return Err(invalid());
        }
        if let Some(requested) = scopes {
            if let Some(extra) = requested.iter().find(|s| !found.grant.has_scope(s)) {
                return Err(RegistryError::InvalidGrant(format!(
                    "scope {extra} exceeds the original grant"
                )));
            }
        }

        let grant_id = found.grant.grant_id;
        let _guard = self.locks.lock(&grant_key(&grant_id)).await;
        let refresh_key = token_key(TokenKind::RefreshToken, refresh_token);
        let rotate = self.tokens.refresh_token_rotation;
        // re-read under the lock: a concurrent rotation or revocation wins
        if self.store.get::<TokenRecord>(&refresh_key).await?.is_none() {
            return Err(invalid());
        }
        let mut grant = self.grant(&grant_id).await?.ok_or_else(invalid)?;
        if let Some(requested) = scopes {
            grant.scopes = requested.to_vec();
        }

        let mut set = self
            .issue_token_set_locked(
                grant,
                &IssueOptions {
                    refresh_token: rotate,
                    binding: None,
                },
            )
            .await?;
        if rotate {
            self.store.delete(&refresh_key).await?;
            self.store
                .set_remove(&grant_tokens_key(&grant_id), &refresh_key)
                .await?;
        } else {
            set.refresh_token = Some(refresh_token.to_string());
        }
        Ok(set)
    }

    /// Issues an access token to the client itself
    pub async fn client_credentials(
        &self,
        client_id: &str,
        scopes: Vec<String>,
    ) -> Result<TokenSet, RegistryError> {
        let mut new = NewGrant::new(client_id, GrantType::ClientCredentials);
        new.scopes = scopes;
        let grant = self.create_grant(new, self.tokens.access_token_ttl()).await?;

        let _guard = self.locks.lock(&grant_key(&grant.grant_id)).await;
        self.issue_token_set_locked(grant, &IssueOptions::default())
            .await
    }

    /// Introspection never fails for unknown tokens; it reports them inactive
    pub async fn introspect(
        &self,
        token: &str,
        hint: Option<TokenKind>,
    ) -> Result<Introspection, RegistryError> {
        match self.lookup(token, hint).await {
            Ok(TokenLookup { grant, token }) => Ok(Introspection {
                active: true,
                scope: token.scope(),
                client_id: Some(token.client_id),
                sub: grant.user_id,
                exp: Some(token.expires_at),
                iat: Some(token.issued_at),
                token_type: Some(token.kind.name().to_string()),
                acr: grant.acr,
            }),
            Err(RegistryError::TokenNotFound) => Ok(Introspection::inactive()),
            Err(e) => Err(e),
        }
    }
}
