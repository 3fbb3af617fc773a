use super::delivery::{DeliveryClient, DeliveryError, Notification};
use super::model::{
    device_key, request_key, BackchannelRequest, BackchannelResponse, CibaRequest, CibaStatus,
    CompletionOutcome, DeviceRegistration, PENDING_INDEX_KEY,
};
use super::{CibaError, CIBA_GRANT_TYPE};
use crate::config::{BackchannelDeliveryMode, CibaConfig, ClientCatalog, ClientConfig};
use crate::locks::KeyedLocks;
use crate::registry::model::{GrantType, NewGrant, TokenSet, OPENID_SCOPE};
use crate::registry::{IssueOptions, Registry};
use crate::store::{Store, StoreBackend, Versioned};
use authz_crypto::TokenBindingId;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const UNKNOWN_REQUEST: &str = "Unable to find grant object for given auth_req_id.";
const EXPIRED_REQUEST: &str = "The authentication request has expired";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn is_blank(value: Option<&String>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Outcome of a completion event. `delivery` is set for ping and push clients
/// and resolves once the notification was sent or failed.
#[derive(Debug)]
pub struct Completion {
    pub request: CibaRequest,
    pub delivery: Option<JoinHandle<Result<(), DeliveryError>>>,
}

/// The backchannel authentication state machine.
///
/// Every transition of a request happens under that request's key lock and is
/// written with a compare-and-set on the stored version, so polls, completions
/// and the expiry sweep never observe each other's partial work. Notifications
/// are sent from a spawned task once the transition is committed and the lock
/// released.
pub struct CibaService {
    store: Store,
    locks: KeyedLocks,
    registry: Arc<Registry>,
    clients: Arc<ClientCatalog>,
    config: CibaConfig,
    delivery: DeliveryClient,
}

impl CibaService {
    pub fn new(
        store: Store,
        registry: Arc<Registry>,
        clients: Arc<ClientCatalog>,
        config: CibaConfig,
    ) -> Result<Self, CibaError> {
        let delivery = DeliveryClient::new(config.delivery_timeout())?;
        Ok(Self {
            store,
            locks: KeyedLocks::new(),
            registry,
            clients,
            config,
            delivery,
        })
    }

    pub fn config(&self) -> &CibaConfig {
        &self.config
    }

    fn client(&self, client_id: &str) -> Result<&ClientConfig, CibaError> {
        if !self.config.enabled {
            return Err(CibaError::Disabled);
        }
        self.clients
            .get(client_id)
            .ok_or_else(|| CibaError::InvalidClient(client_id.to_string()))
    }

    /// Validates a backchannel authentication request and stores it as pending.
    /// Nothing is written when validation fails.
    pub async fn register(
        &self,
        client_id: &str,
        request: BackchannelRequest,
    ) -> Result<BackchannelResponse, CibaError> {
        let client = self.client(client_id)?;
        let mode = client
            .backchannel_token_delivery_mode
            .filter(|_| client.allows_grant_type(CIBA_GRANT_TYPE))
            .ok_or_else(|| CibaError::UnauthorizedClient(client_id.to_string()))?;

        let user_id = self.resolve_user(&request)?;
        if !request.scopes.iter().any(|s| s == OPENID_SCOPE) {
            return Err(CibaError::InvalidRequest(
                "the openid scope is required".to_string(),
            ));
        }
        if let Some(scope) = client.disallowed_scope(&request.scopes) {
            return Err(CibaError::InvalidScope(scope.to_string()));
        }
        if mode.notifies() {
            if is_blank(request.client_notification_token.as_ref()) {
                return Err(CibaError::InvalidRequest(
                    "client_notification_token is required".to_string(),
                ));
            }
            if is_blank(client.backchannel_client_notification_endpoint.as_ref()) {
                return Err(CibaError::InvalidRequest(
                    "the client has no notification endpoint".to_string(),
                ));
            }
        }
        let expires_in = match request.requested_expiry {
            None => self.config.default_expires_in,
            Some(expiry) if expiry > 0 && expiry <= self.config.max_expires_in => expiry,
            Some(expiry) => {
                return Err(CibaError::InvalidRequest(format!(
                    "requested_expiry {expiry} is outside (0, {}]",
                    self.config.max_expires_in
                )))
            }
        };

        let created_at = now_ms();
        let expiry_ms = i64::try_from(expires_in.saturating_mul(1000)).unwrap_or(i64::MAX);
        let stored = CibaRequest {
            auth_req_id: self.registry.factory().opaque(),
            client_id: client_id.to_string(),
            user_id,
            scopes: request.scopes,
            acr: request.acr_values,
            binding_message: request.binding_message,
            client_notification_token: request.client_notification_token,
            delivery_mode: mode,
            created_at,
            expires_at: created_at.saturating_add(expiry_ms),
            status: CibaStatus::Pending,
            last_access: None,
            tokens_delivered: false,
            grant_id: None,
        };
        let key = request_key(&stored.auth_req_id);
        self.commit(&key, 0, &stored, created_at).await?;
        self.store
            .set_add(PENDING_INDEX_KEY, &stored.auth_req_id, None)
            .await?;

        info!(
            "Registered backchannel request {} for client {} ({:?})",
            stored.auth_req_id, client_id, mode
        );
        Ok(BackchannelResponse {
            auth_req_id: stored.auth_req_id,
            expires_in,
            interval: (mode != BackchannelDeliveryMode::Push).then_some(self.config.poll_interval),
        })
    }

    /// Exactly one of the hints names the user; an `id_token_hint` must be an
    /// ID token this server issued
    fn resolve_user(&self, request: &BackchannelRequest) -> Result<String, CibaError> {
        match (
            request.login_hint.as_ref().filter(|h| !h.trim().is_empty()),
            request.id_token_hint.as_ref().filter(|h| !h.trim().is_empty()),
        ) {
            (Some(login_hint), None) => Ok(login_hint.trim().to_string()),
            (None, Some(id_token_hint)) => self.subject_of(id_token_hint),
            (Some(_), Some(_)) => Err(CibaError::InvalidRequest(
                "only one of login_hint and id_token_hint may be given".to_string(),
            )),
            (None, None) => Err(CibaError::InvalidRequest(
                "a login_hint or id_token_hint is required".to_string(),
            )),
        }
    }

    fn subject_of(&self, id_token: &str) -> Result<String, CibaError> {
        let claims = self
            .registry
            .factory()
            .verify(id_token)
            .map_err(|e| CibaError::InvalidRequest(format!("invalid id_token_hint: {e}")))?;
        claims
            .subject()
            .map(str::to_string)
            .ok_or_else(|| CibaError::InvalidRequest("id_token_hint has no subject".to_string()))
    }

    /// Applies the user's decision to a pending request
    pub async fn complete(
        &self,
        auth_req_id: &str,
        outcome: CompletionOutcome,
    ) -> Result<Completion, CibaError> {
        let key = request_key(auth_req_id);
        let guard = self.locks.lock(&key).await;
        let Versioned {
            value: mut request,
            version,
        } = self
            .store
            .get::<CibaRequest>(&key)
            .await?
            .ok_or_else(|| CibaError::UnknownRequest(auth_req_id.to_string()))?;

        if request.status.is_terminal() {
            return Err(CibaError::NotPending(request.status));
        }
        let now = now_ms();
        if request.is_expired(now) {
            self.expire_locked(&key, request, version, now).await?;
            return Err(CibaError::NotPending(CibaStatus::Expired));
        }

        let mut pushed = None;
        match outcome {
            CompletionOutcome::Granted { acr, auth_time } => {
                let mut grant = NewGrant::new(&request.client_id, GrantType::Ciba);
                grant.user_id = Some(request.user_id.clone());
                grant.scopes = request.scopes.clone();
                grant.acr = acr.or_else(|| request.acr.clone());
                grant.authentication_time = Some(auth_time.unwrap_or(now / 1000));
                let grant = self
                    .registry
                    .create_grant(grant, self.grant_ttl(&request, now))
                    .await?;
                request.status = CibaStatus::Granted;
                request.grant_id = Some(grant.grant_id.clone());

                if request.delivery_mode == BackchannelDeliveryMode::Push {
                    let options = self.issue_options(&request.client_id, None);
                    match self.registry.issue_token_set(&grant.grant_id, &options).await {
                        Ok(tokens) => pushed = Some(tokens),
                        Err(e) => {
                            self.discard_grant(&grant.grant_id).await;
                            return Err(e.into());
                        }
                    }
                    request.tokens_delivered = true;
                }
            }
            CompletionOutcome::Denied => request.status = CibaStatus::Denied,
        }

        if let Err(e) = self.commit(&key, version, &request, now).await {
            if let Some(grant_id) = &request.grant_id {
                self.discard_grant(grant_id).await;
            }
            return Err(e);
        }
        if let Err(e) = self.store.set_remove(PENDING_INDEX_KEY, auth_req_id).await {
            // the sweep drops index entries of completed requests
            warn!("Failed to unindex backchannel request {}: {}", auth_req_id, e);
        }
        drop(guard);

        info!(
            "Backchannel request {} of client {} is now {:?}",
            auth_req_id, request.client_id, request.status
        );
        let delivery = self.spawn_delivery(&request, pushed);
        Ok(Completion { request, delivery })
    }

    /// Token endpoint side of the poll and ping modes
    pub async fn poll(
        &self,
        client_id: &str,
        auth_req_id: &str,
        binding: Option<TokenBindingId>,
    ) -> Result<TokenSet, CibaError> {
        let client = self.client(client_id)?;
        if client.backchannel_token_delivery_mode == Some(BackchannelDeliveryMode::Push) {
            return Err(CibaError::UnauthorizedClient(client_id.to_string()));
        }

        let key = request_key(auth_req_id);
        let _guard = self.locks.lock(&key).await;
        let Some(Versioned {
            value: mut request,
            version,
        }) = self.store.get::<CibaRequest>(&key).await?
        else {
            return Err(CibaError::ExpiredToken(UNKNOWN_REQUEST.to_string()));
        };
        if request.client_id != client_id {
            warn!(
                "Client {} polled backchannel request {} of client {}",
                client_id, auth_req_id, request.client_id
            );
            return Err(CibaError::InvalidGrant(
                "auth_req_id was issued to another client".to_string(),
            ));
        }

        let now = now_ms();
        match request.status {
            CibaStatus::Pending if request.is_expired(now) => {
                self.expire_locked(&key, request, version, now).await?;
                Err(CibaError::ExpiredToken(EXPIRED_REQUEST.to_string()))
            }
            CibaStatus::Pending => {
                let previous = request.last_access.replace(now);
                self.commit(&key, version, &request, now).await?;
                let interval_ms =
                    i64::try_from(self.config.poll_interval().as_millis()).unwrap_or(i64::MAX);
                match previous {
                    Some(last) if now - last < interval_ms => Err(CibaError::SlowDown),
                    _ => Err(CibaError::AuthorizationPending),
                }
            }
            CibaStatus::Denied => Err(CibaError::AccessDenied),
            CibaStatus::Expired => Err(CibaError::ExpiredToken(EXPIRED_REQUEST.to_string())),
            CibaStatus::Granted if request.tokens_delivered => Err(CibaError::InvalidGrant(
                "tokens were already delivered for this auth_req_id".to_string(),
            )),
            CibaStatus::Granted => {
                let grant_id = request.grant_id.clone().ok_or_else(|| {
                    CibaError::InvalidGrant("granted request has no grant".to_string())
                })?;
                request.tokens_delivered = true;
                self.commit(&key, version, &request, now).await?;

                let options = self.issue_options(client_id, binding);
                match self.registry.issue_token_set(&grant_id, &options).await {
                    Ok(tokens) => {
                        debug!("Delivered tokens of backchannel request {}", auth_req_id);
                        Ok(tokens)
                    }
                    Err(e) => {
                        request.tokens_delivered = false;
                        if let Err(rollback) =
                            self.commit(&key, version + 1, &request, now).await
                        {
                            warn!(
                                "Failed to reopen delivery of backchannel request {}: {}",
                                auth_req_id, rollback
                            );
                        }
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Moves every pending request past its expiration to EXPIRED and
    /// returns how many were moved. A request that cannot be handled is
    /// logged and left for the next run; the others are still swept.
    pub async fn expire_due(&self) -> Result<usize, CibaError> {
        let mut expired = 0;
        let mut failed = 0;
        for auth_req_id in self.store.set_members(PENDING_INDEX_KEY).await? {
            match self.expire_if_due(&auth_req_id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    failed += 1;
                    warn!("Failed to sweep backchannel request {}: {}", auth_req_id, e);
                }
            }
        }
        if expired > 0 {
            info!("Expired {} backchannel requests", expired);
        }
        if failed > 0 {
            warn!("{} backchannel requests could not be swept", failed);
        }
        Ok(expired)
    }

    async fn expire_if_due(&self, auth_req_id: &str) -> Result<bool, CibaError> {
        let key = request_key(auth_req_id);
        let _guard = self.locks.lock(&key).await;
        match self.store.get::<CibaRequest>(&key).await? {
            Some(Versioned { value, version }) if value.status == CibaStatus::Pending => {
                let now = now_ms();
                if !value.is_expired(now) {
                    return Ok(false);
                }
                self.expire_locked(&key, value, version, now).await?;
                Ok(true)
            }
            _ => {
                self.store.set_remove(PENDING_INDEX_KEY, auth_req_id).await?;
                Ok(false)
            }
        }
    }

    /// Stores the push registration token of the user named by an ID token
    /// this server issued
    pub async fn register_device(
        &self,
        id_token_hint: &str,
        registration_token: &str,
    ) -> Result<DeviceRegistration, CibaError> {
        if !self.config.enabled {
            return Err(CibaError::Disabled);
        }
        if id_token_hint.trim().is_empty() {
            return Err(CibaError::InvalidRequest(
                "id_token_hint is required".to_string(),
            ));
        }
        if registration_token.trim().is_empty() {
            return Err(CibaError::InvalidRequest(
                "device_registration_token is required".to_string(),
            ));
        }
        let user_id = self.subject_of(id_token_hint)?;
        let registration = DeviceRegistration {
            user_id,
            registration_token: registration_token.to_string(),
            registered_at: chrono::Utc::now().timestamp(),
        };
        self.store
            .put(&device_key(&registration.user_id), &registration, None)
            .await?;
        info!("Registered a device for user {}", registration.user_id);
        Ok(registration)
    }

    /// Callers hold the request lock
    async fn expire_locked(
        &self,
        key: &str,
        mut request: CibaRequest,
        version: u64,
        now: i64,
    ) -> Result<(), CibaError> {
        request.status = CibaStatus::Expired;
        self.commit(key, version, &request, now).await?;
        self.store
            .set_remove(PENDING_INDEX_KEY, &request.auth_req_id)
            .await?;
        info!("Backchannel request {} expired", request.auth_req_id);
        Ok(())
    }

    /// Writes `request` if the stored copy is still at `version`; the record
    /// outlives its expiration by the archive retention
    async fn commit(
        &self,
        key: &str,
        version: u64,
        request: &CibaRequest,
        now: i64,
    ) -> Result<(), CibaError> {
        let remaining = u64::try_from(request.expires_at.saturating_sub(now)).unwrap_or(0);
        let ttl = Duration::from_millis(remaining) + self.config.archive_retention();
        if self
            .store
            .compare_and_set(key, version, request, Some(ttl.max(Duration::from_secs(1))))
            .await?
        {
            Ok(())
        } else {
            Err(CibaError::Conflict(request.auth_req_id.clone()))
        }
    }

    /// A granted request's grant stays around at least as long as the request record
    fn grant_ttl(&self, request: &CibaRequest, now: i64) -> Duration {
        let remaining = u64::try_from(request.expires_at.saturating_sub(now)).unwrap_or(0);
        Duration::from_millis(remaining) + self.config.archive_retention()
    }

    fn issue_options(&self, client_id: &str, binding: Option<TokenBindingId>) -> IssueOptions {
        IssueOptions {
            refresh_token: self
                .clients
                .get(client_id)
                .is_some_and(|c| c.allows_grant_type("refresh_token")),
            binding,
        }
    }

    async fn discard_grant(&self, grant_id: &str) {
        if let Err(e) = self.registry.revoke(grant_id).await {
            warn!("Failed to discard grant {}: {}", grant_id, e);
        }
    }

    fn spawn_delivery(
        &self,
        request: &CibaRequest,
        pushed: Option<TokenSet>,
    ) -> Option<JoinHandle<Result<(), DeliveryError>>> {
        let id = request.auth_req_id.as_str();
        let notification = match (request.delivery_mode, request.status) {
            (BackchannelDeliveryMode::Poll, _) => return None,
            (BackchannelDeliveryMode::Ping, _) => Notification::ping(id),
            (BackchannelDeliveryMode::Push, CibaStatus::Granted) => {
                Notification::push(id, pushed?)
            }
            (BackchannelDeliveryMode::Push, _) => Notification::access_denied(id),
        };
        let endpoint = self
            .clients
            .get(&request.client_id)?
            .backchannel_client_notification_endpoint
            .clone()?;
        let token = request.client_notification_token.clone()?;
        let delivery = self.delivery.clone();
        let client_id = request.client_id.clone();

        Some(tokio::spawn(async move {
            let result = delivery.notify(&endpoint, &token, &notification).await;
            if let Err(e) = &result {
                warn!("Notification to client {} failed: {}", client_id, e);
            }
            result
        }))
    }
}
