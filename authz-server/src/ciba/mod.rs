//! Client-initiated backchannel authentication.
//!
//! A request starts PENDING and ends in exactly one of GRANTED, DENIED or
//! EXPIRED. Terminal requests leave the pending index and stay readable for
//! the archive retention so late polls still get the terminal error.

pub mod delivery;
pub mod model;
pub mod service;
pub mod sweep;

pub use delivery::DeliveryError;
pub use model::{BackchannelRequest, BackchannelResponse, CibaStatus, CompletionOutcome};
pub use service::{CibaService, Completion};
pub use sweep::CibaExpirySweep;

use crate::registry::RegistryError;
use crate::store::StoreError;
use thiserror::Error;

pub const CIBA_GRANT_TYPE: &str = "urn:openid:params:grant-type:ciba";

#[derive(Debug, Error)]
pub enum CibaError {
    #[error("Backchannel authentication is disabled")]
    Disabled,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Scope {0} is not allowed for this client")]
    InvalidScope(String),
    #[error("Unknown client: {0}")]
    InvalidClient(String),
    #[error("Client {0} is not registered for this backchannel operation")]
    UnauthorizedClient(String),
    #[error("The authorization request is still pending")]
    AuthorizationPending,
    #[error("The client is polling too fast")]
    SlowDown,
    #[error("{0}")]
    ExpiredToken(String),
    #[error("The end-user denied the authorization request.")]
    AccessDenied,
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),
    #[error("Unknown backchannel request {0}")]
    UnknownRequest(String),
    #[error("Backchannel request is {0:?}, not pending")]
    NotPending(CibaStatus),
    #[error("Backchannel request {0} was modified concurrently")]
    Conflict(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}
