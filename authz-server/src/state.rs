use crate::ciba::{CibaError, CibaService};
use crate::config::{ClientCatalog, ServerConfig};
use crate::hooks::{GrantLifecycleHook, HookError};
use crate::registry::token_factory::TokenFactory;
use crate::registry::{Registry, RegistryError};
use crate::status_list::{StatusList, StatusListError};
use crate::store::{create_store, Store, StoreBackend, StoreError};
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to create store: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to create token registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("Failed to create status list: {0}")]
    StatusList(#[from] StatusListError),
    #[error("Failed to create grant hook: {0}")]
    Hook(#[from] HookError),
    #[error("Failed to create backchannel service: {0}")]
    Ciba(#[from] CibaError),
}

/// Everything the handlers share. Built once at startup and torn down with
/// the server; nothing here lives in a global.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Store,
    pub clients: Arc<ClientCatalog>,
    pub registry: Arc<Registry>,
    pub ciba: Arc<CibaService>,
    pub status_list: Option<Arc<StatusList>>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Result<Self, StateError> {
        let store = create_store(&config.store).await?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: ServerConfig, store: Store) -> Result<Self, StateError> {
        if config.api_key.is_empty() {
            warn!("No API key configured, the internal endpoints reject every request");
        }
        let clients = Arc::new(ClientCatalog::new(config.clients.clone()));
        let factory = Arc::new(TokenFactory::from_config(&config)?);
        let hook = GrantLifecycleHook::from_config(&config.hooks)?;

        let status_list = if config.status_list.enabled {
            Some(Arc::new(StatusList::new(
                store.clone(),
                &config.status_list,
                config.status_list_uri(),
            )?))
        } else {
            None
        };

        let registry = Arc::new(Registry::new(
            store.clone(),
            factory,
            status_list.clone(),
            hook,
            Arc::clone(&clients),
            config.tokens.clone(),
        ));
        let ciba = Arc::new(CibaService::new(
            store.clone(),
            Arc::clone(&registry),
            Arc::clone(&clients),
            config.ciba.clone(),
        )?);

        info!(
            "Loaded {} clients, status list {}",
            clients.len(),
            if status_list.is_some() { "enabled" } else { "disabled" }
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            clients,
            registry,
            ciba,
            status_list,
        })
    }

    #[cfg(test)]
    pub fn for_testing(config: &ServerConfig) -> Self {
        let store = Store::InMemory(crate::store::memory::InMemoryStore::new());
        Self::with_store(config.clone(), store).expect("test configuration is valid")
    }

    /// Returns Ok(()) if the store is reachable
    pub async fn health_check(&self) -> Result<(), String> {
        self.store.health_check().await
    }
}
