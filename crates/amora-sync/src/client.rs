//! Entry point for front ends.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::cache::{CacheEvent, ResourceKind};
use crate::{
    ApiClient, ClientConfig, KeyValueStore, MatchEnricher, MessageThreads, ResourceCache,
    Resources, SessionManager, SyncError,
};

/// One store and one HTTP client, shared by every component.
pub struct AmoraClient {
    sessions: Arc<SessionManager>,
    cache: Arc<ResourceCache>,
    resources: Resources,
    threads: MessageThreads,
}

impl AmoraClient {
    /// Validate `config` and wire all components to `store`.
    pub fn new(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, SyncError> {
        config.validate()?;

        let api = Arc::new(ApiClient::new(&config, store.clone())?);
        let sessions = Arc::new(SessionManager::new(api.clone(), store.clone()));
        let cache = Arc::new(ResourceCache::new(store));
        let enricher = MatchEnricher::new(api.clone(), &config);

        let resources = Resources::new(api.clone(), sessions.clone(), cache.clone(), enricher);
        let threads = MessageThreads::new(api, sessions.clone(), cache.clone());

        debug!(base_url = %config.base_url, "client ready");
        Ok(Self {
            sessions,
            cache,
            resources,
            threads,
        })
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn threads(&self) -> &MessageThreads {
        &self.threads
    }

    /// Cache change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    /// End the session and purge every cached resource. Never fails.
    pub async fn logout(&self) {
        self.sessions.logout().await;
        for kind in ResourceKind::ALL {
            self.cache.clear(kind).await;
        }
    }
}
