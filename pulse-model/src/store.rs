//! The store: context object tying entities to their backend and to the
//! push channel.
//!
//! Build one per process and pass it to whatever needs entities. It owns
//! the entity cache, the subscription registry and the push channel.

use crate::backend::Backend;
use crate::cache::EntityCache;
use crate::document::Document;
use crate::entity::{Entity, Lifecycle};
use crate::error::{ModelError, ModelResult};
use pulse_sync::{
    ChannelConfig, Connector, Outbox, PushChannel, ReachabilityWatch, SubscriptionRegistry,
    SweepWatch, WsConnector,
};
use pulse_types::{EntityId, Properties};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Push channel settings.
    pub channel: ChannelConfig,
    /// How often dropped entities are checked for stale subscriptions (ms).
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            sweep_interval_ms: SweepWatch::DEFAULT_INTERVAL.as_millis() as u64,
        }
    }
}

impl StoreConfig {
    /// Parses a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> ModelResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ModelResult<()> {
        self.channel
            .validate()
            .map_err(|e| ModelError::Config(e.to_string()))?;
        if self.sweep_interval_ms == 0 {
            return Err(ModelError::Config("sweep interval must be positive".into()));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Entity factory and owner of the shared push machinery.
pub struct Store {
    backend: Arc<dyn Backend>,
    cache: EntityCache,
    registry: Arc<SubscriptionRegistry>,
    channel: PushChannel,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("cache", &self.cache.len())
            .field("registry", &self.registry)
            .field("channel", &self.channel)
            .finish()
    }
}

impl Store {
    /// Creates a store over the given collaborators and spawns its push
    /// channel. The channel connects once the first subscription is made.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(
        config: StoreConfig,
        backend: Arc<dyn Backend>,
        connector: Arc<dyn Connector>,
        watch: Arc<dyn ReachabilityWatch>,
    ) -> Self {
        let outbox = Arc::new(Outbox::new());
        let registry = SubscriptionRegistry::new(outbox.clone(), watch);
        let channel = PushChannel::spawn(config.channel, connector, outbox, registry.clone());
        Self {
            backend,
            cache: EntityCache::new(),
            registry,
            channel,
        }
    }

    /// Creates a store that pushes over WebSocket and drops subscriptions of
    /// reclaimed entities on a periodic sweep.
    pub fn connect(config: StoreConfig, backend: Arc<dyn Backend>) -> ModelResult<Self> {
        config.validate()?;
        info!("Starting store, push endpoint {}", config.channel.endpoint);
        let watch = Arc::new(SweepWatch::spawn(config.sweep_interval()));
        Ok(Self::new(config, backend, Arc::new(WsConnector), watch))
    }

    fn build(&self, id: EntityId, lifecycle: Lifecycle, properties: Properties) -> Arc<Entity> {
        Entity::new(
            id,
            lifecycle,
            properties,
            self.backend.clone(),
            Arc::downgrade(&self.registry),
        )
    }

    /// The live entity for `id`, if any.
    pub fn get(&self, id: &EntityId) -> Option<Arc<Entity>> {
        self.cache.get(id)
    }

    /// The live entity for `id`, or a new unloaded one.
    pub fn get_or_create(&self, id: impl Into<EntityId>) -> Arc<Entity> {
        let id = id.into();
        self.cache.get_or_insert_with(&id, || {
            self.build(id.clone(), Lifecycle::UNLOADED, Properties::new())
        })
    }

    /// A new entity with a generated id, not yet on the backend.
    pub fn create(&self) -> Arc<Entity> {
        let id = EntityId::generate();
        let entity = self.build(id.clone(), Lifecycle::NEW, Properties::new());
        self.cache.set(id, &entity);
        entity
    }

    /// The entity for `document.id`, holding the document's contents.
    ///
    /// A live entity is updated in place, so existing holders see the new
    /// contents.
    pub fn from_document(&self, document: Document) -> Arc<Entity> {
        let Document { id, properties } = document;
        let mut properties = Some(properties);
        let entity = self.cache.get_or_insert_with(&id, || {
            self.build(
                id.clone(),
                Lifecycle::FRESH,
                properties.take().unwrap_or_default(),
            )
        });
        if let Some(properties) = properties {
            entity.replace(properties);
        }
        entity
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &PushChannel {
        &self.channel
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Closes the push channel. Entities keep working against the backend
    /// but receive no further invalidations.
    pub async fn shutdown(&self) {
        self.channel.shutdown().await;
    }
}
