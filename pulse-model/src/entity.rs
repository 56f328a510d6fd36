//! Live entities.
//!
//! An [`Entity`] is the client-side copy of one server document. Its state
//! is summarized by three flags:
//!
//! | state     | is_new | is_sync | is_loaded |
//! |-----------|--------|---------|-----------|
//! | unsaved   | true   | false   | false     |
//! | unloaded  | false  | false   | false     |
//! | stale     | false  | false   | true      |
//! | fresh     | false  | true    | true      |
//!
//! Any property mutation clears `is_sync`. `load`, `reset`, `save` and
//! `remove` each wrap one backend call. While an operation of a kind is in
//! flight, further calls of that kind share its result instead of issuing
//! another call. Operations start as soon as they are requested and run to
//! completion even if nobody awaits them.

use crate::backend::Backend;
use crate::document::Document;
use crate::error::{ModelError, ModelResult};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use pulse_sync::{OnUpdate, SubscriptionRegistry};
use pulse_types::{EntityId, Properties, PropertyBag, PropertyChange, Version};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

/// Property holding the server's update counter.
pub const UPDATE_COUNTER: &str = "v-s:updateCounter";

const EVENT_CAPACITY: usize = 64;

/// Lifecycle flags of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    pub is_new: bool,
    pub is_sync: bool,
    pub is_loaded: bool,
}

impl Lifecycle {
    /// Created locally, not on the backend yet.
    pub const NEW: Self = Self {
        is_new: true,
        is_sync: false,
        is_loaded: false,
    };

    /// Known to exist on the backend, contents not fetched.
    pub const UNLOADED: Self = Self {
        is_new: false,
        is_sync: false,
        is_loaded: false,
    };

    /// Matches the backend.
    pub const FRESH: Self = Self {
        is_new: false,
        is_sync: true,
        is_loaded: true,
    };
}

/// Deduplicated operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Load,
    Save,
    Reset,
    Remove,
}

/// Lifecycle notifications, see [`Entity::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityEvent {
    Loaded,
    Saved,
    Reset,
    Removed,
    Modified { key: String },
}

type PendingOp = Shared<BoxFuture<'static, ModelResult<()>>>;

/// Pending result of an entity operation. Resolves to the entity itself.
pub type Pending = BoxFuture<'static, ModelResult<Arc<Entity>>>;

/// Clears an in-flight slot when the operation task ends, however it ends.
struct Slot {
    entity: Weak<Entity>,
    kind: OpKind,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(entity) = self.entity.upgrade() {
            entity
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.kind);
        }
    }
}

/// A cached, observable copy of a server document.
pub struct Entity {
    id: EntityId,
    props: Mutex<PropertyBag>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    inflight: Mutex<HashMap<OpKind, PendingOp>>,
    backend: Arc<dyn Backend>,
    registry: Weak<SubscriptionRegistry>,
    events: broadcast::Sender<EntityEvent>,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

impl Entity {
    pub(crate) fn new(
        id: EntityId,
        lifecycle: Lifecycle,
        properties: Properties,
        backend: Arc<dyn Backend>,
        registry: Weak<SubscriptionRegistry>,
    ) -> Arc<Self> {
        let lifecycle = Arc::new(Mutex::new(lifecycle));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut props = PropertyBag::with_values(properties);
        let dirty = lifecycle.clone();
        let modified = events.clone();
        props.observe(Box::new(move |change: &PropertyChange<'_>| {
            dirty.lock().unwrap().is_sync = false;
            if let Some(key) = change.key() {
                let _ = modified.send(EntityEvent::Modified {
                    key: key.to_string(),
                });
            }
        }));

        Arc::new(Self {
            id,
            props: Mutex::new(props),
            lifecycle,
            inflight: Mutex::new(HashMap::new()),
            backend,
            registry,
            events,
        })
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Current lifecycle flags.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    pub fn is_new(&self) -> bool {
        self.lifecycle().is_new
    }

    pub fn is_sync(&self) -> bool {
        self.lifecycle().is_sync
    }

    pub fn is_loaded(&self) -> bool {
        self.lifecycle().is_loaded
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        *self.lifecycle.lock().unwrap() = lifecycle;
    }

    /// Receives lifecycle events emitted after this call.
    pub fn events(&self) -> broadcast::Receiver<EntityEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: EntityEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // ── Properties ───────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<Value> {
        self.props.lock().unwrap().get(key).cloned()
    }

    /// All values of `key`; arrays are flattened.
    pub fn values(&self, key: &str) -> Vec<Value> {
        self.props
            .lock()
            .unwrap()
            .values(key)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.props.lock().unwrap().set(key, value.into());
    }

    pub fn add_value(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.props.lock().unwrap().add_value(key, value.into());
    }

    pub fn remove_value(&self, key: &str, value: &Value) -> bool {
        self.props.lock().unwrap().remove_value(key, value)
    }

    pub fn clear(&self, key: &str) -> Option<Value> {
        self.props.lock().unwrap().clear(key)
    }

    pub fn has_value(&self, key: &str, value: &Value) -> bool {
        self.props.lock().unwrap().has_value(key, value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.props.lock().unwrap().keys().map(str::to_string).collect()
    }

    /// Copy of every property.
    pub fn properties(&self) -> Properties {
        self.props.lock().unwrap().snapshot()
    }

    /// The entity as a backend document.
    pub fn to_document(&self) -> Document {
        Document {
            id: self.id.clone(),
            properties: self.properties(),
        }
    }

    /// Server update counter, `0` if the property is absent.
    pub fn update_counter(&self) -> Version {
        self.props
            .lock()
            .unwrap()
            .first(UPDATE_COUNTER)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Replaces the contents with a document received out of band.
    pub(crate) fn replace(&self, properties: Properties) {
        self.props.lock().unwrap().replace_all(properties);
        self.set_lifecycle(Lifecycle::FRESH);
    }

    // ── Operations ───────────────────────────────────────────────

    /// Fetches the entity unless it is new, or already loaded and
    /// `use_cache` is set.
    pub fn load(self: &Arc<Self>, use_cache: bool) -> Pending {
        let state = self.lifecycle();
        if state.is_new || (state.is_loaded && use_cache) {
            return self.ready();
        }
        let op = self.single_flight(OpKind::Load, move |this| {
            this.fetch(use_cache, EntityEvent::Loaded)
        });
        self.resolve(op)
    }

    /// Refetches the entity bypassing every cache.
    pub fn reset(self: &Arc<Self>) -> Pending {
        if self.is_new() {
            return self.ready();
        }
        let op = self.single_flight(OpKind::Reset, |this| this.fetch(false, EntityEvent::Reset));
        self.resolve(op)
    }

    /// Stores the entity unless it is in sync.
    pub fn save(self: &Arc<Self>) -> Pending {
        if self.is_sync() {
            return self.ready();
        }
        let op = self.single_flight(OpKind::Save, |this| this.store());
        self.resolve(op)
    }

    /// Deletes the entity on the backend. The local copy becomes new.
    pub fn remove(self: &Arc<Self>) -> Pending {
        let op = self.single_flight(OpKind::Remove, |this| this.delete());
        self.resolve(op)
    }

    /// Whether an operation of `kind` is pending.
    pub fn is_in_flight(&self, kind: OpKind) -> bool {
        self.inflight.lock().unwrap().contains_key(&kind)
    }

    async fn fetch(self: Arc<Self>, use_cache: bool, event: EntityEvent) -> ModelResult<()> {
        let document = self.backend.get_individual(&self.id, use_cache).await?;
        if document.id != self.id {
            warn!("Backend answered {} with document {}", self.id, document.id);
        }
        self.props.lock().unwrap().replace_all(document.properties);
        self.set_lifecycle(Lifecycle::FRESH);
        debug!("{} fetched ({:?})", self.id, event);
        self.emit(event);
        Ok(())
    }

    async fn store(self: Arc<Self>) -> ModelResult<()> {
        let document = self.to_document();
        self.backend.put_individual(&document).await?;
        self.set_lifecycle(Lifecycle::FRESH);
        debug!("{} saved", self.id);
        self.emit(EntityEvent::Saved);
        Ok(())
    }

    async fn delete(self: Arc<Self>) -> ModelResult<()> {
        self.backend.remove_individual(&self.id).await?;
        self.set_lifecycle(Lifecycle::NEW);
        debug!("{} removed", self.id);
        self.emit(EntityEvent::Removed);
        Ok(())
    }

    fn ready(self: &Arc<Self>) -> Pending {
        future::ready(Ok(Arc::clone(self))).boxed()
    }

    fn resolve(self: &Arc<Self>, op: PendingOp) -> Pending {
        let this = Arc::clone(self);
        op.map(move |result| result.map(|()| this)).boxed()
    }

    /// Returns the in-flight operation of `kind`, or starts one.
    ///
    /// The slot is claimed under the lock before the task exists, and the
    /// task clears it before publishing the result, so a call made after
    /// settlement always starts fresh.
    fn single_flight<F, Fut>(self: &Arc<Self>, kind: OpKind, start: F) -> PendingOp
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = ModelResult<()>> + Send + 'static,
    {
        let (tx, pending) = {
            let mut inflight = self.inflight.lock().unwrap();
            if let Some(pending) = inflight.get(&kind) {
                debug!("Joining in-flight {:?} of {}", kind, self.id);
                return pending.clone();
            }
            let (tx, rx) = oneshot::channel::<ModelResult<()>>();
            let pending: PendingOp = rx
                .map(|settled| {
                    settled.unwrap_or_else(|_| {
                        Err(ModelError::Aborted(
                            "operation ended without a result".into(),
                        ))
                    })
                })
                .boxed()
                .shared();
            inflight.insert(kind, pending.clone());
            (tx, pending)
        };

        debug!("Starting {:?} of {}", kind, self.id);
        let slot = Slot {
            entity: Arc::downgrade(self),
            kind,
        };
        let op = start(Arc::clone(self));
        tokio::spawn(async move {
            let tx = tx;
            let slot = slot;
            let result = op.await;
            drop(slot);
            let _ = tx.send(result);
        });
        pending
    }

    // ── Subscription ─────────────────────────────────────────────

    /// Subscribes to server-side changes. Each change triggers [`reset`].
    ///
    /// The subscription holds the entity weakly and is dropped once the
    /// entity is reclaimed. Returns `false` if already subscribed or the
    /// store is gone.
    ///
    /// [`reset`]: Entity::reset
    pub fn subscribe(self: &Arc<Self>) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            warn!("Cannot subscribe {}: store is gone", self.id);
            return false;
        };
        let version = self.update_counter();
        let entity = Arc::downgrade(self);
        let on_update: OnUpdate = Arc::new(move |id: &EntityId, version: Version| {
            let Some(entity) = entity.upgrade() else {
                return;
            };
            debug!("{} changed on server (version {}), resetting", id, version);
            let reset = entity.reset();
            tokio::spawn(async move {
                if let Err(e) = reset.await {
                    warn!("Reset of {} after invalidation failed: {}", entity.id, e);
                }
            });
        });
        registry.subscribe(self, self.id.clone(), version, on_update)
    }

    /// Drops the subscription. Returns `false` if there was none.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unsubscribe(&self.id))
    }

    pub fn is_subscribed(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.is_subscribed(&self.id))
    }
}
