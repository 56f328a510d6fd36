//! Subscription registry.
//!
//! Tracks which entities want change notifications and bridges that interest
//! to the push channel:
//! - `subscribe` stores a record, watches the owner's reachability and queues
//!   `+id=version`;
//! - `unsubscribe` drops the record and queues `-id`;
//! - inbound frames invoke the matching record's callback. Updates for ids
//!   without a record are answered with `-id` so the server forgets
//!   subscriptions we no longer hold.
//!
//! At most one record exists per id. Subscribing again is a no-op while the
//! record's owner is alive; a record whose owner has been reclaimed is
//! replaced by the next subscriber.

use crate::channel::{FrameHandler, Outbox};
use crate::protocol::{decode_frame, Fragment, InboundPair, Notification};
use crate::watch::{ReachabilityWatch, WeakTarget};
use pulse_types::{EntityId, Version};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// Invalidation callback, invoked with the id and its new server version.
pub type OnUpdate = Arc<dyn Fn(&EntityId, Version) + Send + Sync>;

struct Record {
    owner: WeakTarget,
    last_version: Version,
    on_update: OnUpdate,
}

/// Map from entity id to subscription record.
pub struct SubscriptionRegistry {
    records: Mutex<HashMap<EntityId, Record>>,
    outbox: Arc<Outbox>,
    watch: Arc<dyn ReachabilityWatch>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .field("watch_supported", &self.watch.is_supported())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates a registry that queues its traffic on `outbox`.
    pub fn new(outbox: Arc<Outbox>, watch: Arc<dyn ReachabilityWatch>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            outbox,
            watch,
        })
    }

    /// Subscribes `id` on behalf of `owner`.
    ///
    /// The registry keeps only a weak handle to `owner`; once it has been
    /// reclaimed the subscription is dropped automatically (if the watch
    /// supports it). Returns `false` if `id` is already subscribed by a live
    /// owner.
    pub fn subscribe<T: Any + Send + Sync>(
        self: &Arc<Self>,
        owner: &Arc<T>,
        id: EntityId,
        version: Version,
        on_update: OnUpdate,
    ) -> bool {
        let weak: Weak<T> = Arc::downgrade(owner);
        let target: WeakTarget = weak;
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get(&id) {
            if record.owner.strong_count() > 0 {
                return false;
            }
            debug!("Previous owner of {} is gone, taking over its subscription", id);
        }
        records.insert(
            id.clone(),
            Record {
                owner: target.clone(),
                last_version: version,
                on_update,
            },
        );

        let registry = Arc::downgrade(self);
        let token = id.clone();
        let watched = target.clone();
        self.watch.watch(
            id.clone(),
            target,
            Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.release(&token, &watched);
                }
            }),
        );

        debug!("Subscribing {} at version {}", id, version);
        self.outbox.push(Fragment::subscribe(id, version).to_string());
        true
    }

    /// Drops the subscription for `id`. Returns `false` if there was none.
    pub fn unsubscribe(&self, id: &EntityId) -> bool {
        let mut records = self.records.lock().unwrap();
        if records.remove(id).is_none() {
            return false;
        }
        self.watch.unwatch(id);
        debug!("Unsubscribing {}", id);
        self.outbox.push(Fragment::unsubscribe(id.clone()).to_string());
        true
    }

    /// Drops the subscription for `id` if it still belongs to `owner`.
    /// A watch firing late for a replaced owner leaves the new record alone.
    fn release(&self, id: &EntityId, owner: &WeakTarget) {
        let mut records = self.records.lock().unwrap();
        if !records
            .get(id)
            .is_some_and(|record| Weak::ptr_eq(&record.owner, owner))
        {
            return;
        }
        records.remove(id);
        debug!("Dropping subscription of reclaimed {}", id);
        self.outbox.push(Fragment::unsubscribe(id.clone()).to_string());
    }

    /// Handles one inbound frame.
    pub fn dispatch(&self, frame: &str) {
        let pairs = decode_frame(frame);
        if pairs.is_empty() {
            return;
        }

        let mut due: Vec<(OnUpdate, Notification)> = Vec::new();
        {
            let mut records = self.records.lock().unwrap();
            for pair in pairs {
                let id = pair.id().clone();
                match (records.get_mut(&id), pair) {
                    (Some(record), InboundPair::Update(n)) => {
                        record.last_version = record.last_version.max(n.version);
                        due.push((record.on_update.clone(), n));
                    }
                    (Some(_), InboundPair::Malformed { reason, .. }) => {
                        warn!("Ignoring malformed update for {}: {}", id, reason);
                    }
                    (None, _) => {
                        warn!("Update for unsubscribed {}, unsubscribing", id);
                        self.outbox.push(Fragment::unsubscribe(id).to_string());
                    }
                }
            }
        }

        for (on_update, n) in due {
            on_update(&n.id, n.version);
        }
    }

    /// Whether `id` has a subscription record.
    pub fn is_subscribed(&self, id: &EntityId) -> bool {
        self.records.lock().unwrap().contains_key(id)
    }

    /// Highest version seen for `id`, if subscribed.
    pub fn last_version(&self, id: &EntityId) -> Option<Version> {
        self.records.lock().unwrap().get(id).map(|r| r.last_version)
    }

    /// Subscribed ids, in no particular order.
    pub fn subscribed_ids(&self) -> Vec<EntityId> {
        self.records.lock().unwrap().keys().cloned().collect()
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Whether there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether subscriptions are dropped automatically on reclamation.
    pub fn watch_supported(&self) -> bool {
        self.watch.is_supported()
    }
}

impl FrameHandler for SubscriptionRegistry {
    fn on_frame(&self, frame: &str) {
        self.dispatch(frame);
    }
}
