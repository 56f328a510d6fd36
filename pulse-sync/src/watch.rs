//! Reachability watches.
//!
//! A [`ReachabilityWatch`] is told about an object through a [`Weak`] handle
//! and runs a callback some time after the last strong reference to it is
//! gone. The watch never keeps the object alive, and it gives no promise
//! about *when* the callback runs. Code that needs deterministic cleanup
//! must unsubscribe explicitly.

use pulse_types::EntityId;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::debug;

/// Callback run once the watched object is unreachable.
pub type OnUnreachable = Box<dyn FnOnce() + Send>;

/// Weak handle to any shareable object.
pub type WeakTarget = Weak<dyn Any + Send + Sync>;

/// Notifies interested parties once an object has been reclaimed.
pub trait ReachabilityWatch: Send + Sync {
    /// Whether callbacks ever fire. When `false` the owner has to
    /// unsubscribe by hand.
    fn is_supported(&self) -> bool {
        true
    }

    /// Watches `target` under `token`, replacing any earlier watch with the
    /// same token.
    fn watch(&self, token: EntityId, target: WeakTarget, on_unreachable: OnUnreachable);

    /// Cancels the watch registered under `token`.
    fn unwatch(&self, token: &EntityId);
}

struct Watched {
    target: WeakTarget,
    on_unreachable: OnUnreachable,
}

type WatchMap = Mutex<HashMap<EntityId, Watched>>;

/// Removes every entry whose target is gone and runs its callback.
/// Callbacks run after the map lock is released so they may re-enter.
fn sweep_map(entries: &WatchMap) -> usize {
    let dead: Vec<(EntityId, Watched)> = {
        let mut entries = entries.lock().unwrap();
        let ids: Vec<EntityId> = entries
            .iter()
            .filter(|(_, w)| w.target.strong_count() == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| entries.remove(&id).map(|w| (id, w)))
            .collect()
    };

    let count = dead.len();
    for (id, watched) in dead {
        debug!("{} is unreachable, running cleanup", id);
        (watched.on_unreachable)();
    }
    count
}

/// Watch backed by a periodic sweep task.
///
/// Every `interval` the task checks all watched handles and fires the
/// callbacks of the dead ones, so cleanup lags reclamation by up to one
/// interval. The task ends when the watch is dropped.
pub struct SweepWatch {
    entries: Arc<WatchMap>,
}

impl SweepWatch {
    /// Default sweep period.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

    /// Creates the watch and spawns its sweep task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(interval: Duration) -> Self {
        let entries: Arc<WatchMap> = Arc::new(Mutex::new(HashMap::new()));
        let weak = Arc::downgrade(&entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(entries) = weak.upgrade() else {
                    break;
                };
                sweep_map(&entries);
            }
        });
        Self { entries }
    }

    /// Runs a sweep now. Returns how many callbacks fired.
    pub fn sweep(&self) -> usize {
        sweep_map(&self.entries)
    }

    /// Number of live watches.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReachabilityWatch for SweepWatch {
    fn watch(&self, token: EntityId, target: WeakTarget, on_unreachable: OnUnreachable) {
        self.entries.lock().unwrap().insert(
            token,
            Watched {
                target,
                on_unreachable,
            },
        );
    }

    fn unwatch(&self, token: &EntityId) {
        self.entries.lock().unwrap().remove(token);
    }
}

/// Fallback for hosts without reachability tracking. Never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualWatch;

impl ReachabilityWatch for ManualWatch {
    fn is_supported(&self) -> bool {
        false
    }

    fn watch(&self, token: EntityId, _target: WeakTarget, _on_unreachable: OnUnreachable) {
        debug!("Reachability tracking unavailable, {} needs explicit unsubscribe", token);
    }

    fn unwatch(&self, _token: &EntityId) {}
}

/// A controllable watch for testing.
pub mod mock {
    use super::*;

    /// Watch whose callbacks fire only when the test says so.
    #[derive(Clone, Default)]
    pub struct FakeWatch {
        entries: Arc<WatchMap>,
    }

    impl FakeWatch {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulates reclamation of the object watched under `token`,
        /// regardless of whether it is still referenced. Returns whether a
        /// watch was registered.
        pub fn collect(&self, token: &EntityId) -> bool {
            let watched = self.entries.lock().unwrap().remove(token);
            match watched {
                Some(watched) => {
                    (watched.on_unreachable)();
                    true
                }
                None => false,
            }
        }

        /// Simulates a collection cycle: fires for every dropped target.
        pub fn collect_unreachable(&self) -> usize {
            sweep_map(&self.entries)
        }

        /// Whether a watch is registered under `token`.
        pub fn is_watching(&self, token: &EntityId) -> bool {
            self.entries.lock().unwrap().contains_key(token)
        }

        /// Number of registered watches.
        pub fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl ReachabilityWatch for FakeWatch {
        fn watch(&self, token: EntityId, target: WeakTarget, on_unreachable: OnUnreachable) {
            self.entries.lock().unwrap().insert(
                token,
                Watched {
                    target,
                    on_unreachable,
                },
            );
        }

        fn unwatch(&self, token: &EntityId) {
            self.entries.lock().unwrap().remove(token);
        }
    }
}
