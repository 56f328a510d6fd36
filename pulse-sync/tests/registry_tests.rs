use pretty_assertions::assert_eq;
use pulse_sync::watch::mock::FakeWatch;
use pulse_sync::{
    FrameHandler, ManualWatch, OnUnreachable, OnUpdate, Outbox, ReachabilityWatch,
    SubscriptionRegistry, WeakTarget,
};
use pulse_types::{EntityId, Version};
use std::sync::{Arc, Mutex};

struct Owner;

type Calls = Arc<Mutex<Vec<(String, Version)>>>;

fn recording() -> (OnUpdate, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let on_update: OnUpdate = Arc::new(move |id: &EntityId, version: Version| {
        sink.lock().unwrap().push((id.to_string(), version));
    });
    (on_update, calls)
}

fn setup() -> (Arc<SubscriptionRegistry>, Arc<Outbox>, FakeWatch) {
    let outbox = Arc::new(Outbox::new());
    let watch = FakeWatch::new();
    let registry = SubscriptionRegistry::new(outbox.clone(), Arc::new(watch.clone()));
    (registry, outbox, watch)
}

fn id(s: &str) -> EntityId {
    EntityId::new(s)
}

/// Keeps every registered callback, even after a re-watch of the same
/// token, so a callback can fire after its watch was replaced.
#[derive(Default)]
struct LateWatch {
    fired: Mutex<Vec<(EntityId, OnUnreachable)>>,
}

impl LateWatch {
    fn fire_oldest(&self) {
        let (_, on_unreachable) = self.fired.lock().unwrap().remove(0);
        on_unreachable();
    }
}

impl ReachabilityWatch for LateWatch {
    fn watch(&self, token: EntityId, _target: WeakTarget, on_unreachable: OnUnreachable) {
        self.fired.lock().unwrap().push((token, on_unreachable));
    }

    fn unwatch(&self, _token: &EntityId) {}
}

// ── Subscribe ────────────────────────────────────────────────────

#[test]
fn subscribe_queues_fragment() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, _) = recording();

    assert!(registry.subscribe(&owner, id("ex:1"), 0, on_update));
    assert_eq!(outbox.pending(), vec!["+ex:1=0"]);
    assert!(registry.is_subscribed(&id("ex:1")));
    assert_eq!(registry.last_version(&id("ex:1")), Some(0));
}

#[test]
fn subscribe_twice_is_noop() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let (first, _) = recording();
    let (second, _) = recording();

    assert!(registry.subscribe(&owner, id("ex:1"), 0, first));
    assert!(!registry.subscribe(&owner, id("ex:1"), 4, second));
    assert_eq!(outbox.pending(), vec!["+ex:1=0"]);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.last_version(&id("ex:1")), Some(0));
}

#[test]
fn second_live_owner_cannot_take_over() {
    let (registry, outbox, _) = setup();
    let first = Arc::new(Owner);
    let second = Arc::new(Owner);
    let (a, _) = recording();
    let (b, _) = recording();

    assert!(registry.subscribe(&first, id("ex:1"), 0, a));
    assert!(!registry.subscribe(&second, id("ex:1"), 2, b));
    assert_eq!(outbox.pending(), vec!["+ex:1=0"]);
}

#[test]
fn subscribe_many() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    for (i, name) in ["ex:1", "ex:2", "ex:3"].iter().enumerate() {
        let (on_update, _) = recording();
        registry.subscribe(&owner, id(name), i as Version, on_update);
    }

    let mut ids: Vec<String> = registry
        .subscribed_ids()
        .iter()
        .map(ToString::to_string)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["ex:1", "ex:2", "ex:3"]);
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "+ex:2=1", "+ex:3=2"]);
}

// ── Unsubscribe ──────────────────────────────────────────────────

#[test]
fn unsubscribe_queues_fragment() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, _) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);

    assert!(registry.unsubscribe(&id("ex:1")));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "-ex:1"]);
    assert!(!registry.is_subscribed(&id("ex:1")));
    assert!(registry.is_empty());
}

#[test]
fn unsubscribe_unknown_is_noop() {
    let (registry, outbox, _) = setup();
    assert!(!registry.unsubscribe(&id("ex:1")));
    assert!(outbox.is_empty());
}

#[test]
fn unsubscribe_cancels_watch() {
    let (registry, _, watch) = setup();
    let owner = Arc::new(Owner);
    let (on_update, _) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);
    assert!(watch.is_watching(&id("ex:1")));

    registry.unsubscribe(&id("ex:1"));
    assert!(!watch.is_watching(&id("ex:1")));
    assert!(!watch.collect(&id("ex:1")));
}

#[test]
fn resubscribe_after_unsubscribe() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let (a, _) = recording();
    let (b, _) = recording();

    registry.subscribe(&owner, id("ex:1"), 0, a);
    registry.unsubscribe(&id("ex:1"));
    assert!(registry.subscribe(&owner, id("ex:1"), 3, b));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "-ex:1", "+ex:1=3"]);
}

// ── Dispatch ─────────────────────────────────────────────────────

#[test]
fn dispatch_invokes_callback() {
    let (registry, _, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, calls) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);

    registry.dispatch("ex:1=5");
    assert_eq!(*calls.lock().unwrap(), vec![("ex:1".to_string(), 5)]);
    assert_eq!(registry.last_version(&id("ex:1")), Some(5));
}

#[test]
fn dispatch_with_leading_equals() {
    let (registry, _, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, calls) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);

    registry.dispatch("=ex:1=5");
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[test]
fn dispatch_every_pair() {
    let (registry, _, _) = setup();
    let owner = Arc::new(Owner);
    let (a, calls_a) = recording();
    let (b, calls_b) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, a);
    registry.subscribe(&owner, id("ex:2"), 0, b);

    registry.dispatch("ex:1=5,ex:2=3");
    assert_eq!(*calls_a.lock().unwrap(), vec![("ex:1".to_string(), 5)]);
    assert_eq!(*calls_b.lock().unwrap(), vec![("ex:2".to_string(), 3)]);
}

#[test]
fn last_version_keeps_maximum() {
    let (registry, _, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, calls) = recording();
    registry.subscribe(&owner, id("ex:1"), 2, on_update);

    registry.dispatch("ex:1=7");
    registry.dispatch("ex:1=4");
    assert_eq!(registry.last_version(&id("ex:1")), Some(7));
    // Older versions still invalidate.
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[test]
fn empty_frame_is_ignored() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, calls) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);
    outbox.drain();

    registry.dispatch("");
    registry.dispatch("=");
    assert!(calls.lock().unwrap().is_empty());
    assert!(outbox.is_empty());
}

#[test]
fn update_for_unknown_id_unsubscribes() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, calls) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);
    outbox.drain();

    registry.dispatch("ex:2=3");
    assert_eq!(outbox.pending(), vec!["-ex:2"]);
    assert!(calls.lock().unwrap().is_empty());
    assert!(!registry.is_subscribed(&id("ex:2")));
}

#[test]
fn update_after_unsubscribe_is_not_delivered() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, calls) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);
    registry.unsubscribe(&id("ex:1"));
    outbox.drain();

    registry.dispatch("ex:1=6");
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(outbox.pending(), vec!["-ex:1"]);
}

#[test]
fn malformed_version_for_subscribed_id_is_skipped() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, calls) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);
    outbox.drain();

    registry.dispatch("ex:1=abc");
    assert!(calls.lock().unwrap().is_empty());
    assert!(registry.is_subscribed(&id("ex:1")));
    assert!(outbox.is_empty());
}

#[test]
fn malformed_version_for_unknown_id_unsubscribes() {
    let (registry, outbox, _) = setup();
    registry.dispatch("ex:9=abc");
    assert_eq!(outbox.pending(), vec!["-ex:9"]);
}

#[test]
fn callback_may_unsubscribe() {
    let (registry, outbox, _) = setup();
    let owner = Arc::new(Owner);
    let weak = Arc::downgrade(&registry);
    let on_update: OnUpdate = Arc::new(move |id: &EntityId, _| {
        if let Some(registry) = weak.upgrade() {
            registry.unsubscribe(id);
        }
    });
    registry.subscribe(&owner, id("ex:1"), 0, on_update);

    registry.dispatch("ex:1=1");
    assert!(!registry.is_subscribed(&id("ex:1")));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "-ex:1"]);
}

#[test]
fn frame_handler_dispatches() {
    let (registry, _, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, calls) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);

    let handler: &dyn FrameHandler = &*registry;
    handler.on_frame("ex:1=2");
    assert_eq!(calls.lock().unwrap().len(), 1);
}

// ── Reachability ─────────────────────────────────────────────────

#[test]
fn collected_owner_is_unsubscribed() {
    let (registry, outbox, watch) = setup();
    let owner = Arc::new(Owner);
    let (on_update, _) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);

    assert!(watch.collect(&id("ex:1")));
    assert!(!registry.is_subscribed(&id("ex:1")));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "-ex:1"]);
}

#[test]
fn dropped_owner_is_unsubscribed_on_collection() {
    let (registry, outbox, watch) = setup();
    let kept = Arc::new(Owner);
    let dropped = Arc::new(Owner);
    let (a, _) = recording();
    let (b, _) = recording();
    registry.subscribe(&kept, id("ex:1"), 0, a);
    registry.subscribe(&dropped, id("ex:2"), 0, b);
    outbox.drain();

    drop(dropped);
    assert_eq!(watch.collect_unreachable(), 1);
    assert!(registry.is_subscribed(&id("ex:1")));
    assert!(!registry.is_subscribed(&id("ex:2")));
    assert_eq!(outbox.pending(), vec!["-ex:2"]);
}

#[test]
fn registry_does_not_keep_owner_alive() {
    let (registry, _, _) = setup();
    let owner = Arc::new(Owner);
    let (on_update, _) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);

    let weak = Arc::downgrade(&owner);
    drop(owner);
    assert!(weak.upgrade().is_none());
}

#[test]
fn manual_watch_keeps_subscription() {
    let outbox = Arc::new(Outbox::new());
    let registry = SubscriptionRegistry::new(outbox.clone(), Arc::new(ManualWatch));
    assert!(!registry.watch_supported());

    let owner = Arc::new(Owner);
    let (on_update, _) = recording();
    registry.subscribe(&owner, id("ex:1"), 0, on_update);
    drop(owner);

    assert!(registry.is_subscribed(&id("ex:1")));
    assert!(registry.unsubscribe(&id("ex:1")));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "-ex:1"]);
}

#[test]
fn resubscribe_replaces_record_of_dropped_owner() {
    let (registry, outbox, watch) = setup();
    let first = Arc::new(Owner);
    let (stale, stale_calls) = recording();
    registry.subscribe(&first, id("ex:1"), 0, stale);
    drop(first);

    let second = Arc::new(Owner);
    let (live, live_calls) = recording();
    assert!(registry.subscribe(&second, id("ex:1"), 3, live));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "+ex:1=3"]);
    assert_eq!(registry.last_version(&id("ex:1")), Some(3));

    registry.dispatch("ex:1=5");
    assert!(stale_calls.lock().unwrap().is_empty());
    assert_eq!(*live_calls.lock().unwrap(), vec![("ex:1".to_string(), 5)]);

    // The replaced watch is gone; the live owner keeps its subscription.
    assert_eq!(watch.collect_unreachable(), 0);
    assert!(watch.is_watching(&id("ex:1")));
    assert!(registry.is_subscribed(&id("ex:1")));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "+ex:1=3"]);
}

#[test]
fn late_watch_of_replaced_owner_is_ignored() {
    let outbox = Arc::new(Outbox::new());
    let watch = Arc::new(LateWatch::default());
    let registry = SubscriptionRegistry::new(outbox.clone(), watch.clone());

    let first = Arc::new(Owner);
    let (a, _) = recording();
    registry.subscribe(&first, id("ex:1"), 0, a);
    drop(first);
    let second = Arc::new(Owner);
    let (b, _) = recording();
    assert!(registry.subscribe(&second, id("ex:1"), 0, b));

    watch.fire_oldest();
    assert!(registry.is_subscribed(&id("ex:1")));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "+ex:1=0"]);

    // The second owner's own watch still works.
    drop(second);
    watch.fire_oldest();
    assert!(!registry.is_subscribed(&id("ex:1")));
    assert_eq!(outbox.pending(), vec!["+ex:1=0", "+ex:1=0", "-ex:1"]);
}

#[test]
fn manual_watch_lets_new_owner_replace_dropped_one() {
    let outbox = Arc::new(Outbox::new());
    let registry = SubscriptionRegistry::new(outbox.clone(), Arc::new(ManualWatch));

    let first = Arc::new(Owner);
    let (a, _) = recording();
    registry.subscribe(&first, id("ex:1"), 0, a);
    drop(first);

    let second = Arc::new(Owner);
    let (b, calls) = recording();
    assert!(registry.subscribe(&second, id("ex:1"), 1, b));
    registry.dispatch("ex:1=2");
    assert_eq!(*calls.lock().unwrap(), vec![("ex:1".to_string(), 2)]);
}

#[test]
fn fake_watch_is_supported() {
    let (registry, _, _) = setup();
    assert!(registry.watch_supported());
}
