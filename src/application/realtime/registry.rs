//! Topic registry - subscriber bookkeeping and dispatch.
//!
//! Maps each topic to its subscribers in registration order.
//!
//! # Dispatch and disposal
//!
//! `dispatch` snapshots the subscriber list under the lock and invokes the
//! callbacks after releasing it, so a callback may itself subscribe or
//! dispose without deadlocking. Each subscription carries an `active` flag:
//! - disposed before the snapshot: not in the snapshot, never invoked
//! - disposed during iteration: skipped if not yet reached, otherwise its
//!   current invocation runs to completion

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;

use crate::domain::foundation::{Generation, SubscriptionId};
use crate::domain::realtime::{Message, RealtimeError, Topic};

/// Subscriber callback. Invoked synchronously on the dispatch path.
pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    callback: Callback,
    generation_registered: Generation,
    active: AtomicBool,
}

#[derive(Default)]
struct RegistryState {
    by_topic: HashMap<Topic, Vec<Arc<Subscription>>>,
    index: HashMap<SubscriptionId, Topic>,
    closed: bool,
}

struct Shared {
    state: Mutex<RegistryState>,
    generation: AtomicU64,
    topics_changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panicking callback never runs under this lock, so the state is consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: &SubscriptionId) -> bool {
        let mut state = self.lock();
        let Some(topic) = state.index.remove(id) else {
            return false;
        };

        let mut topic_emptied = false;
        if let Some(subscribers) = state.by_topic.get_mut(&topic) {
            if let Some(pos) = subscribers.iter().position(|s| s.id == *id) {
                let removed = subscribers.remove(pos);
                removed.active.store(false, Ordering::SeqCst);
            }
            topic_emptied = subscribers.is_empty();
        }
        if topic_emptied {
            state.by_topic.remove(&topic);
            drop(state);
            self.topics_changed.notify_one();
        }
        true
    }
}

/// Registry of topic subscriptions for one client.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct TopicRegistry {
    shared: Arc<Shared>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::default()),
                generation: AtomicU64::new(Generation::INITIAL.as_u64()),
                topics_changed: Notify::new(),
            }),
        }
    }

    /// Registers `callback` under `topic`.
    ///
    /// # Errors
    ///
    /// - `Subscription(EmptyTopic)` if `topic` is empty
    /// - `ClientClosed` if the registry has been closed
    pub fn subscribe(&self, topic: &str, callback: Callback) -> Result<SubscriptionHandle, RealtimeError> {
        let topic = Topic::new(topic)?;
        let subscription = Arc::new(Subscription {
            id: SubscriptionId::new(),
            topic: topic.clone(),
            callback,
            generation_registered: self.generation(),
            active: AtomicBool::new(true),
        });
        let id = subscription.id;

        let mut state = self.shared.lock();
        if state.closed {
            return Err(RealtimeError::ClientClosed);
        }
        state.index.insert(id, topic.clone());
        let subscribers = state.by_topic.entry(topic.clone()).or_default();
        let is_new_topic = subscribers.is_empty();
        subscribers.push(subscription);
        drop(state);

        if is_new_topic {
            self.shared.topics_changed.notify_one();
        }
        tracing::debug!(subscription_id = %id, topic = %topic, "Subscription registered");

        Ok(SubscriptionHandle {
            id,
            topic,
            registry: Arc::downgrade(&self.shared),
        })
    }

    /// Delivers `message` to every subscriber of its topic.
    ///
    /// Returns the number of callbacks invoked. Unknown topics are ignored.
    /// A panicking callback is logged and does not stop the others.
    pub fn dispatch(&self, message: &Message) -> usize {
        let snapshot: Vec<Arc<Subscription>> = {
            let state = self.shared.lock();
            if state.closed {
                return 0;
            }
            match state.by_topic.get(message.topic.as_str()) {
                Some(subscribers) => subscribers.clone(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for subscription in snapshot {
            if !subscription.active.load(Ordering::SeqCst) {
                continue;
            }
            let callback = &subscription.callback;
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!(
                    subscription_id = %subscription.id,
                    topic = %subscription.topic,
                    registered_generation = %subscription.generation_registered,
                    "Subscriber callback panicked"
                ),
            }
        }
        delivered
    }

    /// Disposes every subscription and rejects further registrations.
    ///
    /// Returns the number of subscriptions disposed. Idempotent.
    pub fn close(&self) -> usize {
        let mut state = self.shared.lock();
        if state.closed {
            return 0;
        }
        state.closed = true;
        let disposed = state.index.len();
        for subscription in state.by_topic.values().flatten() {
            subscription.active.store(false, Ordering::SeqCst);
        }
        state.by_topic.clear();
        state.index.clear();
        disposed
    }

    /// Returns true once [`TopicRegistry::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Sorted set of topics with at least one live subscription.
    pub fn topics(&self) -> Vec<Topic> {
        let state = self.shared.lock();
        state
            .by_topic
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of live subscriptions across all topics.
    pub fn subscription_count(&self) -> usize {
        self.shared.lock().index.len()
    }

    /// Number of live subscriptions for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .lock()
            .by_topic
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Generation stamped onto new subscriptions.
    pub fn generation(&self) -> Generation {
        Generation::from_u64(self.shared.generation.load(Ordering::SeqCst))
    }

    pub(crate) fn set_generation(&self, generation: Generation) {
        self.shared.generation.store(generation.as_u64(), Ordering::SeqCst);
    }

    /// Resolves after the topic set gained or lost a topic.
    ///
    /// A change that happens while nobody is waiting is remembered for the
    /// next waiter.
    pub(crate) async fn topics_changed(&self) {
        self.shared.topics_changed.notified().await;
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposable handle for one registration.
///
/// Clones refer to the same registration; disposing any of them disposes it
/// once and later calls are no-ops.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: Topic,
    registry: Weak<Shared>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Removes exactly this registration. Safe to call any number of times.
    pub fn dispose(&self) {
        if let Some(shared) = self.registry.upgrade() {
            if shared.remove(&self.id) {
                tracing::debug!(subscription_id = %self.id, topic = %self.topic, "Subscription disposed");
            }
        }
    }

    /// Returns true while the registration is live.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map(|shared| shared.lock().index.contains_key(&self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn message(topic: &str) -> Message {
        Message::new(Topic::new(topic).unwrap(), json!({"n": 1}), Generation::INITIAL)
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Callback {
        let log = log.clone();
        let label = label.to_string();
        Arc::new(move |_msg: &Message| log.lock().unwrap().push(label.clone()))
    }

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let callback: Callback = Arc::new(move |_msg: &Message| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn dispatch_invokes_subscribers_in_registration_order() {
        let registry = TopicRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.subscribe("health", recording(&log, "a")).unwrap();
        registry.subscribe("health", recording(&log, "b")).unwrap();
        registry.subscribe("health", recording(&log, "c")).unwrap();

        assert_eq!(registry.dispatch(&message("health")), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn dispatch_only_reaches_matching_topic() {
        let registry = TopicRegistry::new();
        let (health, health_cb) = counter();
        let (metrics, metrics_cb) = counter();
        registry.subscribe("health", health_cb).unwrap();
        registry.subscribe("metrics", metrics_cb).unwrap();

        registry.dispatch(&message("health"));

        assert_eq!(health.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_topic_is_ignored() {
        let registry = TopicRegistry::new();
        assert_eq!(registry.dispatch(&message("payroll")), 0);
    }

    #[test]
    fn empty_topic_is_rejected_synchronously() {
        let registry = TopicRegistry::new();
        let (_, cb) = counter();
        let err = registry.subscribe("", cb).unwrap_err();
        assert_eq!(err, RealtimeError::Subscription(crate::domain::realtime::SubscriptionError::EmptyTopic));
        assert_eq!(registry.subscription_count(), 0);
    }

    #[test]
    fn dispose_removes_only_that_registration_and_is_idempotent() {
        let registry = TopicRegistry::new();
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();
        let handle = registry.subscribe("health", first_cb).unwrap();
        registry.subscribe("health", second_cb).unwrap();

        handle.dispose();
        handle.dispose();
        handle.clone().dispose();
        registry.dispatch(&message("health"));

        assert!(!handle.is_active());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.subscriber_count("health"), 1);
    }

    #[test]
    fn subscriber_disposed_mid_dispatch_is_skipped() {
        let registry = TopicRegistry::new();
        let (late, late_cb) = counter();
        let victim: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

        let v = victim.clone();
        registry
            .subscribe(
                "health",
                Arc::new(move |_msg: &Message| {
                    if let Some(handle) = v.lock().unwrap().as_ref() {
                        handle.dispose();
                    }
                }),
            )
            .unwrap();
        let handle = registry.subscribe("health", late_cb).unwrap();
        *victim.lock().unwrap() = Some(handle);

        assert_eq!(registry.dispatch(&message("health")), 1);
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_may_subscribe_during_dispatch() {
        let registry = TopicRegistry::new();
        let inner = registry.clone();
        registry
            .subscribe(
                "health",
                Arc::new(move |_msg: &Message| {
                    let _ = inner.subscribe("metrics", Arc::new(|_msg: &Message| {}));
                }),
            )
            .unwrap();

        registry.dispatch(&message("health"));
        assert_eq!(registry.subscriber_count("metrics"), 1);
    }

    #[test]
    fn panicking_callback_does_not_stop_others() {
        let registry = TopicRegistry::new();
        let (after, after_cb) = counter();
        registry
            .subscribe("health", Arc::new(|_msg: &Message| panic!("subscriber bug")))
            .unwrap();
        registry.subscribe("health", after_cb).unwrap();

        assert_eq!(registry.dispatch(&message("health")), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_disposes_everything_and_rejects_new_subscriptions() {
        let registry = TopicRegistry::new();
        let (count, cb) = counter();
        let handle = registry.subscribe("health", cb.clone()).unwrap();

        assert_eq!(registry.close(), 1);
        assert_eq!(registry.close(), 0);
        assert!(registry.is_closed());
        assert!(!handle.is_active());
        handle.dispose();
        assert_eq!(registry.dispatch(&message("health")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.subscribe("health", cb).unwrap_err(), RealtimeError::ClientClosed);
    }

    #[test]
    fn topics_are_sorted_and_track_last_subscriber() {
        let registry = TopicRegistry::new();
        let (_, cb) = counter();
        let m = registry.subscribe("metrics", cb.clone()).unwrap();
        registry.subscribe("health", cb.clone()).unwrap();
        let m2 = registry.subscribe("metrics", cb).unwrap();

        let names: Vec<String> = registry.topics().iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["health", "metrics"]);

        m.dispose();
        assert_eq!(registry.topics().len(), 2);
        m2.dispose();
        assert_eq!(registry.topics().len(), 1);
    }

    #[test]
    fn subscriptions_record_registration_generation() {
        let registry = TopicRegistry::new();
        registry.set_generation(Generation::from_u64(4));
        assert_eq!(registry.generation().as_u64(), 4);
    }

    #[tokio::test]
    async fn new_topic_signals_change() {
        let registry = TopicRegistry::new();
        let (_, cb) = counter();
        registry.subscribe("health", cb).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), registry.topics_changed())
            .await
            .expect("topic change should have been signalled");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(usize),
        Dispose(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0usize..3).prop_map(Op::Subscribe), (0usize..16).prop_map(Op::Dispose)]
    }

    const TOPICS: [&str; 3] = ["health", "metrics", "queue"];

    proptest! {
        #[test]
        fn dispatch_reaches_exactly_the_live_subscribers(ops in proptest::collection::vec(op(), 0..40), target in 0usize..3) {
            let registry = TopicRegistry::new();
            let hits: Arc<Mutex<Vec<SubscriptionId>>> = Arc::new(Mutex::new(Vec::new()));
            let mut handles: Vec<SubscriptionHandle> = Vec::new();
            let mut live: HashSet<SubscriptionId> = HashSet::new();

            for op in ops {
                match op {
                    Op::Subscribe(t) => {
                        let hits = hits.clone();
                        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
                        let s = slot.clone();
                        let handle = registry.subscribe(TOPICS[t], Arc::new(move |_msg: &Message| {
                            if let Some(id) = *s.lock().unwrap() {
                                hits.lock().unwrap().push(id);
                            }
                        })).unwrap();
                        *slot.lock().unwrap() = Some(handle.id());
                        live.insert(handle.id());
                        handles.push(handle);
                    }
                    Op::Dispose(i) => {
                        if let Some(handle) = handles.get(i) {
                            handle.dispose();
                            live.remove(&handle.id());
                        }
                    }
                }
            }

            let expected: Vec<SubscriptionId> = handles
                .iter()
                .filter(|h| h.topic().as_str() == TOPICS[target] && live.contains(&h.id()))
                .map(|h| h.id())
                .collect();

            let delivered = registry.dispatch(&message(TOPICS[target]));
            prop_assert_eq!(delivered, expected.len());
            prop_assert_eq!(hits.lock().unwrap().clone(), expected);
        }
    }
}
