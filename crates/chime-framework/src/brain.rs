//! The brain: private key/value data plus the user registry.
//!
//! The brain never touches storage itself. It publishes on the robot's bus
//! and lets a persistence backend subscribe:
//!
//! ```text
//! set / set_many / remove / user_for_id ──▶ Changed
//! save / autosave tick / close          ──▶ Persist(snapshot)
//! merge_data(snapshot)                  ──▶ Loaded(snapshot)
//! close                                 ──▶ Closed
//! ```
//!
//! Snapshots are JSON objects with a `users` map (flat user records keyed by
//! id), a `_private` map, and any other top-level keys previously merged in.
//!
//! # Autosave
//!
//! When the robot emits `Running`, the brain starts a repeating timer that
//! saves every `save_interval` while autosave is enabled.
//! [`reset_save_interval`](Brain::reset_save_interval) restarts it with a new
//! period and [`close`](Brain::close) cancels it.
//!
//! # Room Changes
//!
//! [`user_for_id`](Brain::user_for_id) replaces the stored user when the
//! caller reports a room different from the recorded one. The replacement is
//! built from the new attributes only: ad-hoc attributes set on the old
//! record are dropped. Values stored through the datastore are keyed by id
//! and survive.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chime_core::{StoreHandle, User, value_to_string};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{EventBus, RobotEvent};

/// Default autosave period.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(5);

const USERS_KEY: &str = "users";
const PRIVATE_KEY: &str = "_private";

#[derive(Default)]
struct BrainData {
    users: HashMap<String, Arc<User>>,
    private: Map<String, Value>,
    extra: Map<String, Value>,
}

struct BrainInner {
    data: RwLock<BrainData>,
    events: Arc<EventBus>,
    store: StoreHandle,
    autosave: AtomicBool,
    save_interval: Mutex<Duration>,
    timer: Mutex<Option<CancellationToken>>,
}

/// The robot's memory. Cloning shares the same data.
#[derive(Clone)]
pub struct Brain {
    inner: Arc<BrainInner>,
}

impl Brain {
    /// Creates a brain publishing on `events`.
    ///
    /// Users created or loaded by the brain are bound to `store`.
    pub fn new(events: Arc<EventBus>, store: StoreHandle) -> Self {
        let brain = Self {
            inner: Arc::new(BrainInner {
                data: RwLock::new(BrainData::default()),
                events: Arc::clone(&events),
                store,
                autosave: AtomicBool::new(true),
                save_interval: Mutex::new(DEFAULT_SAVE_INTERVAL),
                timer: Mutex::new(None),
            }),
        };

        let weak = Arc::downgrade(&brain.inner);
        events.subscribe(move |event| {
            if !matches!(event, RobotEvent::Running) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                let brain = Brain { inner };
                brain.reset_save_interval(brain.save_interval());
            }
        });

        brain
    }

    // ─── Private data ─────────────────────────────────────────────────────────

    /// Stores a private value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .data
            .write()
            .private
            .insert(key.into(), value.into());
        self.emit(RobotEvent::Changed);
    }

    /// Stores several private values at once.
    pub fn set_many(&self, pairs: Map<String, Value>) {
        self.inner.data.write().private.extend(pairs);
        self.emit(RobotEvent::Changed);
    }

    /// Returns a private value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.data.read().private.get(key).cloned()
    }

    /// Removes a private value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.inner.data.write().private.remove(key);
        self.emit(RobotEvent::Changed);
        removed
    }

    // ─── Persistence ──────────────────────────────────────────────────────────

    /// Returns the full data as JSON.
    pub fn snapshot(&self) -> Value {
        let data = self.inner.data.read();
        let users: Map<String, Value> = data
            .users
            .iter()
            .map(|(id, user)| {
                let record = serde_json::to_value(user.as_ref()).unwrap_or(Value::Null);
                (id.clone(), record)
            })
            .collect();

        let mut snapshot = data.extra.clone();
        snapshot.insert(USERS_KEY.to_string(), Value::Object(users));
        snapshot.insert(PRIVATE_KEY.to_string(), Value::Object(data.private.clone()));
        Value::Object(snapshot)
    }

    /// Asks subscribers to persist the current data.
    pub fn save(&self) {
        let snapshot = self.snapshot();
        self.emit(RobotEvent::Persist(snapshot));
    }

    /// Stops autosaving, saves one last time and emits `Closed`.
    pub fn close(&self) {
        if let Some(token) = self.inner.timer.lock().take() {
            token.cancel();
        }
        self.save();
        self.emit(RobotEvent::Closed);
    }

    /// Merges a loaded snapshot into the live data.
    ///
    /// Top-level keys replace their live counterparts. Every record in
    /// `users` is rebuilt into a [`User`] bound to the robot's datastore;
    /// records without an id are kept under a generated `undefined:<n>` id.
    /// `Loaded` is emitted afterwards with the merged snapshot.
    pub fn merge_data(&self, loaded: Value) {
        if let Value::Object(object) = loaded {
            let mut data = self.inner.data.write();
            for (key, value) in object {
                match key.as_str() {
                    USERS_KEY => data.users = self.rebuild_users(value),
                    PRIVATE_KEY => {
                        data.private = match value {
                            Value::Object(map) => map,
                            _ => Map::new(),
                        }
                    }
                    _ => {
                        data.extra.insert(key, value);
                    }
                }
            }
        }

        let snapshot = self.snapshot();
        self.emit(RobotEvent::Loaded(snapshot));
    }

    fn rebuild_users(&self, value: Value) -> HashMap<String, Arc<User>> {
        let Value::Object(records) = value else {
            return HashMap::new();
        };

        records
            .into_iter()
            .enumerate()
            .map(|(n, (key, record))| {
                let user = User::from_record(&record).unwrap_or_else(|| {
                    let attributes = match record {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    };
                    User::with_attributes(format!("undefined:{n}"), attributes)
                });
                (key, Arc::new(user.bind(self.inner.store.clone())))
            })
            .collect()
    }

    // ─── Autosave ─────────────────────────────────────────────────────────────

    /// Returns `true` if timer ticks save.
    pub fn auto_save(&self) -> bool {
        self.inner.autosave.load(Ordering::SeqCst)
    }

    /// Enables or disables autosave.
    pub fn set_auto_save(&self, enabled: bool) {
        self.inner.autosave.store(enabled, Ordering::SeqCst);
    }

    /// Returns the period used when the robot starts running.
    pub fn save_interval(&self) -> Duration {
        *self.inner.save_interval.lock()
    }

    /// Sets the period used when the robot starts running.
    pub fn set_save_interval(&self, interval: Duration) {
        *self.inner.save_interval.lock() = interval;
    }

    /// (Re)starts the autosave timer with `interval`.
    ///
    /// Must be called from within a tokio runtime; outside one the timer is
    /// not started.
    pub fn reset_save_interval(&self, interval: Duration) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.timer.lock().replace(token.clone()) {
            previous.cancel();
        }

        if interval.is_zero() {
            warn!("Autosave interval is zero, timer not started");
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("No tokio runtime, autosave timer not started");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        handle.spawn(autosave_loop(weak, interval, token));
        debug!(interval_secs = interval.as_secs_f64(), "Brain autosave timer started");
    }

    // ─── Users ────────────────────────────────────────────────────────────────

    /// Returns all users keyed by id.
    pub fn users(&self) -> HashMap<String, Arc<User>> {
        self.inner.data.read().users.clone()
    }

    /// Looks up or creates the user with `id`.
    ///
    /// When `attributes` carries a `room` and the stored user has no room or
    /// a different one, the stored user is replaced by a fresh one built from
    /// `id` and `attributes`.
    pub fn user_for_id(&self, id: &str, attributes: Map<String, Value>) -> Arc<User> {
        let room = attributes
            .get("room")
            .filter(|v| !v.is_null())
            .map(value_to_string)
            .filter(|r| !r.is_empty());

        let user = {
            let mut data = self.inner.data.write();
            if let Some(existing) = data.users.get(id) {
                let same_room = match &room {
                    None => true,
                    Some(room) => existing.room().as_deref() == Some(room.as_str()),
                };
                if same_room {
                    return Arc::clone(existing);
                }
                debug!(user = id, room = ?room, "User changed room, replacing record");
            }

            let user = Arc::new(
                User::with_attributes(id, attributes).bind(self.inner.store.clone()),
            );
            data.users.insert(id.to_string(), Arc::clone(&user));
            user
        };

        self.emit(RobotEvent::Changed);
        user
    }

    /// Returns the user whose name matches `name`, ignoring case.
    pub fn user_for_name(&self, name: &str) -> Option<Arc<User>> {
        let name = name.to_lowercase();
        self.inner
            .data
            .read()
            .users
            .values()
            .find(|user| user.name().to_lowercase() == name)
            .cloned()
    }

    /// Returns users whose name starts with `fuzzy_name`, ignoring case.
    pub fn users_for_raw_fuzzy_name(&self, fuzzy_name: &str) -> Vec<Arc<User>> {
        let prefix = fuzzy_name.to_lowercase();
        let mut users: Vec<Arc<User>> = self
            .inner
            .data
            .read()
            .users
            .values()
            .filter(|user| user.name().to_lowercase().starts_with(&prefix))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.id().cmp(b.id()));
        users
    }

    /// Like [`users_for_raw_fuzzy_name`](Self::users_for_raw_fuzzy_name), but
    /// an exact name match hides the prefix matches.
    pub fn users_for_fuzzy_name(&self, fuzzy_name: &str) -> Vec<Arc<User>> {
        let users = self.users_for_raw_fuzzy_name(fuzzy_name);
        let wanted = fuzzy_name.to_lowercase();
        let exact: Vec<Arc<User>> = users
            .iter()
            .filter(|user| user.name().to_lowercase() == wanted)
            .cloned()
            .collect();
        if exact.is_empty() { users } else { exact }
    }

    fn emit(&self, event: RobotEvent) {
        self.inner.events.emit(&event);
    }
}

async fn autosave_loop(brain: Weak<BrainInner>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = brain.upgrade() else { break };
                let brain = Brain { inner };
                if brain.auto_save() {
                    brain.save();
                }
            }
        }
    }

    debug!("Brain autosave timer stopped");
}

impl fmt::Debug for Brain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.read();
        f.debug_struct("Brain")
            .field("users", &data.users.len())
            .field("private", &data.private.len())
            .field("autosave", &self.auto_save())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_core::{MemoryDataStore, StoreError};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn brain() -> (Brain, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        (Brain::new(events.clone(), StoreHandle::new()), events)
    }

    fn counter(events: &EventBus, name: &'static str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        events.subscribe(move |event| {
            if event.name() == name {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_private_data_emits_changed() {
        let (brain, events) = brain();
        let changed = counter(&events, "changed");

        brain.set("answer", 42);
        brain.set_many(attrs(json!({"a": 1, "b": 2})));
        assert_eq!(brain.get("answer"), Some(json!(42)));
        assert_eq!(brain.remove("a"), Some(json!(1)));
        assert_eq!(brain.get("a"), None);
        assert_eq!(changed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_save_emits_snapshot() {
        let (brain, events) = brain();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        events.subscribe(move |event| {
            if let RobotEvent::Persist(snapshot) = event {
                *s.lock() = Some(snapshot.clone());
            }
        });

        brain.set("k", "v");
        brain.user_for_id("u1", attrs(json!({"name": "ann", "room": "general"})));
        brain.save();

        assert_eq!(
            seen.lock().clone().unwrap(),
            json!({
                "users": {"u1": {"id": "u1", "name": "ann", "room": "general"}},
                "_private": {"k": "v"}
            })
        );
    }

    #[test]
    fn test_user_for_id_replaces_on_room_change() {
        let (brain, _events) = brain();

        let first = brain.user_for_id("u1", attrs(json!({"room": "A"})));
        first.set_attr("mood", "happy");
        let again = brain.user_for_id("u1", attrs(json!({"room": "A"})));
        assert!(Arc::ptr_eq(&first, &again));

        let no_room = brain.user_for_id("u1", Map::new());
        assert!(Arc::ptr_eq(&first, &no_room));

        let moved = brain.user_for_id("u1", attrs(json!({"room": "B"})));
        assert!(!Arc::ptr_eq(&first, &moved));
        assert_eq!(moved.room().as_deref(), Some("B"));
        assert_eq!(moved.attr("mood"), None);
        assert!(Arc::ptr_eq(&brain.users()["u1"], &moved));
    }

    #[test]
    fn test_fuzzy_names_prefer_exact() {
        let (brain, _events) = brain();
        brain.user_for_id("1", attrs(json!({"name": "ann"})));
        brain.user_for_id("2", attrs(json!({"name": "Anna"})));

        let found = brain.users_for_fuzzy_name("ANN");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "ann");
        assert_eq!(brain.users_for_raw_fuzzy_name("ann").len(), 2);
        assert_eq!(brain.user_for_name("anna").map(|u| u.id().to_string()), Some("2".into()));

        let (brain, _events) = self::brain();
        brain.user_for_id("1", attrs(json!({"name": "anna"})));
        brain.user_for_id("2", attrs(json!({"name": "annabel"})));
        brain.user_for_id("3", attrs(json!({"name": "bob"})));

        let names: Vec<String> = brain
            .users_for_fuzzy_name("ann")
            .iter()
            .map(|u| u.name())
            .collect();
        assert_eq!(names, vec!["anna", "annabel"]);
    }

    #[tokio::test]
    async fn test_merge_data_rebuilds_bound_users() {
        let events = Arc::new(EventBus::new());
        let store = StoreHandle::new();
        let brain = Brain::new(events.clone(), store.clone());
        let loaded = counter(&events, "loaded");

        brain.set("stale", true);
        brain.merge_data(json!({
            "users": {
                "u1": {"id": "u1", "name": "ann", "room": "general"},
                "u2": {"id": "u2", "options": {"name": "bob"}},
                "ghost": {"name": "nobody"}
            },
            "_private": {"counter": 3},
            "version": 2
        }));

        assert_eq!(loaded.load(Ordering::SeqCst), 1);
        assert_eq!(brain.get("counter"), Some(json!(3)));
        assert_eq!(brain.get("stale"), None);
        assert_eq!(brain.snapshot()["version"], json!(2));

        let users = brain.users();
        assert_eq!(users["u2"].name(), "bob");
        assert!(users["ghost"].id().starts_with("undefined:"));
        assert!(users.values().all(|u| u.is_bound()));

        let err = users["u1"].set("color", json!("blue")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.attach(Arc::new(MemoryDataStore::new()));
        users["u1"].set("color", json!("blue")).await.unwrap();
        assert_eq!(users["u1"].get("color").await.unwrap(), Some(json!("blue")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_after_running_and_close() {
        let (brain, events) = brain();
        let persisted = counter(&events, "persist");
        let closed = counter(&events, "closed");

        events.emit(&RobotEvent::Running);
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(persisted.load(Ordering::SeqCst), 1);

        brain.close();
        assert_eq!(persisted.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(persisted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_autosave_skips_ticks() {
        let (brain, events) = brain();
        let persisted = counter(&events, "persist");

        brain.set_auto_save(false);
        brain.reset_save_interval(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(persisted.load(Ordering::SeqCst), 0);

        brain.set_auto_save(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(persisted.load(Ordering::SeqCst), 1);
    }
}
