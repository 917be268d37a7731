//! Datastore trait and handles.
//!
//! A [`DataStore`] is the durable key/value backend scripts use for values
//! that must outlive the in-memory brain (user-scoped settings, counters,
//! lists). The core only defines the interface plus an in-process
//! [`MemoryDataStore`]; real backends live outside the core.
//!
//! The robot owns a [`StoreHandle`]: an attachable slot that users and
//! scripts read lazily, so a store can be attached after users have been
//! created or reloaded.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::StoreResult;

/// Logical table a datastore key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreTable {
    /// Keys shared by every script.
    Global,
    /// Keys namespaced by a user id.
    Users,
}

impl StoreTable {
    /// Returns the table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Users => "users",
        }
    }
}

impl fmt::Display for StoreTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable key/value backend.
///
/// Implementors provide the two raw operations; the convenience helpers
/// operate on the [`StoreTable::Global`] table.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Stores `value` under `key` in `table`.
    async fn set_raw(&self, key: &str, value: Value, table: StoreTable) -> StoreResult<()>;

    /// Reads the value stored under `key` in `table`.
    async fn get_raw(&self, key: &str, table: StoreTable) -> StoreResult<Option<Value>>;

    /// Stores a global value.
    async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.set_raw(key, value, StoreTable::Global).await
    }

    /// Reads a global value.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.get_raw(key, StoreTable::Global).await
    }

    /// Sets one field of a global object, creating the object if needed.
    ///
    /// A non-object value under `key` is replaced by a fresh object.
    async fn set_object(&self, key: &str, object_key: &str, value: Value) -> StoreResult<()> {
        let mut target = match self.get(key).await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        target.insert(object_key.to_string(), value);
        self.set(key, Value::Object(target)).await
    }

    /// Appends to a global array; an array `value` is appended element-wise.
    async fn set_array(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut items = match self.get(key).await? {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        match value {
            Value::Array(more) => items.extend(more),
            single => items.push(single),
        }
        self.set(key, Value::Array(items)).await
    }

    /// Reads one field of a global object.
    async fn get_object(&self, key: &str, object_key: &str) -> StoreResult<Option<Value>> {
        Ok(match self.get(key).await? {
            Some(Value::Object(mut map)) => map.remove(object_key),
            _ => None,
        })
    }
}

// =============================================================================
// StoreHandle
// =============================================================================

/// A shared, attachable slot holding the robot's datastore.
///
/// Cloning the handle shares the slot: attaching a store through any clone
/// makes it visible to every holder.
#[derive(Clone, Default)]
pub struct StoreHandle {
    slot: Arc<RwLock<Option<Arc<dyn DataStore>>>>,
}

impl StoreHandle {
    /// Creates an empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches (or replaces) the backing store.
    pub fn attach(&self, store: Arc<dyn DataStore>) {
        *self.slot.write() = Some(store);
    }

    /// Detaches the backing store.
    pub fn detach(&self) {
        *self.slot.write() = None;
    }

    /// Returns the current store, if one is attached.
    pub fn current(&self) -> Option<Arc<dyn DataStore>> {
        self.slot.read().clone()
    }

    /// Returns `true` if a store is attached.
    pub fn is_attached(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

// =============================================================================
// MemoryDataStore
// =============================================================================

/// An in-process [`DataStore`] backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    entries: RwLock<HashMap<(StoreTable, String), Value>>,
}

impl MemoryDataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys across all tables.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn set_raw(&self, key: &str, value: Value, table: StoreTable) -> StoreResult<()> {
        self.entries.write().insert((table, key.to_string()), value);
        Ok(())
    }

    async fn get_raw(&self, key: &str, table: StoreTable) -> StoreResult<Option<Value>> {
        Ok(self.entries.read().get(&(table, key.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tables_are_separate() {
        let store = MemoryDataStore::new();
        store.set_raw("k", json!(1), StoreTable::Global).await.unwrap();
        store.set_raw("k", json!(2), StoreTable::Users).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
        assert_eq!(
            store.get_raw("k", StoreTable::Users).await.unwrap(),
            Some(json!(2))
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_set_object_merges_fields() {
        let store = MemoryDataStore::new();
        store.set_object("prefs", "theme", json!("dark")).await.unwrap();
        store.set_object("prefs", "lang", json!("en")).await.unwrap();

        assert_eq!(
            store.get("prefs").await.unwrap(),
            Some(json!({"theme": "dark", "lang": "en"}))
        );
        assert_eq!(
            store.get_object("prefs", "lang").await.unwrap(),
            Some(json!("en"))
        );
        assert_eq!(store.get_object("prefs", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_array_appends() {
        let store = MemoryDataStore::new();
        store.set_array("queue", json!("a")).await.unwrap();
        store.set_array("queue", json!(["b", "c"])).await.unwrap();

        assert_eq!(
            store.get("queue").await.unwrap(),
            Some(json!(["a", "b", "c"]))
        );
    }

    #[test]
    fn test_handle_clones_share_slot() {
        let handle = StoreHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_attached());

        handle.attach(Arc::new(MemoryDataStore::new()));
        assert!(clone.is_attached());

        clone.detach();
        assert!(handle.current().is_none());
    }
}
