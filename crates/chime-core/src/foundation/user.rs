//! Chat users.
//!
//! A [`User`] is identified by its `id` and carries an open bag of named
//! attributes (`room`, `name`, arbitrary metadata) supplied by the adapter.
//! Attributes are stored in an explicit map; accessors check the map and
//! fall back to a default where one exists (`name` falls back to the id).
//!
//! Users that are *bound* to a [`StoreHandle`] can persist scoped key/value
//! pairs through the robot's datastore. Scoped keys are namespaced as
//! `"{id}+{key}"` in the [`StoreTable::Users`] table.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::integration::datastore::{DataStore, StoreHandle, StoreTable};

/// Renders a JSON attribute value as a plain string.
///
/// Strings are returned without quotes; everything else uses its JSON form.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A chat user known to the robot.
pub struct User {
    id: String,
    attributes: RwLock<Map<String, Value>>,
    store: Option<StoreHandle>,
}

impl User {
    /// Creates an unbound user with no attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_attributes(id, Map::new())
    }

    /// Creates an unbound user with the given attributes.
    pub fn with_attributes(id: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            attributes: RwLock::new(attributes),
            store: None,
        }
    }

    /// Binds this user to a datastore handle, enabling [`get`](Self::get) and
    /// [`set`](Self::set).
    pub fn bind(mut self, store: StoreHandle) -> Self {
        self.store = Some(store);
        self
    }

    /// Rebuilds a user from a raw (deserialized) record.
    ///
    /// Accepts the flat form produced by [`Serialize`] (`{"id": .., "room": ..}`)
    /// as well as records that nest their attributes under an `options` key.
    /// Returns `None` when the record is not an object or has no usable `id`.
    pub fn from_record(record: &Value) -> Option<Self> {
        let object = record.as_object()?;
        let id = match object.get("id")? {
            Value::Null => return None,
            id => value_to_string(id),
        };

        let mut attributes = Map::new();
        for (key, value) in object {
            match key.as_str() {
                "id" => {}
                "options" => {
                    if let Value::Object(nested) = value {
                        for (k, v) in nested {
                            attributes.insert(k.clone(), v.clone());
                        }
                    } else {
                        attributes.insert(key.clone(), value.clone());
                    }
                }
                _ => {
                    attributes.insert(key.clone(), value.clone());
                }
            }
        }

        Some(Self::with_attributes(id, attributes))
    }

    /// Returns the user's unique id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the display name, defaulting to the id.
    pub fn name(&self) -> String {
        self.attr_string("name").unwrap_or_else(|| self.id.clone())
    }

    /// Returns the room this user was last seen in.
    pub fn room(&self) -> Option<String> {
        self.attr_string("room")
    }

    /// Returns a clone of a named attribute.
    pub fn attr(&self, key: &str) -> Option<Value> {
        match self.attributes.read().get(key) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value.clone()),
        }
    }

    /// Returns a named attribute rendered as a string.
    pub fn attr_string(&self, key: &str) -> Option<String> {
        self.attr(key).map(|v| value_to_string(&v))
    }

    /// Sets an ad-hoc attribute on this in-memory record.
    ///
    /// Ad-hoc attributes are not durable across a room change: see
    /// `Brain::user_for_id`.
    pub fn set_attr(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.write().insert(key.into(), value.into());
    }

    /// Returns a snapshot of all attributes.
    pub fn attributes(&self) -> Map<String, Value> {
        self.attributes.read().clone()
    }

    /// Returns `true` if this user can reach a datastore handle.
    pub fn is_bound(&self) -> bool {
        self.store.is_some()
    }

    /// Stores a value under this user's namespace.
    pub async fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        let store = self.datastore()?;
        store
            .set_raw(&self.scoped_key(key), value, StoreTable::Users)
            .await
    }

    /// Reads a value from this user's namespace.
    pub async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let store = self.datastore()?;
        store.get_raw(&self.scoped_key(key), StoreTable::Users).await
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}+{}", self.id, key)
    }

    fn datastore(&self) -> StoreResult<Arc<dyn DataStore>> {
        self.store
            .as_ref()
            .and_then(StoreHandle::current)
            .ok_or_else(|| StoreError::unavailable("datastore is not initialized"))
    }
}

impl Serialize for User {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let attributes = self.attributes.read();
        let mut map = serializer.serialize_map(Some(attributes.len() + 1))?;
        map.serialize_entry("id", &self.id)?;
        for (key, value) in attributes.iter().filter(|(k, _)| k.as_str() != "id") {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("attributes", &*self.attributes.read())
            .field("bound", &self.is_bound())
            .finish()
    }
}
