//! Observable property bag.
//!
//! An entity's properties are an ordered map from predicate name to a JSON
//! value. Multi-valued properties are stored as JSON arrays. Every mutation
//! is reported to the registered observers, in registration order, after the
//! map has been updated.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Property map as exchanged with the backend.
pub type Properties = BTreeMap<String, Value>;

/// Callback invoked after every mutation of a [`PropertyBag`].
pub type Observer = Box<dyn Fn(&PropertyChange<'_>) + Send + Sync>;

/// Describes a single mutation of a [`PropertyBag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyChange<'a> {
    /// The property was overwritten.
    Set(&'a str),
    /// A value was appended to the property.
    Added(&'a str),
    /// A single value was removed from the property.
    Removed(&'a str),
    /// The property was deleted.
    Cleared(&'a str),
    /// The whole map was replaced (e.g. by a fresh server document).
    Replaced,
}

impl PropertyChange<'_> {
    /// The affected property, if the change targets a single one.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Set(k) | Self::Added(k) | Self::Removed(k) | Self::Cleared(k) => Some(k),
            Self::Replaced => None,
        }
    }
}

/// Ordered property map with mutation observers.
#[derive(Default)]
pub struct PropertyBag {
    values: Properties,
    observers: Vec<Observer>,
}

impl fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBag")
            .field("values", &self.values)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl PropertyBag {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bag pre-filled with `values`. No observer is notified.
    pub fn with_values(values: Properties) -> Self {
        Self {
            values,
            observers: Vec::new(),
        }
    }

    /// Registers an observer called after every mutation.
    pub fn observe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    fn notify(&self, change: PropertyChange<'_>) {
        for observer in &self.observers {
            observer(&change);
        }
    }

    /// Raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// All values of `key`, flattening arrays. Empty when the key is absent.
    pub fn values(&self, key: &str) -> Vec<&Value> {
        match self.values.get(key) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(value) => vec![value],
            None => Vec::new(),
        }
    }

    /// First value of `key`.
    pub fn first(&self, key: &str) -> Option<&Value> {
        match self.values.get(key) {
            Some(Value::Array(items)) => items.first(),
            other => other,
        }
    }

    /// Whether `key` holds `value`, directly or as an array element.
    pub fn has_value(&self, key: &str, value: &Value) -> bool {
        self.values(key).into_iter().any(|v| v == value)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Property names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Iterates over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bag holds no properties.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrites `key` with `value`.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.values.insert(key.clone(), value);
        self.notify(PropertyChange::Set(&key));
    }

    /// Appends `value` to `key`, promoting a single value to an array.
    pub fn add_value(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.values.remove(&key) {
            None => {
                self.values.insert(key.clone(), value);
            }
            Some(Value::Array(mut items)) => {
                items.push(value);
                self.values.insert(key.clone(), Value::Array(items));
            }
            Some(single) => {
                self.values.insert(key.clone(), Value::Array(vec![single, value]));
            }
        }
        self.notify(PropertyChange::Added(&key));
    }

    /// Removes every occurrence of `value` from `key`. Returns whether
    /// anything was removed. A property left without values is deleted.
    pub fn remove_value(&mut self, key: &str, value: &Value) -> bool {
        let (removed, emptied) = match self.values.get_mut(key) {
            Some(Value::Array(items)) => {
                let before = items.len();
                items.retain(|v| v != value);
                (items.len() != before, items.is_empty())
            }
            Some(single) => {
                let hit = *single == *value;
                (hit, hit)
            }
            None => (false, false),
        };
        if emptied {
            self.values.remove(key);
        }
        if removed {
            self.notify(PropertyChange::Removed(key));
        }
        removed
    }

    /// Deletes `key`, returning its previous value.
    pub fn clear(&mut self, key: &str) -> Option<Value> {
        let previous = self.values.remove(key);
        if previous.is_some() {
            self.notify(PropertyChange::Cleared(key));
        }
        previous
    }

    /// Replaces the whole map. Keys absent from `values` are dropped.
    pub fn replace_all(&mut self, values: Properties) {
        self.values = values;
        self.notify(PropertyChange::Replaced);
    }

    /// Copies the current map out of the bag.
    pub fn snapshot(&self) -> Properties {
        self.values.clone()
    }
}
