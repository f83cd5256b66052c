//!
//! Configuration observer registry
//!
//! Holds the current configuration values as a JSON document and a list
//! of observers interested in specific top level keys. Applying a merge
//! patch (RFC 7396) recomputes the document and notifies every observer
//! whose tracked keys changed.
//!
//! The registry is an explicit object handed to its subscribers; there is
//! no process wide instance.
//!
use crate::errors::Result;
use crate::utils::json_merge_tracked;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

/// A subscriber to configuration changes
pub trait ConfigObserver: Send + Sync {
    /// Top level keys this observer wants to be notified about
    fn tracked_keys(&self) -> Vec<String>;

    /// Called with the updated values document and the set of keys
    /// whose value changed. Only invoked when the intersection with
    /// `tracked_keys` is non empty.
    fn handle_config_change(&self, values: &Value, changed: &HashSet<String>);
}

struct Inner {
    values: Value,
    observers: Vec<Weak<dyn ConfigObserver>>,
}

/// Configuration value store with change notification
pub struct ConfigRegistry {
    inner: Mutex<Inner>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::with_values(Value::Object(Default::default()))
    }

    /// Create a registry seeded with an initial values document
    pub fn with_values(values: Value) -> Self {
        Self {
            inner: Mutex::new(Inner {
                values,
                observers: Vec::new(),
            }),
        }
    }

    /// Subscribe an observer
    ///
    /// The registry keeps a weak reference; a dropped observer is
    /// pruned on the next `apply`.
    pub fn register<O>(&self, observer: &Arc<O>)
    where
        O: ConfigObserver + 'static,
    {
        let observer: Arc<dyn ConfigObserver> = observer.clone();
        let weak: Weak<dyn ConfigObserver> = Arc::downgrade(&observer);
        self.inner.lock().observers.push(weak);
    }

    /// Return a copy of the value stored under `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.get(key).cloned()
    }

    /// Merge patch the values document and notify interested observers
    pub fn apply(&self, patch: &Value) {
        let mut changed = Vec::new();
        let (values, observers) = {
            let mut inner = self.inner.lock();
            json_merge_tracked(&mut inner.values, patch, &mut changed);
            // Prune dead observers while we are at it
            inner.observers.retain(|obs| obs.strong_count() > 0);
            let observers: Vec<_> = inner.observers.iter().filter_map(Weak::upgrade).collect();
            (inner.values.clone(), observers)
        };

        if changed.is_empty() {
            return;
        }
        log::debug!("Config changed: {:?}", changed);

        let changed: HashSet<String> = changed.into_iter().collect();
        // Dispatch outside the registry lock so that handlers may call
        // back into the registry.
        for observer in observers {
            if observer.tracked_keys().iter().any(|k| changed.contains(k)) {
                observer.handle_config_change(&values, &changed);
            }
        }
    }

    /// Merge patch from any serializable options fragment
    pub fn apply_options<T: Serialize>(&self, patch: &T) -> Result<()> {
        let patch = serde_json::to_value(patch)?;
        self.apply(&patch);
        Ok(())
    }
}
