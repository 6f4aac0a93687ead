//! Named callback registry
//!
//! The server refers to dataset predicates and view listeners by name. Names
//! are resolved here against functions the embedding application registered
//! ahead of time; payload text is never compiled or executed.
//!
//! # Usage
//!
//! ```rust,ignore
//! let callbacks = CallbackRegistry::new();
//! callbacks.register_predicate("is_stale", |row| row.get("stale") == Some(&json!(true)));
//! callbacks.register_listener("forward_brush", move |name, value| {
//!     inputs.send((name.to_string(), value.clone())).ok();
//! });
//! ```

use crate::data::Record;
use crate::errors::{BridgeError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Row predicate used as a changeset remove term
pub type PredicateFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// View listener; called with `(name, value)` for signals and data,
/// `(event, item)` for events
pub type ListenerCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Kind of listener a handler is attached as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Signal value changes
    Signal,
    /// Dataset changes
    Data,
    /// User interaction events
    Event,
}

impl ListenerKind {
    /// Documented parameter names of handlers of this kind
    pub fn parameter_names(&self) -> (&'static str, &'static str) {
        match self {
            Self::Signal | Self::Data => ("name", "value"),
            Self::Event => ("event", "item"),
        }
    }

    /// Short label for logs and errors
    pub fn label(&self) -> &'static str {
        match self {
            Self::Signal => "signal listener",
            Self::Data => "data listener",
            Self::Event => "event listener",
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Registry of named predicates and listeners.
///
/// Registration may happen at any time; lookups see the latest registration.
#[derive(Default)]
pub struct CallbackRegistry {
    predicates: RwLock<HashMap<String, PredicateFn>>,
    listeners: RwLock<HashMap<String, ListenerCallback>>,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a row predicate under `name`, replacing any previous one
    pub fn register_predicate<F>(&self, name: &str, predicate: F)
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.predicates
            .write()
            .insert(name.to_string(), Arc::new(predicate));
    }

    /// Register a listener under `name`, replacing any previous one
    pub fn register_listener<F>(&self, name: &str, listener: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .insert(name.to_string(), Arc::new(listener));
    }

    /// Look up a predicate
    pub fn predicate(&self, name: &str) -> Result<PredicateFn> {
        self.predicates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownCallback {
                kind: "predicate".to_string(),
                name: name.to_string(),
            })
    }

    /// Look up a listener to be attached as `kind`
    pub fn listener(&self, kind: ListenerKind, name: &str) -> Result<ListenerCallback> {
        self.listeners
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownCallback {
                kind: kind.label().to_string(),
                name: name.to_string(),
            })
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("predicates", &self.predicates.read().keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_register_and_lookup_predicate() {
        let registry = CallbackRegistry::new();
        registry.register_predicate("small", |row| {
            row.get("a").and_then(Value::as_i64).is_some_and(|a| a < 3)
        });

        let predicate = registry.predicate("small").unwrap();
        let row = json!({"a": 1});
        assert!(predicate(row.as_object().unwrap()));
        let row = json!({"a": 5});
        assert!(!predicate(row.as_object().unwrap()));
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let registry = CallbackRegistry::new();
        assert_matches!(
            registry.predicate("return true;").map(|_| ()),
            Err(BridgeError::UnknownCallback { kind, .. }) if kind == "predicate"
        );
        assert_matches!(
            registry.listener(ListenerKind::Event, "missing").map(|_| ()),
            Err(BridgeError::UnknownCallback { kind, .. }) if kind == "event listener"
        );
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = CallbackRegistry::new();
        registry.register_predicate("keep", |_| false);
        registry.register_predicate("keep", |_| true);
        let row = json!({});
        assert!(registry.predicate("keep").unwrap()(row.as_object().unwrap()));
    }

    #[test]
    fn test_parameter_names() {
        assert_eq!(ListenerKind::Signal.parameter_names(), ("name", "value"));
        assert_eq!(ListenerKind::Event.parameter_names(), ("event", "item"));
    }
}
