//! # View and engine seams
//!
//! The rendering engine, the view it produces, and the host element it draws
//! into are all external collaborators. This module defines the traits the
//! bridge talks to; [`crate::memory`] provides a headless implementation.
//!
//! ```text
//! RenderEngine::embed(element, spec, options) ──► Arc<dyn ViewHandle>
//!                                                     │
//!             invoke("change", [name, changeset]) ◄───┤
//!             run()                              ◄───┤
//!             add_{event,signal,data}_listener   ◄───┘
//! ```

use crate::callbacks::ListenerCallback;
use crate::data::Changeset;
use crate::errors::{BridgeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Name of the view method that applies a changeset to a dataset.
pub const CHANGE_METHOD: &str = "change";

/// Positional argument passed to a view method.
///
/// Most arguments are plain JSON; changesets carry predicates and therefore
/// travel as their own variant.
#[derive(Clone)]
pub enum ViewArg {
    /// A JSON value
    Value(Value),
    /// A dataset changeset
    Changeset(Changeset),
}

impl ViewArg {
    /// Borrow the JSON value, if this is one
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Changeset(_) => None,
        }
    }

    /// Borrow the string value, if this is one
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    /// Borrow the changeset, if this is one
    pub fn as_changeset(&self) -> Option<&Changeset> {
        match self {
            Self::Changeset(changeset) => Some(changeset),
            Self::Value(_) => None,
        }
    }
}

impl From<Value> for ViewArg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Changeset> for ViewArg {
    fn from(changeset: Changeset) -> Self {
        Self::Changeset(changeset)
    }
}

impl fmt::Debug for ViewArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Changeset(changeset) => f.debug_tuple("Changeset").field(changeset).finish(),
        }
    }
}

/// Convert a list of JSON parameters into positional view arguments.
pub fn value_args(params: Vec<Value>) -> Vec<ViewArg> {
    params.into_iter().map(ViewArg::Value).collect()
}

/// A live view produced by the rendering engine.
///
/// The bridge never owns the view's state; it only holds a shared reference
/// and forwards calls.
#[async_trait]
pub trait ViewHandle: Send + Sync {
    /// Invoke a named view method with positional arguments.
    ///
    /// Implementations return [`BridgeError::MethodNotFound`] for names they
    /// do not expose.
    async fn invoke(&self, method: &str, args: Vec<ViewArg>) -> Result<Value>;

    /// Flush pending changes to the visual output
    async fn run(&self) -> Result<()>;

    /// Register a listener for a view event type; called with `(event, item)`
    fn add_event_listener(&self, event: &str, handler: ListenerCallback) -> Result<()>;

    /// Register a listener for a named signal; called with `(name, value)`
    fn add_signal_listener(&self, name: &str, handler: ListenerCallback) -> Result<()>;

    /// Register a listener for a named dataset; called with `(name, value)`
    fn add_data_listener(&self, name: &str, handler: ListenerCallback) -> Result<()>;
}

/// Host element a widget renders into.
pub trait HostElement: Send + Sync {
    /// Element id; the widget's selector is this id behind the id prefix
    fn id(&self) -> &str;

    /// Set an attribute on the element
    fn set_attribute(&self, name: &str, value: &str);
}

/// The external chart-rendering engine.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Build a view for `spec` inside `element`.
    async fn embed(
        &self,
        element: Arc<dyn HostElement>,
        spec: Value,
        options: Option<Value>,
    ) -> Result<Arc<dyn ViewHandle>>;
}

/// Extract the dataset name and changeset from `change` arguments.
///
/// Engines implementing [`CHANGE_METHOD`] share this argument check.
pub fn change_args(args: &[ViewArg]) -> Result<(&str, &Changeset)> {
    match args {
        [name, changeset] => {
            let name = name.as_str().ok_or_else(|| {
                BridgeError::invalid_argument(CHANGE_METHOD, "dataset name must be a string")
            })?;
            let changeset = changeset.as_changeset().ok_or_else(|| {
                BridgeError::invalid_argument(CHANGE_METHOD, "second argument must be a changeset")
            })?;
            Ok((name, changeset))
        }
        _ => Err(BridgeError::invalid_argument(
            CHANGE_METHOD,
            format!("expected 2 arguments, got {}", args.len()),
        )),
    }
}
