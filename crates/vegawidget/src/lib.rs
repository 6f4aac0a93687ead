//! vegawidget - remote control for embedded chart views
//!
//! A chart widget's view is built asynchronously by a render engine, yet a
//! reactive server wants to talk to it from the moment the page loads. This
//! crate bridges the two:
//!
//! ## Acquiring views
//! - `ViewHandlePromise`: shared future of a view with an ordered
//!   continuation queue
//! - `WidgetInstance`: owns the current promise, swaps it on every render
//! - `WidgetDiscovery`: finds instances by selector, polling with bounded
//!   backoff while the host attaches them
//!
//! ## Driving views
//! - `invoke_on` / `RunFlag`: call any view method, then `run()` unless told
//!   not to
//! - `DataProjector` / `ChangesetBuilder`: turn server data payloads into
//!   changesets
//! - `MessageRouter`: dispatch server messages to the above
//!
//! ## Seams
//! - `ViewHandle`, `RenderEngine`, `HostElement`, `PageRegistry`: traits the
//!   embedding environment implements; `memory` provides headless versions
//! - `CallbackRegistry`: named predicates and listeners; message payloads
//!   reference these by name and are never executed

#![forbid(unsafe_code)]

/// Named predicate and listener registry
pub mod callbacks;

/// Configuration loading and validation
pub mod config;

/// Data projection and changesets
pub mod data;

/// Widget discovery by selector
pub mod discovery;

/// Error types
pub mod errors;

/// Generic view method invocation
pub mod invoker;

/// In-memory page and headless engine
pub mod memory;

/// Shared view promise with ordered continuations
pub mod promise;

/// Bounded retry policies
pub mod retry;

/// Server message routing
pub mod router;

/// View, engine and element traits
pub mod view;

/// Widget instances
pub mod widget;

pub use callbacks::{CallbackRegistry, ListenerCallback, ListenerKind, PredicateFn};
pub use config::{BridgeConfig, DiscoveryConfig, RenderConfig};
pub use data::{
    columns_to_rows, resolve_remove, Changeset, ChangesetBuilder, DataProjector, Predicate,
    Record, RowSet, UpdateTerm,
};
pub use discovery::{ElementRecord, PageRegistry, WidgetDiscovery};
pub use errors::{BridgeError, ErrorCategory, Result};
pub use invoker::{invoke_on, RunFlag};
pub use promise::{ViewHandlePromise, ViewResult};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use router::{InboundMessage, MessageRouter, RemoteMessage, ServeSummary};
pub use view::{HostElement, RenderEngine, ViewArg, ViewHandle, CHANGE_METHOD};
pub use widget::{RenderPayload, WidgetInstance};
