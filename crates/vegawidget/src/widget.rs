//! Widget instances
//!
//! A [`WidgetInstance`] bridges a host element to the view the engine builds
//! inside it. Each [`render`](WidgetInstance::render) starts a new view
//! construction and swaps in its [`ViewHandlePromise`]; calls made afterwards
//! go to the new view, calls made earlier finish against the old one.

use crate::callbacks::CallbackRegistry;
use crate::config::RenderConfig;
use crate::data::{ChangesetBuilder, DataProjector};
use crate::errors::{BridgeError, Result};
use crate::invoker::{invoke_on, RunFlag};
use crate::promise::ViewHandlePromise;
use crate::view::{value_args, HostElement, RenderEngine, ViewArg, ViewHandle, CHANGE_METHOD};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Payload the host framework passes to `render`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPayload {
    /// Engine spec; older bindings send it JSON-encoded as a string
    pub chart_spec: Value,

    /// Engine embed options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_options: Option<Value>,
}

impl RenderPayload {
    /// Create a payload from a spec object
    pub fn new(chart_spec: Value) -> Self {
        Self {
            chart_spec,
            embed_options: None,
        }
    }

    /// The chart spec as an object, decoding the string form if needed
    pub fn spec(&self) -> Result<Value> {
        match &self.chart_spec {
            Value::String(encoded) => Ok(serde_json::from_str(encoded)?),
            spec => Ok(spec.clone()),
        }
    }
}

#[derive(Default)]
struct WidgetState {
    generation: u64,
    promise: Option<ViewHandlePromise>,
    chart_spec: Option<Value>,
}

/// Page-side object bridging an element to its eventual view
pub struct WidgetInstance {
    element: Arc<dyn HostElement>,
    engine: Arc<dyn RenderEngine>,
    projector: DataProjector,
    config: RenderConfig,
    state: Mutex<WidgetState>,
}

impl WidgetInstance {
    /// Create an instance for `element`; nothing is drawn until `render`
    pub fn new(
        element: Arc<dyn HostElement>,
        engine: Arc<dyn RenderEngine>,
        callbacks: Arc<CallbackRegistry>,
        config: RenderConfig,
    ) -> Self {
        Self {
            element,
            engine,
            projector: DataProjector::new(callbacks),
            config,
            state: Mutex::new(WidgetState::default()),
        }
    }

    /// Element id
    pub fn id(&self) -> &str {
        self.element.id()
    }

    /// The element this widget draws into
    pub fn element(&self) -> &Arc<dyn HostElement> {
        &self.element
    }

    /// Spec of the most recent render
    pub fn chart_spec(&self) -> Option<Value> {
        self.state.lock().chart_spec.clone()
    }

    /// The current view promise, if the widget has been rendered
    pub fn view_handle_promise(&self) -> Option<ViewHandlePromise> {
        self.state.lock().promise.clone()
    }

    fn current_promise(&self) -> Result<ViewHandlePromise> {
        self.view_handle_promise().ok_or_else(|| BridgeError::NotRendered {
            id: self.id().to_string(),
        })
    }

    /// Start building a view for `payload`, replacing any previous one.
    ///
    /// Must be called inside a tokio runtime. A spec that cannot be decoded is
    /// rejected before anything is replaced.
    pub fn render(&self, payload: RenderPayload) -> Result<ViewHandlePromise> {
        let spec = payload.spec().map_err(|e| {
            warn!(id = %self.id(), error = %e, "Chart spec could not be decoded");
            e
        })?;

        let engine = Arc::clone(&self.engine);
        let element = Arc::clone(&self.element);
        let style = self.config.auto_size_style.clone();
        let embed_spec = spec.clone();
        let options = payload.embed_options;
        let construction = async move {
            let view = engine
                .embed(Arc::clone(&element), embed_spec, options)
                .await
                .map_err(|e| match e {
                    BridgeError::ViewConstruction { .. } => e,
                    other => BridgeError::view_construction(other.to_string()),
                })?;
            // let the chart decide how much space it occupies
            if let Some(style) = style {
                element.set_attribute("style", &style);
            }
            Ok::<Arc<dyn ViewHandle>, BridgeError>(view)
        };

        let mut state = self.state.lock();
        state.generation += 1;
        let promise = ViewHandlePromise::spawn(state.generation, construction);
        state.promise = Some(promise.clone());
        state.chart_spec = Some(spec);
        info!(id = %self.id(), generation = state.generation, "Widget render started");
        Ok(promise)
    }

    /// Host resize hook. The chart sizes itself, so this only logs.
    pub fn resize(&self, width: f64, height: f64) {
        trace!(id = %self.id(), width, height, "Widget resize ignored");
    }

    /// Call `method(params...)` on the current view, then `run()` unless
    /// `run` is explicitly false.
    ///
    /// The call is queued on the current promise before this returns.
    pub fn invoke(
        &self,
        method: &str,
        params: Vec<Value>,
        run: RunFlag,
    ) -> BoxFuture<'static, Result<Value>> {
        self.invoke_args(method, value_args(params), run)
    }

    /// [`invoke`](Self::invoke) with arbitrary view arguments
    pub fn invoke_args(
        &self,
        method: &str,
        args: Vec<ViewArg>,
        run: RunFlag,
    ) -> BoxFuture<'static, Result<Value>> {
        match self.current_promise() {
            Ok(promise) => invoke_on(&promise, method, args, run).boxed(),
            Err(e) => {
                warn!(id = %self.id(), method, error = %e, "Cannot invoke before render");
                future::ready(Err(e)).boxed()
            }
        }
    }

    /// Apply an incremental update to dataset `name`.
    ///
    /// `insert` and `remove` are projected independently; an omitted remove
    /// clears the dataset first. Projection errors are returned without
    /// touching the view.
    pub fn update_data(
        &self,
        name: &str,
        insert: Value,
        remove: Option<Value>,
        run: RunFlag,
    ) -> BoxFuture<'static, Result<Value>> {
        let changeset = match ChangesetBuilder::from_payload(&self.projector, insert, remove) {
            Ok(changeset) => changeset,
            Err(e) => {
                warn!(id = %self.id(), dataset = name, error = %e, "Data update rejected");
                return future::ready(Err(e)).boxed();
            }
        };
        debug!(id = %self.id(), dataset = name, "Queueing data update");
        self.invoke_args(
            CHANGE_METHOD,
            vec![ViewArg::from(Value::from(name)), ViewArg::from(changeset)],
            run,
        )
    }
}

impl fmt::Debug for WidgetInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WidgetInstance")
            .field("id", &self.id())
            .field("generation", &state.generation)
            .field("promise", &state.promise)
            .finish()
    }
}
