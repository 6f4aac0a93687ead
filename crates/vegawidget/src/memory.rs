//! # In-memory page and headless engine
//!
//! A complete, display-free implementation of the external collaborators:
//!
//! - [`MemoryElement`]: host element recording its attributes
//! - [`MemoryPage`]: element + widget registry implementing [`PageRegistry`]
//! - [`HeadlessEngine`] / [`HeadlessView`]: an engine whose views keep
//!   datasets and signals in memory, apply changesets, fire listeners on
//!   `run()`, and record every call they receive
//!
//! Used by the replay CLI and by tests.
//!
//! Supported view methods: `change(name, changeset)`, `data(name[, rows])`,
//! `signal(name[, value])`, `width([value])`, `height([value])`, `resize()`.

use crate::callbacks::{CallbackRegistry, ListenerCallback, ListenerKind};
use crate::config::RenderConfig;
use crate::data::{Record, RowSet};
use crate::discovery::{ElementRecord, PageRegistry};
use crate::errors::{BridgeError, Result};
use crate::promise::ViewHandlePromise;
use crate::view::{change_args, HostElement, RenderEngine, ViewArg, ViewHandle, CHANGE_METHOD};
use crate::widget::{RenderPayload, WidgetInstance};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Host element
// =============================================================================

/// Host element that stores its attributes
#[derive(Debug)]
pub struct MemoryElement {
    id: String,
    attributes: Mutex<HashMap<String, String>>,
}

impl MemoryElement {
    /// Create an element with `id`
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    /// Current value of an attribute
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.lock().get(name).cloned()
    }
}

impl HostElement for MemoryElement {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.attributes
            .lock()
            .insert(name.to_string(), value.to_string());
    }
}

// =============================================================================
// Page registry
// =============================================================================

struct PageEntry {
    element: Arc<MemoryElement>,
    classes: Vec<String>,
    instance: Option<Arc<WidgetInstance>>,
}

/// In-memory page: elements by id, each optionally carrying a widget
pub struct MemoryPage {
    engine: Arc<dyn RenderEngine>,
    callbacks: Arc<CallbackRegistry>,
    render_config: RenderConfig,
    marker_class: String,
    elements: Mutex<BTreeMap<String, PageEntry>>,
    queries: Mutex<HashMap<String, usize>>,
}

impl MemoryPage {
    /// Create a page whose widgets render with `engine`
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self::with_callbacks(
            engine,
            Arc::new(CallbackRegistry::new()),
            RenderConfig::default(),
        )
    }

    /// Create a page sharing `callbacks` with the rest of the application
    pub fn with_callbacks(
        engine: Arc<dyn RenderEngine>,
        callbacks: Arc<CallbackRegistry>,
        render_config: RenderConfig,
    ) -> Self {
        Self {
            engine,
            callbacks,
            render_config,
            marker_class: "vegawidget".to_string(),
            elements: Mutex::new(BTreeMap::new()),
            queries: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different widget marker class for elements inserted afterwards
    pub fn with_marker_class(mut self, marker_class: impl Into<String>) -> Self {
        self.marker_class = marker_class.into();
        self
    }

    /// Callback registry shared by this page's widgets
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// Insert a widget placeholder element without attaching an instance
    pub fn insert_element(&self, id: &str) -> Arc<MemoryElement> {
        self.insert(id, vec![self.marker_class.clone()])
    }

    /// Insert an element that is not a widget
    pub fn insert_plain_element(&self, id: &str) -> Arc<MemoryElement> {
        self.insert(id, Vec::new())
    }

    fn insert(&self, id: &str, classes: Vec<String>) -> Arc<MemoryElement> {
        let element = Arc::new(MemoryElement::new(id));
        self.elements.lock().insert(
            id.to_string(),
            PageEntry {
                element: Arc::clone(&element),
                classes,
                instance: None,
            },
        );
        element
    }

    /// Attach a widget instance to an existing element
    pub fn attach(&self, id: &str) -> Option<Arc<WidgetInstance>> {
        let mut elements = self.elements.lock();
        let entry = elements.get_mut(id)?;
        let instance = Arc::new(WidgetInstance::new(
            entry.element.clone(),
            Arc::clone(&self.engine),
            Arc::clone(&self.callbacks),
            self.render_config.clone(),
        ));
        entry.instance = Some(Arc::clone(&instance));
        debug!(id, "Widget attached");
        Some(instance)
    }

    /// Insert a placeholder and attach its instance
    pub fn mount(&self, id: &str) -> Arc<WidgetInstance> {
        let element = self.insert_element(id);
        let instance = Arc::new(WidgetInstance::new(
            element,
            Arc::clone(&self.engine),
            Arc::clone(&self.callbacks),
            self.render_config.clone(),
        ));
        if let Some(entry) = self.elements.lock().get_mut(id) {
            entry.instance = Some(Arc::clone(&instance));
        }
        instance
    }

    /// Render the widget on element `id`
    pub fn render(&self, id: &str, payload: RenderPayload) -> Result<ViewHandlePromise> {
        let instance = self
            .instance(id)
            .ok_or_else(|| BridgeError::element_not_found(format!("#{id}")))?;
        instance.render(payload)
    }

    /// Remove element `id` and its widget
    pub fn remove(&self, id: &str) -> bool {
        self.elements.lock().remove(id).is_some()
    }

    /// Widget attached to element `id`
    pub fn instance(&self, id: &str) -> Option<Arc<WidgetInstance>> {
        self.elements.lock().get(id)?.instance.clone()
    }

    /// Element `id`
    pub fn element(&self, id: &str) -> Option<Arc<MemoryElement>> {
        self.elements.lock().get(id).map(|entry| entry.element.clone())
    }

    /// Ids of all elements, sorted
    pub fn ids(&self) -> Vec<String> {
        self.elements.lock().keys().cloned().collect()
    }

    /// How many times `selector` has been queried
    pub fn query_count(&self, selector: &str) -> usize {
        self.queries.lock().get(selector).copied().unwrap_or(0)
    }
}

impl PageRegistry for MemoryPage {
    fn query(&self, selector: &str) -> Option<ElementRecord> {
        *self.queries.lock().entry(selector.to_string()).or_default() += 1;

        // id selectors only
        let id = selector.strip_prefix('#')?;
        let elements = self.elements.lock();
        let entry = elements.get(id)?;
        Some(ElementRecord {
            classes: entry.classes.clone(),
            instance: entry.instance.clone(),
        })
    }
}

// =============================================================================
// Headless engine
// =============================================================================

/// Engine producing [`HeadlessView`]s
#[derive(Default)]
pub struct HeadlessEngine {
    delay: Option<Duration>,
    views: Mutex<Vec<Arc<HeadlessView>>>,
    by_element: Mutex<BTreeMap<String, Arc<HeadlessView>>>,
}

impl HeadlessEngine {
    /// Create an engine that builds views immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine that takes `delay` to build each view
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Every view built so far, oldest first
    pub fn views(&self) -> Vec<Arc<HeadlessView>> {
        self.views.lock().clone()
    }

    /// Most recently built view
    pub fn last_view(&self) -> Option<Arc<HeadlessView>> {
        self.views.lock().last().cloned()
    }

    /// Most recently built view inside element `id`
    pub fn view_for(&self, id: &str) -> Option<Arc<HeadlessView>> {
        self.by_element.lock().get(id).cloned()
    }
}

#[async_trait]
impl RenderEngine for HeadlessEngine {
    async fn embed(
        &self,
        element: Arc<dyn HostElement>,
        spec: Value,
        _options: Option<Value>,
    ) -> Result<Arc<dyn ViewHandle>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let view = Arc::new(HeadlessView::from_spec(&spec)?);
        self.views.lock().push(Arc::clone(&view));
        self.by_element
            .lock()
            .insert(element.id().to_string(), Arc::clone(&view));
        debug!(element = element.id(), "Headless view built");
        Ok(view)
    }
}

// =============================================================================
// Headless view
// =============================================================================

/// A call received by a [`HeadlessView`]
#[derive(Clone, Debug)]
pub struct RecordedCall {
    /// Method name; `run` for [`ViewHandle::run`]
    pub method: String,
    /// Arguments as passed
    pub args: Vec<ViewArg>,
}

#[derive(Default)]
struct ViewState {
    datasets: BTreeMap<String, RowSet>,
    signals: BTreeMap<String, Value>,
    dirty_data: BTreeSet<String>,
    dirty_signals: BTreeSet<String>,
    listeners: Vec<(ListenerKind, String, ListenerCallback)>,
    calls: Vec<RecordedCall>,
}

/// In-memory view with datasets and signals
#[derive(Default)]
pub struct HeadlessView {
    state: Mutex<ViewState>,
}

impl HeadlessView {
    /// Create an empty view
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a view from a spec's `data`, `datasets` and `signals` entries.
    ///
    /// `data` must be a list of `{name, values?}`; `datasets` a map of name to
    /// rows; `signals` a list of `{name, value?}`.
    pub fn from_spec(spec: &Value) -> Result<Self> {
        let mut state = ViewState::default();

        if let Some(data) = spec.get("data") {
            let entries = data
                .as_array()
                .ok_or_else(|| BridgeError::view_construction("'data' must be a list"))?;
            for entry in entries {
                let name = entry.get("name").and_then(Value::as_str).ok_or_else(|| {
                    BridgeError::view_construction("every data entry needs a name")
                })?;
                let rows = match entry.get("values") {
                    Some(values) => rows_from(values)?,
                    None => Vec::new(),
                };
                state.datasets.insert(name.to_string(), rows);
            }
        }

        if let Some(datasets) = spec.get("datasets") {
            let datasets = datasets
                .as_object()
                .ok_or_else(|| BridgeError::view_construction("'datasets' must be an object"))?;
            for (name, values) in datasets {
                state.datasets.insert(name.clone(), rows_from(values)?);
            }
        }

        if let Some(signals) = spec.get("signals") {
            let entries = signals
                .as_array()
                .ok_or_else(|| BridgeError::view_construction("'signals' must be a list"))?;
            for entry in entries {
                let name = entry.get("name").and_then(Value::as_str).ok_or_else(|| {
                    BridgeError::view_construction("every signal needs a name")
                })?;
                let value = entry.get("value").cloned().unwrap_or(Value::Null);
                state.signals.insert(name.to_string(), value);
            }
        }

        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Rows of dataset `name`
    pub fn dataset(&self, name: &str) -> Option<RowSet> {
        self.state.lock().datasets.get(name).cloned()
    }

    /// All datasets
    pub fn datasets(&self) -> BTreeMap<String, RowSet> {
        self.state.lock().datasets.clone()
    }

    /// Current value of signal `name`
    pub fn signal(&self, name: &str) -> Option<Value> {
        self.state.lock().signals.get(name).cloned()
    }

    /// All signals
    pub fn signals(&self) -> BTreeMap<String, Value> {
        self.state.lock().signals.clone()
    }

    /// Every call received, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Method names of every call received, in order
    pub fn call_names(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|call| call.method.clone())
            .collect()
    }

    /// How many times the view has been run
    pub fn run_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == "run")
            .count()
    }

    /// Simulate a user interaction: call event listeners for `event`
    pub fn emit_event(&self, event: &str, item: &Value) {
        let handlers = self.handlers_for(ListenerKind::Event, event);
        for handler in handlers {
            handler(event, item);
        }
    }

    fn handlers_for(&self, kind: ListenerKind, name: &str) -> Vec<ListenerCallback> {
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|(k, n, _)| *k == kind && n == name)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect()
    }

    fn add_listener(&self, kind: ListenerKind, name: &str, handler: ListenerCallback) {
        self.state
            .lock()
            .listeners
            .push((kind, name.to_string(), handler));
    }

    fn dispatch(&self, method: &str, args: &[ViewArg]) -> Result<Value> {
        let mut state = self.state.lock();
        match method {
            CHANGE_METHOD => {
                let (name, changeset) = change_args(args)?;
                let rows = state.datasets.get_mut(name).ok_or_else(|| {
                    BridgeError::view_operation(method, format!("Unrecognized data set: {name}"))
                })?;
                changeset
                    .apply(rows)
                    .map_err(|e| BridgeError::view_operation(method, e.to_string()))?;
                state.dirty_data.insert(name.to_string());
                Ok(Value::Null)
            }
            "data" => match args {
                [name] => {
                    let name = arg_str(method, name)?;
                    let rows = state.datasets.get(name).ok_or_else(|| {
                        BridgeError::view_operation(method, format!("Unrecognized data set: {name}"))
                    })?;
                    Ok(rows_to_value(rows))
                }
                [name, values] => {
                    let name = arg_str(method, name)?.to_string();
                    let values = values.as_value().ok_or_else(|| {
                        BridgeError::invalid_argument(method, "rows must be JSON")
                    })?;
                    let rows = rows_from(values)
                        .map_err(|e| BridgeError::invalid_argument(method, e.to_string()))?;
                    state.datasets.insert(name.clone(), rows);
                    state.dirty_data.insert(name);
                    Ok(Value::Null)
                }
                _ => Err(BridgeError::invalid_argument(method, "expected 1 or 2 arguments")),
            },
            "signal" => match args {
                [name] => {
                    let name = arg_str(method, name)?;
                    state.signals.get(name).cloned().ok_or_else(|| {
                        BridgeError::view_operation(method, format!("Unrecognized signal name: {name}"))
                    })
                }
                [name, value] => {
                    let name = arg_str(method, name)?.to_string();
                    let value = value.as_value().cloned().ok_or_else(|| {
                        BridgeError::invalid_argument(method, "signal value must be JSON")
                    })?;
                    state.signals.insert(name.clone(), value);
                    state.dirty_signals.insert(name);
                    Ok(Value::Null)
                }
                _ => Err(BridgeError::invalid_argument(method, "expected 1 or 2 arguments")),
            },
            "width" | "height" => match args {
                [] => Ok(state.signals.get(method).cloned().unwrap_or(json!(0))),
                [value] => {
                    let value = value
                        .as_value()
                        .filter(|v| v.is_number())
                        .cloned()
                        .ok_or_else(|| BridgeError::invalid_argument(method, "expected a number"))?;
                    state.signals.insert(method.to_string(), value);
                    state.dirty_signals.insert(method.to_string());
                    Ok(Value::Null)
                }
                _ => Err(BridgeError::invalid_argument(method, "expected 0 or 1 arguments")),
            },
            "resize" => Ok(Value::Null),
            _ => Err(BridgeError::method_not_found(method)),
        }
    }
}

#[async_trait]
impl ViewHandle for HeadlessView {
    async fn invoke(&self, method: &str, args: Vec<ViewArg>) -> Result<Value> {
        let result = self.dispatch(method, &args);
        self.state.lock().calls.push(RecordedCall {
            method: method.to_string(),
            args,
        });
        result
    }

    async fn run(&self) -> Result<()> {
        let (signals, data) = {
            let mut state = self.state.lock();
            state.calls.push(RecordedCall {
                method: "run".to_string(),
                args: Vec::new(),
            });
            let signals: Vec<(String, Value)> = std::mem::take(&mut state.dirty_signals)
                .into_iter()
                .map(|name| {
                    let value = state.signals.get(&name).cloned().unwrap_or(Value::Null);
                    (name, value)
                })
                .collect();
            let data: Vec<(String, Value)> = std::mem::take(&mut state.dirty_data)
                .into_iter()
                .map(|name| {
                    let value = state
                        .datasets
                        .get(&name)
                        .map(rows_to_value)
                        .unwrap_or(Value::Null);
                    (name, value)
                })
                .collect();
            (signals, data)
        };

        // listeners run outside the lock so they may call back into the view
        for (name, value) in signals {
            for handler in self.handlers_for(ListenerKind::Signal, &name) {
                handler(&name, &value);
            }
        }
        for (name, value) in data {
            for handler in self.handlers_for(ListenerKind::Data, &name) {
                handler(&name, &value);
            }
        }
        Ok(())
    }

    fn add_event_listener(&self, event: &str, handler: ListenerCallback) -> Result<()> {
        self.add_listener(ListenerKind::Event, event, handler);
        Ok(())
    }

    fn add_signal_listener(&self, name: &str, handler: ListenerCallback) -> Result<()> {
        if !self.state.lock().signals.contains_key(name) {
            return Err(BridgeError::view_operation(
                "addSignalListener",
                format!("Unrecognized signal name: {name}"),
            ));
        }
        self.add_listener(ListenerKind::Signal, name, handler);
        Ok(())
    }

    fn add_data_listener(&self, name: &str, handler: ListenerCallback) -> Result<()> {
        if !self.state.lock().datasets.contains_key(name) {
            return Err(BridgeError::view_operation(
                "addDataListener",
                format!("Unrecognized data set: {name}"),
            ));
        }
        self.add_listener(ListenerKind::Data, name, handler);
        Ok(())
    }
}

fn arg_str<'a>(method: &str, arg: &'a ViewArg) -> Result<&'a str> {
    arg.as_str()
        .ok_or_else(|| BridgeError::invalid_argument(method, "name must be a string"))
}

fn rows_from(values: &Value) -> Result<RowSet> {
    let items = values
        .as_array()
        .ok_or_else(|| BridgeError::view_construction("dataset values must be a list"))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .cloned()
                .ok_or_else(|| BridgeError::view_construction("dataset rows must be objects"))
        })
        .collect::<Result<Vec<Record>>>()
}

fn rows_to_value(rows: &RowSet) -> Value {
    Value::Array(rows.iter().cloned().map(Value::Object).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ChangesetBuilder;
    use assert_matches::assert_matches;

    fn spec() -> Value {
        json!({
            "data": [{"name": "source", "values": [{"a": 1}, {"a": 2}]}],
            "signals": [{"name": "brush", "value": null}]
        })
    }

    #[tokio::test]
    async fn test_change_and_run_fire_data_listener() {
        let view = HeadlessView::from_spec(&spec()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        view.add_data_listener(
            "source",
            Arc::new(move |name: &str, value: &Value| sink.lock().push((name.to_string(), value.clone()))),
        )
        .unwrap();

        let changeset = ChangesetBuilder::build(
            crate::data::UpdateTerm::Rows(vec![json!({"a": 9}).as_object().unwrap().clone()]),
            None,
        );
        view.invoke(
            CHANGE_METHOD,
            vec![ViewArg::from(json!("source")), ViewArg::from(changeset)],
        )
        .await
        .unwrap();
        assert!(seen.lock().is_empty());

        view.run().await.unwrap();
        assert_eq!(
            *seen.lock(),
            vec![("source".to_string(), json!([{"a": 9}]))]
        );
        assert_eq!(view.call_names(), vec!["change", "run"]);
    }

    #[tokio::test]
    async fn test_signal_round_trip() {
        let view = HeadlessView::from_spec(&spec()).unwrap();
        view.invoke("signal", vec![ViewArg::from(json!("brush")), ViewArg::from(json!([1, 2]))])
            .await
            .unwrap();
        let value = view
            .invoke("signal", vec![ViewArg::from(json!("brush"))])
            .await
            .unwrap();
        assert_eq!(value, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_unknown_method_and_dataset() {
        let view = HeadlessView::from_spec(&spec()).unwrap();
        assert_matches!(
            view.invoke("noSuchMethod", vec![]).await,
            Err(BridgeError::MethodNotFound { .. })
        );
        assert_matches!(
            view.invoke("data", vec![ViewArg::from(json!("missing"))]).await,
            Err(BridgeError::ViewOperation { .. })
        );
        assert!(view
            .add_signal_listener("missing", Arc::new(|_: &str, _: &Value| {}))
            .is_err());
    }

    #[test]
    fn test_invalid_spec() {
        assert_matches!(
            HeadlessView::from_spec(&json!({"data": {"name": "x"}})).map(|_| ()),
            Err(BridgeError::ViewConstruction { .. })
        );
        let view = HeadlessView::from_spec(&json!({"datasets": {"d": [{"x": 1}]}})).unwrap();
        assert_eq!(view.dataset("d").map(|rows| rows.len()), Some(1));
    }

    #[test]
    fn test_page_query() {
        let page = MemoryPage::new(Arc::new(HeadlessEngine::new()));
        page.insert_element("a");
        let record = page.query("#a").unwrap();
        assert!(record.has_class("vegawidget"));
        assert!(record.instance.is_none());
        assert!(page.query(".a").is_none());
        assert_eq!(page.query_count("#a"), 1);

        page.attach("a");
        assert!(page.query("#a").unwrap().instance.is_some());
    }
}
