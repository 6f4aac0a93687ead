//! # Message router
//!
//! Translates server messages into calls on widgets and views.
//!
//! | message                                 | target   | action                          |
//! |-----------------------------------------|----------|---------------------------------|
//! | `invoke` (`callView`)                   | instance | `invoke(fn, params, run)`       |
//! | `updateData` (`changeData`)             | instance | `update_data(name, ...)`        |
//! | `addSignalListener` / `addDataListener` | view     | attach a registered listener    |
//! | `addEventListener`                      | view     | attach a registered listener    |
//! | `run`                                   | view     | `run()`                         |
//!
//! Handlers are named by `handlerBody` and looked up in the
//! [`CallbackRegistry`]; nothing in a message is executed as code.

use crate::callbacks::{CallbackRegistry, ListenerKind};
use crate::discovery::WidgetDiscovery;
use crate::errors::{BridgeError, Result};
use crate::invoker::RunFlag;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// A raw message as received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message name
    pub name: String,
    /// Message payload
    #[serde(default)]
    pub payload: Value,
}

impl InboundMessage {
    /// Create a message
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// `invoke` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokePayload {
    /// Target output id
    #[serde(rename = "outputId")]
    pub output_id: String,
    /// View method name
    #[serde(rename = "fn")]
    pub method: String,
    /// Method arguments
    #[serde(default)]
    pub params: Option<Vec<Value>>,
    /// Run after the call
    #[serde(default)]
    pub run: RunFlag,
}

/// `updateData` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDataPayload {
    /// Target output id
    #[serde(rename = "outputId")]
    pub output_id: String,
    /// Dataset name
    pub name: String,
    /// Rows to insert
    #[serde(default)]
    pub data_insert: Value,
    /// Rows to remove; omitted clears the dataset
    #[serde(default)]
    pub data_remove: Option<Value>,
    /// Run after the change
    #[serde(default)]
    pub run: RunFlag,
}

/// `addSignalListener` / `addDataListener` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerPayload {
    /// Target output id
    #[serde(rename = "outputId")]
    pub output_id: String,
    /// Signal or dataset name
    pub name: String,
    /// Registered listener name
    #[serde(rename = "handlerBody")]
    pub handler: String,
}

/// `addEventListener` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventListenerPayload {
    /// Target output id
    #[serde(rename = "outputId")]
    pub output_id: String,
    /// Event type
    pub event: String,
    /// Registered listener name
    #[serde(rename = "handlerBody")]
    pub handler: String,
}

/// `run` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPayload {
    /// Target output id
    #[serde(rename = "outputId")]
    pub output_id: String,
}

/// A parsed server message
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteMessage {
    /// Call a view method
    Invoke(InvokePayload),
    /// Apply a changeset
    UpdateData(UpdateDataPayload),
    /// Attach a signal listener
    AddSignalListener(ListenerPayload),
    /// Attach a data listener
    AddDataListener(ListenerPayload),
    /// Attach an event listener
    AddEventListener(EventListenerPayload),
    /// Run the view
    Run(RunPayload),
}

impl RemoteMessage {
    /// Parse a message by name; `callView` and `changeData` are accepted as
    /// aliases of `invoke` and `updateData`.
    pub fn parse(name: &str, payload: Value) -> Result<Self> {
        Ok(match name {
            "invoke" | "callView" => Self::Invoke(decode(name, payload)?),
            "updateData" | "changeData" => Self::UpdateData(decode(name, payload)?),
            "addSignalListener" => Self::AddSignalListener(decode(name, payload)?),
            "addDataListener" => Self::AddDataListener(decode(name, payload)?),
            "addEventListener" => Self::AddEventListener(decode(name, payload)?),
            "run" => Self::Run(decode(name, payload)?),
            _ => {
                return Err(BridgeError::UnknownMessage {
                    name: name.to_string(),
                })
            }
        })
    }

    /// Canonical message name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invoke(_) => "invoke",
            Self::UpdateData(_) => "updateData",
            Self::AddSignalListener(_) => "addSignalListener",
            Self::AddDataListener(_) => "addDataListener",
            Self::AddEventListener(_) => "addEventListener",
            Self::Run(_) => "run",
        }
    }

    /// Output the message is addressed to
    pub fn output_id(&self) -> &str {
        match self {
            Self::Invoke(p) => &p.output_id,
            Self::UpdateData(p) => &p.output_id,
            Self::AddSignalListener(p) | Self::AddDataListener(p) => &p.output_id,
            Self::AddEventListener(p) => &p.output_id,
            Self::Run(p) => &p.output_id,
        }
    }
}

impl TryFrom<InboundMessage> for RemoteMessage {
    type Error = BridgeError;

    fn try_from(message: InboundMessage) -> Result<Self> {
        Self::parse(&message.name, message.payload)
    }
}

fn decode<T: DeserializeOwned>(name: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| BridgeError::malformed(format!("{name} payload: {e}")))
}

/// Totals reported by [`MessageRouter::serve`] once its channel closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    /// Messages received
    pub received: usize,
    /// Messages that failed
    pub failed: usize,
}

impl ServeSummary {
    fn record(&mut self, outcome: std::result::Result<Result<Value>, JoinError>) {
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => self.failed += 1,
            Err(e) => {
                warn!(error = %e, "Message task aborted");
                self.failed += 1;
            }
        }
    }
}

/// Routes server messages to widgets found through discovery
#[derive(Clone, Debug)]
pub struct MessageRouter {
    discovery: WidgetDiscovery,
    callbacks: Arc<CallbackRegistry>,
}

impl MessageRouter {
    /// Create a router
    pub fn new(discovery: WidgetDiscovery, callbacks: Arc<CallbackRegistry>) -> Self {
        Self {
            discovery,
            callbacks,
        }
    }

    /// Discovery service used to find targets
    pub fn discovery(&self) -> &WidgetDiscovery {
        &self.discovery
    }

    /// Parse and dispatch a raw message
    pub async fn handle(&self, message: InboundMessage) -> Result<Value> {
        let parsed = parse_inbound(message)?;
        self.dispatch(parsed).await
    }

    /// Dispatch a parsed message.
    ///
    /// Returns the view method's result for `invoke`/`updateData` and `null`
    /// otherwise. Failures are logged here and returned.
    pub async fn dispatch(&self, message: RemoteMessage) -> Result<Value> {
        let kind = message.kind();
        let output_id = message.output_id().to_string();
        let result = match self.enqueue(message).await {
            Ok(pending) => pending.await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            log_failure(kind, &output_id, e);
        }
        result
    }

    /// Find the message's target and queue its action there.
    ///
    /// Completes as soon as the action sits in the target's continuation
    /// queue; the returned future yields the action's result.
    async fn enqueue(&self, message: RemoteMessage) -> Result<Pending> {
        debug!(
            message = message.kind(),
            output_id = %message.output_id(),
            "Dispatching server message"
        );
        match message {
            RemoteMessage::Invoke(p) => {
                let instance = self.discovery.find_output(&p.output_id).await?;
                Ok(instance.invoke(&p.method, p.params.unwrap_or_default(), p.run))
            }
            RemoteMessage::UpdateData(p) => {
                let instance = self.discovery.find_output(&p.output_id).await?;
                Ok(instance.update_data(&p.name, p.data_insert, p.data_remove, p.run))
            }
            RemoteMessage::AddSignalListener(p) => {
                self.attach_listener(ListenerKind::Signal, p.output_id, p.name, &p.handler)
                    .await
            }
            RemoteMessage::AddDataListener(p) => {
                self.attach_listener(ListenerKind::Data, p.output_id, p.name, &p.handler)
                    .await
            }
            RemoteMessage::AddEventListener(p) => {
                self.attach_listener(ListenerKind::Event, p.output_id, p.event, &p.handler)
                    .await
            }
            RemoteMessage::Run(p) => {
                let promise = self.discovery.find_view_output(&p.output_id).await?;
                Ok(promise
                    .then(|view| async move { view.run().await.map(|()| Value::Null) })
                    .boxed())
            }
        }
    }

    async fn attach_listener(
        &self,
        kind: ListenerKind,
        output_id: String,
        name: String,
        handler: &str,
    ) -> Result<Pending> {
        let promise = self.discovery.find_view_output(&output_id).await?;
        let callback = self.callbacks.listener(kind, handler)?;
        let handler = handler.to_string();

        Ok(promise
            .then(move |view| async move {
                match kind {
                    ListenerKind::Signal => view.add_signal_listener(&name, callback),
                    ListenerKind::Data => view.add_data_listener(&name, callback),
                    ListenerKind::Event => view.add_event_listener(&name, callback),
                }?;
                let (first, second) = kind.parameter_names();
                info!(
                    output_id = %output_id,
                    %kind,
                    target = %name,
                    handler = %handler,
                    called_with = %format!("({first}, {second})"),
                    "Listener attached"
                );
                Ok(Value::Null)
            })
            .boxed())
    }

    /// Consume `inbound` until it closes.
    ///
    /// Messages for the same output are queued on their target in arrival
    /// order: each one starts discovery only after the previous message for
    /// that output has been queued or has failed to find its target. Results
    /// are awaited concurrently and finished tasks are reaped as new messages
    /// arrive.
    pub async fn serve(
        &self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> ServeSummary {
        let mut tasks: JoinSet<Result<Value>> = JoinSet::new();
        let mut queued: HashMap<String, oneshot::Receiver<()>> = HashMap::new();
        let mut summary = ServeSummary::default();

        while let Some(message) = inbound.recv().await {
            summary.received += 1;
            while let Some(done) = tasks.try_join_next() {
                summary.record(done);
            }

            let Ok(message) = parse_inbound(message) else {
                summary.failed += 1;
                continue;
            };

            let (signal, gate) = oneshot::channel();
            let previous = queued.insert(message.output_id().to_string(), gate);
            let router = self.clone();
            tasks.spawn(async move {
                if let Some(previous) = previous {
                    // a dropped sender also releases the gate
                    let _ = previous.await;
                }
                let kind = message.kind();
                let output_id = message.output_id().to_string();
                let pending = router.enqueue(message).await;
                let _ = signal.send(());

                let result = match pending {
                    Ok(pending) => pending.await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    log_failure(kind, &output_id, e);
                }
                result
            });
        }

        while let Some(done) = tasks.join_next().await {
            summary.record(done);
        }
        debug!(received = summary.received, failed = summary.failed, "Message channel closed");
        summary
    }
}

/// Result of an action already queued on a view promise
type Pending = BoxFuture<'static, Result<Value>>;

fn parse_inbound(message: InboundMessage) -> Result<RemoteMessage> {
    let name = message.name.clone();
    RemoteMessage::try_from(message).map_err(|e| {
        warn!(message = %name, error = %e, "Rejected server message");
        e
    })
}

fn log_failure(kind: &str, output_id: &str, error: &BridgeError) {
    warn!(
        message = kind,
        output_id,
        category = %error.category(),
        retryable = error.is_retryable(),
        error = %error,
        "Server message failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::memory::{HeadlessEngine, MemoryPage};
    use crate::widget::RenderPayload;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn setup() -> (Arc<MemoryPage>, Arc<HeadlessEngine>, MessageRouter) {
        let engine = Arc::new(HeadlessEngine::new());
        let page = Arc::new(MemoryPage::new(engine.clone()));
        let discovery = WidgetDiscovery::new(page.clone(), DiscoveryConfig::default());
        let router = MessageRouter::new(discovery, page.callbacks().clone());
        (page, engine, router)
    }

    #[test]
    fn test_parse_aliases() {
        let payload = json!({"outputId": "p", "fn": "resize"});
        let canonical = RemoteMessage::parse("invoke", payload.clone()).unwrap();
        let legacy = RemoteMessage::parse("callView", payload).unwrap();
        assert_eq!(canonical, legacy);
        assert_eq!(legacy.kind(), "invoke");

        let update = RemoteMessage::parse(
            "changeData",
            json!({"outputId": "p", "name": "src", "data_insert": []}),
        )
        .unwrap();
        assert_matches!(update, RemoteMessage::UpdateData(UpdateDataPayload { data_remove: None, .. }));
    }

    #[test]
    fn test_parse_run_flag() {
        let parse = |payload| match RemoteMessage::parse("invoke", payload).unwrap() {
            RemoteMessage::Invoke(p) => p.run,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(parse(json!({"outputId": "p", "fn": "f"})), RunFlag(None));
        assert_eq!(parse(json!({"outputId": "p", "fn": "f", "run": null})), RunFlag(None));
        assert_eq!(parse(json!({"outputId": "p", "fn": "f", "run": false})), RunFlag::SKIP);
    }

    #[test]
    fn test_parse_errors() {
        assert_matches!(
            RemoteMessage::parse("evalJs", json!({})),
            Err(BridgeError::UnknownMessage { name }) if name == "evalJs"
        );
        assert_matches!(
            RemoteMessage::parse("run", json!({"id": "p"})),
            Err(BridgeError::MalformedPayload { .. })
        );
    }

    #[tokio::test]
    async fn test_signal_listener_via_registry() {
        let (page, engine, router) = setup();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        page.callbacks()
            .register_listener("on_brush", move |name, value| {
                sink.lock().push((name.to_string(), value.clone()))
            });
        page.mount("plot");
        page.render(
            "plot",
            RenderPayload::new(json!({"signals": [{"name": "brush", "value": 0}]})),
        )
        .unwrap();

        router
            .handle(InboundMessage::new(
                "addSignalListener",
                json!({"outputId": "plot", "name": "brush", "handlerBody": "on_brush"}),
            ))
            .await
            .unwrap();
        router
            .handle(InboundMessage::new(
                "invoke",
                json!({"outputId": "plot", "fn": "signal", "params": ["brush", 5]}),
            ))
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec![("brush".to_string(), json!(5))]);
        let view = engine.last_view().unwrap();
        assert_eq!(view.call_names(), vec!["signal", "run"]);
    }

    #[tokio::test]
    async fn test_unregistered_handler_is_rejected() {
        let (page, _engine, router) = setup();
        page.mount("plot");
        page.render("plot", RenderPayload::new(json!({}))).unwrap();

        assert_matches!(
            router
                .handle(InboundMessage::new(
                    "addEventListener",
                    json!({"outputId": "plot", "event": "click", "handlerBody": "function(e){}"}),
                ))
                .await,
            Err(BridgeError::UnknownCallback { kind, .. }) if kind == "event listener"
        );
    }

    #[tokio::test]
    async fn test_run_message() {
        let (page, engine, router) = setup();
        page.mount("plot");
        page.render("plot", RenderPayload::new(json!({}))).unwrap();

        router
            .handle(InboundMessage::new("run", json!({"outputId": "plot"})))
            .await
            .unwrap();
        assert_eq!(engine.last_view().unwrap().run_count(), 1);
    }

    #[tokio::test]
    async fn test_view_targets_use_output_selector() {
        let (page, _engine, router) = setup();
        page.mount("plot");
        page.render(
            "plot",
            RenderPayload::new(json!({"data": [{"name": "src", "values": []}]})),
        )
        .unwrap();
        page.callbacks().register_listener("noop", |_, _| {});

        assert_matches!(
            router.handle(InboundMessage::new("run", json!({"outputId": "other"}))).await,
            Err(BridgeError::ElementNotFound { selector }) if selector == "#other"
        );
        router
            .handle(InboundMessage::new(
                "addDataListener",
                json!({"outputId": "plot", "name": "src", "handlerBody": "noop"}),
            ))
            .await
            .unwrap();
        assert_eq!(page.query_count("#plot"), 1);
        assert_eq!(page.query_count("#other"), 1);
    }

    #[tokio::test]
    async fn test_serve_counts_failures() {
        let (page, _engine, router) = setup();
        page.mount("plot");
        page.render("plot", RenderPayload::new(json!({}))).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(InboundMessage::new("run", json!({"outputId": "plot"}))).unwrap();
        tx.send(InboundMessage::new("bogus", json!({}))).unwrap();
        tx.send(InboundMessage::new("run", json!({"outputId": "missing"}))).unwrap();
        drop(tx);

        let summary = router.serve(rx).await;
        assert_eq!(summary, ServeSummary { received: 3, failed: 2 });
    }
}
