//! Script replay
//!
//! A script is JSON lines; blank lines and lines starting with `//` are
//! skipped. Each step is one of:
//!
//! ```text
//! {"render": {"id": "plot", "chart_spec": {...}, "embed_options": {...}}}
//! {"message": {"name": "updateData", "payload": {"outputId": "plot", ...}}}
//! {"resize": {"id": "plot", "width": 640, "height": 480}}
//! {"event": {"id": "plot", "event": "click", "item": {...}}}
//! ```
//!
//! A render mounts the widget if the page has none with that id. Messages are
//! dispatched in order, each to completion; a failed message is logged and
//! counted, and replay continues. Resizes go to the widget's host hook;
//! events are emitted by the widget's current view as if a user caused them.
//!
//! A listener named `log` is registered for scripts to attach; it logs every
//! call at info level.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use vegawidget::memory::{HeadlessEngine, MemoryPage};
use vegawidget::{
    BridgeConfig, InboundMessage, MessageRouter, RenderPayload, RowSet, WidgetDiscovery,
};

/// One script step
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Render a widget
    Render(RenderStep),
    /// Deliver a server message
    Message(InboundMessage),
    /// Resize a widget's host element
    Resize(ResizeStep),
    /// Emit a view event
    Event(EventStep),
}

/// Render step
#[derive(Debug, Clone, Deserialize)]
pub struct RenderStep {
    /// Element id
    pub id: String,
    #[serde(flatten)]
    pub payload: RenderPayload,
}

/// Resize step
#[derive(Debug, Clone, Deserialize)]
pub struct ResizeStep {
    pub id: String,
    pub width: f64,
    pub height: f64,
}

/// Event step
#[derive(Debug, Clone, Deserialize)]
pub struct EventStep {
    pub id: String,
    pub event: String,
    #[serde(default)]
    pub item: Value,
}

/// Final state of one widget
#[derive(Debug, Clone, Default, Serialize)]
pub struct WidgetReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub datasets: BTreeMap<String, RowSet>,
    pub signals: BTreeMap<String, Value>,
}

/// Replay outcome
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub widgets: BTreeMap<String, WidgetReport>,
    pub messages: usize,
    pub failed: usize,
}

/// Parse a script
pub fn parse_script(text: &str) -> Result<Vec<Step>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with("//")
        })
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid step on line {}", index + 1))
        })
        .collect()
}

/// Replay the script at `path`
pub async fn run(path: &Path, config: Option<&Path>) -> Result<Report> {
    let config = match config {
        Some(path) => BridgeConfig::load_from_file(path)?,
        None => BridgeConfig::default(),
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    let steps = parse_script(&text)?;
    info!(steps = steps.len(), script = %path.display(), "Replaying script");
    replay(steps, config).await
}

/// Replay parsed steps against a fresh headless page
pub async fn replay(steps: Vec<Step>, config: BridgeConfig) -> Result<Report> {
    let engine = Arc::new(HeadlessEngine::new());
    let page = Arc::new(
        MemoryPage::with_callbacks(
            engine.clone(),
            Default::default(),
            config.render.clone(),
        )
        .with_marker_class(config.discovery.marker_class.clone()),
    );
    page.callbacks().register_listener("log", |name, value| {
        info!(name, value = %value, "Listener fired");
    });

    let discovery = WidgetDiscovery::new(page.clone(), config.discovery.clone());
    let router = MessageRouter::new(discovery, page.callbacks().clone());

    let mut report = Report::default();
    for step in steps {
        match step {
            Step::Render(RenderStep { id, payload }) => {
                if page.instance(&id).is_none() {
                    page.mount(&id);
                }
                let promise = page.render(&id, payload)?;
                if let Err(e) = promise.resolved().await {
                    warn!(id = %id, error = %e, "Render failed");
                }
            }
            Step::Message(message) => {
                report.messages += 1;
                if router.handle(message).await.is_err() {
                    report.failed += 1;
                }
            }
            Step::Resize(ResizeStep { id, width, height }) => match page.instance(&id) {
                Some(instance) => instance.resize(width, height),
                None => warn!(id = %id, "Resize for unknown widget"),
            },
            Step::Event(EventStep { id, event, item }) => match engine.view_for(&id) {
                Some(view) => view.emit_event(&event, &item),
                None => warn!(id = %id, event = %event, "Event for widget without a view"),
            },
        }
    }

    for id in page.ids() {
        if let Some(view) = engine.view_for(&id) {
            report.widgets.insert(
                id.clone(),
                WidgetReport {
                    style: page.element(&id).and_then(|e| e.attribute("style")),
                    datasets: view.datasets(),
                    signals: view.signals(),
                },
            );
        }
    }
    Ok(report)
}
