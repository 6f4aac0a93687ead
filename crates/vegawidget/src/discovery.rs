//! # Widget discovery
//!
//! External callers address widgets by selector. The host framework inserts
//! the element before it attaches the widget instance, so a lookup can land in
//! between; discovery polls through that window with a bounded backoff.
//!
//! | element state                          | outcome                      |
//! |----------------------------------------|------------------------------|
//! | no element matches                     | `ElementNotFound`, no retry  |
//! | element lacks the marker class         | `NotAWidget`, no retry       |
//! | marked element, no instance attached   | retry with backoff           |
//! | instance attached                      | resolved                     |
//!
//! Every attempt re-checks all three conditions, so an element removed while
//! discovery is waiting ends in `ElementNotFound`.

use crate::config::DiscoveryConfig;
use crate::errors::{BridgeError, Result};
use crate::promise::ViewHandlePromise;
use crate::widget::WidgetInstance;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What the host page knows about an element
#[derive(Clone, Default)]
pub struct ElementRecord {
    /// Classes on the element
    pub classes: Vec<String>,
    /// Widget instance attached by the host framework, once initialised
    pub instance: Option<Arc<WidgetInstance>>,
}

impl ElementRecord {
    /// Whether the element carries `class`
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

impl fmt::Debug for ElementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementRecord")
            .field("classes", &self.classes)
            .field("attached", &self.instance.is_some())
            .finish()
    }
}

/// Read-only view of the host page's element and widget registry
pub trait PageRegistry: Send + Sync {
    /// Look up the element matching `selector`
    fn query(&self, selector: &str) -> Option<ElementRecord>;
}

/// Finds widget instances by selector
#[derive(Clone)]
pub struct WidgetDiscovery {
    registry: Arc<dyn PageRegistry>,
    config: DiscoveryConfig,
}

impl WidgetDiscovery {
    /// Create a discovery service over `registry`
    pub fn new(registry: Arc<dyn PageRegistry>, config: DiscoveryConfig) -> Self {
        Self { registry, config }
    }

    /// Discovery configuration
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Find the widget instance for `selector`.
    ///
    /// A widget that is already attached resolves on the first poll.
    pub async fn find(&self, selector: &str) -> Result<Arc<WidgetInstance>> {
        let marker = self.config.marker_class.as_str();
        let result = self
            .config
            .retry
            .poll_until(
                |attempt| {
                    let element = self
                        .registry
                        .query(selector)
                        .ok_or_else(|| BridgeError::element_not_found(selector))?;
                    if !element.has_class(marker) {
                        return Err(BridgeError::not_a_widget(selector, marker));
                    }
                    match element.instance {
                        Some(instance) => {
                            if attempt > 0 {
                                debug!(selector, attempt, "Widget attached after retry");
                            }
                            Ok(Some(instance))
                        }
                        None => {
                            trace!(selector, attempt, "Widget not attached yet");
                            Ok(None)
                        }
                    }
                },
                |attempts| BridgeError::DiscoveryTimeout {
                    selector: selector.to_string(),
                    attempts,
                },
            )
            .await;

        if let Err(e) = &result {
            warn!(selector, error = %e, "Widget discovery failed");
        }
        result
    }

    /// Find the widget for a server output id
    pub async fn find_output(&self, output_id: &str) -> Result<Arc<WidgetInstance>> {
        self.find(&self.config.selector_for(output_id)).await
    }

    /// Find the widget for `selector` and return its current view promise
    pub async fn find_view(&self, selector: &str) -> Result<ViewHandlePromise> {
        let instance = self.find(selector).await?;
        instance
            .view_handle_promise()
            .ok_or_else(|| BridgeError::NotRendered {
                id: instance.id().to_string(),
            })
    }

    /// Find the current view promise for a server output id
    pub async fn find_view_output(&self, output_id: &str) -> Result<ViewHandlePromise> {
        self.find_view(&self.config.selector_for(output_id)).await
    }
}

impl fmt::Debug for WidgetDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetDiscovery")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HeadlessEngine, MemoryPage};
    use crate::retry::RetryPolicy;
    use crate::widget::RenderPayload;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use serde_json::json;
    use std::time::Duration;

    fn discovery(page: &Arc<MemoryPage>, retry: RetryPolicy) -> WidgetDiscovery {
        let config = DiscoveryConfig {
            retry,
            ..DiscoveryConfig::default()
        };
        WidgetDiscovery::new(page.clone(), config)
    }

    #[tokio::test]
    async fn test_attached_widget_resolves_without_suspending() {
        let page = Arc::new(MemoryPage::new(Arc::new(HeadlessEngine::new())));
        page.mount("plot");
        let discovery = discovery(&page, RetryPolicy::default());

        let instance = discovery
            .find("#plot")
            .now_or_never()
            .expect("attached widget resolves on first poll")
            .unwrap();
        assert_eq!(instance.id(), "plot");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_element_is_not_retried() {
        let page = Arc::new(MemoryPage::new(Arc::new(HeadlessEngine::new())));
        let discovery = discovery(&page, RetryPolicy::default());

        let result = discovery.find("#nothing").now_or_never();
        assert_matches!(
            result,
            Some(Err(BridgeError::ElementNotFound { selector })) if selector == "#nothing"
        );
        assert_eq!(page.query_count("#nothing"), 1);
    }

    #[tokio::test]
    async fn test_unmarked_element_is_rejected() {
        let page = Arc::new(MemoryPage::new(Arc::new(HeadlessEngine::new())));
        page.insert_plain_element("div1");
        let discovery = discovery(&page, RetryPolicy::default());

        assert_matches!(
            discovery.find("#div1").await,
            Err(BridgeError::NotAWidget { marker, .. }) if marker == "vegawidget"
        );
        assert_eq!(page.query_count("#div1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_attachment_resolves() {
        let page = Arc::new(MemoryPage::new(Arc::new(HeadlessEngine::new())));
        page.insert_element("late");
        let discovery = discovery(
            &page,
            RetryPolicy::fixed(Duration::from_millis(50)).with_max_attempts(100),
        );

        let attach = {
            let page = page.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(175)).await;
                page.attach("late");
            })
        };

        let instance = discovery.find("#late").await.unwrap();
        assert_eq!(instance.id(), "late");
        attach.await.unwrap();
        // lookups at 0, 50, 100, 150 miss; 200 hits
        assert_eq!(page.query_count("#late"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_attached_times_out() {
        let page = Arc::new(MemoryPage::new(Arc::new(HeadlessEngine::new())));
        page.insert_element("stuck");
        let discovery = discovery(
            &page,
            RetryPolicy::fixed(Duration::from_millis(50)).with_max_attempts(4),
        );

        assert_matches!(
            discovery.find("#stuck").await,
            Err(BridgeError::DiscoveryTimeout { attempts: 5, .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_mid_retry_is_not_found() {
        let page = Arc::new(MemoryPage::new(Arc::new(HeadlessEngine::new())));
        page.insert_element("gone");
        let discovery = discovery(
            &page,
            RetryPolicy::fixed(Duration::from_millis(50)).with_max_attempts(100),
        );

        let remove = {
            let page = page.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(75)).await;
                page.remove("gone");
            })
        };

        assert_matches!(
            discovery.find("#gone").await,
            Err(BridgeError::ElementNotFound { .. })
        );
        remove.await.unwrap();
    }

    #[tokio::test]
    async fn test_find_view_requires_render() {
        let page = Arc::new(MemoryPage::new(Arc::new(HeadlessEngine::new())));
        page.mount("plot");
        let discovery = discovery(&page, RetryPolicy::default());

        assert_matches!(
            discovery.find_view("#plot").await,
            Err(BridgeError::NotRendered { .. })
        );

        page.render("plot", RenderPayload::new(json!({}))).unwrap();
        let promise = discovery.find_view("#plot").await.unwrap();
        assert!(promise.resolved().await.is_ok());
    }

    #[tokio::test]
    async fn test_output_ids_use_configured_prefix() {
        let page = Arc::new(MemoryPage::new(Arc::new(HeadlessEngine::new())));
        page.mount("plot");
        page.render("plot", RenderPayload::new(json!({}))).unwrap();
        let discovery = discovery(&page, RetryPolicy::default());

        let promise = discovery.find_view_output("plot").await.unwrap();
        assert_eq!(promise.generation(), 1);
        assert_eq!(page.query_count("#plot"), 1);
        assert_matches!(
            discovery.find_view_output("other").await,
            Err(BridgeError::ElementNotFound { selector }) if selector == "#other"
        );
    }
}
