//! # ViewHandlePromise
//!
//! A view does not exist when its widget is created; the engine builds it
//! asynchronously. `ViewHandlePromise` stands in for the view from the moment
//! construction starts:
//!
//! - [`ViewHandlePromise::resolved`] can be awaited by any number of callers,
//!   all observing the same result.
//! - [`ViewHandlePromise::then`] queues a continuation. Continuations run one
//!   at a time, in the order they were queued, against the view this promise
//!   was built for.
//!
//! Construction is driven by a spawned task, so it proceeds even when nobody
//! is waiting, and a construction failure is always logged. The promise must
//! be created inside a tokio runtime.

use crate::errors::{BridgeError, Result};
use crate::view::ViewHandle;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

/// Outcome of a view construction
pub type ViewResult = Result<Arc<dyn ViewHandle>>;

type Continuation = Box<dyn FnOnce(ViewResult) -> BoxFuture<'static, ()> + Send>;

/// Shared, re-fetchable handle to a view under construction.
///
/// Cloning is cheap; all clones refer to the same construction and the same
/// continuation queue.
#[derive(Clone)]
pub struct ViewHandlePromise {
    generation: u64,
    resolved: Shared<BoxFuture<'static, ViewResult>>,
    continuations: mpsc::UnboundedSender<Continuation>,
}

impl ViewHandlePromise {
    /// Start driving `construction` and return the promise for its view.
    ///
    /// `generation` identifies the render call that produced this promise.
    pub fn spawn<F>(generation: u64, construction: F) -> Self
    where
        F: Future<Output = ViewResult> + Send + 'static,
    {
        let resolved = async move {
            let result = construction.await;
            match &result {
                Ok(_) => debug!(generation, "View constructed"),
                Err(e) => error!(generation, error = %e, "View construction failed"),
            }
            result
        }
        .boxed()
        .shared();

        let (continuations, mut queue) = mpsc::unbounded_channel::<Continuation>();
        let driver = resolved.clone();
        tokio::spawn(async move {
            let view = driver.await;
            while let Some(continuation) = queue.recv().await {
                continuation(view.clone()).await;
            }
            trace!(generation, "View promise released");
        });

        Self {
            generation,
            resolved,
            continuations,
        }
    }

    /// Render generation this promise belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the construction result.
    ///
    /// Callers awaiting this are not ordered relative to queued
    /// continuations; use [`then`](Self::then) when order matters.
    pub async fn resolved(&self) -> ViewResult {
        self.resolved.clone().await
    }

    /// Construction result, if construction has finished
    pub fn peek(&self) -> Option<ViewResult> {
        self.resolved.peek().cloned()
    }

    /// Queue `f` to run against the view once it is available.
    ///
    /// The continuation is queued immediately, before the returned future is
    /// first polled, so calls made in sequence run in sequence. If
    /// construction failed, `f` is skipped and the construction error is
    /// returned.
    pub fn then<T, F, Fut>(&self, f: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce(Arc<dyn ViewHandle>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();
        let continuation: Continuation = Box::new(move |view: ViewResult| {
            async move {
                let result = match view {
                    Ok(view) => f(view).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            .boxed()
        });

        let queued = self
            .continuations
            .send(continuation)
            .map_err(|_| BridgeError::cancelled("view promise driver has stopped"));

        async move {
            queued?;
            outcome
                .await
                .map_err(|_| BridgeError::cancelled("view continuation was dropped"))?
        }
    }
}

impl fmt::Debug for ViewHandlePromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.resolved.peek() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("ViewHandlePromise")
            .field("generation", &self.generation)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeadlessView;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    fn ready_view() -> Arc<dyn ViewHandle> {
        Arc::new(HeadlessView::new())
    }

    #[tokio::test]
    async fn test_all_callers_see_same_view() {
        let view = ready_view();
        let expected = Arc::clone(&view);
        let promise = ViewHandlePromise::spawn(1, async move { Ok(view) });

        let a = promise.resolved().await.unwrap();
        let b = promise.clone().resolved().await.unwrap();
        assert!(Arc::ptr_eq(&a, &expected));
        assert!(Arc::ptr_eq(&b, &expected));
        assert!(matches!(promise.peek(), Some(Ok(_))));
    }

    #[tokio::test]
    async fn test_continuations_run_in_queue_order() {
        let (release, gate) = oneshot::channel::<()>();
        let promise = ViewHandlePromise::spawn(1, async move {
            let _ = gate.await;
            Ok(ready_view())
        });
        assert!(promise.peek().is_none());

        let order = Arc::new(Mutex::new(Vec::new()));
        let pending: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                promise.then(move |_view| async move {
                    // yield so a later continuation could overtake if unordered
                    tokio::task::yield_now().await;
                    order.lock().push(i);
                    Ok(i)
                })
            })
            .collect();

        release.send(()).unwrap();
        let results = futures::future::join_all(pending.into_iter().rev()).await;
        assert_eq!(
            results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(),
            vec![4, 3, 2, 1, 0]
        );
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_rejection_reaches_every_continuation() {
        let promise = ViewHandlePromise::spawn(3, async {
            Err(BridgeError::view_construction("invalid spec"))
        });

        let first = promise.then(|_view| async { Ok(()) });
        let second = promise.then(|_view| async { Ok(()) });
        assert_matches!(first.await, Err(BridgeError::ViewConstruction { .. }));
        assert_matches!(second.await, Err(BridgeError::ViewConstruction { .. }));
        assert!(matches!(
            promise.resolved().await,
            Err(BridgeError::ViewConstruction { .. })
        ));
    }

    #[tokio::test]
    async fn test_continuation_error_propagates() {
        let promise = ViewHandlePromise::spawn(1, async { Ok(ready_view()) });
        let result: Result<()> = promise
            .then(|view| async move { view.invoke("noSuchMethod", Vec::new()).await.map(|_| ()) })
            .await;
        assert_matches!(result, Err(BridgeError::MethodNotFound { method }) if method == "noSuchMethod");
    }
}
