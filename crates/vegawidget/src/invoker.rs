//! Generic remote invocation of view methods

use crate::errors::Result;
use crate::promise::ViewHandlePromise;
use crate::view::ViewArg;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

/// Whether to run the view after a call.
///
/// Absent (or `null` on the wire) means run; only an explicit `false`
/// suppresses it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunFlag(pub Option<bool>);

impl RunFlag {
    /// Run after the call
    pub const RUN: Self = Self(Some(true));
    /// Do not run after the call
    pub const SKIP: Self = Self(Some(false));

    /// Resolve the flag against its default
    pub fn resolve(self) -> bool {
        self.0.unwrap_or(true)
    }
}

impl From<bool> for RunFlag {
    fn from(run: bool) -> Self {
        Self(Some(run))
    }
}

impl From<Option<bool>> for RunFlag {
    fn from(run: Option<bool>) -> Self {
        Self(run)
    }
}

/// Queue `method(args...)` on the view behind `promise`, then `run()` if the
/// flag resolves to true.
///
/// The call is queued before this function returns. If the method fails,
/// `run()` is not called and the failure is logged and returned.
pub fn invoke_on(
    promise: &ViewHandlePromise,
    method: impl Into<String>,
    args: Vec<ViewArg>,
    run: RunFlag,
) -> impl Future<Output = Result<Value>> + Send + 'static {
    let method = method.into();
    let run = run.resolve();
    let generation = promise.generation();

    promise.then(move |view| async move {
        let output = match view.invoke(&method, args).await {
            Ok(output) => output,
            Err(e) => {
                warn!(generation, method = %method, error = %e, "View call failed");
                return Err(e);
            }
        };
        debug!(generation, method = %method, run, "View call completed");

        if run {
            if let Err(e) = view.run().await {
                warn!(generation, method = %method, error = %e, "View run failed");
                return Err(e);
            }
        }
        Ok(output)
    })
}
