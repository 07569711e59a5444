// src/engine/tasks.rs
//
// Background resize tasks.
// Requests are validated on the caller's thread, then run on the worker pool;
// the caller is never blocked on decode, encode or file I/O.

use crate::engine::common::run_with_panic_policy;
use crate::engine::orchestrator::Resizer;
use crate::engine::pool;
use crate::error::ResizerError;
use crate::ops::ResizeRequest;
use serde_json::Value;
use std::time::Instant;

/// Result handed to the completion callback: the response URL or the failure.
pub type ResizeOutcome = std::result::Result<String, ResizerError>;

/// One accepted request bound to the resizer that will run it.
#[derive(Clone, Debug)]
pub struct ResizeTask {
    pub request: ResizeRequest,
    resizer: Resizer,
}

impl ResizeTask {
    pub fn new(request: ResizeRequest, resizer: Resizer) -> Self {
        Self { request, resizer }
    }

    /// Run the request on the current thread.
    pub fn compute(&self) -> ResizeOutcome {
        let started = Instant::now();
        let outcome = run_with_panic_policy("resize", || self.resizer.resize(&self.request));
        match &outcome {
            Ok(url) => tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                %url,
                "resize finished"
            ),
            Err(err) => tracing::warn!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                category = ?err.category(),
                %err,
                "resize failed"
            ),
        }
        outcome
    }

    /// Run on the worker pool and invoke `callback` exactly once with the outcome.
    pub fn spawn<F>(self, callback: F)
    where
        F: FnOnce(ResizeOutcome) + Send + 'static,
    {
        pool::spawn(move || {
            let outcome = self.compute();
            callback(outcome);
        });
    }
}

/// Validate `args` and start a background resize.
///
/// Argument errors are returned immediately and `callback` is never called.
/// Otherwise the request runs on the worker pool and `callback` receives the
/// outcome exactly once.
pub fn dispatch_resize<F>(args: &Value, resizer: &Resizer, callback: F) -> Result<(), ResizerError>
where
    F: FnOnce(ResizeOutcome) + Send + 'static,
{
    let request = ResizeRequest::from_json(args).map_err(|err| {
        tracing::warn!(%err, "rejected resize arguments");
        err
    })?;
    ResizeTask::new(request, resizer.clone()).spawn(callback);
    Ok(())
}
