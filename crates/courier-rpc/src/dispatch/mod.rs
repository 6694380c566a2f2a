//! Dispatch engine: runs a request through the stage chain.
//!
//! Layer order: normal stages (router first) → "unhandled method" terminal,
//! and on the first error: error stages → "unhandled error" terminal.
//!
//! Stages of one request run strictly in sequence. The terminal stages make
//! sure every request ends with exactly one reply.

pub mod context;
pub mod stage;

pub use context::{AppInfo, Request, Response};
pub use stage::{
    error_middleware_fn, middleware_fn, ErrorMiddleware, ErrorMiddlewareFn, Fault, Middleware,
    MiddlewareFn, Stage,
};

use crate::panic_message;
use futures::FutureExt;
use serde_json::json;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Reply message for a method nobody handled.
pub const UNHANDLED_REQUEST: &str = "Unhandled request";

/// Reply message for an error nobody handled.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Reply code for an error nobody handled.
pub const INTERNAL_ERROR_CODE: &str = "InternalServerError";

/// Ordered normal and error stages.
#[derive(Clone, Default)]
pub struct DispatchEngine {
    stages: Vec<Arc<dyn Middleware>>,
    error_stages: Vec<Arc<dyn ErrorMiddleware>>,
}

impl DispatchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage to the list matching its kind.
    pub fn use_stage(&mut self, stage: Stage) -> &mut Self {
        match stage {
            Stage::Normal(middleware) => self.stages.push(middleware),
            Stage::Error(middleware) => self.error_stages.push(middleware),
        }
        self
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn error_stage_count(&self) -> usize {
        self.error_stages.len()
    }

    /// Run the chain for one request.
    pub async fn run(&self, req: &Request, res: &Response) {
        let mut failure = None;

        for stage in &self.stages {
            match guarded(stage.call(req, res)).await {
                Ok(()) if res.is_stopped() => return,
                Ok(()) => continue,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let Some(err) = failure else {
            unhandled(req, res).await;
            return;
        };

        if res.is_stopped() {
            warn!(
                id = %req.id(),
                error = %err,
                "Stage failed after the response was sent"
            );
            return;
        }

        self.run_error_chain(Fault::new(err), req, res).await;
    }

    async fn run_error_chain(&self, mut fault: Fault, req: &Request, res: &Response) {
        debug!(id = %req.id(), error = %fault, "Running error stages");

        for stage in &self.error_stages {
            if let Err(replacement) = guarded(stage.call(fault.clone(), req, res)).await {
                debug!(
                    id = %req.id(),
                    from = %fault,
                    to = %replacement,
                    "Active error replaced"
                );
                fault = Fault::new(replacement);
            }

            if res.is_stopped() {
                return;
            }
        }

        unhandled_error(&fault, req, res).await;
    }
}

/// Run a stage future, turning a panic into an error.
async fn guarded<F>(stage: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(stage).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "stage panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}

async fn unhandled(req: &Request, res: &Response) {
    debug!(id = %req.id(), method = %req.method(), "Unhandled method");
    if let Err(e) = res.error(UNHANDLED_REQUEST, None, None).await {
        error!(id = %req.id(), error = %e, "Failed to send unhandled reply");
    }
}

async fn unhandled_error(fault: &Fault, req: &Request, res: &Response) {
    error!(id = %req.id(), method = %req.method(), error = %fault, "Unhandled error");

    let data = req.app().reveal_error_messages.then(|| {
        json!({
            "message": fault.to_string(),
            "chain": fault.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        })
    });

    if let Err(e) = res
        .error(INTERNAL_ERROR_MESSAGE, Some(INTERNAL_ERROR_CODE.into()), data)
        .await
    {
        error!(id = %req.id(), error = %e, "Failed to send internal error reply");
    }
}
