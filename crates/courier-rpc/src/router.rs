//! Method router.
//!
//! Maps a method name to exactly one handler. A method nobody registered
//! falls through to the next stage.

use crate::dispatch::{middleware_fn, Middleware, Request, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Route registration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("method name must not be empty")]
    EmptyMethod,
    #[error("Duplicate route: {0}")]
    DuplicateRoute(String),
}

/// Route table owned by one application.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<String, Arc<dyn Middleware>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`.
    pub fn add(
        &mut self,
        method: impl Into<String>,
        handler: impl Middleware,
    ) -> Result<(), RouterError> {
        let method = method.into();
        if method.is_empty() {
            return Err(RouterError::EmptyMethod);
        }
        if self.routes.contains_key(&method) {
            return Err(RouterError::DuplicateRoute(method));
        }

        debug!(method = %method, "Added route");
        self.routes.insert(method, Arc::new(handler));
        Ok(())
    }

    /// Register a closure `|req, res| async move { ... }` for `method`.
    pub fn add_fn<F, Fut>(&mut self, method: impl Into<String>, f: F) -> Result<(), RouterError>
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add(method, middleware_fn(f))
    }

    pub fn contains(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Invoke the handler for `req.method()`, or fall through when none is
    /// registered.
    pub async fn route(&self, req: &Request, res: &Response) -> anyhow::Result<()> {
        match self.routes.get(req.method()) {
            Some(handler) => {
                debug!(method = %req.method(), "Found route");
                handler.call(req, res).await
            }
            None => {
                debug!(method = %req.method(), "No route found");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Middleware for Router {
    async fn call(&self, req: &Request, res: &Response) -> anyhow::Result<()> {
        self.route(req, res).await
    }
}
