//! Dispatch stages.
//!
//! A stage is registered explicitly as either a normal stage or an error
//! stage. Returning `Ok(())` continues to the next stage unless the response
//! was sent; returning `Err` enters (or, from an error stage, replaces the
//! active error of) the error chain.

use crate::dispatch::context::{Request, Response};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

/// The error travelling down the error chain. Cheap to clone.
#[derive(Clone)]
pub struct Fault(Arc<anyhow::Error>);

impl Fault {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }
}

impl Deref for Fault {
    type Target = anyhow::Error;

    fn deref(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl From<anyhow::Error> for Fault {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

/// A normal stage: `(req, res, next)`.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn call(&self, req: &Request, res: &Response) -> anyhow::Result<()>;
}

/// An error stage: `(err, req, res, next)`.
#[async_trait]
pub trait ErrorMiddleware: Send + Sync + 'static {
    async fn call(&self, err: Fault, req: &Request, res: &Response) -> anyhow::Result<()>;
}

/// Adapter turning `|req, res| async move { ... }` into a [`Middleware`].
pub struct MiddlewareFn<F> {
    f: F,
}

pub fn middleware_fn<F, Fut>(f: F) -> MiddlewareFn<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    MiddlewareFn { f }
}

#[async_trait]
impl<F, Fut> Middleware for MiddlewareFn<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn call(&self, req: &Request, res: &Response) -> anyhow::Result<()> {
        (self.f)(req.clone(), res.clone()).await
    }
}

/// Adapter turning `|err, req, res| async move { ... }` into an
/// [`ErrorMiddleware`].
pub struct ErrorMiddlewareFn<F> {
    f: F,
}

pub fn error_middleware_fn<F, Fut>(f: F) -> ErrorMiddlewareFn<F>
where
    F: Fn(Fault, Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    ErrorMiddlewareFn { f }
}

#[async_trait]
impl<F, Fut> ErrorMiddleware for ErrorMiddlewareFn<F>
where
    F: Fn(Fault, Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn call(&self, err: Fault, req: &Request, res: &Response) -> anyhow::Result<()> {
        (self.f)(err, req.clone(), res.clone()).await
    }
}

/// A stage tagged with its kind at registration time.
#[derive(Clone)]
pub enum Stage {
    Normal(Arc<dyn Middleware>),
    Error(Arc<dyn ErrorMiddleware>),
}

impl Stage {
    /// Normal stage from a closure.
    pub fn normal<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Normal(Arc::new(middleware_fn(f)))
    }

    /// Error stage from a closure.
    pub fn error<F, Fut>(f: F) -> Self
    where
        F: Fn(Fault, Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Error(Arc::new(error_middleware_fn(f)))
    }

    pub fn is_error_stage(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(_) => f.write_str("Stage::Normal"),
            Self::Error(_) => f.write_str("Stage::Error"),
        }
    }
}
