// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Courier RPC - request/response calls over a shared broker.
//!
//! Clients push request envelopes onto a per-identifier queue; servers pop
//! them, acknowledge the claim, run the handler and publish the reply on the
//! caller's private reply channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                          ┌──────────────────────────────┐
//! │      RpcClient       │   <prefix>.rpc.<id>      │          RpcServer           │
//! │                      │ ───── push ───────────→  │  pop_blocking (FIFO)         │
//! │  PendingRequestStore │                          │        │                     │
//! │   (ack + response)   │  <prefix>.reply.<token>  │        ▼                     │
//! │          ▲           │ ←──── ACK, RES ───────── │  Application                 │
//! │          │           │                          │   Router → stages →          │
//! │    reply listener    │                          │   unhandled / error stages   │
//! └──────────────────────┘                          └──────────────────────────────┘
//! ```
//!
//! # Call lifecycle
//!
//! 1. The client registers the call, then pushes the envelope
//! 2. Ack phase: waits `ack_timeout` for a server to claim it. On timeout the
//!    envelope is withdrawn from the queue; if it was already gone the call
//!    proceeds as claimed
//! 3. Response phase: waits `timeout - ack_timeout` for the result or error
//!
//! # Usage
//!
//! ```ignore
//! use courier_rpc::{Application, RpcClient};
//! use shared_broker::InMemoryBroker;
//!
//! let broker = InMemoryBroker::new();
//!
//! let mut builder = Application::builder("calculator");
//! builder.add("add", |req, res| async move {
//!     let n: Vec<i64> = serde_json::from_value(req.params()["n"].clone())?;
//!     res.send(n.iter().sum::<i64>()).await?;
//!     Ok(())
//! })?;
//! let app = builder.start(&broker).await?;
//!
//! let client = RpcClient::connect(&broker).await?;
//! let sum = client.request("calculator", "add", json!({ "n": [1, 2, 3] })).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod application;
pub mod client;
pub mod dispatch;
pub mod domain;
pub mod router;
pub mod server;

// Re-exports
pub use application::{Application, ApplicationBuilder};
pub use client::{ClientError, RpcClient};
pub use dispatch::{
    error_middleware_fn, middleware_fn, AppInfo, DispatchEngine, ErrorMiddleware, Fault,
    Middleware, Request, Response, Stage,
};
pub use domain::{
    quiet_ack_timeout, AppConfig, ClientConfig, CodecError, ConfigError, ErrorBody, ErrorCode,
    RequestError, RequestErrorKind, RequestId, RequestOptions, ServerConfig,
};
pub use router::{Router, RouterError};
pub use server::{
    handler_fn, IncomingCall, Replier, ReplyError, RequestHandler, RpcServer, ServerError,
};

use std::any::Any;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
