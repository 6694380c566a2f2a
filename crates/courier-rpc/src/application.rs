//! Application: router + dispatch engine on top of an RPC server.
//!
//! ```text
//! ApplicationBuilder ── add / use_stage ──→ Router, DispatchEngine
//!        │ start()
//!        ▼
//! RpcServer ──→ AppHandler ──→ DispatchEngine::run(Request, Response)
//! ```

use crate::dispatch::{middleware_fn, AppInfo, DispatchEngine, Middleware, Request, Response, Stage};
use crate::domain::config::AppConfig;
use crate::router::{Router, RouterError};
use crate::server::{IncomingCall, RequestHandler, RpcServer, ServerError};
use async_trait::async_trait;
use shared_broker::Broker;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Collects routes and stages before the server starts.
pub struct ApplicationBuilder {
    identifier: String,
    router: Router,
    stages: Vec<Stage>,
    config: AppConfig,
}

impl ApplicationBuilder {
    /// Replace the configuration (reveal policy and server settings).
    pub fn config(&mut self, config: AppConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Register a closure handler for `method`.
    pub fn add<F, Fut>(&mut self, method: impl Into<String>, f: F) -> Result<&mut Self, RouterError>
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.router.add(method, middleware_fn(f))?;
        Ok(self)
    }

    /// Register a handler value for `method`.
    pub fn add_handler(
        &mut self,
        method: impl Into<String>,
        handler: impl Middleware,
    ) -> Result<&mut Self, RouterError> {
        self.router.add(method, handler)?;
        Ok(self)
    }

    /// Append a stage after the router.
    pub fn use_stage(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Snapshot the chain and start serving the identifier's queue.
    ///
    /// The builder keeps its routes and stages, so it can start another
    /// server later (for example after the first one was closed).
    pub async fn start(&self, broker: &dyn Broker) -> Result<Application, ServerError> {
        self.config.validate()?;

        let mut engine = DispatchEngine::new();
        engine.use_stage(Stage::Normal(Arc::new(self.router.clone())));
        for stage in &self.stages {
            engine.use_stage(stage.clone());
        }

        let handler = AppHandler {
            app: AppInfo {
                identifier: self.identifier.clone(),
                reveal_error_messages: self.config.reveal_error_messages,
            },
            engine,
        };

        let server = RpcServer::start_with_config(
            broker,
            &self.identifier,
            Arc::new(handler),
            self.config.server.clone(),
        )
        .await?;

        info!(
            identifier = %self.identifier,
            reveal_error_messages = self.config.reveal_error_messages,
            "Application started"
        );

        Ok(Application { server })
    }
}

/// Runs the dispatch engine for every dequeued call.
struct AppHandler {
    app: AppInfo,
    engine: DispatchEngine,
}

#[async_trait]
impl RequestHandler for AppHandler {
    async fn handle(&self, call: IncomingCall) -> anyhow::Result<()> {
        let IncomingCall {
            method,
            params,
            replier,
        } = call;

        let req = Request::new(self.app.clone(), method, params, replier.clone());
        let res = Response::new(replier);
        self.engine.run(&req, &res).await;
        Ok(())
    }
}

/// A running application.
pub struct Application {
    server: RpcServer,
}

impl Application {
    /// Start building an application serving `identifier`.
    pub fn builder(identifier: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder {
            identifier: identifier.into(),
            router: Router::new(),
            stages: Vec::new(),
            config: AppConfig::default(),
        }
    }

    pub fn identifier(&self) -> &str {
        self.server.identifier()
    }

    pub fn in_flight_count(&self) -> usize {
        self.server.in_flight_count()
    }

    /// Gracefully shut down the underlying server. Idempotent.
    pub async fn close(&self) -> Result<(), ServerError> {
        self.server.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{Reply, ReplyEnvelope, RequestEnvelope};
    use crate::domain::request_id::RequestId;
    use crate::dispatch::Fault;
    use serde_json::json;
    use shared_broker::{BrokerConnection, InMemoryBroker, Subscription};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn call(
        client: &dyn BrokerConnection,
        sub: &mut Subscription,
        id: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Reply {
        let encoded = RequestEnvelope::new(RequestId::from(id), method, params, "replies")
            .encode()
            .unwrap();
        client.push("courier.rpc.calc", &encoded).await.unwrap();

        loop {
            let message = timeout(Duration::from_secs(1), sub.recv())
                .await
                .expect("timeout")
                .expect("message");
            let reply = ReplyEnvelope::decode(&message).unwrap();
            if reply.id.as_str() == id && reply.reply.is_terminal() {
                return reply.reply;
            }
        }
    }

    #[test]
    fn test_duplicate_route_is_construction_error() {
        let mut builder = Application::builder("calc");
        builder.add("add", |_req, _res| async { Ok(()) }).unwrap();
        let err = builder.add("add", |_req, _res| async { Ok(()) });
        assert!(matches!(err, Err(RouterError::DuplicateRoute(_))));
    }

    #[tokio::test]
    async fn test_routes_then_stages_then_unhandled() {
        let broker = InMemoryBroker::new();
        let client = broker.open();
        let mut sub = client.subscribe("replies").await.unwrap();

        let mut builder = Application::builder("calc");
        builder
            .add("add", |req: Request, res: Response| async move {
                let n: Vec<i64> = serde_json::from_value(req.params()["n"].clone())?;
                res.send(n.iter().sum::<i64>()).await?;
                Ok(())
            })
            .unwrap()
            .use_stage(Stage::normal(|req: Request, res: Response| async move {
                if req.method() == "ping" {
                    res.send("pong").await?;
                }
                Ok(())
            }));
        let app = builder.start(&broker).await.unwrap();
        assert_eq!(app.identifier(), "calc");

        assert_eq!(
            call(&client, &mut sub, "r1", "add", json!({ "n": [1, 2, 3] })).await,
            Reply::Result(json!(6))
        );
        assert_eq!(
            call(&client, &mut sub, "r2", "ping", json!(null)).await,
            Reply::Result(json!("pong"))
        );
        let Reply::Error(body) = call(&client, &mut sub, "r3", "divide", json!([123])).await else {
            panic!("expected error reply");
        };
        assert_eq!(body.message, "Unhandled request");

        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_builder_restarts_with_same_chain() {
        let broker = InMemoryBroker::new();
        let client = broker.open();
        let mut sub = client.subscribe("replies").await.unwrap();

        let mut builder = Application::builder("calc");
        builder
            .add("add", |req: Request, res: Response| async move {
                let n: Vec<i64> = serde_json::from_value(req.params()["n"].clone())?;
                res.send(n.iter().sum::<i64>()).await?;
                Ok(())
            })
            .unwrap()
            .use_stage(Stage::normal(|req: Request, res: Response| async move {
                if req.method() == "ping" {
                    res.send("pong").await?;
                }
                Ok(())
            }));

        let first = builder.start(&broker).await.unwrap();
        first.close().await.unwrap();

        let second = builder.start(&broker).await.unwrap();
        assert_eq!(
            call(&client, &mut sub, "r1", "add", json!({ "n": [2, 3] })).await,
            Reply::Result(json!(5))
        );
        assert_eq!(
            call(&client, &mut sub, "r2", "ping", json!(null)).await,
            Reply::Result(json!("pong"))
        );
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_stage_sees_route_failure() {
        let broker = InMemoryBroker::new();
        let client = broker.open();
        let mut sub = client.subscribe("replies").await.unwrap();

        let mut builder = Application::builder("calc");
        builder
            .add("fail", |_req, _res| async { anyhow::bail!("bad input") })
            .unwrap()
            .use_stage(Stage::error(|err: Fault, _req, res: Response| async move {
                res.error(err.to_string(), Some(422.into()), None).await?;
                Ok(())
            }));
        let app = builder.start(&broker).await.unwrap();

        let Reply::Error(body) = call(&client, &mut sub, "r1", "fail", json!(null)).await else {
            panic!("expected error reply");
        };
        assert_eq!(body.message, "bad input");

        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reveal_policy_reaches_terminal_stage() {
        let broker = InMemoryBroker::new();
        let client = broker.open();
        let mut sub = client.subscribe("replies").await.unwrap();

        let mut builder = Application::builder("calc");
        builder
            .config(AppConfig {
                reveal_error_messages: false,
                ..AppConfig::default()
            })
            .add("fail", |_req, _res| async { anyhow::bail!("secret detail") })
            .unwrap();
        let app = builder.start(&broker).await.unwrap();

        let Reply::Error(body) = call(&client, &mut sub, "r1", "fail", json!(null)).await else {
            panic!("expected error reply");
        };
        assert_eq!(body.message, "Internal server error");
        assert!(body.data.is_none());

        app.close().await.unwrap();
    }
}
