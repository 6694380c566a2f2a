//! # Calculator Scenarios
//!
//! The same calculator served two ways:
//!
//! 1. **Raw server**: `RpcServer` with a hand-written `RequestHandler`
//! 2. **Application**: router + dispatch stages on top of the server
//!
//! Both must give the caller exactly what the handler computed, and turn
//! unknown methods and handler faults into typed `RequestError`s.

#[cfg(test)]
mod tests {
    use crate::{calculator_app, init_test_logging, Numbers, CALCULATOR};
    use courier_rpc::{
        handler_fn, AppConfig, ErrorCode, Fault, IncomingCall, Request, RequestErrorKind, Response,
        RpcClient, RpcServer, Stage,
    };
    use serde_json::json;
    use shared_broker::InMemoryBroker;

    // =========================================================================
    // RAW SERVER
    // =========================================================================

    fn raw_calculator() -> impl courier_rpc::RequestHandler {
        handler_fn(|call: IncomingCall| async move {
            let numbers: Result<Numbers, _> = serde_json::from_value(call.params.clone());
            match (call.method.as_str(), numbers) {
                ("add", Ok(Numbers { n })) => {
                    call.replier
                        .reply_with_result(json!(n.iter().sum::<i64>()))
                        .await?
                }
                ("multiply", Ok(Numbers { n })) => {
                    call.replier
                        .reply_with_result(json!(n.iter().product::<i64>()))
                        .await?
                }
                (method, _) => {
                    call.replier
                        .reply_with_error(
                            format!("Unknown method {method}"),
                            Some(ErrorCode::from(-32601)),
                            None,
                        )
                        .await?
                }
            }
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_raw_server_calculator() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let server = RpcServer::start(&broker, CALCULATOR, raw_calculator())
            .await
            .unwrap();
        let client = RpcClient::connect(&broker).await.unwrap();

        let sum = client
            .request(CALCULATOR, "add", json!({ "n": [1, 2, 3] }))
            .await
            .unwrap();
        assert_eq!(sum, json!(6));

        let product = client
            .request(CALCULATOR, "multiply", json!({ "n": [1, 2, 3] }))
            .await
            .unwrap();
        assert_eq!(product, json!(6));

        let err = client
            .request(CALCULATOR, "divide", json!([123]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::Remote);
        assert_eq!(err.code, Some(ErrorCode::from(-32601)));
        assert_eq!(err.request.identifier, CALCULATOR);

        client.close().await.unwrap();
        server.close().await.unwrap();
    }

    // =========================================================================
    // APPLICATION
    // =========================================================================

    #[tokio::test]
    async fn test_application_calculator() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let app = calculator_app().start(&broker).await.unwrap();
        let client = RpcClient::connect(&broker).await.unwrap();

        for (method, expected) in [("add", 6), ("multiply", 6)] {
            let result = client
                .request(CALCULATOR, method, json!({ "n": [1, 2, 3] }))
                .await
                .unwrap();
            assert_eq!(result, json!(expected), "{method}");
        }

        let err = client
            .request(CALCULATOR, "divide", json!([123]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::Remote);
        assert!(
            err.to_string().to_lowercase().contains("unhandled"),
            "unexpected message: {err}"
        );

        client.close().await.unwrap();
        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_params_are_internal_errors() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let mut builder = calculator_app();
        builder.config(AppConfig {
            reveal_error_messages: true,
            ..AppConfig::default()
        });
        let app = builder.start(&broker).await.unwrap();
        let client = RpcClient::connect(&broker).await.unwrap();

        let err = client
            .request(CALCULATOR, "add", json!({ "n": "not a list" }))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Internal server error");
        assert_eq!(err.code, Some(ErrorCode::from("InternalServerError")));

        let data = err.data.expect("revealed detail");
        assert!(data["message"].as_str().unwrap().contains("invalid type"));

        client.close().await.unwrap();
        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fault_text_not_revealed() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let mut builder = calculator_app();
        builder
            .config(AppConfig {
                reveal_error_messages: false,
                ..AppConfig::default()
            })
            .add("explode", |_req: Request, _res: Response| async move {
                anyhow::bail!("connection string postgres://admin:hunter2@db")
            })
            .unwrap();
        let app = builder.start(&broker).await.unwrap();
        let client = RpcClient::connect(&broker).await.unwrap();

        let err = client
            .request(CALCULATOR, "explode", json!(null))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::Remote);
        assert!(err.message.to_lowercase().contains("internal"));
        assert!(!err.to_string().contains("hunter2"));
        assert!(err.data.is_none());

        client.close().await.unwrap();
        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stages_wrap_routes() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let mut builder = calculator_app();
        builder
            .use_stage(Stage::normal(|req: Request, res: Response| async move {
                if req.method() == "version" {
                    res.send(json!({ "version": 1 })).await?;
                }
                Ok(())
            }))
            .use_stage(Stage::error(|err: Fault, _req, res: Response| async move {
                res.error(format!("rejected: {err}"), Some(ErrorCode::from(400)), None)
                    .await?;
                Ok(())
            }));
        let app = builder.start(&broker).await.unwrap();
        let client = RpcClient::connect(&broker).await.unwrap();

        assert_eq!(
            client.request(CALCULATOR, "version", json!(null)).await.unwrap(),
            json!({ "version": 1 })
        );

        let err = client
            .request(CALCULATOR, "multiply", json!({ "n": true }))
            .await
            .unwrap_err();
        assert!(err.message.starts_with("rejected: "));
        assert_eq!(err.code, Some(ErrorCode::from(400)));

        client.close().await.unwrap();
        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_many_clients_concurrently() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let app = calculator_app().start(&broker).await.unwrap();

        let mut calls = Vec::new();
        for i in 0..8_i64 {
            let broker = broker.clone();
            calls.push(tokio::spawn(async move {
                let client = RpcClient::connect(&broker).await.unwrap();
                let mut results = Vec::new();
                for j in 0..5_i64 {
                    let value = client
                        .request(CALCULATOR, "add", json!({ "n": [i, j] }))
                        .await
                        .unwrap();
                    results.push((i + j, value));
                }
                client.close().await.unwrap();
                results
            }));
        }

        for call in futures::future::join_all(calls).await {
            for (expected, value) in call.unwrap() {
                assert_eq!(value, json!(expected));
            }
        }

        app.close().await.unwrap();
    }
}
