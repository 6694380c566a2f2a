//! # Timeout Scenarios
//!
//! - **Ack timeout**: nobody serves the queue, the call fails fast and the
//!   request is withdrawn
//! - **Queued then served**: the request waits in the queue until a server
//!   for its identifier starts
//! - **Late reply**: a reply arriving after the caller gave up is discarded

#[cfg(test)]
mod tests {
    use crate::init_test_logging;
    use courier_rpc::{
        quiet_ack_timeout, Application, ClientConfig, Request, RequestErrorKind, RequestOptions,
        Response, RpcClient,
    };
    use serde_json::json;
    use shared_broker::InMemoryBroker;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_ack_timeout_without_server() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let client = RpcClient::connect(&broker).await.unwrap();

        let ack_timeout = Duration::from_millis(1);
        let started = Instant::now();
        let err = client
            .request_with(
                "nobody-home",
                "foo",
                json!({ "bar": 1 }),
                RequestOptions::new().ack_timeout(ack_timeout),
            )
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.kind, RequestErrorKind::AckTimeout);
        assert!(
            elapsed < ack_timeout + Duration::from_millis(100),
            "took {elapsed:?}"
        );
        assert!(broker.list_snapshot("courier.rpc.nobody-home").is_empty());
        assert!(err.request.encoded.contains("\"foo\""));
        assert_eq!(client.pending_count(), 0);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_quiet_ack_timeout() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let client = RpcClient::connect_with_config(
            &broker,
            ClientConfig {
                ack_timeout: Duration::from_millis(5),
                ..ClientConfig::default()
            },
        )
        .await
        .unwrap();

        let outcome = quiet_ack_timeout(client.request("nobody-home", "notify", json!(null)).await);
        assert_eq!(outcome.unwrap(), None);

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_then_served() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let client = Arc::new(RpcClient::connect(&broker).await.unwrap());

        let call = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request_with(
                        "late-starter",
                        "foo",
                        json!(null),
                        RequestOptions::new().ack_timeout(Duration::from_secs(2)),
                    )
                    .await
            })
        };

        // Wait for the request to land before any server exists.
        let started = Instant::now();
        while broker.list_snapshot("courier.rpc.late-starter").is_empty() {
            assert!(started.elapsed() < Duration::from_secs(1), "request never queued");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut builder = Application::builder("late-starter");
        builder
            .add("foo", |_req: Request, res: Response| async move {
                res.send("bar").await?;
                Ok(())
            })
            .unwrap();
        let app = builder.start(&broker).await.unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!("bar"));

        app.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded() {
        init_test_logging();
        let broker = InMemoryBroker::new();

        let mut builder = Application::builder("sleepy");
        builder
            .add("nap", |req: Request, res: Response| async move {
                let millis = req.params()["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                res.send("awake").await?;
                Ok(())
            })
            .unwrap();
        let app = builder.start(&broker).await.unwrap();
        let client = RpcClient::connect(&broker).await.unwrap();

        let options = RequestOptions::new()
            .ack_timeout(Duration::from_millis(100))
            .timeout(Duration::from_millis(200));
        let err = client
            .request_with("sleepy", "nap", json!({ "ms": 400 }), options)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RequestErrorKind::ResponseTimeout);
        assert_eq!(client.pending_count(), 0);

        // The server still finishes and replies; nobody is waiting any more.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(app.in_flight_count(), 0);
        assert_eq!(client.stats().total_unrecognized.load(Ordering::Relaxed), 1);

        // The client is unaffected.
        let result = client
            .request("sleepy", "nap", json!({ "ms": 0 }))
            .await
            .unwrap();
        assert_eq!(result, json!("awake"));

        client.close().await.unwrap();
        app.close().await.unwrap();
    }
}
