//! # Shutdown Scenarios
//!
//! `close()` stops dequeuing at once but never abandons an acknowledged
//! request: it resolves only after every in-flight handler has replied.

#[cfg(test)]
mod tests {
    use crate::{calculator_app, init_test_logging, CALCULATOR};
    use courier_rpc::{Application, Request, Response, RpcClient};
    use serde_json::json;
    use shared_broker::InMemoryBroker;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    async fn wait_for_in_flight(app: &Application, expected: usize) {
        let started = Instant::now();
        while app.in_flight_count() != expected {
            assert!(
                started.elapsed() < Duration::from_secs(2),
                "in-flight count never reached {expected}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_close_waits_for_slow_handler() {
        init_test_logging();
        let broker = InMemoryBroker::new();

        let mut builder = Application::builder("slowpoke");
        builder
            .add("slow", |_req: Request, res: Response| async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                res.send("finished").await?;
                Ok(())
            })
            .unwrap();
        let app = builder.start(&broker).await.unwrap();
        let client = Arc::new(RpcClient::connect(&broker).await.unwrap());

        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.request("slowpoke", "slow", json!(null)).await })
        };
        wait_for_in_flight(&app, 1).await;

        let closing = Instant::now();
        app.close().await.unwrap();
        assert!(
            closing.elapsed() >= Duration::from_millis(1500),
            "close resolved before the handler settled"
        );
        assert_eq!(app.in_flight_count(), 0);

        assert_eq!(call.await.unwrap().unwrap(), json!("finished"));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_close_is_shared() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let app = calculator_app().start(&broker).await.unwrap();

        let (first, second) = tokio::join!(app.close(), app.close());
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(app.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_requests_after_close_wait_for_next_server() {
        init_test_logging();
        let broker = InMemoryBroker::new();
        let first = calculator_app().start(&broker).await.unwrap();
        first.close().await.unwrap();

        let client = Arc::new(RpcClient::connect(&broker).await.unwrap());
        let call = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request(CALCULATOR, "add", json!({ "n": [40, 2] }))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.list_snapshot("courier.rpc.calculator").len(), 1);

        let second = calculator_app().start(&broker).await.unwrap();
        assert_eq!(call.await.unwrap().unwrap(), json!(42));

        second.close().await.unwrap();
        client.close().await.unwrap();
    }
}
