//! # Courier Test Suite
//!
//! End-to-end scenarios over the in-memory broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── calculator.rs   # Raw server and application round trips
//!     ├── timeouts.rs     # Ack timeout, queued-then-served, late replies
//!     └── shutdown.rs     # Graceful drain and idempotent close
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p courier-tests
//!
//! # By scenario
//! cargo test -p courier-tests integration::shutdown::
//!
//! # With envelope-level logs
//! RUST_LOG=courier_rpc=debug cargo test -p courier-tests -- --nocapture
//! ```

#![allow(dead_code)]

pub mod integration;

use courier_rpc::{Application, ApplicationBuilder, Request, Response};
use courier_telemetry::{init_logging, TelemetryConfig};
use serde::Deserialize;
use std::sync::Once;

/// Identifier served by the calculator fixtures.
pub const CALCULATOR: &str = "calculator";

static LOGGING: Once = Once::new();

/// Install the test subscriber once per test binary.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        // Another harness may have installed one already.
        let _ = init_logging(&TelemetryConfig::for_tests());
    });
}

/// `{ "n": [..] }` params of the calculator methods.
#[derive(Debug, Deserialize)]
pub struct Numbers {
    pub n: Vec<i64>,
}

/// Calculator application with `add` and `multiply`.
pub fn calculator_app() -> ApplicationBuilder {
    let mut builder = Application::builder(CALCULATOR);
    builder
        .add("add", |req: Request, res: Response| async move {
            let Numbers { n } = req.params_as()?;
            res.send(n.iter().sum::<i64>()).await?;
            Ok(())
        })
        .expect("add route");
    builder
        .add("multiply", |req: Request, res: Response| async move {
            let Numbers { n } = req.params_as()?;
            res.send(n.iter().product::<i64>()).await?;
            Ok(())
        })
        .expect("multiply route");
    builder
}
