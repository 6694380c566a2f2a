//! Cross-component scenarios.

pub mod calculator;
pub mod shutdown;
pub mod timeouts;
