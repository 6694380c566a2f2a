//! Domain types: wire envelopes, ids, configuration and the client error
//! taxonomy. Nothing here touches the broker.

pub mod config;
pub mod envelope;
pub mod error;
pub mod request_id;

// Re-exports for convenience
pub use config::{AppConfig, ClientConfig, ConfigError, EffectiveOptions, RequestOptions, ServerConfig};
pub use envelope::{CodecError, ErrorBody, ErrorCode, Reply, ReplyEnvelope, RequestEnvelope};
pub use error::{quiet_ack_timeout, RequestDescriptor, RequestError, RequestErrorKind};
pub use request_id::RequestId;
