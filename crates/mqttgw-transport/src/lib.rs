//! mqttgw-transport: the process boundary of the gateway.
//!
//! Subscriptions and publishes are delegated to external MQTT client
//! binaries behind the [`Transport`] trait so the runtime can be driven by
//! an in-process fake in tests.

pub mod error;
pub mod mosquitto;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use error::TransportError;
pub use mosquitto::MosquittoCli;
pub use session::{ProcessControl, ProcessHandle, PublishStatus, Session, SessionOutput, Transport};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeProcess, FakeTransport, PublishedMessage};
