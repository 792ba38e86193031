//! Transport trait and the session types it hands to the supervisor.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use mqttgw_core::ConnectParams;
use tokio::io::AsyncBufRead;

use crate::error::TransportError;

/// Control side of a running subscriber process.
///
/// Stored in the supervisor's listener registry; the output side is moved
/// into the listener task.
pub trait ProcessControl: Send + Sync + fmt::Debug {
    /// OS process id, if the transport runs one.
    fn pid(&self) -> Option<u32>;

    /// Zero-effect liveness check. A process that already exited (and was
    /// reaped) reports `false`; probing never fails.
    fn is_alive(&self) -> bool;

    /// Ask the process to exit (SIGTERM, not SIGKILL). Does not wait.
    fn terminate(&self) -> Result<(), TransportError>;
}

pub type ProcessHandle = Arc<dyn ProcessControl>;

/// Line-oriented output of a subscriber session.
pub type SessionOutput = Box<dyn AsyncBufRead + Send + Unpin>;

/// A running subscriber: its process handle plus the stream of raw topic
/// messages, one per line.
pub struct Session {
    pub handle: ProcessHandle,
    pub output: SessionOutput,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Completion status of a one-shot publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishStatus {
    /// Exit code; `None` when the client was killed by a signal.
    pub code: Option<i32>,
    /// Trimmed diagnostic output of the client.
    pub stderr: String,
}

impl PublishStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Moves bytes between the gateway and a broker.
///
/// Implementations: [`crate::MosquittoCli`] (external `mosquitto_sub` /
/// `mosquitto_pub` binaries) and, for tests, `FakeTransport`.
pub trait Transport: Send + Sync + 'static {
    /// Launch a subscriber session for `params.topic`.
    fn subscribe(&self, params: &ConnectParams) -> Result<Session, TransportError>;

    /// Publish `message` to `params.topic` and wait for completion.
    fn publish(
        &self,
        params: &ConnectParams,
        message: &str,
    ) -> impl Future<Output = Result<PublishStatus, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_is_success() {
        let ok = PublishStatus {
            code: Some(0),
            stderr: String::new(),
        };
        assert!(ok.success());
    }

    #[test]
    fn nonzero_or_signal_is_failure() {
        let failed = PublishStatus {
            code: Some(14),
            stderr: "Connection refused".into(),
        };
        assert!(!failed.success());
        let killed = PublishStatus {
            code: None,
            stderr: String::new(),
        };
        assert!(!killed.success());
    }
}
