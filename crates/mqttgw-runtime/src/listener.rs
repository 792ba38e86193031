//! Listener: drains one subscriber session into the inbox.

use std::borrow::Cow;

use mqttgw_core::BrokerKey;
use mqttgw_transport::Session;
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;

use crate::inbox::{Inbox, InboxRecord};

/// Why a listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The session output closed.
    Eof,
    /// Reading the output failed; the process was terminated so the
    /// supervisor restarts it.
    ReadError,
    /// The router dropped the inbox.
    InboxClosed,
}

/// Forward every non-empty line of `session` to `inbox` until the session
/// output reaches EOF.
///
/// Payloads that are not valid UTF-8 are forwarded with replacement
/// characters. Blank lines are skipped; once the process has exited the
/// remaining buffered output is still drained.
pub async fn run_listener(key: BrokerKey, session: Session, inbox: Inbox) -> ListenerExit {
    let Session { handle, mut output } = session;
    let pid = handle.pid();
    let mut buf = Vec::new();

    let exit = loop {
        buf.clear();
        match output.read_until(b'\n', &mut buf).await {
            Ok(0) => break ListenerExit::Eof,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if matches!(line, Cow::Owned(_)) {
                    tracing::warn!(broker = %key.broker, topic = %key.topic, "payload is not valid UTF-8");
                }
                let payload = line.trim_end();
                if payload.is_empty() {
                    if !handle.is_alive() {
                        tracing::debug!(broker = %key.broker, topic = %key.topic, pid = ?pid, "process exited, draining output");
                    }
                    continue;
                }
                tracing::trace!(broker = %key.broker, topic = %key.topic, payload, "line received");
                if !inbox.push(InboxRecord::new(key.clone(), payload)) {
                    break ListenerExit::InboxClosed;
                }
            }
            Err(e) => {
                tracing::warn!(
                    broker = %key.broker,
                    topic = %key.topic,
                    pid = ?pid,
                    error = %e,
                    "listener read failed, terminating subscriber"
                );
                if let Err(e) = handle.terminate() {
                    tracing::debug!(pid = ?pid, error = %e, "terminate failed");
                }
                break ListenerExit::ReadError;
            }
        }
    };

    tracing::debug!(broker = %key.broker, topic = %key.topic, pid = ?pid, ?exit, "listener stopped");
    exit
}

pub fn spawn_listener(key: BrokerKey, session: Session, inbox: Inbox) -> JoinHandle<ListenerExit> {
    tokio::spawn(run_listener(key, session, inbox))
}
