//! Inbox: the ordered multi-producer/single-consumer queue between
//! listeners and the router.

use std::time::Duration;

use mqttgw_core::BrokerKey;
use tokio::sync::mpsc;

/// One raw topic message as received by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxRecord {
    pub key: BrokerKey,
    pub payload: String,
}

impl InboxRecord {
    pub fn new(key: BrokerKey, payload: impl Into<String>) -> Self {
        Self {
            key,
            payload: payload.into(),
        }
    }
}

/// Producer side. Cheap to clone, one per listener.
#[derive(Debug, Clone)]
pub struct Inbox {
    tx: mpsc::UnboundedSender<InboxRecord>,
}

impl Inbox {
    /// Enqueue without blocking. Returns `false` once the router is gone.
    pub fn push(&self, record: InboxRecord) -> bool {
        self.tx.send(record).is_ok()
    }
}

/// Outcome of a bounded dequeue.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue {
    Record(InboxRecord),
    Timeout,
    /// Every producer was dropped and the queue is drained.
    Closed,
}

/// Consumer side, owned by the router.
#[derive(Debug)]
pub struct InboxReceiver {
    rx: mpsc::UnboundedReceiver<InboxRecord>,
}

impl InboxReceiver {
    /// Wait at most `wait` for the next record.
    pub async fn next(&mut self, wait: Duration) -> Dequeue {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(record)) => Dequeue::Record(record),
            Ok(None) => Dequeue::Closed,
            Err(_) => Dequeue::Timeout,
        }
    }

    /// Records queued but not yet dequeued.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

pub fn inbox() -> (Inbox, InboxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Inbox { tx }, InboxReceiver { rx })
}
