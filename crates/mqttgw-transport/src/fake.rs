//! In-process transport for tests.
//!
//! Every `subscribe` creates a [`FakeProcess`] whose output is an in-memory
//! pipe; tests push payload lines with [`FakeProcess::emit`] and simulate
//! crashes with [`FakeProcess::crash`]. Publishes are recorded and answered
//! with a configurable exit code.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use mqttgw_core::{BrokerKey, ConnectParams};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};

use crate::error::TransportError;
use crate::session::{ProcessControl, PublishStatus, Session, Transport};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Fake subscriber process backed by an in-memory duplex pipe.
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    params: ConnectParams,
    alive: AtomicBool,
    terminated: AtomicBool,
    writer: Mutex<Option<DuplexStream>>,
}

impl FakeProcess {
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn key(&self) -> BrokerKey {
        self.params.key()
    }

    /// Whether `terminate` was called on this process.
    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Write one payload line to the session output. Returns `false` once
    /// the process is dead.
    pub async fn emit(&self, line: &str) -> bool {
        let Some(mut writer) = self.take_writer() else {
            return false;
        };
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        let written = writer.write_all(&data).await.is_ok();
        if self.alive.load(Ordering::SeqCst) {
            *self.lock_writer() = Some(writer);
        }
        written
    }

    /// Die without being asked to: output hits EOF and liveness turns false.
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.take_writer();
    }

    fn take_writer(&self) -> Option<DuplexStream> {
        self.lock_writer().take()
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<DuplexStream>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessControl for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn terminate(&self) -> Result<(), TransportError> {
        self.terminated.store(true, Ordering::SeqCst);
        self.crash();
        Ok(())
    }
}

/// A publish the fake transport received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub params: ConnectParams,
    pub message: String,
}

#[derive(Debug, Default)]
struct FakeState {
    processes: Vec<Arc<FakeProcess>>,
    failing_keys: HashSet<BrokerKey>,
    published: Vec<PublishedMessage>,
    publish_exit_code: i32,
}

/// Transport double recording every session and publish.
#[derive(Debug, Default)]
pub struct FakeTransport {
    next_pid: AtomicU32,
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            state: Mutex::default(),
        }
    }

    /// Make `subscribe` fail for `key` until [`Self::allow_subscribe`].
    pub fn fail_subscribe(&self, key: BrokerKey) {
        self.lock().failing_keys.insert(key);
    }

    pub fn allow_subscribe(&self, key: &BrokerKey) {
        self.lock().failing_keys.remove(key);
    }

    /// Exit code returned by subsequent publishes (0 = success).
    pub fn set_publish_exit_code(&self, code: i32) {
        self.lock().publish_exit_code = code;
    }

    /// Every process ever spawned for `key`, oldest first.
    pub fn processes(&self, key: &BrokerKey) -> Vec<Arc<FakeProcess>> {
        self.lock()
            .processes
            .iter()
            .filter(|p| &p.key() == key)
            .cloned()
            .collect()
    }

    /// Most recent process spawned for `key`.
    pub fn latest(&self, key: &BrokerKey) -> Option<Arc<FakeProcess>> {
        self.processes(key).pop()
    }

    /// Number of processes for `key` that are still alive.
    pub fn alive_count(&self, key: &BrokerKey) -> usize {
        self.processes(key).iter().filter(|p| p.is_alive()).count()
    }

    pub fn spawn_count(&self) -> usize {
        self.lock().processes.len()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for FakeTransport {
    fn subscribe(&self, params: &ConnectParams) -> Result<Session, TransportError> {
        let mut state = self.lock();
        if state.failing_keys.contains(&params.key()) {
            return Err(TransportError::Spawn {
                bin: "fake".to_string(),
                source: std::io::Error::other("subscribe refused"),
            });
        }

        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let process = Arc::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            params: params.clone(),
            alive: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
        });
        state.processes.push(Arc::clone(&process));

        Ok(Session {
            handle: process,
            output: Box::new(BufReader::new(reader)),
        })
    }

    async fn publish(
        &self,
        params: &ConnectParams,
        message: &str,
    ) -> Result<PublishStatus, TransportError> {
        let mut state = self.lock();
        state.published.push(PublishedMessage {
            params: params.clone(),
            message: message.to_string(),
        });
        let code = state.publish_exit_code;
        Ok(PublishStatus {
            code: Some(code),
            stderr: if code == 0 {
                String::new()
            } else {
                "Error: Connection refused".to_string()
            },
        })
    }
}
