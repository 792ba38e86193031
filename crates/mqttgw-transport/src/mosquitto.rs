//! Transport backed by the external `mosquitto_sub` / `mosquitto_pub`
//! command-line clients.
//!
//! Each subscription is one long-running `mosquitto_sub` child whose stdout
//! yields one payload per line. Each publish is one `mosquitto_pub` run whose
//! exit status is the result.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mqttgw_core::config::{DEFAULT_PUB_BIN, DEFAULT_PUBLISH_TIMEOUT_SECS, DEFAULT_SUB_BIN};
use mqttgw_core::{ConnectParams, TransportConfig};
use tokio::io::BufReader;
use tokio::process::{Child, Command};

use crate::error::TransportError;
use crate::session::{ProcessControl, PublishStatus, Session, Transport};

// ─── Argument building ───────────────────────────────────────────

/// Connection flags shared by both clients: host, port, client id prefix,
/// credentials and topic.
///
/// Credentials are only passed when a username is present.
fn connection_args(params: &ConnectParams) -> Vec<String> {
    let address = params.address();
    let mut args = vec!["-h".to_string(), address.host];
    if let Some(port) = address.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }

    if let Some(security) = &params.security {
        if let Some(prefix) = security
            .client_id_prefix
            .as_deref()
            .filter(|p| !p.is_empty())
        {
            args.push("-I".to_string());
            args.push(prefix.to_string());
        }
        if let Some(username) = security.auth_username() {
            args.push("-u".to_string());
            args.push(username.to_string());
            if let Some(password) = security.password.as_deref().filter(|p| !p.is_empty()) {
                args.push("-P".to_string());
                args.push(password.to_string());
            }
        }
    }

    args.push("-t".to_string());
    args.push(params.topic.clone());
    args
}

pub fn subscribe_args(params: &ConnectParams) -> Vec<String> {
    connection_args(params)
}

pub fn publish_args(params: &ConnectParams, message: &str) -> Vec<String> {
    let mut args = connection_args(params);
    args.push("-m".to_string());
    args.push(message.to_string());
    args
}

// ─── Child process handle ────────────────────────────────────────

/// A spawned `mosquitto_sub` child.
///
/// Liveness uses `try_wait`, which also reaps the child once it exits so a
/// zombie never reads as alive.
#[derive(Debug)]
struct ChildProcess {
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl ChildProcess {
    fn lock(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessControl for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        matches!(self.lock().try_wait(), Ok(None))
    }

    #[cfg(unix)]
    fn terminate(&self) -> Result<(), TransportError> {
        let child = self.lock();
        // `id()` is None once the child has been reaped.
        let Some(pid) = child.id() else {
            return Ok(());
        };
        let raw_pid = libc::pid_t::try_from(pid).map_err(|_| TransportError::Signal {
            pid,
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        })?;
        // SAFETY: kill(2) has no memory-safety preconditions. The pid belongs
        // to our own unreaped child (the lock is held), so it cannot have been
        // recycled for another process.
        let rc = unsafe { libc::kill(raw_pid, libc::SIGTERM) };
        if rc == -1 {
            return Err(TransportError::Signal {
                pid,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> Result<(), TransportError> {
        let mut child = self.lock();
        if child.id().is_none() {
            return Ok(());
        }
        child.start_kill().map_err(TransportError::Io)
    }
}

// ─── MosquittoCli ────────────────────────────────────────────────

/// Transport running the mosquitto command-line clients.
#[derive(Debug, Clone)]
pub struct MosquittoCli {
    sub_bin: String,
    pub_bin: String,
    publish_timeout: Duration,
}

impl MosquittoCli {
    pub fn new(sub_bin: impl Into<String>, pub_bin: impl Into<String>) -> Self {
        Self {
            sub_bin: sub_bin.into(),
            pub_bin: pub_bin.into(),
            publish_timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.sub_bin.clone(), config.pub_bin.clone())
            .with_publish_timeout(Duration::from_secs(config.publish_timeout_secs.max(1)))
    }

    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

impl Default for MosquittoCli {
    fn default() -> Self {
        Self::new(DEFAULT_SUB_BIN, DEFAULT_PUB_BIN)
    }
}

fn spawn_error(bin: &str, e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::NotFound {
        TransportError::NotFound(bin.to_string())
    } else {
        TransportError::Spawn {
            bin: bin.to_string(),
            source: e,
        }
    }
}

impl Transport for MosquittoCli {
    fn subscribe(&self, params: &ConnectParams) -> Result<Session, TransportError> {
        let mut child = Command::new(&self.sub_bin)
            .args(subscribe_args(params))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(&self.sub_bin, e))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            return Err(TransportError::MissingOutput);
        };
        let pid = child.id();
        tracing::debug!(
            bin = %self.sub_bin,
            broker = %params.broker,
            topic = %params.topic,
            pid = ?pid,
            "subscriber spawned"
        );

        Ok(Session {
            handle: Arc::new(ChildProcess {
                pid,
                child: Mutex::new(child),
            }),
            output: Box::new(BufReader::new(stdout)),
        })
    }

    async fn publish(
        &self,
        params: &ConnectParams,
        message: &str,
    ) -> Result<PublishStatus, TransportError> {
        let mut cmd = Command::new(&self.pub_bin);
        cmd.args(publish_args(params, message))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.publish_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| spawn_error(&self.pub_bin, e))?,
            Err(_) => return Err(TransportError::Timeout(self.publish_timeout)),
        };

        Ok(PublishStatus {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────
