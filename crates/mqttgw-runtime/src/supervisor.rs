//! Supervisor: keeps exactly one live listener per active device key.
//!
//! Owns the listener registry on a single task. Liveness is polled on a
//! fixed interval (first tick immediately); host start/stop requests arrive
//! over a command channel and are applied between ticks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mqttgw_core::{
    BrokerKey, DeviceConfig, DeviceRegistry, GatewayConfig, OnOffState, StateUpdate,
};
use mqttgw_transport::{ProcessHandle, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::inbox::Inbox;
use crate::listener::{ListenerExit, spawn_listener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub poll_interval: Duration,
    /// Force `onOffState` to OFF before each listener (re)start.
    pub reset_state_on_start: bool,
}

impl SupervisorOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            reset_state_on_start: config.reset_state_on_start,
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(mqttgw_core::config::DEFAULT_POLL_INTERVAL_SECS),
            reset_state_on_start: false,
        }
    }
}

/// Host lifecycle requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    Start(DeviceConfig),
    Stop(DeviceConfig),
}

/// Sender side of the supervisor's command channel.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Returns `false` if the supervisor has already stopped.
    pub fn start_device(&self, device: DeviceConfig) -> bool {
        self.tx.send(SupervisorCommand::Start(device)).is_ok()
    }

    pub fn stop_device(&self, device: DeviceConfig) -> bool {
        self.tx.send(SupervisorCommand::Stop(device)).is_ok()
    }
}

struct ListenerEntry {
    handle: ProcessHandle,
    task: JoinHandle<ListenerExit>,
}

pub struct Supervisor<T, R> {
    transport: Arc<T>,
    registry: Arc<R>,
    inbox: Inbox,
    options: SupervisorOptions,
    listeners: HashMap<BrokerKey, ListenerEntry>,
    commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    cancel: CancellationToken,
}

impl<T, R> Supervisor<T, R>
where
    T: Transport,
    R: DeviceRegistry + 'static,
{
    pub fn new(
        transport: Arc<T>,
        registry: Arc<R>,
        inbox: Inbox,
        options: SupervisorOptions,
        cancel: CancellationToken,
    ) -> (Self, SupervisorHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let supervisor = Self {
            transport,
            registry,
            inbox,
            options,
            listeners: HashMap::new(),
            commands,
            cancel,
        };
        (supervisor, SupervisorHandle { tx })
    }

    /// Launch a listener for `device`, replacing any live one on the same key.
    ///
    /// Returns `false` when the device is inactive or the launch failed; in
    /// the latter case the key stays unregistered so the next health check
    /// retries.
    pub fn start_listener(&mut self, device: &DeviceConfig) -> bool {
        if !device.is_active() {
            tracing::debug!(device = %device.id, "device inactive, not starting listener");
            return false;
        }

        let key = device.key();
        if let Some(previous) = self.listeners.remove(&key) {
            if previous.handle.is_alive() {
                tracing::debug!(
                    device = %device.id,
                    pid = ?previous.handle.pid(),
                    "terminating previous listener"
                );
                if let Err(e) = previous.handle.terminate() {
                    tracing::warn!(device = %device.id, error = %e, "failed to terminate previous listener");
                }
            }
        }

        if self.options.reset_state_on_start {
            self.reset_on_off(device, &key);
        }

        let session = match self.transport.subscribe(&device.connect_params()) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    device = %device.id,
                    broker = %key.broker,
                    topic = %key.topic,
                    error = %e,
                    "failed to start listener"
                );
                return false;
            }
        };

        let handle = Arc::clone(&session.handle);
        tracing::info!(
            device = %device.display_name(),
            broker = %key.broker,
            topic = %key.topic,
            pid = ?handle.pid(),
            "listener started"
        );
        let task = spawn_listener(key.clone(), session, self.inbox.clone());
        self.listeners.insert(key, ListenerEntry { handle, task });
        true
    }

    /// Force every on/off-capable device fed by `key` to Off. The started
    /// device itself is included even when the registry doesn't know it.
    fn reset_on_off(&self, device: &DeviceConfig, key: &BrokerKey) {
        let mut targets: Vec<String> = self
            .registry
            .devices()
            .into_iter()
            .filter(|d| d.is_active() && d.supports_on_off_state && d.key() == *key)
            .map(|d| d.id)
            .collect();
        if device.supports_on_off_state && !targets.contains(&device.id) {
            targets.push(device.id.clone());
        }
        for id in targets {
            if let Err(e) = self.registry.write_state(&id, StateUpdate::OnOff(OnOffState::Off)) {
                tracing::error!(device = %id, error = %e, "failed to reset onOffState");
            }
        }
    }

    /// Terminate and forget the listener on the device's key. Failures are
    /// logged and otherwise ignored.
    pub fn stop_listener(&mut self, device: &DeviceConfig) {
        let Some(entry) = self.listeners.remove(&device.key()) else {
            return;
        };
        if let Err(e) = entry.handle.terminate() {
            tracing::debug!(device = %device.id, error = %e, "terminate failed");
        }
        tracing::info!(device = %device.display_name(), pid = ?entry.handle.pid(), "listener stopped");
    }

    /// Liveness of the listener registered for `key`; a missing entry is dead.
    pub fn is_listening(&self, key: &BrokerKey) -> bool {
        self.listeners
            .get(key)
            .is_some_and(|entry| entry.handle.is_alive())
    }

    pub fn listener_pid(&self, key: &BrokerKey) -> Option<u32> {
        self.listeners.get(key).and_then(|entry| entry.handle.pid())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Restart every active device whose listener is dead. Returns the
    /// number of listeners started.
    pub fn health_check(&mut self) -> usize {
        let mut started = 0;
        for device in self.registry.devices() {
            if !device.is_active() || self.is_listening(&device.key()) {
                continue;
            }
            tracing::debug!(device = %device.id, "listener not running");
            if self.start_listener(&device) {
                started += 1;
            }
        }
        started
    }

    fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Start(device) => {
                self.start_listener(&device);
            }
            SupervisorCommand::Stop(device) => self.stop_listener(&device),
        }
    }

    /// Run until cancelled, then terminate every listener.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_secs = self.options.poll_interval.as_secs_f64(),
            "supervisor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("supervisor: cancellation requested, shutting down");
                    break;
                }
                Some(command) = self.commands.recv() => self.handle_command(command),
                _ = ticker.tick() => {
                    let started = self.health_check();
                    if started > 0 {
                        tracing::debug!(started, "health check restarted listeners");
                    }
                }
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        for (key, entry) in self.listeners.drain() {
            if let Err(e) = entry.handle.terminate() {
                tracing::debug!(broker = %key.broker, topic = %key.topic, error = %e, "terminate failed");
            }
            entry.task.abort();
        }
    }
}
