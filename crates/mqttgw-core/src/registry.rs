//! Host device registry boundary and the in-memory registry used by the
//! standalone daemon.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::{DeviceConfig, OnOffState, StateUpdate};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateWriteError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("device {device} rejected {field}: {reason}")]
    Rejected {
        device: String,
        field: &'static str,
        reason: String,
    },
}

/// The host's device registry as seen by the gateway.
///
/// Reads return snapshots; writes target one runtime state field at a time
/// and report rejections as recoverable errors.
pub trait DeviceRegistry: Send + Sync {
    /// Snapshot of every device owned by the gateway.
    fn devices(&self) -> Vec<DeviceConfig>;

    fn device(&self, id: &str) -> Option<DeviceConfig> {
        self.devices().into_iter().find(|d| d.id == id)
    }

    /// Current `topicNotification` value; `Ok(None)` when the field is unset.
    fn notification(&self, id: &str) -> Result<Option<String>, StateWriteError>;

    fn write_state(&self, id: &str, update: StateUpdate) -> Result<(), StateWriteError>;
}

impl<T: DeviceRegistry + ?Sized> DeviceRegistry for &T {
    fn devices(&self) -> Vec<DeviceConfig> {
        (**self).devices()
    }

    fn device(&self, id: &str) -> Option<DeviceConfig> {
        (**self).device(id)
    }

    fn notification(&self, id: &str) -> Result<Option<String>, StateWriteError> {
        (**self).notification(id)
    }

    fn write_state(&self, id: &str, update: StateUpdate) -> Result<(), StateWriteError> {
        (**self).write_state(id, update)
    }
}

// ─── In-memory registry ──────────────────────────────────────────

/// Runtime state fields of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub on_off: OnOffState,
    pub topic_message: String,
    pub topic_notification: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            on_off: OnOffState::Off,
            topic_message: String::new(),
            topic_notification: Some("0".to_string()),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone)]
struct DeviceRecord {
    config: DeviceConfig,
    state: DeviceState,
}

/// Registry holding device configs and state in process memory.
///
/// Devices are kept ordered by id so iteration (and therefore routing
/// order for shared keys) is deterministic.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: Mutex<BTreeMap<String, DeviceRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = DeviceConfig>) -> Self {
        let registry = Self::new();
        for device in devices {
            registry.upsert(device);
        }
        registry
    }

    /// Insert or replace a device config. Existing runtime state is kept.
    pub fn upsert(&self, config: DeviceConfig) {
        let mut records = self.lock();
        match records.get_mut(&config.id) {
            Some(record) => record.config = config,
            None => {
                records.insert(
                    config.id.clone(),
                    DeviceRecord {
                        config,
                        state: DeviceState::default(),
                    },
                );
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<DeviceConfig> {
        self.lock().remove(id).map(|r| r.config)
    }

    pub fn state(&self, id: &str) -> Option<DeviceState> {
        self.lock().get(id).map(|r| r.state.clone())
    }

    /// Overwrite the notification field, `None` clearing it.
    pub fn set_notification(&self, id: &str, value: Option<String>) {
        if let Some(record) = self.lock().get_mut(id) {
            record.state.topic_notification = value;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DeviceRecord>> {
        // State stays usable even if a writer panicked mid-update.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn devices(&self) -> Vec<DeviceConfig> {
        self.lock().values().map(|r| r.config.clone()).collect()
    }

    fn device(&self, id: &str) -> Option<DeviceConfig> {
        self.lock().get(id).map(|r| r.config.clone())
    }

    fn notification(&self, id: &str) -> Result<Option<String>, StateWriteError> {
        self.lock()
            .get(id)
            .map(|r| r.state.topic_notification.clone())
            .ok_or_else(|| StateWriteError::UnknownDevice(id.to_string()))
    }

    fn write_state(&self, id: &str, update: StateUpdate) -> Result<(), StateWriteError> {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StateWriteError::UnknownDevice(id.to_string()))?;

        tracing::debug!(device = %id, field = update.field(), ?update, "state update");
        match update {
            StateUpdate::OnOff(state) => record.state.on_off = state,
            StateUpdate::TopicMessage(message) => record.state.topic_message = message,
            StateUpdate::Notification(value) => record.state.topic_notification = Some(value),
        }
        record.state.updated_at = Some(Utc::now());
        Ok(())
    }
}
