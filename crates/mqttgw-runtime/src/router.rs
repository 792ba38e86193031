//! Router: sole consumer of the inbox. Applies each record to every active
//! device bound to the record's key.

use std::sync::Arc;
use std::time::Duration;

use mqttgw_core::{
    DeviceConfig, DeviceRegistry, StateUpdate, classify_payload, next_notification,
};
use tokio_util::sync::CancellationToken;

use crate::inbox::{Dequeue, InboxReceiver, InboxRecord};

/// Bounded wait per dequeue; also bounds how long cancellation can go
/// unnoticed.
pub const DEQUEUE_WAIT: Duration = Duration::from_secs(1);

/// Apply one record to the registry. Returns the number of devices it was
/// delivered to.
///
/// Devices sharing a key each receive the record. Write failures are logged
/// and never stop routing.
pub fn route_record<R: DeviceRegistry + ?Sized>(registry: &R, record: &InboxRecord) -> usize {
    let mut delivered = 0;
    for device in registry.devices() {
        if !device.is_active()
            || device.broker_address != record.key.broker
            || device.topic != record.key.topic
        {
            continue;
        }

        if !device.mute_logging {
            tracing::info!(
                device = %device.display_name(),
                topic = %record.key.topic,
                payload = %record.payload,
                "received message"
            );
        }

        let update = classify_payload(&record.payload, device.supports_on_off_state);
        write(registry, &device, update);
        toggle_notification(registry, &device);
        delivered += 1;
    }

    if delivered == 0 {
        tracing::debug!(
            broker = %record.key.broker,
            topic = %record.key.topic,
            "no active device for record"
        );
    }
    delivered
}

fn toggle_notification<R: DeviceRegistry + ?Sized>(registry: &R, device: &DeviceConfig) {
    let current = match registry.notification(&device.id) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(device = %device.id, error = %e, "failed to read topicNotification");
            None
        }
    };
    let step = next_notification(current.as_deref());
    if step.initialized {
        tracing::error!(device = %device.id, "topicNotification missing, initializing to 0");
    }
    write(registry, device, StateUpdate::Notification(step.value.to_string()));
}

fn write<R: DeviceRegistry + ?Sized>(registry: &R, device: &DeviceConfig, update: StateUpdate) {
    let field = update.field();
    if let Err(e) = registry.write_state(&device.id, update) {
        tracing::error!(device = %device.id, field, error = %e, "state write failed");
    }
}

pub struct Router<R> {
    registry: Arc<R>,
    inbox: InboxReceiver,
    cancel: CancellationToken,
}

impl<R: DeviceRegistry + 'static> Router<R> {
    pub fn new(registry: Arc<R>, inbox: InboxReceiver, cancel: CancellationToken) -> Self {
        Self {
            registry,
            inbox,
            cancel,
        }
    }

    /// Route records until cancelled. Records still queued at shutdown are
    /// dropped.
    pub async fn run(mut self) {
        tracing::info!("router started");
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.inbox.next(DEQUEUE_WAIT) => next,
            };
            match next {
                Dequeue::Record(record) => {
                    route_record(self.registry.as_ref(), &record);
                }
                Dequeue::Timeout => {}
                Dequeue::Closed => {
                    tracing::warn!("router: inbox closed");
                    break;
                }
            }
        }
        let dropped = self.inbox.pending();
        tracing::info!(dropped, "router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    use mqttgw_core::{BrokerKey, MemoryRegistry, OnOffState, StateWriteError};

    use crate::inbox::inbox;

    fn lamp() -> DeviceConfig {
        DeviceConfig::new("lamp", "10.0.0.5", "home/lamp")
    }

    fn record(payload: &str) -> InboxRecord {
        InboxRecord::new(BrokerKey::new("10.0.0.5", "home/lamp"), payload)
    }

    #[test]
    fn on_off_payloads_drive_state() {
        let reg = MemoryRegistry::with_devices([lamp()]);
        assert_eq!(route_record(&reg, &record("on")), 1);
        assert_eq!(reg.state("lamp").expect("state").on_off, OnOffState::On);
        route_record(&reg, &record("OFF"));
        let state = reg.state("lamp").expect("state");
        assert_eq!(state.on_off, OnOffState::Off);
        assert_eq!(state.topic_message, "");
    }

    #[test]
    fn other_payloads_land_in_topic_message() {
        let reg = MemoryRegistry::with_devices([lamp()]);
        route_record(&reg, &record("21.5 degrees"));
        let state = reg.state("lamp").expect("state");
        assert_eq!(state.topic_message, "21.5 degrees");
        assert_eq!(state.on_off, OnOffState::Off);
    }

    #[test]
    fn on_off_without_support_is_a_message() {
        let mut sensor = lamp();
        sensor.supports_on_off_state = false;
        let reg = MemoryRegistry::with_devices([sensor]);
        route_record(&reg, &record("ON"));
        let state = reg.state("lamp").expect("state");
        assert_eq!(state.on_off, OnOffState::Off);
        assert_eq!(state.topic_message, "ON");
    }

    #[test]
    fn every_record_toggles_notification() {
        let reg = MemoryRegistry::with_devices([lamp()]);
        let mut seen = Vec::new();
        for payload in ["ON", "x", "OFF", "y", "z"] {
            route_record(&reg, &record(payload));
            seen.push(reg.state("lamp").expect("state").topic_notification);
        }
        let expected: Vec<_> = ["1", "0", "1", "0", "1"]
            .iter()
            .map(|v| Some(v.to_string()))
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn missing_notification_is_initialized_to_zero() {
        let reg = MemoryRegistry::with_devices([lamp()]);
        reg.set_notification("lamp", None);
        route_record(&reg, &record("ON"));
        assert_eq!(
            reg.state("lamp").expect("state").topic_notification.as_deref(),
            Some("0")
        );
    }

    #[test]
    fn inactive_and_foreign_devices_are_skipped() {
        let mut disabled = lamp();
        disabled.id = "disabled".into();
        disabled.enabled = false;
        let other = DeviceConfig::new("other", "10.0.0.5", "home/other");
        let other_broker = DeviceConfig::new("remote", "10.0.0.6", "home/lamp");
        let reg = MemoryRegistry::with_devices([disabled, other, other_broker]);

        assert_eq!(route_record(&reg, &record("ON")), 0);
        for id in ["disabled", "other", "remote"] {
            let state = reg.state(id).expect("state");
            assert_eq!(state.on_off, OnOffState::Off, "{id}");
            assert_eq!(state.topic_notification.as_deref(), Some("0"), "{id}");
        }
    }

    #[test]
    fn shared_key_delivers_to_every_device() {
        let mut twin = lamp();
        twin.id = "twin".into();
        let reg = MemoryRegistry::with_devices([lamp(), twin]);
        assert_eq!(route_record(&reg, &record("ON")), 2);
        assert_eq!(reg.state("lamp").expect("state").on_off, OnOffState::On);
        assert_eq!(reg.state("twin").expect("state").on_off, OnOffState::On);
    }

    /// Registry rejecting every write, to check routing survives failures.
    struct RejectingRegistry {
        devices: Vec<DeviceConfig>,
        attempts: Mutex<Vec<&'static str>>,
    }

    impl DeviceRegistry for RejectingRegistry {
        fn devices(&self) -> Vec<DeviceConfig> {
            self.devices.clone()
        }

        fn notification(&self, id: &str) -> Result<Option<String>, StateWriteError> {
            Err(StateWriteError::UnknownDevice(id.to_string()))
        }

        fn write_state(&self, id: &str, update: StateUpdate) -> Result<(), StateWriteError> {
            let field = update.field();
            self.attempts.lock().expect("lock").push(field);
            Err(StateWriteError::Rejected {
                device: id.to_string(),
                field,
                reason: "read-only".into(),
            })
        }
    }

    #[test]
    fn write_failures_do_not_stop_routing() {
        let reg = RejectingRegistry {
            devices: vec![lamp()],
            attempts: Mutex::new(Vec::new()),
        };
        assert_eq!(route_record(&reg, &record("ON")), 1);
        assert_eq!(route_record(&reg, &record("hi")), 1);
        assert_eq!(
            *reg.attempts.lock().expect("lock"),
            vec!["onOffState", "topicNotification", "topicMessage", "topicNotification"]
        );
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
        }
    }

    fn route_capturing(reg: &MemoryRegistry, payload: &str) -> String {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || route_record(reg, &record(payload)));
        capture.text()
    }

    #[test]
    fn routed_record_is_logged() {
        let reg = MemoryRegistry::with_devices([lamp()]);
        let logs = route_capturing(&reg, "ON");
        assert!(logs.contains("received message"), "logs: {logs}");
        assert!(logs.contains("home/lamp"), "logs: {logs}");
    }

    #[test]
    fn mute_suppresses_log_but_not_state() {
        let mut quiet = lamp();
        quiet.mute_logging = true;
        let reg = MemoryRegistry::with_devices([quiet]);

        let logs = route_capturing(&reg, "ON");
        assert!(!logs.contains("received message"), "logs: {logs}");
        let state = reg.state("lamp").expect("state");
        assert_eq!(state.on_off, OnOffState::On);
        assert_eq!(state.topic_notification.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn run_routes_until_cancelled() {
        let reg = Arc::new(MemoryRegistry::with_devices([lamp()]));
        let (tx, rx) = inbox();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Router::new(Arc::clone(&reg), rx, cancel.clone()).run());

        tx.push(record("banana"));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while reg.state("lamp").expect("state").topic_message != "banana" {
            assert!(tokio::time::Instant::now() < deadline, "record never routed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("router stops promptly")
            .expect("join");
    }
}
