//! Device model shared by every layer: composite broker key, security
//! parameters, per-device policy and the state updates the router emits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default MQTT port used when a broker address carries no explicit port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

// ─── Composite key ───────────────────────────────────────────────

/// Structured `(broker, topic)` key identifying a subscription.
///
/// Used directly as a map key by the listener registry and compared by the
/// router when matching inbox records to devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrokerKey {
    pub broker: String,
    pub topic: String,
}

impl BrokerKey {
    pub fn new(broker: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for BrokerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.broker, self.topic)
    }
}

// ─── Broker address ──────────────────────────────────────────────

/// Host/port pair split out of a configured broker address.
///
/// `"10.0.0.5"` yields no port; `"10.0.0.5:8883"` yields port 8883.
/// Anything that does not end in a valid port number (including bare IPv6
/// literals) is kept whole as the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: Option<u16>,
}

impl BrokerAddress {
    pub fn parse(address: &str) -> Self {
        let address = address.trim();
        if let Some((host, port)) = address.rsplit_once(':') {
            if !host.is_empty() && !host.contains(':') {
                if let Ok(port) = port.parse::<u16>() {
                    return Self {
                        host: host.to_string(),
                        port: Some(port),
                    };
                }
            }
        }
        Self {
            host: address.to_string(),
            port: None,
        }
    }

    /// Port to connect to, falling back to [`DEFAULT_MQTT_PORT`].
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_MQTT_PORT)
    }
}

// ─── Security ────────────────────────────────────────────────────

/// Optional connection credentials for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    /// Disabled security is treated exactly like absent security.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub client_id_prefix: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Default for Security {
    fn default() -> Self {
        Self {
            enabled: true,
            client_id_prefix: None,
            username: None,
            password: None,
        }
    }
}

impl Security {
    /// Username to authenticate with; `None` means no auth is attempted.
    pub fn auth_username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Everything a transport needs to open a session or publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub broker: String,
    pub topic: String,
    pub security: Option<Security>,
}

impl ConnectParams {
    pub fn new(broker: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            topic: topic.into(),
            security: None,
        }
    }

    #[must_use]
    pub fn with_security(mut self, security: Option<Security>) -> Self {
        self.security = security.filter(|s| s.enabled);
        self
    }

    pub fn address(&self) -> BrokerAddress {
        BrokerAddress::parse(&self.broker)
    }

    pub fn key(&self) -> BrokerKey {
        BrokerKey::new(self.broker.clone(), self.topic.clone())
    }
}

// ─── Device ──────────────────────────────────────────────────────

/// Static device configuration as exposed by the host registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub configured: bool,
    pub broker_address: String,
    pub topic: String,
    #[serde(default)]
    pub status_topic: String,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub security: Option<Security>,
    #[serde(default = "default_true")]
    pub supports_on_off_state: bool,
    #[serde(default)]
    pub mute_logging: bool,
}

impl DeviceConfig {
    /// Minimal enabled device bound to `broker` / `topic`.
    pub fn new(id: impl Into<String>, broker: impl Into<String>, topic: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            configured: true,
            broker_address: broker.into(),
            topic: topic.into(),
            status_topic: String::new(),
            status_message: String::new(),
            security: None,
            supports_on_off_state: true,
            mute_logging: false,
        }
    }

    pub fn key(&self) -> BrokerKey {
        BrokerKey::new(self.broker_address.clone(), self.topic.clone())
    }

    /// Enabled and configured. Only these devices get listeners or
    /// receive routed records.
    pub fn is_active(&self) -> bool {
        self.enabled && self.configured
    }

    /// Name used in log lines; falls back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Subscription parameters for this device's listener.
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams::new(self.broker_address.clone(), self.topic.clone())
            .with_security(self.security.clone())
    }

    /// Publish parameters for an arbitrary topic on this device's broker.
    pub fn publish_params(&self, topic: &str) -> ConnectParams {
        ConnectParams::new(self.broker_address.clone(), topic).with_security(self.security.clone())
    }
}

fn default_true() -> bool {
    true
}

// ─── Runtime state ───────────────────────────────────────────────

/// Binary on/off device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnOffState {
    Off,
    On,
}

impl OnOffState {
    /// Numeric representation written to the host (`0` / `1`).
    pub fn as_value(self) -> u8 {
        match self {
            OnOffState::Off => 0,
            OnOffState::On => 1,
        }
    }
}

/// A single state write emitted by the router or the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    OnOff(OnOffState),
    TopicMessage(String),
    Notification(String),
}

impl StateUpdate {
    /// Host-side state field name this update targets.
    pub fn field(&self) -> &'static str {
        match self {
            StateUpdate::OnOff(_) => "onOffState",
            StateUpdate::TopicMessage(_) => "topicMessage",
            StateUpdate::Notification(_) => "topicNotification",
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_address_without_port() {
        let addr = BrokerAddress::parse("10.0.0.5");
        assert_eq!(addr.host, "10.0.0.5");
        assert_eq!(addr.port, None);
        assert_eq!(addr.port_or_default(), DEFAULT_MQTT_PORT);
    }

    #[test]
    fn broker_address_with_port() {
        let addr = BrokerAddress::parse("broker.local:8883");
        assert_eq!(addr.host, "broker.local");
        assert_eq!(addr.port, Some(8883));
    }

    #[test]
    fn broker_address_invalid_port_kept_whole() {
        let addr = BrokerAddress::parse("broker.local:mqtt");
        assert_eq!(addr.host, "broker.local:mqtt");
        assert_eq!(addr.port, None);
    }

    #[test]
    fn broker_address_ipv6_literal_kept_whole() {
        let addr = BrokerAddress::parse("::1");
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, None);
    }

    #[test]
    fn keys_distinguish_broker_topic_boundary() {
        // "a" + "bc" and "ab" + "c" collapse under string concatenation.
        let k1 = BrokerKey::new("a", "bc");
        let k2 = BrokerKey::new("ab", "c");
        assert_ne!(k1, k2);
    }

    #[test]
    fn disabled_security_is_dropped() {
        let security = Security {
            enabled: false,
            username: Some("user".into()),
            ..Security::default()
        };
        let params = ConnectParams::new("h", "t").with_security(Some(security));
        assert!(params.security.is_none());
    }

    #[test]
    fn empty_username_means_no_auth() {
        let security = Security {
            username: Some(String::new()),
            ..Security::default()
        };
        assert!(security.auth_username().is_none());
    }

    #[test]
    fn device_activity_requires_both_flags() {
        let mut dev = DeviceConfig::new("lamp", "10.0.0.5", "home/lamp");
        assert!(dev.is_active());
        dev.configured = false;
        assert!(!dev.is_active());
        dev.configured = true;
        dev.enabled = false;
        assert!(!dev.is_active());
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let mut dev = DeviceConfig::new("lamp", "b", "t");
        dev.name.clear();
        assert_eq!(dev.display_name(), "lamp");
    }

    #[test]
    fn publish_params_use_device_broker() {
        let dev = DeviceConfig::new("lamp", "10.0.0.5", "home/lamp");
        let params = dev.publish_params("home/lamp/get");
        assert_eq!(params.broker, "10.0.0.5");
        assert_eq!(params.topic, "home/lamp/get");
    }
}
