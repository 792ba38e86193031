//! TOML configuration for the gateway: preferences, transport binaries,
//! variables and the device list.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::DeviceConfig;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "mqttgw.toml";

/// Health-check poll interval used when the setting is absent or invalid.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

pub const DEFAULT_SUB_BIN: &str = "/usr/local/bin/mosquitto_sub";
pub const DEFAULT_PUB_BIN: &str = "/usr/local/bin/mosquitto_pub";
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid device {device:?}: {reason}")]
    InvalidDevice { device: String, reason: String },
}

/// Poll interval as written by the user: integer, string, or anything else
/// (which always falls back to the default).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum PollIntervalSetting {
    Integer(i64),
    Text(String),
    Other(toml::Value),
}

impl PollIntervalSetting {
    fn seconds(&self) -> Option<u64> {
        let value = match self {
            PollIntervalSetting::Integer(v) => *v,
            PollIntervalSetting::Text(s) => s.trim().parse::<i64>().ok()?,
            PollIntervalSetting::Other(_) => return None,
        };
        u64::try_from(value).ok().filter(|v| *v > 0)
    }
}

/// Paths and limits for the external mosquitto client binaries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_sub_bin")]
    pub sub_bin: String,
    #[serde(default = "default_pub_bin")]
    pub pub_bin: String,
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            sub_bin: default_sub_bin(),
            pub_bin: default_pub_bin(),
            publish_timeout_secs: default_publish_timeout_secs(),
        }
    }
}

fn default_sub_bin() -> String {
    DEFAULT_SUB_BIN.to_string()
}

fn default_pub_bin() -> String {
    DEFAULT_PUB_BIN.to_string()
}

fn default_publish_timeout_secs() -> u64 {
    DEFAULT_PUBLISH_TIMEOUT_SECS
}

/// Top-level gateway configuration. Read once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    poll_interval: Option<PollIntervalSetting>,
    /// Turns on debug-level logging unless an env filter overrides it.
    #[serde(default)]
    pub debug: bool,
    /// Force `onOffState` to OFF whenever a listener (re)starts.
    #[serde(default)]
    pub reset_state_on_start: bool,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl GatewayConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Health-check interval. Anything that is not a positive integer falls
    /// back to [`DEFAULT_POLL_INTERVAL_SECS`].
    pub fn poll_interval(&self) -> Duration {
        let secs = match &self.poll_interval {
            Some(setting) => setting.seconds().unwrap_or_else(|| {
                tracing::warn!(
                    setting = ?setting,
                    default = DEFAULT_POLL_INTERVAL_SECS,
                    "invalid poll_interval, using default"
                );
                DEFAULT_POLL_INTERVAL_SECS
            }),
            None => DEFAULT_POLL_INTERVAL_SECS,
        };
        Duration::from_secs(secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.publish_timeout_secs.max(1))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            let invalid = |reason: &str| ConfigError::InvalidDevice {
                device: device.id.clone(),
                reason: reason.to_string(),
            };
            if device.id.trim().is_empty() {
                return Err(invalid("id must not be empty"));
            }
            if device.broker_address.trim().is_empty() {
                return Err(invalid("broker_address must not be empty"));
            }
            if device.topic.trim().is_empty() {
                return Err(invalid("topic must not be empty"));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(invalid("duplicate device id"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
poll_interval = 15
debug = true
reset_state_on_start = true

[transport]
sub_bin = "/opt/bin/mosquitto_sub"
pub_bin = "/opt/bin/mosquitto_pub"
publish_timeout_secs = 3

[variables]
ROOM_TEMP = "21.5"

[[devices]]
id = "lamp"
name = "Living room lamp"
broker_address = "10.0.0.5"
topic = "home/lamp"
status_topic = "home/lamp/get"
status_message = "status"

[devices.security]
client_id_prefix = "gw"
username = "user"
password = "secret"

[[devices]]
id = "thermo"
broker_address = "10.0.0.5:1884"
topic = "home/thermo"
supports_on_off_state = false
mute_logging = true
"#;

    #[test]
    fn parses_full_config() {
        let cfg = GatewayConfig::from_toml_str(FULL).expect("valid config");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(15));
        assert!(cfg.debug);
        assert!(cfg.reset_state_on_start);
        assert_eq!(cfg.transport.sub_bin, "/opt/bin/mosquitto_sub");
        assert_eq!(cfg.publish_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.variables.get("ROOM_TEMP").map(String::as_str), Some("21.5"));
        assert_eq!(cfg.devices.len(), 2);

        let lamp = &cfg.devices[0];
        assert!(lamp.enabled && lamp.configured);
        assert!(lamp.supports_on_off_state);
        assert!(!lamp.mute_logging);
        let security = lamp.security.as_ref().expect("security");
        assert!(security.enabled);
        assert_eq!(security.username.as_deref(), Some("user"));
        assert_eq!(security.password.as_deref(), Some("secret"));

        let thermo = &cfg.devices[1];
        assert!(!thermo.supports_on_off_state);
        assert!(thermo.mute_logging);
        assert!(thermo.security.is_none());
        assert_eq!(thermo.status_topic, "");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = GatewayConfig::from_toml_str("").expect("empty is valid");
        assert_eq!(
            cfg.poll_interval(),
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        );
        assert!(!cfg.debug);
        assert!(!cfg.reset_state_on_start);
        assert_eq!(cfg.transport, TransportConfig::default());
        assert!(cfg.devices.is_empty());
    }

    #[test]
    fn poll_interval_accepts_numeric_string() {
        let cfg = GatewayConfig::from_toml_str("poll_interval = \"45\"").expect("valid");
        assert_eq!(cfg.poll_interval(), Duration::from_secs(45));
    }

    #[test]
    fn poll_interval_falls_back_on_garbage() {
        for raw in [
            "poll_interval = \"soon\"",
            "poll_interval = 0",
            "poll_interval = -5",
            "poll_interval = 2.5",
        ] {
            let cfg = GatewayConfig::from_toml_str(raw).expect("still parses");
            assert_eq!(
                cfg.poll_interval(),
                Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
                "input: {raw}"
            );
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let raw = r#"
[[devices]]
id = "a"
broker_address = "h"
topic = "t"

[[devices]]
id = "a"
broker_address = "h"
topic = "u"
"#;
        let err = GatewayConfig::from_toml_str(raw).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidDevice { ref reason, .. } if reason.contains("duplicate")),
            "got {err:?}"
        );
    }

    #[test]
    fn rejects_empty_topic() {
        let raw = r#"
[[devices]]
id = "a"
broker_address = "h"
topic = ""
"#;
        let err = GatewayConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDevice { .. }), "got {err:?}");
    }

    #[test]
    fn shared_keys_are_allowed() {
        let raw = r#"
[[devices]]
id = "a"
broker_address = "h"
topic = "t"

[[devices]]
id = "b"
broker_address = "h"
topic = "t"
"#;
        let cfg = GatewayConfig::from_toml_str(raw).expect("shared keys accepted");
        assert_eq!(cfg.devices[0].key(), cfg.devices[1].key());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(FULL.as_bytes()).expect("write");
        let cfg = GatewayConfig::load(file.path()).expect("load");
        assert_eq!(cfg.devices.len(), 2);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = GatewayConfig::load(Path::new("/nonexistent/mqttgw.toml")).unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/mqttgw.toml"));
            }
            other => panic!("expected Io error, got: {other:?}"),
        }
    }
}
