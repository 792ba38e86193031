//! mqttgw-core: device model, routing policy and configuration for the
//! MQTT device gateway. Pure library; all process and async IO lives in
//! `mqttgw-transport` and `mqttgw-runtime`.

pub mod config;
pub mod registry;
pub mod routing;
pub mod template;
pub mod types;

pub use config::{ConfigError, GatewayConfig, TransportConfig};
pub use registry::{DeviceRegistry, DeviceState, MemoryRegistry, StateWriteError};
pub use routing::{NotificationStep, classify_payload, next_notification, parse_on_off};
pub use template::{MemoryVariables, RenderedMessage, Substitution, VariableResolver, render_message};
pub use types::{
    BrokerAddress, BrokerKey, ConnectParams, DeviceConfig, OnOffState, Security, StateUpdate,
};
