//! Publisher: one-shot outbound messages for command actions, status
//! requests and connectivity validation.

use std::sync::Arc;

use mqttgw_core::{
    ConnectParams, DeviceConfig, Security, Substitution, VariableResolver, render_message,
};
use mqttgw_transport::Transport;
use thiserror::Error;

/// Payload sent when validating a broker connection.
pub const VALIDATION_MESSAGE: &str = "test message";

/// A configuration field the host should flag to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

pub struct Publisher<T, V> {
    transport: Arc<T>,
    variables: Arc<V>,
}

impl<T, V> Publisher<T, V>
where
    T: Transport,
    V: VariableResolver,
{
    pub fn new(transport: Arc<T>, variables: Arc<V>) -> Self {
        Self {
            transport,
            variables,
        }
    }

    /// Render `message` and publish it, waiting for the client to finish.
    ///
    /// Every failure (spawn error, timeout, non-zero exit) is logged and
    /// reported as `false`. Device state is never touched.
    pub async fn publish(&self, params: &ConnectParams, message: &str) -> bool {
        let rendered = render_message(message, self.variables.as_ref());
        match &rendered.substitution {
            Substitution::None => {}
            Substitution::Applied { name } => {
                tracing::debug!(variable = %name, "substituted variable");
            }
            Substitution::Unresolved { name } => {
                tracing::error!(
                    variable = %name,
                    message,
                    "could not resolve variable, sending message unchanged"
                );
            }
        }

        tracing::debug!(
            broker = %params.broker,
            topic = %params.topic,
            message = %rendered.text,
            "publishing"
        );
        match self.transport.publish(params, &rendered.text).await {
            Ok(status) if status.success() => true,
            Ok(status) => {
                tracing::error!(
                    broker = %params.broker,
                    topic = %params.topic,
                    code = ?status.code,
                    stderr = %status.stderr,
                    "publish failed"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    broker = %params.broker,
                    topic = %params.topic,
                    error = %e,
                    "publish failed"
                );
                false
            }
        }
    }

    /// Command action: publish `message` to the device's own topic.
    pub async fn send_command(&self, device: &DeviceConfig, message: &str) -> bool {
        tracing::info!(device = %device.display_name(), message, "sending command");
        self.publish(&device.connect_params(), message).await
    }

    /// Ask the device for its status via its status topic.
    pub async fn request_status(&self, device: &DeviceConfig) -> bool {
        if device.status_topic.is_empty() {
            tracing::warn!(device = %device.display_name(), "no status topic configured");
            return false;
        }
        let params = device.publish_params(&device.status_topic);
        self.publish(&params, &device.status_message).await
    }

    /// Check that a broker accepts a publish on `topic`.
    pub async fn validate_connection(
        &self,
        broker: &str,
        topic: &str,
        security: Option<Security>,
    ) -> Result<(), ValidationError> {
        let params = ConnectParams::new(broker, topic).with_security(security);
        if self.publish(&params, VALIDATION_MESSAGE).await {
            return Ok(());
        }
        Err(ValidationError {
            field: "brokerAddress",
            message: format!("Could not connect to the MQTT broker running at {broker}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use mqttgw_core::MemoryVariables;
    use mqttgw_transport::FakeTransport;

    fn publisher() -> (Publisher<FakeTransport, MemoryVariables>, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::new());
        let variables = MemoryVariables::new(HashMap::from([(
            "ROOM_TEMP".to_string(),
            "21.5".to_string(),
        )]));
        (
            Publisher::new(Arc::clone(&transport), Arc::new(variables)),
            transport,
        )
    }

    fn lamp() -> DeviceConfig {
        let mut device = DeviceConfig::new("lamp", "10.0.0.5", "home/lamp");
        device.status_topic = "home/lamp/get".into();
        device.status_message = "status: %ROOM_TEMP%".into();
        device
    }

    #[tokio::test]
    async fn command_goes_to_device_topic() {
        let (publisher, transport) = publisher();
        assert!(publisher.send_command(&lamp(), "ON").await);
        let sent = transport.published();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].params.topic, "home/lamp");
        assert_eq!(sent[0].message, "ON");
    }

    #[tokio::test]
    async fn status_request_substitutes_variable() {
        let (publisher, transport) = publisher();
        assert!(publisher.request_status(&lamp()).await);
        let sent = transport.published();
        assert_eq!(sent[0].params.topic, "home/lamp/get");
        assert_eq!(sent[0].message, "status: 21.5");
    }

    #[tokio::test]
    async fn unresolved_variable_is_sent_literally() {
        let (publisher, transport) = publisher();
        let params = ConnectParams::new("10.0.0.5", "home/lamp");
        assert!(publisher.publish(&params, "level %MISSING%").await);
        assert_eq!(transport.published()[0].message, "level %MISSING%");
    }

    #[tokio::test]
    async fn missing_status_topic_is_false_without_publishing() {
        let (publisher, transport) = publisher();
        let device = DeviceConfig::new("lamp", "10.0.0.5", "home/lamp");
        assert!(!publisher.request_status(&device).await);
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_false() {
        let (publisher, transport) = publisher();
        transport.set_publish_exit_code(14);
        assert!(!publisher.send_command(&lamp(), "ON").await);
    }

    #[tokio::test]
    async fn validation_success() {
        let (publisher, transport) = publisher();
        publisher
            .validate_connection("10.0.0.5:1884", "home/test", None)
            .await
            .expect("valid");
        let sent = transport.published();
        assert_eq!(sent[0].message, VALIDATION_MESSAGE);
        assert_eq!(sent[0].params.broker, "10.0.0.5:1884");
    }

    #[tokio::test]
    async fn validation_failure_names_broker_field() {
        let (publisher, transport) = publisher();
        transport.set_publish_exit_code(5);
        let err = publisher
            .validate_connection("10.0.0.5", "home/test", Some(Security::default()))
            .await
            .unwrap_err();
        assert_eq!(err.field, "brokerAddress");
        assert_eq!(
            err.message,
            "Could not connect to the MQTT broker running at 10.0.0.5"
        );
    }
}
