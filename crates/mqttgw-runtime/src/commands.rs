//! One-shot subcommands: publish, request-status, validate, devices.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use mqttgw_core::config::DEFAULT_CONFIG_PATH;
use mqttgw_core::{DeviceConfig, GatewayConfig, MemoryVariables};
use mqttgw_runtime::Publisher;
use mqttgw_transport::MosquittoCli;

use crate::cli::ValidateOpts;

/// Load the config file. An explicit path must exist; the default path is
/// optional and falls back to an empty config.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                GatewayConfig::load(&default)
                    .with_context(|| format!("loading config {}", default.display()))
            } else {
                Ok(GatewayConfig::default())
            }
        }
    }
}

fn publisher(config: &GatewayConfig) -> Publisher<MosquittoCli, MemoryVariables> {
    Publisher::new(
        Arc::new(MosquittoCli::from_config(&config.transport)),
        Arc::new(MemoryVariables::new(config.variables.clone())),
    )
}

fn find_device<'a>(config: &'a GatewayConfig, id: &str) -> anyhow::Result<&'a DeviceConfig> {
    config
        .devices
        .iter()
        .find(|d| d.id == id)
        .with_context(|| format!("unknown device: {id}"))
}

/// Returns the process exit code.
pub async fn cmd_publish(config: &GatewayConfig, device: &str, message: &str) -> anyhow::Result<i32> {
    let device = find_device(config, device)?;
    let ok = publisher(config).send_command(device, message).await;
    Ok(if ok { 0 } else { 1 })
}

pub async fn cmd_request_status(config: &GatewayConfig, device: &str) -> anyhow::Result<i32> {
    let device = find_device(config, device)?;
    let ok = publisher(config).request_status(device).await;
    Ok(if ok { 0 } else { 1 })
}

pub async fn cmd_validate(config: &GatewayConfig, opts: &ValidateOpts) -> i32 {
    match publisher(config)
        .validate_connection(&opts.broker, &opts.topic, opts.security())
        .await
    {
        Ok(()) => {
            println!("ok: broker {} accepted a publish on {}", opts.broker, opts.topic);
            0
        }
        Err(e) => {
            eprintln!("{}", e.message);
            1
        }
    }
}

/// Devices as pretty JSON. Passwords are never serialized.
pub fn render_devices(config: &GatewayConfig) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(&config.devices)?)
}
