//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mqttgw_core::Security;

#[derive(Parser)]
#[command(name = "mqttgw", about = "MQTT topic to device state gateway", version)]
pub struct Cli {
    /// Config file (default: ./mqttgw.toml, optional)
    #[arg(long, short = 'c', global = true, env = "MQTTGW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway (supervisor + router) until ctrl-c / SIGTERM
    Run,
    /// Publish a message to a device's topic
    Publish(PublishOpts),
    /// Publish a device's status message to its status topic
    RequestStatus(DeviceOpts),
    /// Check that a broker accepts a test publish
    Validate(ValidateOpts),
    /// Print configured devices as JSON
    Devices,
}

#[derive(clap::Args)]
pub struct DeviceOpts {
    /// Device id from the config file
    #[arg(long)]
    pub device: String,
}

#[derive(clap::Args)]
pub struct PublishOpts {
    #[arg(long)]
    pub device: String,

    /// Message text; a single %VARIABLE% is substituted
    #[arg(long)]
    pub message: String,
}

#[derive(clap::Args)]
pub struct ValidateOpts {
    /// Broker address, host or host:port
    #[arg(long)]
    pub broker: String,

    #[arg(long)]
    pub topic: String,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long, env = "MQTTGW_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long)]
    pub client_id_prefix: Option<String>,
}

impl ValidateOpts {
    /// Security block built from the flags; `None` when none were given.
    pub fn security(&self) -> Option<Security> {
        if self.username.is_none() && self.password.is_none() && self.client_id_prefix.is_none() {
            return None;
        }
        Some(Security {
            enabled: true,
            client_id_prefix: self.client_id_prefix.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}
