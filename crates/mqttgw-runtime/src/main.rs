//! mqttgw: MQTT topic to device state gateway binary.

use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config = commands::load_config(args.config.as_deref())?;
    mqttgw_runtime::logging::init(config.debug);

    let exit_code = match args.command {
        cli::Command::Run => {
            tracing::info!("mqttgw daemon starting");
            mqttgw_runtime::run_daemon(config).await?;
            0
        }
        cli::Command::Publish(opts) => {
            commands::cmd_publish(&config, &opts.device, &opts.message).await?
        }
        cli::Command::RequestStatus(opts) => {
            commands::cmd_request_status(&config, &opts.device).await?
        }
        cli::Command::Validate(opts) => commands::cmd_validate(&config, &opts).await,
        cli::Command::Devices => {
            println!("{}", commands::render_devices(&config)?);
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
