use anyhow::{Context, Result};
use clap::Parser;
use megaphone_client::{BrokerClient, ClientConfig, MegaphoneClient};
use tracing_subscriber::EnvFilter;

use crate::args::{CliArgs, Commands};

mod args;
mod commands;

fn init_logging() {
    // Logs go to stderr; stdout carries chunk output
    let filter = EnvFilter::try_from_env("MEGAPHONE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &CliArgs) -> Result<ClientConfig> {
    let mut config = match args.config.clone().or_else(ClientConfig::default_path) {
        Some(path) => ClientConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    }
    .with_env_overrides();

    if let Some(url) = &args.url {
        config.base_url = url.clone();
    }
    if let Some(capacity) = args.capacity {
        config.dedup_capacity = capacity;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();
    let args = CliArgs::parse();
    let config = load_config(&args)?;
    tracing::debug!("Using broker at {}", config.base_url);

    let broker = BrokerClient::new(&config.base_url)?;
    match args.command {
        Commands::Create => commands::create(&broker).await,
        Commands::Write(write_args) => commands::write(&broker, write_args).await,
        Commands::Watch(sub_args) => {
            let client = MegaphoneClient::from_config(&config)?;
            commands::watch(&client, &broker, sub_args).await
        }
        Commands::Wait(sub_args) => {
            let client = MegaphoneClient::from_config(&config)?;
            commands::wait(&client, &broker, sub_args).await
        }
    }
}
