use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, ClientArgs, Commands, ServeArgs};
use common::util::trace::initialize_tracing;
use common::{LoggerConfig, ServerConfig};
use network::client::start_client;
use network::server::start_server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Cli::parse();
    match args.command() {
        Commands::Serve(args) => serve(args).await,
        Commands::Client(args) => subscribe(args).await,
    }
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let mut config =
        ServerConfig::load(args.config().as_deref()).context("Unable to load configuration")?;
    config.apply_overrides(args.host().clone(), *args.port());
    config.validate()?;

    initialize_tracing(config.logger(), true)?;
    info!("hostmon server started");

    start_server(&config).await
}

async fn subscribe(args: &ClientArgs) -> Result<()> {
    let logger = LoggerConfig::builder().level(args.log_level().clone()).build();
    initialize_tracing(&logger, false)?;
    info!(address = %args.address(), "Starting client");

    start_client(args).await
}
