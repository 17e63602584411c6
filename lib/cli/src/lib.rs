use clap::{Args, Parser, Subcommand};
use common::{DEFAULT_COUNTER, DEFAULT_HOST, DEFAULT_INTERVAL, DEFAULT_PORT};
use getset::Getters;
use std::path::PathBuf;

pub mod tui;

/// hostmon: host telemetry agent
#[derive(Debug, Parser, Getters)]
#[command(name = "hostmon")]
#[command(about = "hostmon: streams averaged host metrics to subscribers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    #[getset(get = "pub")]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the monitoring server
    Serve(ServeArgs),
    /// Subscribe to a server and render its snapshots
    Client(ClientArgs),
}

#[derive(Debug, Args, Getters)]
#[getset(get = "pub")]
pub struct ServeArgs {
    /// Address to listen on, overrides the configuration file
    #[arg(short = 'a', long)]
    host: Option<String>,
    /// Port to listen on, overrides the configuration file
    #[arg(short, long)]
    port: Option<u16>,
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args, Getters)]
#[getset(get = "pub")]
pub struct ClientArgs {
    /// Hostname or IP address of the server
    #[arg(short = 'a', long, default_value = DEFAULT_HOST)]
    host: String,
    /// Port to connect to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Seconds between two snapshots
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL)]
    interval: u32,
    /// Number of one-second samples averaged into each snapshot
    #[arg(short, long, default_value_t = DEFAULT_COUNTER)]
    counter: u32,
    /// Log level of the client
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl ClientArgs {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
