//! Slipstream CLI
//!
//! Starts the local streaming proxy against a configured origin.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use slipstream_core::SlipstreamConfig;
use slipstream_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "slipstream")]
#[command(about = "Streaming proxy for a remote bulk-download origin")]
struct Cli {
    /// Address to serve the API on
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Origin control-API base URL
    #[arg(long)]
    origin_url: Option<String>,

    /// Origin HTTP Basic username
    #[arg(long)]
    origin_user: Option<String>,

    /// Origin HTTP Basic password
    #[arg(long)]
    origin_password: Option<String>,

    /// Directory for persisted playback state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Console log level
    #[arg(long, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the full debug log
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.log_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let mut config = SlipstreamConfig::from_env();
    if let Some(url) = cli.origin_url {
        config.origin.base_url = url;
    }
    if let Some(user) = cli.origin_user {
        config.origin.username = Some(user);
    }
    if let Some(password) = cli.origin_password {
        config.origin.password = Some(password);
    }
    if let Some(dir) = cli.data_dir {
        config.playback.data_dir = dir;
    }

    slipstream_web::run_server(config, cli.bind)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))
}
