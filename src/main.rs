//! Spool Uploadr - streaming upload server
//!
//! Accepts request bodies and stores them as files, one route per upload
//! directory.

use clap::Parser;
use spool_uploadr::{config::Config, metrics::server::MetricsServer, server::UploadServer};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Spool Uploadr - streams request bodies into files
#[derive(Parser, Debug)]
#[command(name = "spool-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Spool Uploadr v{}", spool_uploadr::VERSION);

    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    if args.check {
        info!("Configuration is valid ({} route(s))", config.routes.len());
        return Ok(());
    }

    let mut metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::new(format!("0.0.0.0:{}", config.metrics.port));
        server.start().await?;
        Some(server)
    } else {
        None
    };

    let server = UploadServer::bind(config).await?;
    server.run_until(tokio::signal::ctrl_c()).await?;

    if let Some(ref mut metrics) = metrics_server {
        metrics.shutdown().await;
    }

    Ok(())
}
