use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use streaming_proxy::config::{read_config, validate_config, ConfigError, ProxyConfig};
use streaming_proxy::lifecycle::{wait_for_signal, Shutdown};
use streaming_proxy::observability::{logging, metrics};
use streaming_proxy::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "streaming-proxy", version, about = "Streaming HTTP reverse proxy")]
struct Cli {
    /// Path to the JSON or TOML configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,

    /// Override observability.log_level
    #[arg(long)]
    log_level: Option<String>,
}

/// Read the config file, apply command-line overrides, then validate the result.
fn configure(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = read_config(&cli.config)?;
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = configure(&cli)?;

    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        backends = config.backends.len(),
        backend_timeout_secs = config.timeouts.backend_secs,
        "streaming-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    HttpServer::new(config).run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
