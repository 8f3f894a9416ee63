//! reqmeter - request lifecycle metrics exporter
//!
//! Usage:
//!     reqmeter [--config <path>]
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use reqmeter::config::{load_config, Config, ConfigWatcher};
use reqmeter::util::init_logging;
use reqmeter::AppState;

/// Request lifecycle metrics exporter with a Prometheus endpoint.
#[derive(Parser, Debug)]
#[command(name = "reqmeter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults are used when omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => Config::default(),
    };

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Namespace: {}", config.metrics.namespace);
        println!("  Endpoint: http://{}{}", config.metrics.address, config.metrics.path);
        println!("  Ignored routes: {}", config.metrics.ignored_routes.join(", "));
        return Ok(());
    }

    info!(
        config_path = ?cli.config,
        namespace = %config.metrics.namespace,
        address = %config.metrics.address,
        path = %config.metrics.path,
        "reqmeter starting"
    );

    run(config, cli.config)
}

/// Run the exporter with the given configuration.
fn run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(config, config_path))
}

/// Async entry point.
async fn run_async(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let reload = config.reload.clone();
    let state = AppState::new(config);

    let mut handles = Vec::new();

    let server = state.metrics_server();
    let shutdown_rx = state.shutdown().subscribe();
    handles.push(tokio::spawn(async move {
        server.run(shutdown_rx).await;
    }));

    if let (Some(path), true) = (config_path, reload.enabled) {
        let reload_state = state.clone();
        let watcher = ConfigWatcher::new(
            path,
            reload.poll_interval,
            Box::new(move |new_config| reload_state.apply_reload(new_config)),
        );
        let shutdown_rx = state.shutdown().subscribe();
        handles.push(tokio::spawn(async move {
            watcher.run(shutdown_rx).await;
        }));
    }

    info!("reqmeter is running");
    info!("press Ctrl+C to stop");

    state.shutdown().shutdown_on_ctrl_c().await;

    for handle in handles {
        let _ = handle.await;
    }

    info!("reqmeter shut down complete");
    Ok(())
}
