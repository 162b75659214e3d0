//! sysmonitor - samples host CPU, memory and disk usage and ships every
//! sample to a log file and an HTTP endpoint.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use sysmonitor::{
    build_sinks, select_source, CollectionLoop, Config, ConfigLoader, Dispatcher, MetricsSource,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Host resource monitor with log and HTTP sinks
#[derive(Parser, Debug)]
#[command(name = "sysmonitor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (default: ./sysmonitor.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sampling interval in seconds
    #[arg(short = 'i', long)]
    interval: Option<u64>,

    /// Remote endpoint receiving JSON snapshots
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Log file receiving one line per snapshot
    #[arg(short = 'o', long)]
    log_file: Option<PathBuf>,

    /// Do not echo snapshots to stdout
    #[arg(short, long)]
    quiet: bool,

    /// Disable the log file sink
    #[arg(long)]
    no_file_log: bool,

    /// Disable the HTTP sink
    #[arg(long)]
    no_api: bool,

    /// Print N samples one second apart and exit, without sinks
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "5")]
    probe: Option<u32>,

    /// Debug-level diagnostics (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Command-line flags win over file and environment settings
    fn apply(&self, config: &mut Config) {
        if let Some(interval) = self.interval {
            config.monitoring.interval_seconds = interval;
        }
        if let Some(ref endpoint) = self.endpoint {
            config.api.endpoint = endpoint.clone();
        }
        if let Some(ref path) = self.log_file {
            config.monitoring.log_file_path = path.clone();
        }
        if self.quiet {
            config.monitoring.enable_console_output = false;
        }
        if self.no_file_log {
            config.monitoring.enable_file_logging = false;
        }
        if self.no_api {
            config.api.enable_api_integration = false;
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("warn,sysmonitor={default_level}")))?;

    // stdout carries the console echo, diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

fn load_config(args: &Args) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(ref path) = args.config {
        loader = loader.with_config_path(path);
    }
    let mut config = loader.load()?;
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn open_source(config: &Config) -> Result<Box<dyn MetricsSource>> {
    let settings = config.monitoring.clone();
    // construction sleeps for the CPU settling delay
    let selection = tokio::task::spawn_blocking(move || select_source(&settings))
        .await
        .context("metrics source setup panicked")?;
    selection
        .into_result()
        .context("cannot monitor this host")
}

async fn run_probe(mut source: Box<dyn MetricsSource>, samples: u32) -> Result<()> {
    println!("Probing system metrics ({samples} samples)...");
    let mut previous: Option<(f64, f64)> = None;

    for i in 0..samples {
        if i > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        match source.sample() {
            Ok(snapshot) => {
                println!("{snapshot}");
                if let Some((cpu, ram)) = previous {
                    println!(
                        "  change: CPU {:+.1}% RAM {:+.1}%",
                        snapshot.cpu_percent() - cpu,
                        snapshot.ram_percent() - ram
                    );
                }
                previous = Some((snapshot.cpu_percent(), snapshot.ram_percent()));
            }
            Err(e) => println!("Error: {e}"),
        }
    }
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown requested");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM; only Ctrl-C stops the monitor");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let config = load_config(&args)?;

    let source = open_source(&config).await?;

    if let Some(samples) = args.probe {
        return run_probe(source, samples).await;
    }

    println!("=== System Monitor ===");
    let dispatcher = Dispatcher::new(build_sinks(&config));
    let collection = CollectionLoop::new(source, dispatcher, &config.monitoring);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let summary = collection.run(cancel).await;
    info!(
        ticks = summary.ticks,
        sampling_failures = summary.sampling_failures,
        "monitor stopped"
    );
    Ok(())
}
