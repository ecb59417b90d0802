use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::seq::SliceRandom;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{GatekeeperConfig, LogFormat, LoggingConfig, SimulationConfig};
use gatekeeper::ratelimit::{build_limiter, LimiterConfig, RateLimiter, Strategy};

/// Drive a rate limiter with a simulated request stream.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use this strategy with its default parameters
    #[arg(short, long)]
    strategy: Option<Strategy>,

    /// Number of admission checks
    #[arg(short = 'n', long)]
    requests: Option<u64>,

    /// Pause between checks in milliseconds
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Caller key; repeat to simulate several clients
    #[arg(short, long = "key")]
    keys: Vec<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut GatekeeperConfig) {
        if let Some(strategy) = self.strategy {
            if config.limiter.strategy() != strategy {
                config.limiter = LimiterConfig::defaults_for(strategy);
            }
        }
        if let Some(requests) = self.requests {
            config.simulation.requests = requests;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.simulation.interval_ms = interval_ms;
        }
        if !self.keys.is_empty() {
            config.simulation.keys = self.keys.clone();
        }
        if self.json_logs {
            config.logging.format = LogFormat::Json;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_tracing(&config.logging);

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiter = build_limiter(&config.limiter)?;

    let summary = tokio::select! {
        summary = run_simulation(Arc::clone(&limiter), &config.simulation) => summary,
        _ = shutdown_signal() => {
            info!("Simulation interrupted");
            Summary::default()
        }
    };

    limiter.shutdown();

    info!(
        strategy = %limiter.strategy(),
        admitted = summary.admitted,
        rejected = summary.rejected,
        "Gatekeeper stopped"
    );
    println!(
        "{}: {} admitted, {} rejected",
        limiter.strategy(),
        summary.admitted,
        summary.rejected
    );
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[derive(Debug, Default)]
struct Summary {
    admitted: u64,
    rejected: u64,
}

/// Call `allow` once per simulated request, the way a request handler would.
async fn run_simulation(limiter: Arc<dyn RateLimiter>, simulation: &SimulationConfig) -> Summary {
    let mut summary = Summary::default();
    let pause = Duration::from_millis(simulation.interval_ms);

    for request in 0..simulation.requests {
        let key = simulation
            .keys
            .choose(&mut rand::thread_rng())
            .map(String::as_str);

        if limiter.allow(key) {
            summary.admitted += 1;
            info!(request, key = key.unwrap_or("-"), "Request allowed");
        } else {
            summary.rejected += 1;
            warn!(request, key = key.unwrap_or("-"), "Request rejected (429)");
        }

        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    summary
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
