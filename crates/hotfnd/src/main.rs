//! hotfnd — the hotfn daemon.
//!
//! One binary for every role in a hotfn deployment:
//! - `worker`: container pool cache, function runner, idle sweeper, HTTP front
//! - `balancer`: scheduler over a static worker fleet, HTTP front
//! - `simulate`: replay an event stream against a balancer
//!
//! # Usage
//!
//! ```text
//! hotfnd worker --config worker.toml --port 8222
//! hotfnd balancer --config balancer.toml --port 8111
//! hotfnd simulate http://127.0.0.1:8111 --events data/events.csv --log sim.log
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hotfn_core::{BalancerConfig, WorkerConfig};

#[derive(Parser)]
#[command(name = "hotfnd", about = "hotfn serverless function daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker node.
    Worker {
        /// Worker config (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long, default_value = "8222")]
        port: u16,
    },

    /// Run the load balancer.
    Balancer {
        /// Balancer config (TOML) listing the worker fleet.
        #[arg(long)]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8111")]
        port: u16,
    },

    /// Replay an event stream against a load balancer.
    Simulate {
        /// Load balancer base URL.
        lb_url: String,

        /// Event stream file (`start_ms,function_name` per line).
        #[arg(long, default_value = "data/events.csv")]
        events: PathBuf,

        /// Append `start end name body` per invocation to this file.
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hotfnd=debug,hotfn=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Worker { config, port } => run_worker(config.as_deref(), port).await,
        Command::Balancer { config, port } => run_balancer(&config, port).await,
        Command::Simulate {
            lb_url,
            events,
            log,
        } => run_simulate(&lb_url, &events, log.as_deref()).await,
    }
}

async fn run_worker(config_path: Option<&Path>, port: u16) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    info!(
        functions = config.functions.len(),
        options = ?config.caching,
        "hotfn worker starting"
    );

    let runner = hotfn_runtime::runner_from_config(&config);
    info!(driver = runner.pool().driver().name(), "function runner initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Idle sweeper ───────────────────────────────────────────

    let sweeper = tokio::spawn(hotfn_runtime::run_sweeper(
        runner.pool().clone(),
        Duration::from_millis(config.sweep_interval_ms),
        shutdown_rx,
    ));

    // ── HTTP front ─────────────────────────────────────────────

    let pool = runner.pool().clone();
    let router = hotfn_api::build_worker_router(runner);
    serve(router, port, shutdown_tx).await?;

    if let Err(e) = sweeper.await {
        error!(error = %e, "idle sweeper task failed");
    }
    let destroyed = pool.reset(true).await;
    info!(destroyed, "hotfn worker stopped");
    Ok(())
}

async fn run_balancer(config_path: &Path, port: u16) -> anyhow::Result<()> {
    let config = BalancerConfig::from_file(config_path)?;
    let state = hotfn_api::BalancerState::from_config(&config)?;
    info!(
        nodes = config.nodes.len(),
        algorithm = state.scheduler.algorithm(),
        fake_mode = state.fake_mode,
        "hotfn load balancer starting"
    );

    let (shutdown_tx, _shutdown_rx) = watch::channel(false);
    let router = hotfn_api::build_balancer_router(state);
    serve(router, port, shutdown_tx).await?;

    info!("hotfn load balancer stopped");
    Ok(())
}

async fn run_simulate(lb_url: &str, events: &Path, log: Option<&Path>) -> anyhow::Result<()> {
    let events = hotfn_sim::load_events(events)?;
    let summary = hotfn_sim::run_simulation(lb_url, events, log).await?;
    println!(
        "{} invocations, {} failed, mean latency {:.1}ms",
        summary.invocations, summary.failures, summary.mean_latency_ms
    );
    Ok(())
}

/// Serve `router` on all interfaces until Ctrl-C, then signal `shutdown_tx`.
async fn serve(router: axum::Router, port: u16, shutdown_tx: watch::Sender<bool>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;
    Ok(())
}
