//! Sampling node binary

use adaptive_sampler::common::{parse_duration, MemoryBackend};
use adaptive_sampler::coordinator::{create_router, SamplerState};
use adaptive_sampler::{Config, Coordinator, Election};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "adaptive-sampler")]
#[command(about = "Leader-elected adaptive sampling strategy service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a sampling node
    Serve {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID (lock owner identity)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Number of throughput buckets kept by the store
        #[arg(long)]
        aggregation_buckets: Option<usize>,

        /// Leader lease renewal interval (e.g. 5s)
        #[arg(long, value_parser = duration_arg)]
        leader_lease_refresh_interval: Option<Duration>,

        /// Follower lock polling interval (e.g. 60s)
        #[arg(long, value_parser = duration_arg)]
        follower_lease_refresh_interval: Option<Duration>,

        /// Probability calculation interval (e.g. 1m)
        #[arg(long, value_parser = duration_arg)]
        calculation_interval: Option<Duration>,
    },
    /// Print the effective configuration
    Config {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            aggregation_buckets,
            leader_lease_refresh_interval,
            follower_lease_refresh_interval,
            calculation_interval,
        } => {
            // Load config from file and env, then override with CLI arguments
            let mut config = Config::load(config.as_deref())?;
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(buckets) = aggregation_buckets {
                config.sampling.aggregation_buckets = buckets;
            }
            if let Some(interval) = leader_lease_refresh_interval {
                config.sampling.leader_lease_refresh_interval = interval;
            }
            if let Some(interval) = follower_lease_refresh_interval {
                config.sampling.follower_lease_refresh_interval = interval;
            }
            if let Some(interval) = calculation_interval {
                config.sampling.calculation_interval = interval;
            }
            config.sampling.validate()?;

            init_tracing(&config.log_level);
            serve(config).await?;
        }
        Commands::Config { config } => {
            let config = Config::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting sampling node: {}", config.node_id);
    tracing::info!("  HTTP API: {}", config.bind_addr);

    // Single-process deployment: the in-memory backend is this node's cluster
    let backend = MemoryBackend::new();
    let factory = backend.factory(config.node_id.clone());

    let mut coordinator = Coordinator::new(config.sampling.clone(), config.node_id.clone());
    coordinator.initialize(Some(&factory)).await?;

    let (aggregator, strategies) = match coordinator.build_workers() {
        Ok(workers) => workers,
        Err(e) => {
            if let Err(close_err) = coordinator.close().await {
                tracing::error!("Close after failed startup: {}", close_err);
            }
            return Err(e.into());
        }
    };

    let participant = coordinator
        .participant()
        .ok_or_else(|| anyhow::anyhow!("coordinator is not running"))?;
    let election: Arc<dyn Election> = participant.clone();
    let state = SamplerState {
        node_id: config.node_id.clone(),
        resource_name: participant.resource_name().to_string(),
        election,
        aggregator,
        strategies,
        metrics: coordinator.metrics(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("✓ Sampling node ready ({})", participant.role());

    let served = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        tracing::error!("HTTP server error: {}", e);
    }

    coordinator.close().await?;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
