//! Meridian Server Binary
//!
//! Boots one replica: parses configuration from flags or environment,
//! announces itself to the initial peers, starts the failure detector,
//! and — on the designated seed node — proposes the initial shard map.
//!
//! @version 0.1.0
//! @author Meridian Development Team

use clap::Parser;
use meridian_cluster::ShardAssignment;
use meridian_server::{broadcast, coordinator, probe, create_router, AppState, ServerConfig};
use std::net::SocketAddr;
use tokio::signal;

#[derive(Parser)]
#[command(name = "meridian-server")]
#[command(about = "Meridian causally-consistent sharded key-value store")]
struct Args {
    /// Public "host:port" address of this node (its cluster identity)
    #[arg(long, env = "SOCKET_ADDRESS")]
    socket_address: String,

    /// Comma-separated initial peer list, e.g. "10.10.0.2:8090,10.10.0.3:8090"
    #[arg(long, env = "VIEW")]
    view: Option<String>,

    /// Initial shard count; omit to join the view without a shard
    #[arg(long, env = "SHARD_COUNT")]
    shard_count: Option<usize>,

    /// Listen address (defaults to 0.0.0.0 on the socket-address port)
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let view = args
        .view
        .as_deref()
        .map(ServerConfig::parse_view)
        .unwrap_or_default();

    let mut config = ServerConfig::new(args.socket_address.as_str())
        .with_view(view)
        .with_shard_count(args.shard_count);
    if let Some(bind) = args.bind {
        config = config.with_bind(bind);
    }

    tracing::info!("Starting Meridian replica {}", config.socket_address);
    tracing::info!("Initial view: {:?}", config.view);
    if let Some(count) = config.shard_count {
        tracing::info!("Initial shard count: {}", count);
    }

    let addr = config.bind;
    let state = AppState::new(config);
    let app = create_router(state.clone());

    // Announce ourselves, then start probing.
    let state_for_bootstrap = state.clone();
    tokio::spawn(async move {
        broadcast::announce_self(&state_for_bootstrap).await;
    });
    probe::spawn_probe_loop(state.clone());

    // The seed node proposes the initial shard map once the cluster has
    // had a moment to come up.
    if state.config.shard_count.is_some() && state.config.is_seed() {
        let state_for_seed = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            propose_initial_map(&state_for_seed).await;
        });
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Meridian replica listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Propose the initial shard allocation from the seed node.
async fn propose_initial_map(state: &AppState) {
    let Some(count) = state.config.shard_count else {
        return;
    };

    let plan = {
        let view = state.view.read();
        let shards = state.shards.read();
        shards.map.redistribute(count, view.members())
    };

    match plan {
        Ok(map) => {
            if let Err(err) = coordinator::run_reallocation(state, ShardAssignment::new(map)).await
            {
                tracing::error!("Initial shard allocation failed: {}", err);
            }
        }
        Err(err) => {
            tracing::error!("Cannot form initial shards: {}", err);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
