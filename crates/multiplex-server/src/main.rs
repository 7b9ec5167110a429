#![doc = include_str!("../README.md")]

mod server;

use axum::serve::Listener;
use clap::Parser;
use core::{fmt::Debug, time::Duration};
use server::config::{CliArgs, ServerConfig};
use server::fetch::HttpFetcher;
use server::service::handler::CollectorService;
use server::shutdown::{Drain, serve_with_grace};
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let fetcher = Arc::new(HttpFetcher::new()?);
    let service = CollectorService::from_config(&config, fetcher);

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            log_startup_info(&uds_path, &config);
            let res = run_server(uds, service, providers, config.shutdown_grace).await;
            // Best effort: a panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        log_startup_info(&tcp_path, &config);
        run_server(tcp, service, providers, config.shutdown_grace).await
    }
}

async fn run_server<L>(
    listener: L,
    service: CollectorService,
    providers: TelemetryProviders,
    grace: Duration,
) -> anyhow::Result<()>
where
    L: Listener,
    L::Addr: Debug,
{
    let router = service
        .clone()
        .router()
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let served = serve_with_grace(listener, router, shutdown_signal(service), grace).await;

    providers.shutdown();
    match served? {
        Drain::Complete => tracing::info!("Service shut down successfully"),
        Drain::Abandoned => tracing::warn!("Service shut down with connections still open"),
    }
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting collector service on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            "Starting collector service on {}: {} concurrent batches, {} workers per batch, {} tasks per batch",
            addr,
            config.max_batches,
            config.max_workers,
            config.max_tasks
        );
    }
}

async fn shutdown_signal(service: CollectorService) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(unix)]
    let quit = async {
        signal::unix::signal(signal::unix::SignalKind::quit())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
        () = quit => {
            tracing::info!("Received SIGQUIT signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // In-flight batches fail fast so their connections can drain.
    service.shutdown();
}
