use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use content_service::config::AppConfig;
use content_service::container::AppContainer;
use content_service::db::{PoolSettings, ResourcePool};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "content-service", version, about = "Content web service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve HTTP and run the background worker (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let mut container = AppContainer::build(config);
    container
        .on_app_startup()
        .await
        .context("could not start resources; refusing to serve")?;

    let worker = container
        .spawn_worker()
        .context("background worker already running")?;

    let listener = tokio::net::TcpListener::bind(&container.config.bind_addr)
        .await
        .with_context(|| format!("bind {}", container.config.bind_addr))?;
    tracing::info!(addr = %container.config.bind_addr, "listening");

    axum::serve(listener, container.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Dropping the container releases the last queue handle so the worker
    // drains what is left and exits.
    let coordinator = Arc::clone(&container.coordinator);
    drop(container);
    match worker.await {
        Ok(failed) => tracing::info!(failed, "worker drained"),
        Err(err) => tracing::error!(error = %err, "worker panicked"),
    }

    coordinator.on_app_shutdown().await?;
    Ok(())
}

async fn migrate(config: AppConfig) -> anyhow::Result<()> {
    let pool = ResourcePool::new(PoolSettings::for_requests(&config));
    pool.init().await.context("connect for migrations")?;
    let result = pool.migrate().await;
    pool.shutdown().await;
    result?;
    tracing::info!("migrations applied");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
