use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{logging, signal};
use tokio::signal::unix::SignalKind;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod consumer;
mod database;
mod events;
mod global;
mod presence;
mod producer;
mod shard;
mod subscription;

#[cfg(test)]
mod tests;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::AppConfig::parse()?;

    logging::init(&config.logging.level, config.logging.mode)?;

    tracing::debug!("config: {:#?}", config);

    let shards = global::setup_database(&config).await?;
    let nats = global::setup_nats(&config).await?;
    let redis = global::setup_redis(&config).await?;

    let ctx = CancellationToken::new();
    let global = Arc::new(global::GlobalState::new(
        config,
        ctx.clone(),
        shards,
        nats,
        redis,
    ));

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(api::run(global.clone()));
    tasks.spawn(consumer::run(global.clone()));

    // Listen on both sigint and sigterm and cancel the context when either is
    // received.
    let mut signal_handler = signal::SignalHandler::new()
        .with_signal(SignalKind::interrupt())
        .with_signal(SignalKind::terminate());

    select! {
        result = tasks.join_next() => tracing::error!("task stopped unexpectedly: {:?}", result),
        _ = signal_handler.recv() => tracing::info!("shutting down"),
    }

    drop(global);
    ctx.cancel();

    tracing::info!("waiting for tasks to finish");

    select! {
        _ = time::sleep(Duration::from_secs(30)) => tracing::warn!("force shutting down"),
        _ = signal_handler.recv() => tracing::warn!("force shutting down"),
        _ = async { while tasks.join_next().await.is_some() {} } => tracing::info!("shutdown complete"),
    }

    Ok(())
}
