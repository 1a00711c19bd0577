use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use fred::interfaces::ClientLike;
use sqlx::postgres::PgConnectOptions;
use sqlx::ConnectOptions;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::presence::PresenceStore;
use crate::shard::Shards;
use crate::subscription::SubscriptionManager;

pub struct GlobalState {
    pub config: AppConfig,
    pub ctx: CancellationToken,

    pub shards: Shards<sqlx::PgPool>,

    pub nats: async_nats::Client,
    pub jetstream: async_nats::jetstream::Context,

    pub presence: PresenceStore,
    pub subscriptions: SubscriptionManager,
}

impl GlobalState {
    pub fn new(
        config: AppConfig,
        ctx: CancellationToken,
        shards: Shards<sqlx::PgPool>,
        nats: async_nats::Client,
        redis: fred::clients::RedisPool,
    ) -> Self {
        let jetstream = async_nats::jetstream::new(nats.clone());

        Self {
            config,
            ctx,
            shards,
            nats,
            jetstream,
            presence: PresenceStore::new(redis),
            subscriptions: SubscriptionManager::default(),
        }
    }
}

/// Opens one pool per message shard, in shard order.
pub async fn setup_database(config: &AppConfig) -> Result<Shards<sqlx::PgPool>> {
    let mut pools = Vec::with_capacity(config.database.shard_uris.len());

    for (index, uri) in config.database.shard_uris.iter().enumerate() {
        let options = PgConnectOptions::from_str(uri)
            .with_context(|| format!("invalid database uri for shard_{index}"))?
            .disable_statement_logging()
            .to_owned();

        let pool = sqlx::PgPool::connect_with(options)
            .await
            .with_context(|| format!("failed to connect to shard_{index}"))?;

        tracing::info!(shard = index, "connected to database");
        pools.push(pool);
    }

    Ok(Shards::new(pools))
}

#[derive(thiserror::Error, Debug)]
pub enum SetupNatsError {
    #[error("failed to parse address: {0}")]
    AddressParse(std::io::Error),
    #[error("connect error: {0}")]
    Connect(#[from] async_nats::ConnectError),
}

pub async fn setup_nats(config: &AppConfig) -> Result<async_nats::Client, SetupNatsError> {
    let mut options = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(5))
        .name(&config.name)
        .retry_on_initial_connect();

    if let Some(username) = &config.message_log.username {
        options = options.user_and_password(
            username.clone(),
            config.message_log.password.clone().unwrap_or_default(),
        );
    } else if let Some(token) = &config.message_log.token {
        options = options.token(token.clone());
    }

    let addrs = config
        .message_log
        .servers
        .iter()
        .map(|server| server.parse::<async_nats::ServerAddr>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(SetupNatsError::AddressParse)?;

    let nats = options.connect(addrs).await?;

    tracing::info!("connected to nats");

    Ok(nats)
}

pub async fn setup_redis(config: &AppConfig) -> Result<fred::clients::RedisPool> {
    let hosts = config
        .redis
        .addresses
        .iter()
        .map(|address| {
            fred::types::Server::try_from(address.as_str())
                .context("failed to parse redis server address")
        })
        .collect::<Result<Vec<_>>>()?;

    let server = if hosts.len() == 1 {
        fred::types::ServerConfig::Centralized {
            server: hosts.into_iter().next().expect("one redis host"),
        }
    } else {
        fred::types::ServerConfig::Clustered { hosts }
    };

    let redis = fred::clients::RedisPool::new(
        fred::types::RedisConfig {
            database: Some(config.redis.database),
            username: config.redis.username.clone(),
            password: config.redis.password.clone(),
            server,
            ..Default::default()
        },
        None,
        None,
        None,
        config.redis.pool_size,
    )
    .context("failed to create redis pool")?;

    redis.connect();
    redis
        .wait_for_connect()
        .await
        .context("failed to connect to redis")?;

    tracing::info!("connected to redis");

    Ok(redis)
}
