use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::global::GlobalState;
use crate::shard::Shards;

/// A global state that can be built without any running infrastructure:
/// database pools are lazy, the NATS client retries its initial connect in
/// the background and the Redis pool is never connected. Tests that stay off
/// the query paths run hermetically against it.
pub async fn mock_global() -> Arc<GlobalState> {
    let config = AppConfig::default();

    let pools = config
        .database
        .shard_uris
        .iter()
        .map(|uri| {
            PgPoolOptions::new()
                .connect_lazy(uri)
                .expect("failed to build lazy pool")
        })
        .collect();

    let nats = async_nats::ConnectOptions::new()
        .retry_on_initial_connect()
        .connect("localhost:4222")
        .await
        .expect("failed to build nats client");

    let redis = fred::clients::RedisPool::new(
        fred::types::RedisConfig::default(),
        None,
        None,
        None,
        1,
    )
    .expect("failed to build redis pool");

    Arc::new(GlobalState::new(
        config,
        CancellationToken::new(),
        Shards::new(pools),
        nats,
        redis,
    ))
}
