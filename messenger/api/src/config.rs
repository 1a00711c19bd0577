use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// The messenger API serves the HTTP/WebSocket ingress and runs the chat
/// delivery pipeline. Configured from `MSGR_*` environment variables (a
/// `.env` file is honored in development); every field has a local-dev
/// default.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Name of this instance, used as the broker client name.
    pub name: String,

    /// Logging config.
    pub logging: LoggingConfig,

    /// HTTP API config.
    pub api: ApiConfig,

    /// Partitioned database config.
    pub database: DatabaseConfig,

    /// Durable message log config.
    pub message_log: MessageLogConfig,

    /// Redis (presence) config.
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Tracing env-filter directive.
    pub level: String,

    /// Output mode: default, json or compact.
    pub mode: common::logging::Mode,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            mode: common::logging::Mode::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// Bind address for the API server.
    pub bind_address: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "[::]:4000".parse().expect("failed to parse bind address"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// One connection URI per message shard, in shard order. The first entry
    /// is the primary shard that also holds rooms, members and users.
    pub shard_uris: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            shard_uris: vec![
                "postgres://root@localhost:5432/messenger_shard_0".to_string(),
                "postgres://root@localhost:5432/messenger_shard_1".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageLogConfig {
    /// NATS server addresses.
    pub servers: Vec<String>,

    /// The username to use for authentication (user-pass auth).
    pub username: Option<String>,

    /// The password to use for authentication (user-pass auth).
    pub password: Option<String>,

    /// The token to use for authentication (token auth).
    pub token: Option<String>,

    /// Number of log partitions for the chat-send topic. Independent of the
    /// storage shard count; also the number of parallel consumer workers.
    pub partitions: usize,

    /// How long logged events are retained.
    pub max_age_secs: u64,
}

impl MessageLogConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for MessageLogConfig {
    fn default() -> Self {
        Self {
            servers: vec!["localhost:4222".to_string()],
            username: None,
            password: None,
            token: None,
            partitions: 4,
            max_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedisConfig {
    /// Redis server addresses; one address means a centralized deployment,
    /// several mean a cluster.
    pub addresses: Vec<String>,

    /// Number of connections to keep in the pool.
    pub pool_size: usize,

    /// The username to use for authentication.
    pub username: Option<String>,

    /// The password to use for authentication.
    pub password: Option<String>,

    /// The database to use.
    pub database: u8,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["localhost:6379".to_string()],
            pool_size: 10,
            username: None,
            password: None,
            database: 0,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "messenger-api".to_string(),
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
            database: DatabaseConfig::default(),
            message_log: MessageLogConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn parse() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(name) = env_var("MSGR_NAME") {
            config.name = name;
        }

        if let Some(level) = env_var("MSGR_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(mode) = env_parse("MSGR_LOG_MODE")? {
            config.logging.mode = mode;
        }

        if let Some(bind_address) = env_parse("MSGR_BIND_ADDRESS")? {
            config.api.bind_address = bind_address;
        }

        if let Some(uris) = env_list("MSGR_DATABASE_SHARDS") {
            config.database.shard_uris = uris;
        }

        if let Some(servers) = env_list("MSGR_NATS_SERVERS") {
            config.message_log.servers = servers;
        }
        config.message_log.username = env_var("MSGR_NATS_USERNAME");
        config.message_log.password = env_var("MSGR_NATS_PASSWORD");
        config.message_log.token = env_var("MSGR_NATS_TOKEN");
        if let Some(partitions) = env_parse("MSGR_MESSAGE_LOG_PARTITIONS")? {
            config.message_log.partitions = partitions;
        }
        if let Some(max_age_secs) = env_parse("MSGR_MESSAGE_LOG_MAX_AGE_SECS")? {
            config.message_log.max_age_secs = max_age_secs;
        }

        if let Some(addresses) = env_list("MSGR_REDIS_ADDRESSES") {
            config.redis.addresses = addresses;
        }
        if let Some(pool_size) = env_parse("MSGR_REDIS_POOL_SIZE")? {
            config.redis.pool_size = pool_size;
        }
        config.redis.username = env_var("MSGR_REDIS_USERNAME");
        config.redis.password = env_var("MSGR_REDIS_PASSWORD");
        if let Some(database) = env_parse("MSGR_REDIS_DATABASE")? {
            config.redis.database = database;
        }

        anyhow::ensure!(
            !config.database.shard_uris.is_empty(),
            "MSGR_DATABASE_SHARDS must name at least one shard"
        );
        anyhow::ensure!(
            config.message_log.partitions > 0,
            "MSGR_MESSAGE_LOG_PARTITIONS must be at least 1"
        );

        Ok(config)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_var(key).map(|value| {
        value
            .split(',')
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect()
    })
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key)
        .map(|value| {
            value
                .parse()
                .map_err(|err| anyhow::anyhow!("invalid {key}={value}: {err}"))
        })
        .transpose()
        .with_context(|| format!("failed to parse {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_reference_deployment() {
        let config = AppConfig::default();

        assert_eq!(config.database.shard_uris.len(), 2);
        assert_eq!(config.message_log.partitions, 4);
        assert_eq!(config.message_log.max_age(), Duration::from_secs(604_800));
        assert_eq!(config.redis.addresses, vec!["localhost:6379"]);
    }

    #[test]
    fn environment_overrides_defaults() {
        std::env::set_var("MSGR_MESSAGE_LOG_PARTITIONS", "8");
        std::env::set_var(
            "MSGR_DATABASE_SHARDS",
            "postgres://db0/messenger, postgres://db1/messenger, postgres://db2/messenger",
        );

        let config = AppConfig::parse().expect("parse");

        assert_eq!(config.message_log.partitions, 8);
        assert_eq!(config.database.shard_uris.len(), 3);
        assert_eq!(config.database.shard_uris[1], "postgres://db1/messenger");

        std::env::remove_var("MSGR_MESSAGE_LOG_PARTITIONS");
        std::env::remove_var("MSGR_DATABASE_SHARDS");
    }
}
