use fred::clients::RedisPool;
use fred::error::RedisError;
use fred::interfaces::SetsInterface;

/// Redis set holding the ids of currently connected users.
const ONLINE_USERS_KEY: &str = "online:users";

/// Online/offline tracking, backed by a remote Redis set so every instance
/// sees the same picture. Injected wherever presence is needed; the pipeline
/// treats failures here as non-fatal.
#[derive(Clone)]
pub struct PresenceStore {
    redis: RedisPool,
}

impl PresenceStore {
    pub fn new(redis: RedisPool) -> Self {
        Self { redis }
    }

    fn member(user_id: i64) -> String {
        format!("user:{user_id}")
    }

    fn parse_member(member: &str) -> Option<i64> {
        member.strip_prefix("user:")?.parse().ok()
    }

    pub async fn set_online(&self, user_id: i64) -> Result<(), RedisError> {
        let _: i64 = self
            .redis
            .sadd(ONLINE_USERS_KEY, Self::member(user_id))
            .await?;

        tracing::debug!(user_id, "user online");
        Ok(())
    }

    pub async fn set_offline(&self, user_id: i64) -> Result<(), RedisError> {
        let _: i64 = self
            .redis
            .srem(ONLINE_USERS_KEY, Self::member(user_id))
            .await?;

        tracing::debug!(user_id, "user offline");
        Ok(())
    }

    pub async fn is_online(&self, user_id: i64) -> Result<bool, RedisError> {
        self.redis
            .sismember(ONLINE_USERS_KEY, Self::member(user_id))
            .await
    }

    pub async fn online_user_ids(&self) -> Result<Vec<i64>, RedisError> {
        let members: Vec<String> = self.redis.smembers(ONLINE_USERS_KEY).await?;

        Ok(members
            .iter()
            .filter_map(|member| Self::parse_member(member))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_key_round_trip() {
        assert_eq!(PresenceStore::member(42), "user:42");
        assert_eq!(PresenceStore::parse_member("user:42"), Some(42));
    }

    #[test]
    fn foreign_set_members_are_ignored() {
        assert_eq!(PresenceStore::parse_member("bot:42"), None);
        assert_eq!(PresenceStore::parse_member("user:abc"), None);
        assert_eq!(PresenceStore::parse_member("user:"), None);
    }
}
