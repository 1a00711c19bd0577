use sqlx::PgPool;

/// Read-side projection of a user. The user service owns this table; the
/// pipeline only reads display data from the primary shard.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl User {
    pub async fn find(primary: &PgPool, user_id: i64) -> sqlx::Result<Option<User>> {
        sqlx::query_as("SELECT id, username, display_name, avatar_url FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(primary)
            .await
    }

    pub async fn find_many(primary: &PgPool, user_ids: &[i64]) -> sqlx::Result<Vec<User>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_as(
            "SELECT id, username, display_name, avatar_url FROM users WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(primary)
        .await
    }
}
